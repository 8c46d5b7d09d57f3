use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;
use super::runner::{
    ExitStatus, LineStream, ProcessCommand, ProcessControl, ProcessOutput, ProcessRunner,
    ProcessStream, ProcessStreamItem,
};

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted process runner for tests.
///
/// One-shot commands are matched against expectations registered with
/// [`MockProcessRunner::expect_command`]; streaming commands consume one
/// script registered with [`MockProcessRunner::expect_stream`] per spawn.
#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    streams: Arc<Mutex<Vec<MockStreamScript>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
    terminations: Arc<Mutex<Vec<String>>>,
}

struct MockExpectation {
    program: String,
    args_matcher: Option<ArgsMatcher>,
    response: MockResponse,
    times_called: usize,
    expected_times: Option<usize>,
}

enum MockResponse {
    Output(ProcessOutput),
    SpawnFailure(String),
}

struct MockStreamScript {
    program: String,
    args_matcher: Option<ArgsMatcher>,
    lines: Vec<String>,
    hold_open: bool,
    spawn_failure: Option<String>,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

pub struct MockStreamConfig {
    runner: MockProcessRunner,
    script: MockStreamScript,
}

fn matches(program: &str, matcher: &Option<ArgsMatcher>, command: &ProcessCommand) -> bool {
    program == command.program && matcher.as_ref().is_none_or(|m| m(&command.args))
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            streams: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
            terminations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn expect_command(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: MockResponse::Output(ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(10),
                }),
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn expect_stream(&self, program: &str) -> MockStreamConfig {
        MockStreamConfig {
            runner: self.clone(),
            script: MockStreamScript {
                program: program.to_string(),
                args_matcher: None,
                lines: Vec::new(),
                hold_open: false,
                spawn_failure: None,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = lock(&self.call_history);
        history.iter().filter(|cmd| cmd.program == program).count() == times
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        lock(&self.call_history).clone()
    }

    /// Commands whose streams were terminated through their control handle
    pub fn terminated(&self) -> Vec<String> {
        lock(&self.terminations).clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        lock(&self.call_history).push(command.clone());

        let mut expectations = lock(&self.expectations);
        for expectation in expectations.iter_mut() {
            if !matches(&expectation.program, &expectation.args_matcher, &command) {
                continue;
            }

            expectation.times_called += 1;
            if let Some(expected) = expectation.expected_times {
                if expectation.times_called > expected {
                    return Err(ProcessError::MockExpectationNotMet(format!(
                        "Command '{}' called {} times, expected {}",
                        command.program, expectation.times_called, expected
                    )));
                }
            }

            return match &expectation.response {
                MockResponse::Output(output) => Ok(output.clone()),
                MockResponse::SpawnFailure(message) => Err(ProcessError::SpawnFailed {
                    command: command.display(),
                    source: std::io::Error::other(message.clone()),
                }),
            };
        }

        Err(ProcessError::MockExpectationNotMet(format!(
            "No expectation found for command: {}",
            command.display()
        )))
    }

    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError> {
        lock(&self.call_history).push(command.clone());

        let script = {
            let mut streams = lock(&self.streams);
            let position = streams
                .iter()
                .position(|s| matches(&s.program, &s.args_matcher, &command))
                .ok_or_else(|| {
                    ProcessError::MockExpectationNotMet(format!(
                        "No stream script found for command: {}",
                        command.display()
                    ))
                })?;
            streams.remove(position)
        };

        if let Some(message) = script.spawn_failure {
            return Err(ProcessError::SpawnFailed {
                command: command.display(),
                source: std::io::Error::other(message),
            });
        }

        let token = CancellationToken::new();
        let tail: LineStream = if script.hold_open {
            let token = token.clone();
            Box::pin(
                futures::stream::once(async move { token.cancelled().await })
                    .filter_map(|_| futures::future::ready(None::<ProcessStreamItem>)),
            )
        } else {
            Box::pin(futures::stream::empty())
        };
        let lines = futures::stream::iter(script.lines.into_iter().map(Ok)).chain(tail);

        Ok(ProcessStream {
            lines: Box::pin(lines),
            control: Box::new(MockControl {
                token,
                command: command.display(),
                terminations: Arc::clone(&self.terminations),
            }),
        })
    }
}

struct MockControl {
    token: CancellationToken,
    command: String,
    terminations: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProcessControl for MockControl {
    fn id(&self) -> Option<u32> {
        (!self.token.is_cancelled()).then_some(4242)
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<ExitStatus, ProcessError> {
        self.token.cancel();
        lock(&self.terminations).push(self.command.clone());
        Ok(ExitStatus::Signal(15))
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        if let MockResponse::Output(output) = &mut self.expectation.response {
            output.stdout = stdout.to_string();
        }
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        if let MockResponse::Output(output) = &mut self.expectation.response {
            output.status = if code == 0 {
                ExitStatus::Success
            } else {
                ExitStatus::Error(code)
            };
        }
        self
    }

    pub fn fails_to_spawn(mut self, message: &str) -> Self {
        self.expectation.response = MockResponse::SpawnFailure(message.to_string());
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        lock(&self.runner.expectations).push(self.expectation);
    }
}

impl MockStreamConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.script.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn emits_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Keep the stream pending after the scripted lines until it is terminated
    pub fn stays_open(mut self) -> Self {
        self.script.hold_open = true;
        self
    }

    pub fn fails_to_spawn(mut self, message: &str) -> Self {
        self.script.spawn_failure = Some(message.to_string());
        self
    }

    pub fn finish(self) {
        lock(&self.runner.streams).push(self.script);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
