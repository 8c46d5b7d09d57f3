//! Subprocess abstraction used for the device tool.
//!
//! Everything that talks to `adb` goes through [`ProcessRunner`], so the
//! registry and the stream reader can be exercised against
//! [`MockProcessRunner`] without a device attached.

pub mod error;
pub mod mock;
pub mod runner;


pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner, MockStreamConfig};
pub use runner::{
    ExitStatus, LineStream, ProcessCommand, ProcessControl, ProcessOutput, ProcessRunner,
    ProcessStream, TokioProcessRunner,
};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }
}
