use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process exited with code {0}")]
    ExitCode(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output of '{0}' was not captured")]
    MissingPipe(String),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}
