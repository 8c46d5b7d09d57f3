use thiserror::Error;

use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Device tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("No devices reachable")]
    NoDevices,

    #[error("Device {device_id} unavailable: {reason}")]
    DeviceUnavailable { device_id: String, reason: String },

    #[error("Log stream for {device_id} failed: {message}")]
    StreamRead { device_id: String, message: String },

    #[error("Forward failed for page {page_id}: {message}")]
    Forward { page_id: String, message: String },

    #[error("Cannot bind hub to {addr}: {source}")]
    HubBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Push to subscriber {0} failed")]
    SubscriberPush(String),
}

impl Error {
    pub fn device_unavailable(device_id: impl Into<String>, reason: impl ToString) -> Self {
        Error::DeviceUnavailable {
            device_id: device_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn stream_read(device_id: impl Into<String>, message: impl ToString) -> Self {
        Error::StreamRead {
            device_id: device_id.into(),
            message: message.to_string(),
        }
    }

    pub fn forward(page_id: impl ToString, message: impl ToString) -> Self {
        Error::Forward {
            page_id: page_id.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error should terminate the process rather than a single worker.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoDevices
                | Error::ToolUnavailable(_)
                | Error::HubBind { .. }
                | Error::Config(_)
                | Error::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
