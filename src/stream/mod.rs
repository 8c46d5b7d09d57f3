//! Per-device log streams and line parsing

pub mod parser;
pub mod reader;

pub use parser::{LineParser, LineShape};
pub use reader::{LogStream, StreamEvent, StreamReader};

/// One line of log output, as read from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub device_id: String,
    pub text: String,
}

/// Message text extracted from a line with an active tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub device_id: String,
    pub message: String,
}
