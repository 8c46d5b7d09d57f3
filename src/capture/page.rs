use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

use super::is_rule_line;
use crate::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Document,
    Visual,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Document => f.write_str("document"),
            ContentKind::Visual => f.write_str("visual"),
        }
    }
}

/// A completed, classified page. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: Uuid,
    pub device_id: String,
    pub device_info: Device,
    pub content_kind: ContentKind,
    pub content: String,
    pub captured_at: DateTime<Utc>,
}

impl Page {
    pub fn new(device: &Device, content_kind: ContentKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            device_info: device.clone(),
            content_kind,
            content: content.into(),
            captured_at: Utc::now(),
        }
    }
}

/// Lines collected for the page currently being captured
#[derive(Debug, Clone)]
pub struct PageBuffer {
    pub lines: Vec<String>,
    pub opened_at: Instant,
    /// Short-page grace deadline, if one is armed
    pub deadline: Option<Instant>,
}

impl PageBuffer {
    pub fn open(first_line: &str, now: Instant, deadline: Option<Instant>) -> Self {
        Self {
            lines: vec![first_line.to_string()],
            opened_at: now,
            deadline,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn push(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// How a capture was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    EndMarker,
    GraceElapsed,
}

/// Text of a closed buffer, rule lines stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub text: String,
    pub line_count: usize,
    pub reason: CloseReason,
}

impl Capture {
    /// Strip rule lines and trim; `None` when nothing is left.
    pub fn from_buffer(buffer: &PageBuffer, reason: CloseReason) -> Option<Self> {
        let text = buffer
            .lines
            .iter()
            .filter(|line| !is_rule_line(line))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim();

        (!text.is_empty()).then(|| Self {
            text: text.to_string(),
            line_count: buffer.len(),
            reason,
        })
    }
}

/// Classified content is delivered only when it is longer than `min_chars` characters
pub fn is_deliverable(content: &str, min_chars: usize) -> bool {
    content.trim().chars().count() > min_chars
}
