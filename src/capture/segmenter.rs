use std::time::Duration;
use tokio::time::Instant;

use super::page::{Capture, CloseReason, PageBuffer};
use super::{is_rule_line, DOCUMENT_MARKER, SHORT_PAGE_MARKER};
use crate::config::CaptureConfig;

/// A closing rule only ends a page holding more lines than this
const END_MARKER_MIN_LINES: usize = 10;
/// A grace-armed page is emitted at its deadline only below this many lines
const SHORT_PAGE_MAX_LINES: usize = 5;

/// Role of a message, relative to the segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    StartMarker,
    EndMarker,
    ShortFormStart,
    Content,
}

impl MessageKind {
    pub fn classify(message: &str, accumulating: bool) -> Self {
        if is_rule_line(message) {
            if accumulating {
                MessageKind::EndMarker
            } else {
                MessageKind::StartMarker
            }
        } else if message.starts_with(DOCUMENT_MARKER) {
            MessageKind::StartMarker
        } else if message.starts_with(SHORT_PAGE_MARKER) {
            MessageKind::ShortFormStart
        } else {
            MessageKind::Content
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterSettings {
    pub short_page_grace: Duration,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for SegmenterSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            short_page_grace: config.short_page_grace,
        }
    }
}

/// Per-device page state machine (Idle / Accumulating).
///
/// Time is passed in by the caller: [`feed`](Self::feed) and
/// [`poll`](Self::poll) take the current instant, and [`deadline`](Self::deadline)
/// tells the caller when `poll` next needs to run.
#[derive(Debug)]
pub struct PageSegmenter {
    device_id: String,
    settings: SegmenterSettings,
    buffer: Option<PageBuffer>,
}

impl PageSegmenter {
    pub fn new(device_id: impl Into<String>, settings: SegmenterSettings) -> Self {
        Self {
            device_id: device_id.into(),
            settings,
            buffer: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    /// Lines held by the open page
    pub fn buffered_lines(&self) -> usize {
        self.buffer.as_ref().map_or(0, PageBuffer::len)
    }

    /// When the armed short-page grace window ends
    pub fn deadline(&self) -> Option<Instant> {
        self.buffer.as_ref().and_then(|buffer| buffer.deadline)
    }

    /// Process one message. An expired grace window is handled first.
    pub fn feed(&mut self, message: &str, now: Instant) -> Option<Capture> {
        let expired = self.poll(now);

        let kind = MessageKind::classify(message, self.is_open());
        let Some(buffer) = self.buffer.as_mut() else {
            self.open(message, kind, now);
            return expired;
        };

        if kind == MessageKind::EndMarker && buffer.len() > END_MARKER_MIN_LINES {
            return self.close(CloseReason::EndMarker);
        }

        buffer.push(message);
        expired
    }

    /// Apply the grace deadline if it has passed
    pub fn poll(&mut self, now: Instant) -> Option<Capture> {
        let buffer = self.buffer.as_mut()?;
        let deadline = buffer.deadline?;
        if now < deadline {
            return None;
        }

        if buffer.len() < SHORT_PAGE_MAX_LINES {
            return self.close(CloseReason::GraceElapsed);
        }

        tracing::trace!(
            "[{}] grace elapsed with {} lines, waiting for a closing rule",
            self.device_id,
            buffer.len()
        );
        buffer.deadline = None;
        None
    }

    /// Drop any open page, e.g. when the device disconnects
    pub fn reset(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            tracing::debug!(
                "[{}] dropping open page with {} lines",
                self.device_id,
                buffer.len()
            );
        }
    }

    fn open(&mut self, message: &str, kind: MessageKind, now: Instant) {
        let deadline = match kind {
            MessageKind::StartMarker if is_rule_line(message) => None,
            MessageKind::StartMarker | MessageKind::ShortFormStart => {
                Some(now + self.settings.short_page_grace)
            }
            MessageKind::EndMarker | MessageKind::Content => {
                tracing::trace!("[{}] ignoring message outside a page", self.device_id);
                return;
            }
        };

        tracing::debug!("[{}] page opened", self.device_id);
        self.buffer = Some(PageBuffer::open(message, now, deadline));
    }

    fn close(&mut self, reason: CloseReason) -> Option<Capture> {
        let buffer = self.buffer.take()?;
        let capture = Capture::from_buffer(&buffer, reason);

        match &capture {
            Some(capture) => tracing::debug!(
                "[{}] page closed ({:?}) after {:?}: {} lines, {} chars",
                self.device_id,
                reason,
                buffer.opened_at.elapsed(),
                buffer.len(),
                capture.text.chars().count()
            ),
            None => tracing::debug!(
                "[{}] page closed ({:?}) with no content, discarded",
                self.device_id,
                reason
            ),
        }
        capture
    }
}
