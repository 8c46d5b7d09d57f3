//! Page reconstruction from parsed log messages.
//!
//! A [`PageSegmenter`] turns the message sequence of one device into
//! [`Capture`]s; a [`ContentClassifier`] then decides whether a capture is a
//! document or a visual page and extracts its content.

pub mod classifier;
pub mod page;
pub mod segmenter;

pub use classifier::ContentClassifier;
pub use page::{is_deliverable, Capture, CloseReason, ContentKind, Page, PageBuffer};
pub use segmenter::{MessageKind, PageSegmenter, SegmenterSettings};

/// Opens a document page and marks the start of its content
pub const DOCUMENT_MARKER: &str = "📄 PAGE CARREFOUR";
/// Marks the start of visual (HTML) content
pub const VISUAL_MARKER: &str = "🎨 PAGE VISUELLE";
/// Opens a short page that may never see a closing rule
pub const SHORT_PAGE_MARKER: &str = "# 🛒 Page Carrefour";

const MIN_RULE_LEN: usize = 4;

/// A line made only of `=`, at least four of them
pub fn is_rule_line(line: &str) -> bool {
    let line = line.trim();
    line.len() >= MIN_RULE_LEN && line.bytes().all(|b| b == b'=')
}
