use super::page::ContentKind;
use super::{DOCUMENT_MARKER, VISUAL_MARKER};

const MARKERS: [(&str, ContentKind); 2] = [
    (DOCUMENT_MARKER, ContentKind::Document),
    (VISUAL_MARKER, ContentKind::Visual),
];

/// Decides what a captured buffer contains
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentClassifier {
    unmarked_as_document: bool,
}

impl ContentClassifier {
    pub fn new(unmarked_as_document: bool) -> Self {
        Self {
            unmarked_as_document,
        }
    }

    /// Kind and content of `text`.
    ///
    /// The earliest marker picks the kind; content runs to the next marker of
    /// either kind (or the end) and is trimmed. Returns `None` when no marker
    /// is present or the content is empty.
    pub fn classify(&self, text: &str) -> Option<(ContentKind, String)> {
        let Some((start, marker, kind)) = MARKERS
            .iter()
            .filter_map(|(marker, kind)| text.find(marker).map(|pos| (pos, *marker, *kind)))
            .min_by_key(|(pos, _, _)| *pos)
        else {
            return self.classify_unmarked(text);
        };

        let body = &text[start + marker.len()..];
        let end = MARKERS
            .iter()
            .filter_map(|(marker, _)| body.find(marker))
            .min()
            .unwrap_or(body.len());

        let content = body[..end].trim();
        if content.is_empty() {
            tracing::debug!("Marker {:?} found but no content follows", marker);
            return None;
        }
        Some((kind, content.to_string()))
    }

    fn classify_unmarked(&self, text: &str) -> Option<(ContentKind, String)> {
        let content = text.trim();
        if self.unmarked_as_document && !content.is_empty() {
            return Some((ContentKind::Document, content.to_string()));
        }
        tracing::debug!("No content marker in {} chars of capture", text.len());
        None
    }
}
