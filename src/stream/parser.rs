use once_cell::sync::Lazy;
use regex::Regex;

use super::{ParsedLine, RawLine};

/// `MM-DD HH:MM:SS.mmm PID TID L TAG: message` (logcat `threadtime`)
static THREADTIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2}\.\d{3})\s+(\d+)\s+(\d+)\s+([VDIWEFA])\s+(\S+?)\s*:\s?(.*)$",
    )
    .expect("Valid regex pattern")
});

/// `(pid)` group that follows the tag in `brief` output
static PID_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\s*\d+\s*\)").expect("Valid regex pattern"));

/// Log line layouts, tried in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    Structured,
    BareTag,
}

impl LineShape {
    pub const ALL: [LineShape; 2] = [LineShape::Structured, LineShape::BareTag];
}

/// Result of matching one shape against a line
enum ShapeMatch {
    Message(String),
    /// The line has this shape but belongs to an inactive tag
    Rejected,
    NoMatch,
}

/// Extracts message text from lines carrying one of the active tags
#[derive(Debug, Clone)]
pub struct LineParser {
    tags: Vec<String>,
}

impl LineParser {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn parse(&self, line: &RawLine) -> Option<ParsedLine> {
        self.parse_message(&line.text).map(|message| ParsedLine {
            device_id: line.device_id.clone(),
            message,
        })
    }

    /// Message text of `text`, or `None` when the line is not ours or is empty
    pub fn parse_message(&self, text: &str) -> Option<String> {
        for shape in LineShape::ALL {
            match self.try_shape(shape, text) {
                ShapeMatch::Message(message) if message.is_empty() => return None,
                ShapeMatch::Message(message) => return Some(message),
                ShapeMatch::Rejected => return None,
                ShapeMatch::NoMatch => continue,
            }
        }
        None
    }

    fn try_shape(&self, shape: LineShape, text: &str) -> ShapeMatch {
        match shape {
            LineShape::Structured => {
                let Some(caps) = THREADTIME.captures(text) else {
                    return ShapeMatch::NoMatch;
                };
                let tag = caps.get(6).map_or("", |m| m.as_str());
                if !self.is_active(tag) {
                    return ShapeMatch::Rejected;
                }
                let message = caps.get(7).map_or("", |m| m.as_str());
                ShapeMatch::Message(message.trim().to_string())
            }
            LineShape::BareTag => {
                let found = self
                    .tags
                    .iter()
                    .filter_map(|tag| text.find(tag.as_str()).map(|pos| (pos, tag)))
                    .min_by_key(|(pos, _)| *pos);
                let Some((pos, tag)) = found else {
                    return ShapeMatch::NoMatch;
                };

                let rest = text[pos + tag.len()..].trim_start();
                let rest = match PID_GROUP.find(rest) {
                    Some(m) => rest[m.end()..].trim_start(),
                    None => rest,
                };
                let rest = rest.strip_prefix(':').unwrap_or(rest);
                ShapeMatch::Message(rest.trim().to_string())
            }
        }
    }

    fn is_active(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LineParser {
        LineParser::new(["OptimizedCarrefour", "CrossAppTracking"])
    }

    #[test]
    fn test_structured_line() {
        let line = "03-14 09:26:53.123  1234  1250 D OptimizedCarrefour: 📄 PAGE CARREFOUR";
        assert_eq!(
            parser().parse_message(line).as_deref(),
            Some("📄 PAGE CARREFOUR")
        );
    }

    #[test]
    fn test_structured_line_keeps_colons_in_message() {
        let line = "03-14 09:26:53.123  1234  1250 I CrossAppTracking: Prix: 2,49 €  ";
        assert_eq!(parser().parse_message(line).as_deref(), Some("Prix: 2,49 €"));
    }

    #[test]
    fn test_structured_line_with_inactive_tag_is_dropped() {
        // Mentions an active tag in the message, but the tag column decides
        let line = "03-14 09:26:53.123  1234  1250 D ActivityManager: OptimizedCarrefour started";
        assert_eq!(parser().parse_message(line), None);
    }

    #[test]
    fn test_brief_line_falls_back_to_bare_tag() {
        let line = "D/OptimizedCarrefour( 4321): ==========";
        assert_eq!(parser().parse_message(line).as_deref(), Some("=========="));

        let line = "I/CrossAppTracking: Rayon fruits";
        assert_eq!(parser().parse_message(line).as_deref(), Some("Rayon fruits"));
    }

    #[test]
    fn test_unrelated_and_empty_lines_are_dropped() {
        let p = parser();
        assert_eq!(p.parse_message("--------- beginning of main"), None);
        assert_eq!(p.parse_message(""), None);
        assert_eq!(
            p.parse_message("03-14 09:26:53.123  1234  1250 D OptimizedCarrefour:   "),
            None
        );
        assert_eq!(p.parse_message("D/OptimizedCarrefour( 4321):"), None);
    }

    #[test]
    fn test_parse_carries_device_id() {
        let raw = RawLine {
            device_id: "emulator-5554".into(),
            text: "D/OptimizedCarrefour( 1): Hello".into(),
        };
        let parsed = parser().parse(&raw).unwrap();
        assert_eq!(parsed.device_id, "emulator-5554");
        assert_eq!(parsed.message, "Hello");
    }

    #[test]
    fn test_only_configured_tags_are_active() {
        let p = LineParser::new(["OptimizedCarrefour"]);
        assert_eq!(p.parse_message("D/CrossAppTracking( 1): legacy"), None);
        assert_eq!(p.tags(), ["OptimizedCarrefour".to_string()]);
    }
}
