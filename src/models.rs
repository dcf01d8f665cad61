use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media attached to a chat row. Detection precedence during extraction is
/// voice > image > video; `Document` and `Sticker` exist for wire
/// compatibility with downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    None,
    Image,
    Voice,
    Video,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::None => "none",
            MediaKind::Image => "image",
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }

    pub fn is_some(self) -> bool {
        self != MediaKind::None
    }
}

/// Where a row's timestamp came from. `Fallback` timestamps are wall-clock
/// stamps taken during backlog scrolling and are known to be unreliable;
/// the retention filter must never reject a row because of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampSource {
    Structured,
    VisibleLabel,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Demarcation,
    Stock,
    Order,
    Instruction,
    Image,
    Voice,
    Video,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Demarcation => "demarcation",
            Category::Stock => "stock",
            Category::Order => "order",
            Category::Instruction => "instruction",
            Category::Image => "image",
            Category::Voice => "voice",
            Category::Video => "video",
            Category::Other => "other",
        }
    }
}

/// One decomposed item line: string-encoded count plus the product text with
/// packaging descriptors preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub quantity: String,
    pub product: String,
    pub raw: String,
}

/// One captured chat row, created by the extractor and enriched in place by
/// the classifier and the attribution parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat: String,
    pub sender: String,
    pub content: String,
    pub cleaned_content: String,
    #[serde(default)]
    pub media_type: MediaKind,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_info: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub message_type: Category,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub parsed_items: Vec<Item>,
    #[serde(default)]
    pub expansion_failed: bool,
    pub fingerprint: u64,
    /// Capture sequence within the session; tie-break for chronological sort.
    #[serde(skip)]
    pub seq: u64,
}

impl Message {
    pub fn has_payload(&self) -> bool {
        !self.content.trim().is_empty() || self.media_type.is_some()
    }

    /// Non-blank trimmed lines of the cleaned content.
    pub fn lines(&self) -> Vec<&str> {
        self.cleaned_content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// One company's consolidated order. Immutable once consolidation returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub company_name: String,
    pub items_text: Vec<String>,
    pub instructions: Vec<String>,
    /// Earliest timestamp among contributing messages.
    pub timestamp: DateTime<Utc>,
    pub message_ids: Vec<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn message(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            chat: "ORDERS Restaurants".to_string(),
            sender: "Group Member".to_string(),
            content: content.to_string(),
            cleaned_content: content.to_string(),
            media_type: MediaKind::None,
            media_url: None,
            media_info: None,
            timestamp: Utc.with_ymd_and_hms(2025, 9, 13, 8, 0, 0).unwrap(),
            timestamp_source: TimestampSource::Structured,
            scraped_at: Utc.with_ymd_and_hms(2025, 9, 13, 9, 0, 0).unwrap(),
            message_type: Category::Other,
            company_name: None,
            parsed_items: Vec::new(),
            expansion_failed: false,
            fingerprint: 0,
            seq: 0,
        }
    }

    #[test]
    fn payload_requires_text_or_media() {
        let mut m = message("a", "");
        assert!(!m.has_payload());
        m.media_type = MediaKind::Voice;
        assert!(m.has_payload());
        m.media_type = MediaKind::None;
        m.content = "2x tomatoes".to_string();
        assert!(m.has_payload());
    }

    #[test]
    fn lines_skip_blanks() {
        let m = message("a", "first\n\n  second  \n");
        assert_eq!(m.lines(), vec!["first", "second"]);
    }

    #[test]
    fn media_kind_wire_names() {
        assert_eq!(serde_json::to_string(&MediaKind::Voice).unwrap(), "\"voice\"");
        assert_eq!(
            serde_json::to_string(&TimestampSource::VisibleLabel).unwrap(),
            "\"visible-label\""
        );
    }
}
