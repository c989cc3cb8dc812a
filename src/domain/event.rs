//! Durable decision events.
//!
//! One record per terminal or redaction decision, appended to the event log
//! and served back through `/api/logs`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Category of a logged decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A prompt or a generated response was refused.
    Block,
    /// PII was masked from a prompt or response.
    Redact,
    /// The request completed and a response was returned.
    Success,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Block => write!(f, "BLOCK"),
            EventType::Redact => write!(f, "REDACT"),
            EventType::Success => write!(f, "SUCCESS"),
        }
    }
}

/// An append-only audit record; never mutated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShieldEvent {
    /// What happened.
    pub event_type: EventType,

    /// When it happened (UTC).
    pub timestamp: DateTime<Utc>,

    /// Truncated, redaction-scrubbed excerpt of the text the decision was
    /// about. Never longer than the configured preview length.
    pub preview: String,

    /// Flat string metadata: detector, status, reason, request id.
    pub metadata: BTreeMap<String, String>,
}

impl ShieldEvent {
    pub fn new(event_type: EventType, preview: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            preview: preview.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Truncate `text` to at most `max_chars` characters, appending an
    /// ellipsis when anything was cut. Character-based so multi-byte input
    /// never splits.
    pub fn preview_of(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let mut preview: String = text.chars().take(max_chars).collect();
        preview.push('…');
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&EventType::Block).unwrap(),
            "\"BLOCK\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::Success).unwrap(),
            "\"SUCCESS\""
        );
    }

    #[test]
    fn test_preview_within_limit_is_unchanged() {
        assert_eq!(ShieldEvent::preview_of("short", 10), "short");
    }

    #[test]
    fn test_preview_truncates_with_ellipsis() {
        let preview = ShieldEvent::preview_of("abcdefghij", 4);
        assert_eq!(preview, "abcd…");
        assert_eq!(preview.chars().count(), 5);
    }

    #[test]
    fn test_preview_is_char_safe() {
        let preview = ShieldEvent::preview_of("héllo wörld", 6);
        assert_eq!(preview, "héllo …");
    }

    #[test]
    fn test_event_round_trips_metadata() {
        let event = ShieldEvent::new(EventType::Redact, "masked text")
            .with_meta("detector", "pii_redaction")
            .with_meta("status", "redacted");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ShieldEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.metadata["detector"], "pii_redaction");
        assert_eq!(parsed.preview, "masked text");
    }
}
