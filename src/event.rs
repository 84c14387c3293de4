//! Event capability consumed by the publisher
//!
//! The publishing core only needs two things from an event: its wire
//! payload and template expansion against its fields. [`OutboundEvent`]
//! captures that; [`LogEvent`] is the concrete structured log event fed in
//! by the binary.
//!
//! Template references:
//!
//! - `%{field}` - a top-level field (`message`, `@timestamp`, `tags` or any
//!   extra field); dotted paths such as `%{http.status}` walk nested objects
//! - `%{+FORMAT}` - the event timestamp rendered with a strftime pattern,
//!   e.g. `logs-%{+%Y.%m.%d}`
//!
//! References that cannot be resolved are left in place.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;

static FIELD_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\{([^}]+)\}").expect("field reference pattern is valid"));

/// What the publisher needs from an event
pub trait OutboundEvent: Send + Sync {
    /// Canonical wire payload
    fn to_payload(&self) -> Result<Bytes, serde_json::Error>;

    /// Expand a template string against this event's fields
    fn format(&self, template: &str) -> String;
}

/// Structured log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "@timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEvent {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            tags: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Build an event from one input line
    ///
    /// JSON object lines are decoded field by field; anything else becomes
    /// the message of a fresh event.
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim_start().starts_with('{') {
            if let Ok(event) = serde_json::from_str::<LogEvent>(trimmed) {
                return event;
            }
        }
        Self::new(trimmed)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_field<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Look up a field by name or dotted path
    pub fn field(&self, path: &str) -> Option<String> {
        match path {
            "message" => return Some(self.message.clone()),
            "@timestamp" => return Some(self.timestamp.to_rfc3339()),
            "tags" => return Some(self.tags.join(",")),
            _ => {}
        }

        let value = match self.extra.get(path) {
            Some(value) => value,
            None => {
                let mut parts = path.split('.');
                let mut current = self.extra.get(parts.next()?)?;
                for part in parts {
                    current = current.as_object()?.get(part)?;
                }
                current
            }
        };

        Some(render_value(value))
    }

    fn format_timestamp(&self, pattern: &str) -> Option<String> {
        let mut rendered = String::new();
        // chrono reports bad specifiers through fmt::Error
        write!(rendered, "{}", self.timestamp.format(pattern)).ok()?;
        Some(rendered)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl OutboundEvent for LogEvent {
    fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    fn format(&self, template: &str) -> String {
        if !template.contains("%{") {
            return template.to_string();
        }

        FIELD_REFERENCE
            .replace_all(template, |caps: &Captures| {
                let reference = &caps[1];
                let resolved = match reference.strip_prefix('+') {
                    Some(pattern) => self.format_timestamp(pattern),
                    None => self.field(reference),
                };
                resolved.unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_event() -> LogEvent {
        LogEvent::new("disk almost full")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap())
            .with_tag("ops")
            .with_tag("disk")
            .with_field("service", json!("storage"))
            .with_field("host", json!({"name": "node-7", "zone": "eu-1"}))
            .with_field("usage", json!(0.93))
    }

    #[test]
    fn test_format_plain_template_unchanged() {
        assert_eq!(sample_event().format("logs"), "logs");
        assert_eq!(sample_event().format(""), "");
    }

    #[test]
    fn test_format_top_level_fields() {
        let event = sample_event();
        assert_eq!(event.format("svc.%{service}"), "svc.storage");
        assert_eq!(event.format("%{message}"), "disk almost full");
        assert_eq!(event.format("%{tags}"), "ops,disk");
        assert_eq!(event.format("u=%{usage}"), "u=0.93");
    }

    #[test]
    fn test_format_nested_path() {
        let event = sample_event();
        assert_eq!(event.format("%{host.zone}.%{host.name}"), "eu-1.node-7");
    }

    #[test]
    fn test_format_timestamp_pattern() {
        let event = sample_event();
        assert_eq!(event.format("logs-%{+%Y.%m.%d}"), "logs-2024.03.09");
        assert_eq!(event.format("%{@timestamp}"), "2024-03-09T14:05:00+00:00");
    }

    #[test]
    fn test_format_unresolved_reference_left_verbatim() {
        let event = sample_event();
        assert_eq!(event.format("x.%{missing}"), "x.%{missing}");
        assert_eq!(event.format("%{host.region}"), "%{host.region}");
    }

    #[test]
    fn test_payload_shape() {
        let payload = sample_event().to_payload().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["message"], "disk almost full");
        assert_eq!(value["@timestamp"], "2024-03-09T14:05:00Z");
        assert_eq!(value["tags"], json!(["ops", "disk"]));
        assert_eq!(value["service"], "storage");
        assert_eq!(value["host"]["zone"], "eu-1");
    }

    #[test]
    fn test_payload_omits_empty_tags() {
        let payload = LogEvent::new("hi").to_payload().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn test_from_line_json() {
        let event = LogEvent::from_line(
            r#"{"@timestamp":"2024-01-01T00:00:00Z","message":"boot","level":"info"}"#,
        );
        assert_eq!(event.message, "boot");
        assert_eq!(event.extra["level"], "info");
        assert_eq!(event.format("%{+%Y}"), "2024");
    }

    #[test]
    fn test_from_line_plain_text() {
        let event = LogEvent::from_line("plain text line\n");
        assert_eq!(event.message, "plain text line");
        assert!(event.extra.is_empty());
    }

    #[test]
    fn test_from_line_malformed_json_kept_as_message() {
        let event = LogEvent::from_line("{not json");
        assert_eq!(event.message, "{not json");
    }

    proptest! {
        #[test]
        fn prop_templates_without_references_are_identity(template in "[a-zA-Z0-9._ -]{0,40}") {
            prop_assert_eq!(sample_event().format(&template), template);
        }

        #[test]
        fn prop_string_fields_expand_verbatim(value in "[a-zA-Z0-9._-]{1,20}") {
            let event = LogEvent::new("m").with_field("key", json!(value.clone()));
            prop_assert_eq!(event.format("%{key}"), value);
        }
    }
}
