//! JSONL layer.
//!
//! Each event becomes one JSON object:
//! - timestamp (RFC 3339, microseconds, UTC)
//! - level
//! - service
//! - pid
//! - target
//! - message
//! - fields (omitted when empty)
//! - span (innermost span name, if any)
//!
//! Fields whose name marks them as a secret are replaced with `"<redacted>"`.

use crate::file_writer::JsonlFileWriter;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const REDACTED: &str = "<redacted>";
const SECRET_FIELDS: &[&str] = &["password", "secret", "token"];

/// One line of the JSONL log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: &'static str,
    pub service: String,
    pub pid: u32,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

fn is_secret(name: &str) -> bool {
    SECRET_FIELDS.iter().any(|secret| name.contains(secret))
}

#[derive(Default)]
struct EntryVisitor {
    fields: BTreeMap<String, Value>,
    message: Option<String>,
}

impl EntryVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else if is_secret(name) {
            self.fields
                .insert(name.to_string(), Value::String(REDACTED.to_string()));
        } else {
            self.fields.insert(name.to_string(), value);
        }
    }
}

impl Visit for EntryVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

/// Layer that writes every event as a JSON line.
pub struct JsonLayer {
    service_name: String,
    pid: u32,
    writer: JsonlFileWriter,
}

impl JsonLayer {
    pub fn new(service_name: impl Into<String>, writer: JsonlFileWriter) -> Self {
        Self {
            service_name: service_name.into(),
            pid: std::process::id(),
            writer,
        }
    }

    fn entry<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();

        LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            level: level_name(*metadata.level()),
            service: self.service_name.clone(),
            pid: self.pid,
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            span: ctx.event_span(event).map(|span| span.name().to_string()),
        }
    }
}

impl<S> Layer<S> for JsonLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let entry = self.entry(event, &ctx);
        if let Ok(line) = serde_json::to_string(&entry) {
            // Nowhere left to report a failed log write.
            let _ = self.writer.write_line(&line);
        }
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARN",
        Level::ERROR => "ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tracing_subscriber::layer::SubscriberExt;

    fn read_entries(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_event_written_as_json_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("herald.jsonl");
        let layer = JsonLayer::new("herald", JsonlFileWriter::open(&path).unwrap());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(code = "M600", attempts = 3u64, ok = false, "Rule skipped");
        });

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry["level"], "WARN");
        assert_eq!(entry["service"], "herald");
        assert_eq!(entry["message"], "Rule skipped");
        assert_eq!(entry["fields"]["code"], "M600");
        assert_eq!(entry["fields"]["attempts"], 3);
        assert_eq!(entry["fields"]["ok"], false);
        assert!(entry.get("span").is_none());
    }

    #[test]
    fn test_secret_fields_redacted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("herald.jsonl");
        let layer = JsonLayer::new("herald", JsonlFileWriter::open(&path).unwrap());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("connect");
            let _guard = span.enter();
            tracing::info!(jid = "me@example.com", password = "hunter2", "Login");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("hunter2"));

        let entries = read_entries(&path);
        assert_eq!(entries[0]["fields"]["password"], REDACTED);
        assert_eq!(entries[0]["fields"]["jid"], "me@example.com");
        assert_eq!(entries[0]["span"], "connect");
    }

    #[test]
    fn test_empty_fields_omitted() {
        let entry = LogEntry {
            timestamp: "2024-01-15T10:30:00.000000Z".to_string(),
            level: "INFO",
            service: "herald".to_string(),
            pid: 12345,
            target: "herald::session".to_string(),
            message: "Sending message".to_string(),
            fields: BTreeMap::new(),
            span: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"pid\":12345"));
        assert!(!json.contains("fields"));
        assert!(!json.contains("span"));
    }
}
