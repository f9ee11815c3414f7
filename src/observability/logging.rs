//! Structured JSON log records with recursive redaction of sensitive
//! fields.
//!
//! Every log call produces one single-line JSON record: `timestamp`
//! (ISO-8601 with microsecond precision, UTC), `level`, `component`,
//! `message`, each non-empty correlation ID at the top level, and a nested
//! `context` object carrying technical details. The context tree is passed
//! through the redactor before serialization.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::ResultMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Field names whose values must never reach a log sink. Matched against
/// lowercased key names, by equality or substring.
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "api_key",
    "secret",
    "token",
    "access_token",
    "refresh_token",
    "authorization",
    "credit_card",
    "ssn",
    "email",
    "phone",
];

pub const REDACTED: &str = "[REDACTED]";

fn is_sensitive(field_name: &str) -> bool {
    let lower = field_name.to_lowercase();
    SENSITIVE_FIELDS
        .iter()
        .any(|pii| lower == *pii || lower.contains(pii))
}

/// Recursively replace the values of sensitive fields with `"[REDACTED]"`.
/// Recurses through nested objects and arrays; idempotent.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive(key) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    redact(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item);
            }
        }
        _ => {}
    }
}

/// ISO-8601 UTC timestamp with exactly six fractional digits and a `Z`
/// suffix, e.g. `2025-03-01T12:34:56.123456Z`.
pub fn iso8601_micros(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Build the serialized log line. The caller decides which stream(s) it
/// goes to.
pub fn format_record(
    worker_id: &str,
    level: LogLevel,
    message: &str,
    meta: &ResultMetadata,
    context: Value,
) -> String {
    let mut entry = serde_json::Map::new();
    entry.insert(
        "timestamp".to_string(),
        Value::String(iso8601_micros(Utc::now())),
    );
    entry.insert("level".to_string(), Value::String(level.as_str().to_string()));
    entry.insert("component".to_string(), Value::String("worker".to_string()));
    entry.insert("message".to_string(), Value::String(message.to_string()));

    for (key, value) in [
        ("tenant_id", &meta.tenant_id),
        ("run_id", &meta.run_id),
        ("flow_id", &meta.flow_id),
        ("step_id", &meta.step_id),
        ("trace_id", &meta.trace_id),
    ] {
        if !value.is_empty() {
            entry.insert(key.to_string(), Value::String(value.clone()));
        }
    }

    let mut context_obj = match context {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("details".to_string(), other);
            map
        }
    };
    context_obj.insert(
        "worker_id".to_string(),
        Value::String(worker_id.to_string()),
    );
    let mut context_value = Value::Object(context_obj);
    redact(&mut context_value);
    entry.insert("context".to_string(), context_value);

    Value::Object(entry).to_string()
}
