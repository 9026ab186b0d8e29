// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw log records and alarm payloads into [`Document`]s.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::{Document, DocumentKind};
use crate::errors::DecodeError;
use crate::index::IndexResolver;

/// Positional schema of a log record.
pub const LOG_FIELDS: [&str; 6] = ["timestamp", "level", "device", "message", "ndc", "thread"];

/// Priority for an alarm severity, compared case-insensitively. Unknown severities get 0.
pub fn alarm_priority(severity: &str) -> i64 {
    match severity.to_ascii_uppercase().as_str() {
        "ALARM" | "ERROR" => 400,
        "WARNING" => 300,
        "INFO" => 200,
        "DEBUG" => 100,
        _ => 0,
    }
}

/// Type tag recorded next to a stringified alarm value.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn from_epoch_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

/// Alarm payload as sent by the alarm system. Fields the engine does not interpret are kept in
/// `other` and copied through in their original order.
#[derive(Debug, Deserialize)]
struct AlarmEvent {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default, rename = "@timestamp")]
    canonical_timestamp: Option<Value>,
    #[serde(default)]
    severity: Option<Value>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default)]
    values: Vec<AlarmValue>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AlarmValue {
    attribute: String,
    #[serde(default)]
    value: Value,
}

impl AlarmValue {
    /// The sink holds one type per field for the lifetime of an index, and attribute values
    /// arrive as integers, floats or strings interchangeably. Store the text and remember the
    /// type separately.
    fn stringify(&self) -> Value {
        let mut entry = Map::with_capacity(3);
        entry.insert("attribute".to_string(), Value::String(self.attribute.clone()));
        entry.insert("value".to_string(), Value::String(value_text(&self.value)));
        entry.insert(
            "type".to_string(),
            Value::String(value_type_name(&self.value).to_string()),
        );
        Value::Object(entry)
    }
}

impl AlarmEvent {
    fn event_time(&self) -> Option<DateTime<Utc>> {
        if let Some(millis) = self.timestamp {
            return from_epoch_millis(millis);
        }
        match &self.canonical_timestamp {
            Some(Value::Number(n)) => n.as_f64().and_then(from_epoch_millis),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    fn priority(&self) -> Value {
        match &self.priority {
            Some(priority) => priority.clone(),
            None => {
                let severity = self.severity.as_ref().map(value_text).unwrap_or_default();
                Value::from(alarm_priority(&severity))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    indices: IndexResolver,
}

impl EventNormalizer {
    pub fn new(indices: IndexResolver) -> Self {
        Self { indices }
    }

    /// Maps a positional log record onto [`LOG_FIELDS`]. Missing trailing fields become empty
    /// strings; extra fields are ignored. The first field, when it parses as epoch milliseconds,
    /// is also the document time.
    pub fn normalize_log(&self, record: &[String], received_at: DateTime<Utc>) -> Document {
        if record.len() > LOG_FIELDS.len() {
            debug!(
                "Ignoring {} extra fields in log record",
                record.len() - LOG_FIELDS.len()
            );
        }

        let mut fields = Map::with_capacity(LOG_FIELDS.len());
        for (position, name) in LOG_FIELDS.iter().enumerate() {
            let value = record.get(position).cloned().unwrap_or_default();
            fields.insert((*name).to_string(), Value::String(value));
        }

        let timestamp = record
            .first()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .and_then(from_epoch_millis)
            .unwrap_or(received_at);

        let index = self
            .indices
            .resolve(DocumentKind::Log.category(), received_at);
        Document::new(DocumentKind::Log, index, timestamp, fields)
    }

    /// Decodes an alarm payload. The epoch-millisecond `timestamp` becomes the document time and
    /// is dropped from the fields, a missing priority is derived from the severity, and every
    /// entry of `values` gets a string `value` plus a `type` tag.
    pub fn normalize_alarm(
        &self,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Document, DecodeError> {
        let event: AlarmEvent = serde_json::from_str(payload)?;

        let timestamp = event.event_time().unwrap_or(received_at);
        let priority = event.priority();

        // `timestamp` and `@timestamp` are carried by the document time from here on
        let AlarmEvent {
            severity,
            values,
            other: mut fields,
            ..
        } = event;
        if let Some(severity) = severity {
            fields.insert("severity".to_string(), severity);
        }
        fields.insert("priority".to_string(), priority);
        fields.insert(
            "values".to_string(),
            Value::Array(values.iter().map(AlarmValue::stringify).collect()),
        );

        let index = self
            .indices
            .resolve(DocumentKind::Alarm.category(), received_at);
        Ok(Document::new(DocumentKind::Alarm, index, timestamp, fields))
    }
}
