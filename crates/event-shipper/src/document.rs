// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Name of the canonical time field written into every document body.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Log,
    Alarm,
}

impl DocumentKind {
    /// Index category, the middle part of `<prefix>-<category>-<date>`.
    pub fn category(self) -> &'static str {
        match self {
            DocumentKind::Log => "logs",
            DocumentKind::Alarm => "alarms",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Log => "log",
            DocumentKind::Alarm => "alarm",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized event, ready for bulk insertion.
///
/// Documents are immutable once built. The id is generated at construction and is used as the
/// sink document id, so a document that goes back on the queue after a failed insert is written
/// under the same id on the next attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    kind: DocumentKind,
    index: String,
    timestamp: DateTime<Utc>,
    fields: Map<String, Value>,
}

impl Document {
    pub fn new(
        kind: DocumentKind,
        index: String,
        timestamp: DateTime<Utc>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            index,
            timestamp,
            fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The body stored in the sink: the canonical time field followed by the document fields.
    pub fn source(&self) -> Map<String, Value> {
        let mut source = Map::with_capacity(self.fields.len() + 1);
        source.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (name, value) in &self.fields {
            source.insert(name.clone(), value.clone());
        }
        source
    }
}
