// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Field mappings used when an index is created on first use.
//!
//! Explicit mappings keep `@timestamp` a date for time-series dashboards and stop the sink from
//! guessing a type for `values.value` from whichever alarm happens to arrive first.

use serde_json::{json, Value};

use crate::document::DocumentKind;

/// Request body for creating an index that holds documents of `kind`.
pub fn index_body(kind: DocumentKind) -> Value {
    json!({ "mappings": mapping(kind) })
}

pub fn mapping(kind: DocumentKind) -> Value {
    match kind {
        DocumentKind::Log => json!({
            "properties": {
                "@timestamp": { "type": "date" },
                "timestamp": { "type": "keyword" },
                "level": { "type": "keyword" },
                "device": { "type": "keyword" },
                "message": { "type": "text" },
                "ndc": { "type": "keyword" },
                "thread": { "type": "keyword" }
            }
        }),
        DocumentKind::Alarm => json!({
            "properties": {
                "@timestamp": { "type": "date" },
                "alarm_tag": { "type": "keyword" },
                "description": { "type": "text" },
                "device": { "type": "keyword" },
                "formula": { "type": "text" },
                "host": { "type": "keyword" },
                // random uuid4 per alarm instance
                "instance": { "type": "keyword" },
                // ALARM, RESET, ...
                "message": { "type": "keyword" },
                "priority": { "type": "integer" },
                "severity": { "type": "keyword" },
                "active_since": { "type": "date", "format": "date_optional_time||epoch_millis" },
                "recovered_at": { "type": "date", "format": "date_optional_time||epoch_millis" },
                "user_comment": { "type": "text" },
                "values": {
                    "properties": {
                        "attribute": { "type": "keyword" },
                        "value": { "type": "keyword" },
                        "type": { "type": "keyword" }
                    }
                }
            }
        }),
    }
}
