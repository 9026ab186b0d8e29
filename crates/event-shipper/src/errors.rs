// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::document::Document;

/// An alarm payload that could not be turned into a document.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("alarm payload is not a valid event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returned by the queue when it has no free slot. Hands the rejected document back.
#[derive(Debug, thiserror::Error)]
#[error("queue is full ({capacity} events)")]
pub struct QueueFull {
    pub document: Document,
    pub capacity: usize,
}

/// Failures talking to the document sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot connect to sink: {0}")]
    Connection(String),

    #[error("sink refused credentials (status {status})")]
    Auth { status: u16 },

    #[error("sink responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("index {0} already exists")]
    IndexAlreadyExists(String),

    #[error("failed to encode payload: {0}")]
    Payload(String),

    #[error("unexpected sink response: {0}")]
    Response(String),
}

impl SinkError {
    /// True when the sink could not be talked to at all: transport failures (DNS, socket, TLS,
    /// timeouts) and rejected credentials. Neither goes away without operator action.
    pub fn is_connection(&self) -> bool {
        matches!(self, SinkError::Connection(_) | SinkError::Auth { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("event shipper is not running")]
    Stopped,

    #[error("flush loop dropped the response")]
    NoResponse,
}
