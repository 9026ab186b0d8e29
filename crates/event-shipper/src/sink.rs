// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde_json::Value;

use crate::document::Document;
use crate::errors::SinkError;

/// A document the sink refused while accepting the rest of its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position of the document in the submitted batch
    pub position: usize,
    pub id: Option<String>,
    pub status: u16,
    pub reason: String,
}

impl ItemFailure {
    /// Throttling and server-side failures may succeed later; anything else (mapping conflicts,
    /// unparseable fields) will be rejected again.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub inserted: usize,
    pub failures: Vec<ItemFailure>,
}

/// The document store events are shipped to.
///
/// Implementations own their transport, including any request timeout.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Lightweight liveness probe. `Ok(false)` means the sink answered but is not accepting
    /// traffic; `Err` means it could not be reached.
    async fn ping(&self) -> Result<bool, SinkError>;

    async fn index_exists(&self, index: &str) -> Result<bool, SinkError>;

    /// Creates `index` with the given settings/mappings body. Must report a concurrent creation
    /// as [`SinkError::IndexAlreadyExists`].
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SinkError>;

    /// Writes all documents in one request, each under its own id.
    async fn bulk_insert(&self, documents: &[Document]) -> Result<BulkResponse, SinkError>;
}
