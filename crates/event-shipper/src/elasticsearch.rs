// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`Sink`] implementation speaking the Elasticsearch REST API.
//!
//! Documents are written with the `_bulk` endpoint as NDJSON, one action line followed by one
//! source line per document:
//!
//! ```text
//! {"index":{"_index":"tango-logs-2016.04.05","_id":"5f0c..."}}
//! {"@timestamp":"2016-04-05T10:00:00.000Z","level":"INFO",...}
//! ```
//!
//! Passing the document id makes a repeated insert overwrite instead of duplicate.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::document::Document;
use crate::errors::SinkError;
use crate::sink::{BulkResponse, ItemFailure, Sink};

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkApiItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItem {
    #[serde(default, rename = "_id")]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkApiItem {
    fn reason(&self) -> String {
        match &self.error {
            Some(error) => error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
            None => format!("status {}", self.status),
        }
    }
}

fn transport_error(e: reqwest::Error) -> SinkError {
    SinkError::Connection(e.to_string())
}

async fn status_error(response: Response) -> SinkError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SinkError::Status { status, body }
}

impl ElasticsearchSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Builds the NDJSON body of a bulk request.
    pub fn bulk_body(documents: &[Document]) -> Result<String, SinkError> {
        let mut body = String::new();
        for document in documents {
            let action = json!({ "index": { "_index": document.index(), "_id": document.id() } });
            let action =
                serde_json::to_string(&action).map_err(|e| SinkError::Payload(e.to_string()))?;
            let source = serde_json::to_string(&document.source())
                .map_err(|e| SinkError::Payload(e.to_string()))?;
            body.push_str(&action);
            body.push('\n');
            body.push_str(&source);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    async fn ping(&self) -> Result<bool, SinkError> {
        let response = self
            .client
            .head(self.url(""))
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SinkError::Auth {
                status: response.status().as_u16(),
            }),
            status => Ok(status.is_success()),
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, SinkError> {
        let response = self
            .client
            .head(self.url(index))
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SinkError> {
        let response = self
            .client
            .put(self.url(index))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(());
        }
        match status_error(response).await {
            SinkError::Status { status, body } if status == 400 && body.contains(ALREADY_EXISTS) => {
                Err(SinkError::IndexAlreadyExists(index.to_string()))
            }
            e => Err(e),
        }
    }

    async fn bulk_insert(&self, documents: &[Document]) -> Result<BulkResponse, SinkError> {
        if documents.is_empty() {
            return Ok(BulkResponse::default());
        }

        let body = Self::bulk_body(documents)?;
        let response = self
            .client
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let text = response.text().await.map_err(transport_error)?;
        let parsed: BulkApiResponse = serde_json::from_str(&text)
            .map_err(|e| SinkError::Response(format!("invalid bulk response: {e}")))?;

        let mut outcome = BulkResponse::default();
        for (position, item) in parsed.items.iter().enumerate() {
            // one operation per item; we only ever send `index`
            let Some(result) = item.values().next() else {
                continue;
            };
            if (200..300).contains(&result.status) {
                outcome.inserted += 1;
            } else {
                outcome.failures.push(ItemFailure {
                    position,
                    id: result.id.clone(),
                    status: result.status,
                    reason: result.reason(),
                });
            }
        }
        // a short `items` list leaves the tail unaccounted for; retry it
        for (position, document) in documents.iter().enumerate().skip(parsed.items.len()) {
            outcome.failures.push(ItemFailure {
                position,
                id: Some(document.id().to_string()),
                status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                reason: "missing from bulk response".to_string(),
            });
        }

        debug!(
            "Bulk insert of {} documents: {} inserted, {} rejected",
            documents.len(),
            outcome.inserted,
            outcome.failures.len()
        );
        Ok(outcome)
    }
}
