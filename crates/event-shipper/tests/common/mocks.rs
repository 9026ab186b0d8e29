// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory sink whose answers are scripted by the test

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use event_shipper::document::Document;
use event_shipper::errors::SinkError;
use event_shipper::sink::{BulkResponse, Sink};
use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
    Up,
    NotReady,
    Down,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    Accept,
    Fail,
}

struct State {
    ping: PingMode,
    bulk: BulkMode,
    existing: HashSet<String>,
    created: Vec<String>,
    batches: Vec<Vec<Document>>,
    stored_ids: Vec<String>,
}

/// Records everything it is asked to store
pub struct ScriptedSink {
    state: Mutex<State>,
}

#[allow(dead_code)]
impl ScriptedSink {
    pub fn new(ping: PingMode, bulk: BulkMode) -> Self {
        Self {
            state: Mutex::new(State {
                ping,
                bulk,
                existing: HashSet::new(),
                created: Vec::new(),
                batches: Vec::new(),
                stored_ids: Vec::new(),
            }),
        }
    }

    pub fn healthy() -> Self {
        Self::new(PingMode::Up, BulkMode::Accept)
    }

    pub fn set_ping(&self, ping: PingMode) {
        self.state.lock().unwrap().ping = ping;
    }

    pub fn set_bulk(&self, bulk: BulkMode) {
        self.state.lock().unwrap().bulk = bulk;
    }

    /// Every bulk request seen, accepted or not
    pub fn batches(&self) -> Vec<Vec<Document>> {
        self.state.lock().unwrap().batches.clone()
    }

    /// Ids of the documents in accepted bulk requests, in insertion order
    pub fn stored_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().stored_ids.clone()
    }

    pub fn created_indices(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn ping(&self) -> Result<bool, SinkError> {
        match self.state.lock().unwrap().ping {
            PingMode::Up => Ok(true),
            PingMode::NotReady => Ok(false),
            PingMode::Down => Err(SinkError::Connection("connection refused".to_string())),
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, SinkError> {
        Ok(self.state.lock().unwrap().existing.contains(index))
    }

    async fn create_index(&self, index: &str, _body: &Value) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if !state.existing.insert(index.to_string()) {
            return Err(SinkError::IndexAlreadyExists(index.to_string()));
        }
        state.created.push(index.to_string());
        Ok(())
    }

    async fn bulk_insert(&self, documents: &[Document]) -> Result<BulkResponse, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.batches.push(documents.to_vec());
        match state.bulk {
            BulkMode::Accept => {
                state
                    .stored_ids
                    .extend(documents.iter().map(|d| d.id().to_string()));
                Ok(BulkResponse {
                    inserted: documents.len(),
                    failures: vec![],
                })
            }
            BulkMode::Fail => Err(SinkError::Status {
                status: 503,
                body: "cluster_block_exception".to_string(),
            }),
        }
    }
}
