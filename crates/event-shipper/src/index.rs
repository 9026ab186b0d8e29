// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::document::DocumentKind;
use crate::errors::SinkError;
use crate::mapping;
use crate::sink::Sink;

/// Builds date-partitioned index names of the form `<prefix>-<category>-YYYY.MM.DD`.
///
/// One index per category and UTC day keeps retention pruning a matter of deleting whole
/// indices.
#[derive(Debug, Clone)]
pub struct IndexResolver {
    prefix: String,
}

impl IndexResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn resolve(&self, category: &str, at: DateTime<Utc>) -> String {
        format!("{}-{}-{}", self.prefix, category, at.format("%Y.%m.%d"))
    }
}

/// Indices confirmed to exist in the sink.
///
/// Entries live as long as the process: an index deleted behind our back (or a sink restarted
/// from empty storage) is not noticed until restart.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    existing: HashSet<String>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, index: &str) -> bool {
        self.existing.contains(index)
    }

    pub fn len(&self) -> usize {
        self.existing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.existing.is_empty()
    }

    /// Makes sure `index` exists, creating it with the mapping for `kind` if the sink does not
    /// know it. Losing a creation race to another writer is fine.
    pub async fn ensure_exists(
        &mut self,
        sink: &dyn Sink,
        index: &str,
        kind: DocumentKind,
    ) -> Result<(), SinkError> {
        if self.existing.contains(index) {
            return Ok(());
        }

        if !sink.index_exists(index).await? {
            match sink.create_index(index, &mapping::index_body(kind)).await {
                Ok(()) => info!("Created new index {index}"),
                Err(SinkError::IndexAlreadyExists(_)) => {
                    debug!("Index {index} was created concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        self.existing.insert(index.to_string());
        Ok(())
    }
}
