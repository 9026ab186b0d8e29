// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity FIFO buffer between producers and the flush loop.
//!
//! Backed by a bounded `tokio::sync::mpsc` channel: producers hold cloneable
//! [`QueueProducer`]s and enqueue without ever waiting, the flush loop holds the single
//! [`QueueConsumer`] and is the only one that drains. A document received by a drain is gone
//! from the channel, so it can only be seen again if the consumer puts it back.
//!
//! Overflow is the caller's problem: [`QueueProducer::enqueue`] returns [`QueueFull`] with the
//! rejected document and the engine decides what to do with it (see
//! [`crate::engine::EngineHandle`]).

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;

use crate::document::Document;
use crate::errors::QueueFull;

/// Creates a queue holding at most `capacity` documents.
///
/// `capacity` must be greater than zero.
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueProducer { tx: tx.clone() },
        QueueConsumer { tx, rx },
    )
}

fn depth(tx: &mpsc::Sender<Document>) -> usize {
    tx.max_capacity() - tx.capacity()
}

#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<Document>,
}

impl QueueProducer {
    /// Appends `document` if there is a free slot. Never blocks.
    pub fn enqueue(&self, document: Document) -> Result<(), QueueFull> {
        // A closed channel means the consumer is gone and nothing will ever make room, which
        // callers handle exactly like a full queue.
        self.tx
            .try_send(document)
            .map_err(|e| match e {
                TrySendError::Full(document) | TrySendError::Closed(document) => QueueFull {
                    document,
                    capacity: self.tx.max_capacity(),
                },
            })
    }

    /// Number of queued documents. Only an estimate while other producers are active.
    pub fn depth(&self) -> usize {
        depth(&self.tx)
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[derive(Debug)]
pub struct QueueConsumer {
    tx: mpsc::Sender<Document>,
    rx: mpsc::Receiver<Document>,
}

impl QueueConsumer {
    /// Removes and returns every document queued at call time, oldest first. Documents enqueued
    /// while draining are left for the next drain.
    pub fn drain_all(&mut self) -> Vec<Document> {
        let pending = depth(&self.tx);
        let mut documents = Vec::with_capacity(pending);
        while documents.len() < pending {
            match self.rx.try_recv() {
                Ok(document) => documents.push(document),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        documents
    }

    /// Puts documents back after a failed insert, unchanged and in order. Returns how many did
    /// not fit because producers took the freed slots in the meantime; those are lost.
    pub fn requeue(&self, documents: Vec<Document>) -> usize {
        let total = documents.len();
        let mut dropped = 0;
        for document in documents {
            if let Err(e) = self.tx.try_send(document) {
                dropped += 1;
                if let TrySendError::Closed(_) = e {
                    break;
                }
            }
        }
        if dropped > 0 {
            warn!("Queue full while re-queuing; dropped {dropped} of {total} events");
        }
        dropped
    }

    pub fn depth(&self) -> usize {
        depth(&self.tx)
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}
