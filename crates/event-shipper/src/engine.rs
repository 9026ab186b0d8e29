// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing side of the engine.
//!
//! [`EngineHandle`] is cheap to clone and safe to share between callers. Submissions are
//! normalized on the caller's task and pushed onto the bounded queue without waiting for the
//! network. The only exception is a full queue: the caller then waits for one relief cycle of
//! the flush loop before dropping its document. Callers that hit a full queue while a relief
//! cycle is pending or running wait for that same cycle.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::Document;
use crate::errors::{EngineError, QueueFull};
use crate::flusher::{CycleOutcome, FlushCommand};
use crate::normalizer::EventNormalizer;
use crate::queue::QueueProducer;
use crate::status::{Counters, Status, StatusReporter};

const TEST_DEVICE: &str = "just/testing/1";

/// The relief cycle full-queue producers are waiting on; holds `None` until it has run.
type ReliefSlot = Arc<Mutex<Option<watch::Receiver<Option<CycleOutcome>>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The document is waiting in the queue.
    Queued,
    /// The queue was full even after a relief cycle; the document was discarded.
    Dropped,
    /// The payload could not be decoded; nothing was queued.
    BadEvent,
}

#[derive(Clone)]
pub struct EngineHandle {
    normalizer: EventNormalizer,
    queue: QueueProducer,
    counters: Arc<Counters>,
    reporter: StatusReporter,
    tx: mpsc::UnboundedSender<FlushCommand>,
    relief: ReliefSlot,
    cancel: CancellationToken,
}

impl EngineHandle {
    pub(crate) fn new(
        normalizer: EventNormalizer,
        queue: QueueProducer,
        counters: Arc<Counters>,
        reporter: StatusReporter,
        tx: mpsc::UnboundedSender<FlushCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            normalizer,
            queue,
            counters,
            reporter,
            tx,
            relief: ReliefSlot::default(),
            cancel,
        }
    }

    /// Submits a positional log record `[timestamp, level, device, message, ndc, thread]`.
    pub async fn submit_log(&self, record: &[String]) -> Result<SubmitOutcome, EngineError> {
        self.ensure_running()?;
        let document = self.normalizer.normalize_log(record, Utc::now());
        self.submit(document).await
    }

    /// Submits a JSON alarm payload. A payload that does not decode is counted as a bad event
    /// and reported as [`SubmitOutcome::BadEvent`], not as an error.
    pub async fn submit_alarm(&self, payload: &str) -> Result<SubmitOutcome, EngineError> {
        self.ensure_running()?;
        match self.normalizer.normalize_alarm(payload, Utc::now()) {
            Ok(document) => self.submit(document).await,
            Err(e) => {
                warn!("Dropping alarm event: {e}");
                self.counters.record_bad_event();
                Ok(SubmitOutcome::BadEvent)
            }
        }
    }

    /// Submits a canned DEBUG log record carrying `message`.
    pub async fn submit_test_log(&self, message: &str) -> Result<SubmitOutcome, EngineError> {
        let record = [
            Utc::now().timestamp_millis().to_string(),
            "DEBUG".to_string(),
            TEST_DEVICE.to_string(),
            message.to_string(),
            "0".to_string(),
            "0".to_string(),
        ];
        self.submit_log(&record).await
    }

    /// Submits a canned DEBUG alarm carrying `message` as its description.
    pub async fn submit_test_alarm(&self, message: &str) -> Result<SubmitOutcome, EngineError> {
        let event = json!({
            "@timestamp": Utc::now().timestamp_millis(),
            "description": message,
            "device": TEST_DEVICE,
            "formula": "This is a test",
            "message": "TESTING",
            "values": [{"attribute": "some/device/1/attribute", "value": 76}],
            "alarm_tag": "event_shipper_test",
            "severity": "DEBUG",
            "priority": 0,
            "instance": Uuid::new_v4().to_string(),
        });
        self.submit_alarm(&event.to_string()).await
    }

    async fn submit(&self, document: Document) -> Result<SubmitOutcome, EngineError> {
        self.counters.record_submitted();

        let Err(QueueFull { document, capacity }) = self.queue.enqueue(document) else {
            return Ok(SubmitOutcome::Queued);
        };

        debug!("Queue is full ({capacity} events); requesting a flush");
        let outcome = match self.relieve().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Queue full, dropping {} event {}: {e}",
                    document.kind(),
                    document.id()
                );
                self.counters.add_dropped(1);
                return Err(e);
            }
        };

        warn!(
            "Queue full, dropping {} event {} (relief flush: {outcome:?})",
            document.kind(),
            document.id()
        );
        self.counters.add_dropped(1);
        Ok(SubmitOutcome::Dropped)
    }

    /// Waits for a relief cycle, joining the one already pending or running if there is one.
    async fn relieve(&self) -> Result<CycleOutcome, EngineError> {
        let mut pending = {
            let mut slot = self.relief.lock().unwrap_or_else(PoisonError::into_inner);
            let running = slot
                .as_ref()
                .filter(|rx| rx.has_changed().is_ok() && rx.borrow().is_none())
                .cloned();
            match running {
                Some(rx) => rx,
                None => {
                    let (relief_tx, relief_rx) = watch::channel(None);
                    self.tx
                        .send(FlushCommand::Relieve(relief_tx))
                        .map_err(|_| EngineError::Stopped)?;
                    *slot = Some(relief_rx.clone());
                    relief_rx
                }
            }
        };

        let outcome = pending
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::NoResponse)?
            .clone();
        outcome.ok_or(EngineError::NoResponse)
    }

    /// Runs one flush cycle now and waits for its outcome.
    pub async fn flush(&self) -> Result<CycleOutcome, EngineError> {
        self.ensure_running()?;
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(FlushCommand::Flush(response_tx))
            .map_err(|_| EngineError::Stopped)?;
        response_rx.await.map_err(|_| EngineError::NoResponse)
    }

    pub fn status(&self) -> Status {
        self.reporter.snapshot()
    }

    pub fn status_text(&self) -> String {
        self.reporter.multiline_summary()
    }

    /// Stops the flush loop. It finishes the cycle in progress and makes one last attempt to
    /// ship whatever is still queued.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn enqueue_for_test(&self, document: Document) {
        self.queue.enqueue(document).expect("test queue has room");
    }
}
