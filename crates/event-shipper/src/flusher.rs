// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The background task that moves documents from the queue into the sink.
//!
//! One cycle: health-check the sink, drain the queue, make sure every destination index
//! exists, bulk-insert. A batch that cannot be inserted goes back on the queue with its ids
//! intact, and the next cycle waits for a cooldown instead of the regular period.
//!
//! The loop is the only writer of the sink health. Producers reach it through
//! [`FlushCommand`]s sent by [`crate::engine::EngineHandle`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::document::Document;
use crate::engine::EngineHandle;
use crate::errors::{ConfigError, SinkError};
use crate::health::{HealthChecker, HealthResult};
use crate::index::{IndexRegistry, IndexResolver};
use crate::normalizer::EventNormalizer;
use crate::queue::{self, QueueConsumer};
use crate::sink::{BulkResponse, Sink};
use crate::status::{self, Counters, HealthState, SinkHealth, StatusReporter};

#[derive(Debug)]
pub enum FlushCommand {
    /// Run one cycle now, regardless of the timer.
    Flush(oneshot::Sender<CycleOutcome>),
    /// Run one cycle to make room after producers found the queue full, then mark the sink at
    /// least degraded. Every producer sharing the cycle watches for its outcome.
    Relieve(watch::Sender<Option<CycleOutcome>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Sink could not be reached; nothing was drained.
    Unreachable,
    /// Sink answered but is not ready; nothing was drained.
    NotReady,
    /// Sink is fine and the queue was empty.
    Idle,
    /// The batch was accepted. `rejected` documents were refused individually, `requeued` of
    /// them are worth another try and went back on the queue.
    Shipped {
        inserted: usize,
        rejected: usize,
        requeued: usize,
    },
    /// The whole batch failed and went back on the queue; `dropped` did not fit.
    Failed { requeued: usize, dropped: usize },
}

/// Timing of the periodic cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSchedule {
    pub period: Duration,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl FlushSchedule {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            period: config.flush_period,
            backoff: config.backoff,
            max_backoff: config.max_backoff,
        }
    }

    /// Delay before the next cycle. `None` when periodic flushing is disabled. After failures the
    /// regular period is extended by a cooldown that grows with each consecutive failure.
    pub fn next_delay(&self, consecutive_failures: u32) -> Option<Duration> {
        if self.period.is_zero() {
            return None;
        }
        if consecutive_failures == 0 {
            return Some(self.period);
        }
        let cooldown = self
            .backoff
            .saturating_mul(consecutive_failures)
            .min(self.max_backoff);
        Some(self.period.saturating_add(cooldown))
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

pub struct FlushLoop {
    sink: Arc<dyn Sink>,
    health: HealthChecker,
    indices: IndexRegistry,
    queue: QueueConsumer,
    counters: Arc<Counters>,
    status_tx: watch::Sender<SinkHealth>,
    schedule: FlushSchedule,
    consecutive_failures: u32,
    rx: mpsc::UnboundedReceiver<FlushCommand>,
    cancel: CancellationToken,
}

impl FlushLoop {
    /// Builds the loop and the handle producers use to feed it. Spawn [`FlushLoop::run`] to
    /// start shipping.
    pub fn new(
        config: &EngineConfig,
        sink: Arc<dyn Sink>,
    ) -> Result<(Self, EngineHandle), ConfigError> {
        config.validate()?;

        let (producer, consumer) = queue::bounded(config.queue_size);
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = status::health_channel();
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let reporter = StatusReporter::new(Arc::clone(&counters), status_rx, producer.clone());
        let normalizer = EventNormalizer::new(IndexResolver::new(config.index_prefix.clone()));
        let handle = EngineHandle::new(
            normalizer,
            producer,
            Arc::clone(&counters),
            reporter,
            tx,
            cancel.clone(),
        );

        let flush_loop = Self {
            health: HealthChecker::new(Arc::clone(&sink)),
            sink,
            indices: IndexRegistry::new(),
            queue: consumer,
            counters,
            status_tx,
            schedule: FlushSchedule::from_config(config),
            consecutive_failures: 0,
            rx,
            cancel,
        };

        Ok((flush_loop, handle))
    }

    pub async fn run(mut self) {
        debug!("Flush loop started");

        let mut next_cycle = self.next_deadline();
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        debug!("All engine handles dropped");
                        break;
                    };
                    match command {
                        FlushCommand::Flush(response_tx) => {
                            let outcome = self.cycle().await;
                            if response_tx.send(outcome).is_err() {
                                error!("Failed to send flush response - receiver dropped");
                            }
                        }
                        FlushCommand::Relieve(relief_tx) => {
                            let outcome = self.cycle().await;
                            self.escalate(HealthState::Degraded);
                            relief_tx.send_replace(Some(outcome));
                        }
                    }
                    next_cycle = self.next_deadline();
                }
                () = wait_for(next_cycle) => {
                    self.cycle().await;
                    next_cycle = self.next_deadline();
                }
            }
        }

        if !self.queue.is_empty() {
            info!(
                "Final flush of ~{} queued events before shutdown",
                self.queue.depth()
            );
            let outcome = self.cycle().await;
            let left = self.queue.depth();
            if left > 0 {
                warn!("Shutting down with {left} undelivered events ({outcome:?})");
            }
        }

        debug!("Flush loop stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.schedule
            .next_delay(self.consecutive_failures)
            .and_then(|delay| Instant::now().checked_add(delay))
    }

    /// Runs one health-check/drain/insert cycle. Never fails: every problem ends up in the
    /// counters and the sink health.
    pub async fn cycle(&mut self) -> CycleOutcome {
        match self.health.check().await {
            HealthResult::Unreachable(cause) => {
                if !self.queue.is_empty() {
                    self.counters.add_errors(1);
                }
                debug!(
                    "Skipping flush; could not talk to sink (~{} events queued)",
                    self.queue.depth()
                );
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.set_health(HealthState::Unreachable, Some(cause));
                return CycleOutcome::Unreachable;
            }
            HealthResult::NotReady => {
                debug!(
                    "Skipping flush; sink not ready (~{} events queued)",
                    self.queue.depth()
                );
                self.status_tx.send_modify(|health| {
                    health.state = HealthState::Degraded;
                });
                return CycleOutcome::NotReady;
            }
            HealthResult::Reachable => {
                self.status_tx.send_if_modified(|health| {
                    if health.state == HealthState::Healthy {
                        return false;
                    }
                    health.state = HealthState::Healthy;
                    health.last_error = None;
                    true
                });
            }
        }

        let documents = self.queue.drain_all();
        if documents.is_empty() {
            self.consecutive_failures = 0;
            return CycleOutcome::Idle;
        }

        if let Err(e) = self.ensure_indices(&documents).await {
            return self.fail(documents, e);
        }

        match self.sink.bulk_insert(&documents).await {
            Ok(response) => self.shipped(documents, response),
            Err(e) => self.fail(documents, e),
        }
    }

    /// Checks each distinct destination index once, in order of first appearance.
    async fn ensure_indices(&mut self, documents: &[Document]) -> Result<(), SinkError> {
        let mut seen = HashSet::new();
        for document in documents {
            if seen.insert(document.index()) {
                self.indices
                    .ensure_exists(self.sink.as_ref(), document.index(), document.kind())
                    .await?;
            }
        }
        Ok(())
    }

    fn shipped(&mut self, documents: Vec<Document>, response: BulkResponse) -> CycleOutcome {
        self.counters.add_shipped(response.inserted);
        self.consecutive_failures = 0;
        self.set_health(HealthState::Healthy, None);

        let rejected = response.failures.len();
        if rejected == 0 {
            debug!("Pushed {} events to sink", response.inserted);
            return CycleOutcome::Shipped {
                inserted: response.inserted,
                rejected: 0,
                requeued: 0,
            };
        }

        self.counters.add_errors(rejected);
        for failure in &response.failures {
            error!(
                "Sink rejected event {}: {} ({})",
                failure.id.as_deref().unwrap_or("?"),
                failure.reason,
                failure.status
            );
        }

        let retry_positions: HashSet<usize> = response
            .failures
            .iter()
            .filter(|f| f.is_retryable())
            .map(|f| f.position)
            .collect();
        let retry: Vec<Document> = documents
            .into_iter()
            .enumerate()
            .filter(|(position, _)| retry_positions.contains(position))
            .map(|(_, document)| document)
            .collect();
        let to_retry = retry.len();
        let dropped = self.queue.requeue(retry);
        self.counters.add_dropped(dropped);

        CycleOutcome::Shipped {
            inserted: response.inserted,
            rejected,
            requeued: to_retry - dropped,
        }
    }

    fn fail(&mut self, documents: Vec<Document>, e: SinkError) -> CycleOutcome {
        error!("Exception while sending data to sink: {e}");
        self.counters.add_errors(1);

        let total = documents.len();
        let dropped = self.queue.requeue(documents);
        self.counters.add_dropped(dropped);

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let state = if e.is_connection() {
            HealthState::Unreachable
        } else {
            HealthState::Degraded
        };
        self.set_health(state, Some(e.to_string()));

        CycleOutcome::Failed {
            requeued: total - dropped,
            dropped,
        }
    }

    fn set_health(&self, state: HealthState, last_error: Option<String>) {
        self.status_tx.send_replace(SinkHealth { state, last_error });
    }

    fn escalate(&self, at_least: HealthState) {
        self.status_tx.send_if_modified(|health| {
            if health.state >= at_least {
                return false;
            }
            health.state = at_least;
            true
        });
    }
}
