// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters and sink health, and the read-only snapshots built from them.
//!
//! Counters are atomics bumped by producers and by the flush loop. Health is written only by
//! the flush loop through a `watch` channel; everybody else holds a receiver.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::queue::QueueProducer;

/// Sink health as seen by the flush loop. Variants are ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HealthState {
    Initializing,
    Healthy,
    Degraded,
    Unreachable,
}

impl HealthState {
    fn sink_status(self) -> &'static str {
        match self {
            HealthState::Initializing => "Not initialised.",
            HealthState::Healthy => "OK",
            HealthState::Degraded => "Not ready or rejecting writes; retrying.",
            HealthState::Unreachable => "Cannot connect; is the address correct?",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Initializing => "INITIALIZING",
            HealthState::Healthy => "HEALTHY",
            HealthState::Degraded => "DEGRADED",
            HealthState::Unreachable => "UNREACHABLE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkHealth {
    pub state: HealthState,
    pub last_error: Option<String>,
}

impl Default for SinkHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Initializing,
            last_error: None,
        }
    }
}

pub fn health_channel() -> (watch::Sender<SinkHealth>, watch::Receiver<SinkHealth>) {
    watch::channel(SinkHealth::default())
}

/// Process-lifetime event counters. Never reset.
#[derive(Debug, Default)]
pub struct Counters {
    submitted: AtomicU64,
    shipped: AtomicU64,
    errors: AtomicU64,
    bad_events: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_event(&self) {
        self.bad_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_shipped(&self, n: usize) {
        self.shipped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: usize) {
        self.errors.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, n: usize) {
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: HealthState,
    pub total_submitted: u64,
    pub total_shipped: u64,
    pub total_errors: u64,
    pub bad_events: u64,
    pub dropped: u64,
    pub queue_depth_hint: usize,
    pub queue_capacity: usize,
    pub last_sink_error: Option<String>,
}

impl Status {
    /// Renders the snapshot for an operator, one fact per line.
    pub fn multiline_summary(&self) -> String {
        let mut lines = vec![
            format!("Engine is in {} state.", self.state),
            format!("Number of events handled: {}", self.total_submitted),
            format!(
                "Number of events written to database: {}",
                self.total_shipped
            ),
            format!(
                "Number of failures to write to database: {}",
                self.total_errors
            ),
        ];
        if self.queue_depth_hint > 0 {
            lines.push(format!(
                "There are around {} queued events (capacity {}).",
                self.queue_depth_hint, self.queue_capacity
            ));
        }
        lines.push(format!("Sink status: {}", self.state.sink_status()));
        if let Some(error) = &self.last_sink_error {
            lines.push(format!("Sink error: {error}"));
        }
        if self.bad_events > 0 {
            lines.push(format!(
                "Events that could not be decoded: {}",
                self.bad_events
            ));
        }
        if self.dropped > 0 {
            lines.push(format!("Events dropped: {}", self.dropped));
        }
        lines.join("\n")
    }
}

/// Builds [`Status`] snapshots. Purely derived, no side effects.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    counters: Arc<Counters>,
    health: watch::Receiver<SinkHealth>,
    queue: QueueProducer,
}

impl StatusReporter {
    pub fn new(
        counters: Arc<Counters>,
        health: watch::Receiver<SinkHealth>,
        queue: QueueProducer,
    ) -> Self {
        Self {
            counters,
            health,
            queue,
        }
    }

    pub fn snapshot(&self) -> Status {
        let health = self.health.borrow().clone();
        Status {
            state: health.state,
            total_submitted: self.counters.submitted.load(Ordering::Relaxed),
            total_shipped: self.counters.shipped.load(Ordering::Relaxed),
            total_errors: self.counters.errors.load(Ordering::Relaxed),
            bad_events: self.counters.bad_events.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            queue_depth_hint: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            last_sink_error: health.last_error,
        }
    }

    pub fn multiline_summary(&self) -> String {
        self.snapshot().multiline_summary()
    }
}
