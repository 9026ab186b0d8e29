// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::{debug, error};

use crate::sink::Sink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthResult {
    /// The sink answered the liveness probe positively.
    Reachable,
    /// The sink answered but is not accepting traffic yet. Usually clears up on its own, e.g.
    /// while the sink restarts.
    NotReady,
    /// The sink could not be talked to at all (DNS, socket, TLS, authentication).
    Unreachable(String),
}

#[derive(Clone)]
pub struct HealthChecker {
    sink: Arc<dyn Sink>,
}

impl HealthChecker {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub async fn check(&self) -> HealthResult {
        match self.sink.ping().await {
            Ok(true) => HealthResult::Reachable,
            Ok(false) => {
                error!("Sink did not respond to ping");
                HealthResult::NotReady
            }
            Err(e) if e.is_connection() => {
                error!("Sink connection error: {e}");
                HealthResult::Unreachable(e.to_string())
            }
            Err(e) => {
                debug!("Sink answered ping with an error: {e}");
                HealthResult::NotReady
            }
        }
    }
}
