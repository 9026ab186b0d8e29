// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use event_shipper::{
    config::EngineConfig, elasticsearch::ElasticsearchSink, flusher::FlushLoop, sink::Sink,
};

#[tokio::main]
pub async fn main() {
    let config = EngineConfig::from_env();
    let log_level = config
        .as_ref()
        .map(|config| config.log_level.as_str())
        .unwrap_or("info");

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}. Shutting down event shipper.");
            return;
        }
    };

    let sink: Arc<dyn Sink> =
        match ElasticsearchSink::new(&config.sink_url, config.request_timeout) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!("Unable to build the Elasticsearch client: {e}");
                return;
            }
        };

    let (flush_loop, handle) = match FlushLoop::new(&config, sink) {
        Ok(started) => started,
        Err(e) => {
            error!("{e}. Shutting down event shipper.");
            return;
        }
    };
    let flush_task = tokio::spawn(flush_loop.run());

    info!(
        "Shipping events to {} (index prefix '{}', queue size {}, flush period {}s)",
        config.sink_url,
        config.index_prefix,
        config.queue_size,
        config.flush_period.as_secs()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {e}");
    }

    info!("Shutting down event shipper");
    handle.shutdown();
    if let Err(e) = flush_task.await {
        error!("Flush loop ended abnormally: {e}");
    }

    info!("{}", handle.status_text());
}
