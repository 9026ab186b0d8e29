// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::mocks::{BulkMode, PingMode, ScriptedSink};
use event_shipper::config::EngineConfig;
use event_shipper::elasticsearch::ElasticsearchSink;
use event_shipper::engine::{EngineHandle, SubmitOutcome};
use event_shipper::flusher::{CycleOutcome, FlushLoop};
use event_shipper::index::IndexResolver;
use event_shipper::status::HealthState;
use mockito::Matcher;
use serde_json::json;
use tokio::task::JoinHandle;

fn manual_config(queue_size: usize) -> EngineConfig {
    EngineConfig {
        queue_size,
        flush_period: Duration::ZERO,
        ..Default::default()
    }
}

fn start(sink: Arc<ScriptedSink>, config: &EngineConfig) -> (EngineHandle, JoinHandle<()>) {
    let (flush_loop, handle) = FlushLoop::new(config, sink).expect("valid config");
    let task = tokio::spawn(flush_loop.run());
    (handle, task)
}

fn log_record(message: &str) -> Vec<String> {
    ["1459850400000", "INFO", "dev/a/1", message, "ndc1", "7"]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

#[tokio::test]
async fn test_every_document_delivered_exactly_once() {
    let sink = Arc::new(ScriptedSink::healthy());
    let (handle, _task) = start(Arc::clone(&sink), &manual_config(50));

    for n in 0..20 {
        let outcome = handle.submit_log(&log_record(&n.to_string())).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
    }
    handle.flush().await.unwrap();
    assert_eq!(handle.flush().await.unwrap(), CycleOutcome::Idle);

    let stored = sink.stored_ids();
    assert_eq!(stored.len(), 20);
    assert_eq!(stored.iter().collect::<HashSet<_>>().len(), 20);

    let messages: Vec<String> = sink.batches()[0]
        .iter()
        .map(|d| d.field("message").unwrap().as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..20).map(|n| n.to_string()).collect();
    assert_eq!(messages, expected);

    let status = handle.status();
    assert_eq!(status.total_submitted, 20);
    assert_eq!(status.total_shipped, 20);
    assert_eq!(status.total_errors, 0);
}

#[tokio::test]
async fn test_queue_full_with_failing_sink() {
    let sink = Arc::new(ScriptedSink::new(PingMode::Down, BulkMode::Fail));
    let (handle, _task) = start(Arc::clone(&sink), &manual_config(3));

    let mut outcomes = Vec::new();
    for n in 0..4 {
        outcomes.push(handle.submit_log(&log_record(&n.to_string())).await.unwrap());
    }
    assert_eq!(
        outcomes,
        vec![
            SubmitOutcome::Queued,
            SubmitOutcome::Queued,
            SubmitOutcome::Queued,
            SubmitOutcome::Dropped
        ]
    );

    let status = handle.status();
    assert_eq!(status.queue_depth_hint, 3);
    assert_eq!(status.dropped, 1);
    assert!(status.state >= HealthState::Degraded);
    assert!(handle.status_text().contains("Events dropped: 1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_respect_capacity() {
    const CAPACITY: usize = 32;
    const PRODUCERS: usize = 16;
    const PER_PRODUCER: usize = 10;

    let sink = Arc::new(ScriptedSink::new(PingMode::Down, BulkMode::Accept));
    let (handle, _task) = start(Arc::clone(&sink), &manual_config(CAPACITY));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let handle = handle.clone();
            tokio::spawn(async move {
                let (mut queued, mut dropped) = (0usize, 0usize);
                for n in 0..PER_PRODUCER {
                    match handle.submit_log(&log_record(&format!("{p}-{n}"))).await {
                        Ok(SubmitOutcome::Queued) => queued += 1,
                        Ok(SubmitOutcome::Dropped) => dropped += 1,
                        other => panic!("unexpected submit result: {other:?}"),
                    }
                    assert!(handle.status().queue_depth_hint <= CAPACITY);
                }
                (queued, dropped)
            })
        })
        .collect();

    let (mut queued, mut dropped) = (0, 0);
    for producer in producers {
        let (q, d) = producer.await.unwrap();
        queued += q;
        dropped += d;
    }

    assert_eq!(queued + dropped, PRODUCERS * PER_PRODUCER);
    assert_eq!(queued, CAPACITY);
    let status = handle.status();
    assert_eq!(status.total_submitted, (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(status.dropped, dropped as u64);
    assert_eq!(status.queue_depth_hint, CAPACITY);

    sink.set_ping(PingMode::Up);
    handle.flush().await.unwrap();
    assert_eq!(handle.flush().await.unwrap(), CycleOutcome::Idle);

    let stored = sink.stored_ids();
    assert_eq!(stored.len(), queued);
    assert_eq!(stored.iter().collect::<HashSet<_>>().len(), queued);
    assert_eq!(handle.status().total_shipped, queued as u64);
}

#[tokio::test]
async fn test_retry_keeps_document_ids() {
    let sink = Arc::new(ScriptedSink::new(PingMode::Up, BulkMode::Fail));
    let (handle, _task) = start(Arc::clone(&sink), &manual_config(10));

    handle.submit_log(&log_record("a")).await.unwrap();
    handle
        .submit_alarm(r#"{"severity":"ALARM","device":"dev/a/1"}"#)
        .await
        .unwrap();

    let outcome = handle.flush().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            requeued: 2,
            dropped: 0
        }
    );
    let status = handle.status();
    assert_eq!(status.state, HealthState::Degraded);
    assert_eq!(status.queue_depth_hint, 2);
    assert!(status.last_sink_error.is_some());

    sink.set_bulk(BulkMode::Accept);
    handle.flush().await.unwrap();

    let ids = |batch: &[event_shipper::document::Document]| -> HashSet<String> {
        batch.iter().map(|d| d.id().to_string()).collect()
    };
    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(ids(&batches[0]), ids(&batches[1]));

    let status = handle.status();
    assert_eq!(status.state, HealthState::Healthy);
    assert_eq!(status.total_shipped, 2);
    assert_eq!(status.last_sink_error, None);
}

#[tokio::test]
async fn test_not_ready_sink_leaves_queue_untouched() {
    let sink = Arc::new(ScriptedSink::new(PingMode::NotReady, BulkMode::Accept));
    let (handle, _task) = start(Arc::clone(&sink), &manual_config(10));

    handle.submit_test_log("waiting").await.unwrap();
    let before = handle.status().queue_depth_hint;

    assert_eq!(handle.flush().await.unwrap(), CycleOutcome::NotReady);

    let status = handle.status();
    assert_eq!(status.queue_depth_hint, before);
    assert_eq!(status.state, HealthState::Degraded);
    assert_eq!(status.total_errors, 0);
    assert!(sink.batches().is_empty());
}

#[tokio::test]
async fn test_indices_created_once_per_process() {
    let sink = Arc::new(ScriptedSink::healthy());
    let (handle, _task) = start(Arc::clone(&sink), &manual_config(10));

    handle.submit_test_log("one").await.unwrap();
    handle.submit_test_alarm("two").await.unwrap();
    handle.flush().await.unwrap();
    handle.submit_test_log("three").await.unwrap();
    handle.flush().await.unwrap();

    let created = sink.created_indices();
    assert_eq!(created.len(), 2);
    assert!(created[0].starts_with("tango-logs-"));
    assert!(created[1].starts_with("tango-alarms-"));
    assert_eq!(sink.stored_ids().len(), 3);
}

#[test]
fn test_index_partitioned_by_utc_date() {
    let resolver = IndexResolver::new("tango");
    let first = Utc.with_ymd_and_hms(2016, 4, 5, 23, 59, 59).unwrap();
    let second = Utc.with_ymd_and_hms(2016, 4, 6, 0, 0, 1).unwrap();

    let a = resolver.resolve("logs", first);
    let b = resolver.resolve("logs", second);
    assert_eq!(a, "tango-logs-2016.04.05");
    assert_eq!(b, "tango-logs-2016.04.06");
}

#[tokio::test]
async fn test_shutdown_flushes_remaining_events() {
    let sink = Arc::new(ScriptedSink::healthy());
    let (handle, task) = start(Arc::clone(&sink), &manual_config(10));

    handle.submit_test_log("last words").await.unwrap();
    handle.shutdown();
    task.await.unwrap();

    assert_eq!(sink.stored_ids().len(), 1);
    assert_eq!(handle.status().queue_depth_hint, 0);
}

#[tokio::test]
async fn test_ships_to_elasticsearch() {
    let mut server = mockito::Server::new_async().await;
    let ping = server
        .mock("HEAD", "/")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;
    let exists = server
        .mock(
            "HEAD",
            Matcher::Regex(r"^/tango-alarms-\d{4}\.\d{2}\.\d{2}$".to_string()),
        )
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let create = server
        .mock(
            "PUT",
            Matcher::Regex(r"^/tango-alarms-\d{4}\.\d{2}\.\d{2}$".to_string()),
        )
        .match_body(Matcher::PartialJson(json!({
            "mappings": {"properties": {"priority": {"type": "integer"}}}
        })))
        .with_status(200)
        .with_body(r#"{"acknowledged":true}"#)
        .expect(1)
        .create_async()
        .await;
    let bulk = server
        .mock("POST", "/_bulk")
        .match_header("content-type", "application/x-ndjson")
        .match_body(Matcher::Regex(r#""priority":300"#.to_string()))
        .with_status(200)
        .with_body(r#"{"took":3,"errors":false,"items":[{"index":{"_id":"x","status":201}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let config = EngineConfig {
        sink_url: server.url(),
        ..manual_config(10)
    };
    let sink = ElasticsearchSink::new(&config.sink_url, config.request_timeout).unwrap();
    let (flush_loop, handle) = FlushLoop::new(&config, Arc::new(sink)).unwrap();
    tokio::spawn(flush_loop.run());

    let outcome = handle
        .submit_alarm(r#"{"severity":"WARNING","values":[{"attribute":"a","value":76}]}"#)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Queued);

    let outcome = handle.flush().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Shipped {
            inserted: 1,
            rejected: 0,
            requeued: 0
        }
    );

    ping.assert_async().await;
    exists.assert_async().await;
    create.assert_async().await;
    bulk.assert_async().await;

    let status = handle.status();
    assert_eq!(status.state, HealthState::Healthy);
    assert_eq!(status.total_shipped, 1);
}

#[tokio::test]
async fn test_unreachable_elasticsearch_keeps_events() {
    // nothing listens on port 1
    let config = EngineConfig {
        sink_url: "http://127.0.0.1:1".to_string(),
        request_timeout: Duration::from_secs(2),
        ..manual_config(10)
    };
    let sink = ElasticsearchSink::new(&config.sink_url, config.request_timeout).unwrap();
    let (flush_loop, handle) = FlushLoop::new(&config, Arc::new(sink)).unwrap();
    tokio::spawn(flush_loop.run());

    handle.submit_test_log("stuck").await.unwrap();
    assert_eq!(handle.flush().await.unwrap(), CycleOutcome::Unreachable);

    let status = handle.status();
    assert_eq!(status.state, HealthState::Unreachable);
    assert_eq!(status.total_errors, 1);
    assert_eq!(status.queue_depth_hint, 1);
    let text = handle.status_text();
    assert!(text.starts_with("Engine is in UNREACHABLE state."));
    assert!(text.contains("Sink error: cannot connect to sink"));
}
