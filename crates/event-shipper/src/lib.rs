// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory buffering and batched shipping of log and alarm events to Elasticsearch.
//!
//! Producers hand raw records to an [`engine::EngineHandle`], which normalizes them into
//! [`document::Document`]s and pushes them onto a bounded queue. A single background
//! [`flusher::FlushLoop`] drains the queue, health-checks the sink and bulk-inserts, putting
//! documents back on the queue when the sink cannot take them.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod document;
pub mod elasticsearch;
pub mod engine;
pub mod errors;
pub mod flusher;
pub mod health;
pub mod index;
pub mod mapping;
pub mod normalizer;
pub mod queue;
pub mod sink;
pub mod status;
