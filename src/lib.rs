//! This crate contains the request orchestration layer of pingfetch.
//!
//! It sits between application code and a network transport and provides
//! in-flight request deduplication, a TTL response cache, debounced request
//! batching and per-endpoint latency statistics.

pub mod batch;
pub mod cache;
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod orchestration;
pub mod transport;

pub use crate::core::{FetchError, FetchOptions, FetchResult, RequestKey};
pub use orchestration::Orchestrator;
