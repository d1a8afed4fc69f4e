//! Scripted transport for tests

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{Transport, TransportResponse};
use crate::core::{FetchError, FetchOptions, FetchResult};

type Responder =
    Box<dyn Fn(&str, &FetchOptions, usize) -> FetchResult<TransportResponse> + Send + Sync>;

/// Counts dispatches and answers from a closure after an optional delay.
pub(crate) struct MockTransport {
    responder: Responder,
    delay: Duration,
    dispatches: AtomicUsize,
    calls: Mutex<Vec<(String, FetchOptions)>>,
}

impl MockTransport {
    /// Answer every request; the closure sees the zero-based dispatch index.
    pub(crate) fn with<F>(responder: F) -> Self
    where
        F: Fn(&str, &FetchOptions, usize) -> FetchResult<TransportResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            dispatches: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer 200 with `value`.
    pub(crate) fn json(value: JsonValue) -> Self {
        Self::with(move |_, _, _| Ok(TransportResponse::json_ok(&value)))
    }

    /// Answer 200 with `{"n": <dispatch index>}` so every dispatch is distinguishable.
    pub(crate) fn counting() -> Self {
        Self::with(|_, _, n| Ok(TransportResponse::json_ok(&serde_json::json!({ "n": n }))))
    }

    /// Always fail without a response.
    pub(crate) fn failing(msg: &'static str) -> Self {
        Self::with(move |_, _, _| Err(FetchError::Transport(msg.to_string())))
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, url: &str, options: &FetchOptions) -> FetchResult<TransportResponse> {
        let n = self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(url, options, n)
    }
}
