//! Debounced request batching
//!
//! Requests enqueued within a quiet-period window are flushed together. Each
//! new enqueue restarts the window, so a burst collapses into one flush shortly
//! after it ends. Flushed items are grouped by `(method, url)`; a group whose
//! items are interchangeable is dispatched once through the [`DedupCache`],
//! any other group dispatches its items independently.
//!
//! The window is a small state machine:
//!
//! ```text
//! Idle --enqueue--> Accumulating --enqueue (re-arm)--> Accumulating
//! Accumulating --timer--> Flushing (drain) --> Idle
//! Accumulating --clear--> Idle
//! ```
//!
//! Draining swaps the queue out under the same lock enqueue takes, so an item
//! either lands in the batch being drained or opens the next window.

use std::{
    collections::HashMap,
    future::Future,
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::future::join_all;
use http::Method;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    cache::DedupCache,
    core::{FetchError, FetchOptions, FetchResult},
    metrics::exporter::{outcome, BATCH_FLUSHES, BATCH_ITEMS},
};

/// Observable phase of the batch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPhase {
    Idle,
    Accumulating,
}

struct BatchItem {
    url: String,
    options: FetchOptions,
    reply: oneshot::Sender<FetchResult<JsonValue>>,
}

impl BatchItem {
    fn settle(self, result: FetchResult<JsonValue>) {
        BATCH_ITEMS.with_label_values(&[outcome(&result)]).inc();
        // the caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

enum Phase {
    Idle,
    Accumulating { generation: u64, timer: JoinHandle<()> },
}

struct State {
    phase: Phase,
    queue: Vec<BatchItem>,
    next_generation: u64,
}

struct Inner {
    cache: DedupCache,
    delay: Duration,
    state: Mutex<State>,
    flushes: AtomicU64,
}

/// Collects requests over a debounce window and flushes them together.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

impl BatchScheduler {
    pub fn new(cache: DedupCache, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                delay,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    queue: Vec::new(),
                    next_generation: 0,
                }),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a request and restart the window.
    ///
    /// The item is queued when this is called, not when the returned future
    /// is first polled. The future settles once the item's batch is processed,
    /// or with [`FetchError::Cancelled`] if the queue is cleared first.
    pub fn enqueue(
        &self,
        url: impl Into<String>,
        options: FetchOptions,
    ) -> impl Future<Output = FetchResult<JsonValue>> + Send + 'static {
        let (reply, receiver) = oneshot::channel();
        {
            let mut state = self.state();
            state.queue.push(BatchItem {
                url: url.into(),
                options,
                reply,
            });
            self.arm(&mut state);
        }

        async move { receiver.await.unwrap_or(Err(FetchError::Cancelled)) }
    }

    /// (Re)start the flush timer. Caller holds the state lock.
    fn arm(&self, state: &mut State) {
        if let Phase::Accumulating { timer, .. } = &state.phase {
            timer.abort();
        }

        state.next_generation = state.next_generation.wrapping_add(1);
        let generation = state.next_generation;
        let scheduler = self.clone();
        let delay = self.inner.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.flush(generation).await;
        });

        state.phase = Phase::Accumulating { generation, timer };
    }

    async fn flush(&self, generation: u64) {
        let batch = {
            let mut state = self.state();
            match &state.phase {
                Phase::Accumulating {
                    generation: current,
                    ..
                } if *current == generation => {}
                // re-armed or cleared after this timer fired
                _ => return,
            }
            // detaches this task's own handle rather than aborting it
            state.phase = Phase::Idle;
            mem::take(&mut state.queue)
        };

        if batch.is_empty() {
            return;
        }

        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        BATCH_FLUSHES.inc();
        info!("Flushing batch of {} requests", batch.len());
        self.process(batch).await;
    }

    async fn process(&self, batch: Vec<BatchItem>) {
        let mut groups: HashMap<(Method, String), Vec<BatchItem>> = HashMap::new();
        for item in batch {
            groups
                .entry((item.options.method.clone(), item.url.clone()))
                .or_default()
                .push(item);
        }

        join_all(groups.into_values().map(|items| self.process_group(items))).await;
    }

    async fn process_group(&self, items: Vec<BatchItem>) {
        let Some(first) = items.first() else {
            return;
        };
        let fingerprint = first.options.fingerprint(&first.url);
        let interchangeable = items
            .iter()
            .all(|item| item.options.fingerprint(&item.url) == fingerprint);

        if interchangeable {
            let (url, options) = (first.url.clone(), first.options.clone());
            debug!(
                "Dispatching {} identical requests to {} {url} once",
                items.len(),
                options.method
            );
            let result = self.inner.cache.fetch(&url, &options).await;
            for item in items {
                item.settle(result.clone());
            }
        } else {
            join_all(items.into_iter().map(|item| async move {
                let result = self.inner.cache.fetch(&item.url, &item.options).await;
                item.settle(result);
            }))
            .await;
        }
    }

    /// Reject every queued item with [`FetchError::Cancelled`] and disarm the
    /// timer. Batches already drained are unaffected. Returns the number of
    /// items rejected.
    pub fn clear(&self) -> usize {
        let items = {
            let mut state = self.state();
            if let Phase::Accumulating { timer, .. } = mem::replace(&mut state.phase, Phase::Idle)
            {
                timer.abort();
            }
            mem::take(&mut state.queue)
        };

        let cleared = items.len();
        for item in items {
            item.settle(Err(FetchError::Cancelled));
        }
        if cleared > 0 {
            info!("Cleared {cleared} queued batch requests");
        }
        cleared
    }

    pub fn phase(&self) -> BatchPhase {
        match &self.state().phase {
            Phase::Idle => BatchPhase::Idle,
            Phase::Accumulating { .. } => BatchPhase::Accumulating,
        }
    }

    /// Items waiting for the current window to close.
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    pub fn flushes(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }
}
