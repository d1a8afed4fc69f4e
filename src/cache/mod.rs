//! Deduplicating response cache
//!
//! Every request goes through [`DedupCache::fetch`]. A valid cache entry is
//! served without touching the network, an identical in-flight request is
//! joined instead of re-issued, and only otherwise is the transport called.
//! At most one dispatch per [`RequestKey`] is outstanding at any instant.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use crate::{
    core::{FetchOptions, FetchResult, RequestKey},
    metrics::exporter::{outcome, CACHE_HITS, COALESCED, DISPATCHES},
    transport::Transport,
};

type SharedFetch = Shared<BoxFuture<'static, FetchResult<JsonValue>>>;

/// Successful result kept for `ttl` after `created_at`.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: JsonValue,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Diagnostic snapshot of the cache.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Entries held, expired ones included until swept.
    pub size: usize,
    pub pending: usize,
    pub keys: Vec<String>,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

struct Inner {
    transport: Arc<dyn Transport>,
    pending: DashMap<RequestKey, SharedFetch>,
    entries: DashMap<RequestKey, CacheEntry>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// In-flight deduplication plus a TTL cache in front of a [`Transport`].
///
/// Cloning is cheap; clones share the same maps.
#[derive(Clone)]
pub struct DedupCache {
    inner: Arc<Inner>,
}

impl DedupCache {
    pub fn new(transport: Arc<dyn Transport>, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                pending: DashMap::new(),
                entries: DashMap::new(),
                default_ttl,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch with the ttl carried by `options`, or the default one.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<JsonValue> {
        let ttl = options.ttl.unwrap_or(self.inner.default_ttl);
        self.fetch_with_ttl(url, options, ttl).await
    }

    pub async fn fetch_with_ttl(
        &self,
        url: &str,
        options: &FetchOptions,
        ttl: Duration,
    ) -> FetchResult<JsonValue> {
        let key = options.key(url);

        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        let (shared, leader) = match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                COALESCED.inc();
                debug!("Coalescing onto in-flight request {key}");
                (entry.get().clone(), false)
            }
            Entry::Vacant(entry) => {
                // a dispatch may have settled between the lookup and taking the shard lock
                if let Some(value) = self.lookup(&key) {
                    return Ok(value);
                }
                self.inner.misses.fetch_add(1, Ordering::Relaxed);

                let dispatch = Self::dispatch(
                    self.inner.clone(),
                    key.clone(),
                    url.to_string(),
                    options.clone(),
                    ttl,
                );
                let shared = AssertUnwindSafe(dispatch)
                    .catch_unwind()
                    .map(|result| {
                        result.unwrap_or_else(|_| Err(crate::internal_error!("dispatch panicked")))
                    })
                    .boxed()
                    .shared();
                entry.insert(shared.clone());
                (shared, true)
            }
        };

        if leader {
            // callers may stop waiting; the dispatch still runs to completion
            tokio::spawn(shared.clone());
        }

        shared.await
    }

    async fn dispatch(
        inner: Arc<Inner>,
        key: RequestKey,
        url: String,
        options: FetchOptions,
        ttl: Duration,
    ) -> FetchResult<JsonValue> {
        let _pending = PendingGuard {
            inner: &inner,
            key: &key,
        };

        debug!("Dispatching {key}");
        let result = match inner.transport.request(&url, &options).await {
            Ok(response) => response.into_result(),
            Err(e) => Err(e),
        };
        DISPATCHES.with_label_values(&[outcome(&result)]).inc();

        match &result {
            Ok(value) => {
                inner.entries.insert(
                    key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        created_at: Instant::now(),
                        ttl,
                    },
                );
            }
            Err(e) => warn!("Request {key} failed: {e}"),
        }

        // the cache entry is visible before the pending entry goes away
        result
    }

    fn lookup(&self, key: &RequestKey) -> Option<JsonValue> {
        let entry = self.inner.entries.get(key)?;
        if !entry.is_valid(Instant::now()) {
            return None;
        }
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        CACHE_HITS.inc();
        debug!("Cache hit for {key}");
        Some(entry.value.clone())
    }

    /// Remove cache entries whose key contains `pattern`, or all of them.
    ///
    /// In-flight requests are left alone. Returns the number removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => self.remove_where(|key, _| key.contains(pattern)),
            None => {
                let removed = self.inner.entries.len();
                self.inner.entries.clear();
                debug!("Invalidated all {removed} cache entries");
                removed
            }
        }
    }

    /// Remove cache entries whose key matches `pattern`.
    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        self.remove_where(|key, _| pattern.is_match(key.as_str()))
    }

    /// Remove every expired cache entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        self.remove_where(|_, entry| !entry.is_valid(now))
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RequestKey, &CacheEntry) -> bool,
    {
        let mut removed = 0;
        self.inner.entries.retain(|key, entry| {
            let remove = predicate(key, entry);
            if remove {
                removed += 1;
            }
            !remove
        });
        if removed > 0 {
            debug!("Removed {removed} cache entries");
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> CacheStats {
        let mut keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        keys.sort();

        CacheStats {
            size: keys.len(),
            pending: self.inner.pending.len(),
            keys,
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
        }
    }
}

/// Clears the pending entry when the dispatch settles, panics included.
struct PendingGuard<'a> {
    inner: &'a Inner,
    key: &'a RequestKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.remove(self.key);
    }
}
