//! Request orchestration layer
//!
//! [`Orchestrator`] is the façade application code calls. It owns the
//! deduplicating cache, the batch scheduler and the performance monitor for
//! its whole lifetime; tests build a fresh one instead of sharing globals.

pub mod lifecycle;

use std::{collections::BTreeMap, sync::Arc};

use http::{Method, Uri};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

pub use lifecycle::Lifecycle;

use crate::{
    batch::{BatchPhase, BatchScheduler},
    cache::{CacheStats, DedupCache},
    config::Config,
    core::{FetchOptions, FetchResult},
    metrics::{MetricStats, PerformanceMonitor},
    transport::{HttpTransport, Transport},
};

/// Read-only snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub cache: CacheStats,
    pub batch: BatchDiagnostics,
    pub metrics: BTreeMap<String, MetricStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDiagnostics {
    pub phase: BatchPhase,
    pub queued: usize,
    pub flushes: u64,
}

pub struct Orchestrator {
    cache: DedupCache,
    batcher: BatchScheduler,
    monitor: PerformanceMonitor,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let cache = DedupCache::new(transport, config.cache.default_ttl());
        let batcher = BatchScheduler::new(cache.clone(), config.batch.delay());
        let monitor = PerformanceMonitor::new(&config.metrics);
        Self {
            cache,
            batcher,
            monitor,
        }
    }

    /// Build an orchestrator over the HTTP transport described by `config`.
    pub fn from_config(config: &Config) -> FetchResult<Self> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Fetch `url`, timed under its `"METHOD path"` operation key.
    ///
    /// `options.batch` routes the call through the batch scheduler, otherwise
    /// it goes straight to the deduplicating cache.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> FetchResult<JsonValue> {
        let timer = self
            .monitor
            .start_timing(operation_key(&options.method, url));
        let result = if options.batch {
            self.batcher.enqueue(url, options).await
        } else {
            self.cache.fetch(url, &options).await
        };
        timer.stop();
        result
    }

    /// [`fetch`](Self::fetch) and deserialize the value into `T`.
    pub async fn fetch_json<T>(&self, url: &str, options: FetchOptions) -> FetchResult<T>
    where
        T: DeserializeOwned,
    {
        let value = self.fetch(url, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn batcher(&self) -> &BatchScheduler {
        &self.batcher
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.cache.invalidate(pattern)
    }

    pub fn sweep_expired(&self) -> usize {
        self.cache.sweep_expired()
    }

    /// Cancel every request still waiting in the batch window.
    pub fn clear_batch(&self) -> usize {
        self.batcher.clear()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn all_metric_stats(&self) -> BTreeMap<String, MetricStats> {
        self.monitor.all_stats()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            cache: self.cache_stats(),
            batch: BatchDiagnostics {
                phase: self.batcher.phase(),
                queued: self.batcher.queued(),
                flushes: self.batcher.flushes(),
            },
            metrics: self.all_metric_stats(),
        }
    }
}

/// Per-endpoint operation key: method plus path, query string dropped.
pub fn operation_key(method: &Method, url: &str) -> String {
    let path = match url.parse::<Uri>() {
        Ok(uri) if !uri.path().is_empty() => uri.path().to_string(),
        _ => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    format!("{method} {path}")
}
