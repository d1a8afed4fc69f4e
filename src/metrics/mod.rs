//! Per-operation latency instrumentation
//!
//! The [`PerformanceMonitor`] keeps a bounded window of samples per operation
//! key and derives rolling statistics from it. Every sample is also observed
//! into the Prometheus latency histogram exported by [`exporter`].

pub mod exporter;

use std::{
    collections::{BTreeMap, VecDeque},
    future::Future,
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use log::trace;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::config;

/// One recorded duration. Immutable once stored.
#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub duration: Duration,
    pub recorded_at: Instant,
}

/// Rolling statistics over the retained window of one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    #[serde(serialize_with = "as_millis")]
    pub avg: Duration,
    #[serde(serialize_with = "as_millis")]
    pub min: Duration,
    #[serde(serialize_with = "as_millis")]
    pub max: Duration,
    pub count: usize,
    /// Average of the most recent samples only.
    #[serde(serialize_with = "as_millis")]
    pub recent: Duration,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// Latency recorder shared by every caller of the orchestrator.
///
/// Cloning is cheap and clones share the same samples. Each per-key window is
/// guarded by the map shard lock, so appends from parallel threads are safe.
#[derive(Clone)]
pub struct PerformanceMonitor {
    samples: Arc<DashMap<String, VecDeque<MetricSample>>>,
    max_samples: usize,
    recent_window: usize,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(&config::Metrics::default())
    }
}

impl PerformanceMonitor {
    pub fn new(cfg: &config::Metrics) -> Self {
        Self {
            samples: Arc::new(DashMap::new()),
            max_samples: cfg.max_samples.max(1),
            recent_window: cfg.recent_window.clamp(1, cfg.max_samples.max(1)),
        }
    }

    /// Start timing `key`; the sample is recorded when the timer is stopped.
    pub fn start_timing(&self, key: impl Into<String>) -> Timer {
        Timer {
            monitor: self.clone(),
            key: key.into(),
            started: Instant::now(),
        }
    }

    /// Time `fut` under `key`, recording a sample whatever its output.
    pub async fn measure<F>(&self, key: impl Into<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        let timer = self.start_timing(key);
        let output = fut.await;
        timer.stop();
        output
    }

    pub fn record(&self, key: &str, duration: Duration) {
        let sample = MetricSample {
            duration,
            recorded_at: Instant::now(),
        };

        let mut window = self.samples.entry(key.to_string()).or_default();
        window.push_back(sample);
        while window.len() > self.max_samples {
            window.pop_front();
        }
        drop(window);

        trace!("Recorded {duration:?} for {key}");
        exporter::observe_latency(key, duration);
    }

    /// Statistics for `key`, or `None` when nothing was recorded.
    pub fn get_stats(&self, key: &str) -> Option<MetricStats> {
        let window = self.samples.get(key)?;
        Self::summarize(&window, self.recent_window)
    }

    pub fn all_stats(&self) -> BTreeMap<String, MetricStats> {
        self.samples
            .iter()
            .filter_map(|entry| {
                Self::summarize(entry.value(), self.recent_window)
                    .map(|stats| (entry.key().clone(), stats))
            })
            .collect()
    }

    /// Drop the samples of `key`, or of every key when `None`.
    pub fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.samples.remove(key);
            }
            None => self.samples.clear(),
        }
    }

    fn summarize(window: &VecDeque<MetricSample>, recent_window: usize) -> Option<MetricStats> {
        let count = window.len();
        if count == 0 {
            return None;
        }

        let total: Duration = window.iter().map(|s| s.duration).sum();
        let min = window.iter().map(|s| s.duration).min()?;
        let max = window.iter().map(|s| s.duration).max()?;

        let recent_count = recent_window.min(count);
        let recent_total: Duration = window
            .iter()
            .skip(count - recent_count)
            .map(|s| s.duration)
            .sum();

        Some(MetricStats {
            avg: total / count as u32,
            min,
            max,
            count,
            recent: recent_total / recent_count as u32,
        })
    }
}

/// Handle returned by [`PerformanceMonitor::start_timing`].
#[must_use = "a timer records nothing until it is stopped"]
pub struct Timer {
    monitor: PerformanceMonitor,
    key: String,
    started: Instant,
}

impl Timer {
    /// Record the elapsed time since the timer started and return it.
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.monitor.record(&self.key, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_no_data() {
        let monitor = PerformanceMonitor::default();
        assert!(monitor.get_stats("GET /nothing").is_none());
        assert!(monitor.all_stats().is_empty());
    }

    #[test]
    fn test_stats() {
        let monitor = PerformanceMonitor::default();
        for n in [10, 20, 30, 40] {
            monitor.record("GET /a", ms(n));
        }
        let stats = monitor.get_stats("GET /a").unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, ms(10));
        assert_eq!(stats.max, ms(40));
        assert_eq!(stats.avg, ms(25));
        // fewer than 10 samples: recent covers all of them
        assert_eq!(stats.recent, ms(25));
    }

    #[test]
    fn test_window_is_bounded() {
        let monitor = PerformanceMonitor::default();
        // 1..=150 ms, only 51..=150 are retained
        for n in 1..=150 {
            monitor.record("POST /q", ms(n));
        }
        let stats = monitor.get_stats("POST /q").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, ms(51));
        assert_eq!(stats.max, ms(150));
        // last 10 samples are 141..=150
        assert_eq!(stats.recent, Duration::from_micros(145_500));
        assert_eq!(stats.avg, Duration::from_micros(100_500));
    }

    #[test]
    fn test_custom_window() {
        let monitor = PerformanceMonitor::new(&config::Metrics {
            max_samples: 3,
            recent_window: 2,
        });
        for n in [100, 1, 2, 3] {
            monitor.record("k", ms(n));
        }
        let stats = monitor.get_stats("k").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.max, ms(3));
        assert_eq!(stats.recent, Duration::from_micros(2_500));
    }

    #[test]
    fn test_reset() {
        let monitor = PerformanceMonitor::default();
        monitor.record("a", ms(1));
        monitor.record("b", ms(1));
        monitor.reset(Some("a"));
        assert!(monitor.get_stats("a").is_none());
        assert_eq!(monitor.all_stats().len(), 1);
        monitor.reset(None);
        assert!(monitor.all_stats().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timing() {
        let monitor = PerformanceMonitor::default();
        let timer = monitor.start_timing("GET /slow");
        tokio::time::sleep(ms(40)).await;
        let elapsed = timer.stop();
        assert!(elapsed >= ms(40) && elapsed < ms(42), "{elapsed:?}");

        let stats = monitor.get_stats("GET /slow").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg, elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure() {
        let monitor = PerformanceMonitor::default();
        let value = monitor
            .measure("op", async {
                tokio::time::sleep(ms(5)).await;
                7
            })
            .await;
        assert_eq!(value, 7);
        assert!(monitor.get_stats("op").unwrap().max >= ms(5));

        let json = serde_json::to_value(monitor.all_stats()).unwrap();
        assert_eq!(json["op"]["count"], 1);
        assert!(json["op"]["avg"].as_f64().unwrap() >= 5.0);
    }
}
