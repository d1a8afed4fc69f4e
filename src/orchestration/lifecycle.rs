//! Background task lifecycle
//!
//! Housekeeping tasks (the cache sweeper, the log file writer) run until the
//! shared shutdown signal flips, then [`Lifecycle::shutdown`] waits for them.

use std::{future::Future, time::Duration};

use log::{debug, info, warn};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::cache::DedupCache;

/// Owns background tasks and the signal that stops them.
pub struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Receiver that observes `true` once shutdown starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run `task` until it returns; it should watch [`shutdown_signal`](Self::shutdown_signal).
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting background task '{name}'");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Remove expired cache entries every `interval` until shutdown.
    pub fn spawn_sweeper(&mut self, cache: DedupCache, interval: Duration) {
        let mut shutdown = self.shutdown_signal();
        self.spawn("cache sweeper", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    },

                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!("Swept {removed} expired cache entries");
                        }
                    }
                }
            }
        });
    }

    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|(_, task)| !task.is_finished()).count()
    }

    /// Signal shutdown and wait for every task to stop.
    pub async fn shutdown(self) {
        info!("Starting graceful shutdown...");
        // no receiver left only means every task already finished
        let _ = self.shutdown_tx.send(true);

        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task '{name}' ended abnormally: {e}");
            }
        }
        info!("Graceful shutdown completed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{core::FetchOptions, transport::mock::MockTransport};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let transport = Arc::new(MockTransport::counting());
        let cache = DedupCache::new(transport, Duration::from_secs(300));
        cache
            .fetch("/short", &FetchOptions::get().ttl(ms(50)))
            .await
            .unwrap();
        cache.fetch("/long", &FetchOptions::get()).await.unwrap();

        let mut lifecycle = Lifecycle::new();
        lifecycle.spawn_sweeper(cache.clone(), ms(100));
        assert_eq!(lifecycle.running(), 1);

        tokio::time::sleep(ms(150)).await;
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert!(stats.keys[0].contains("/long"));

        lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_watching_tasks() {
        let mut lifecycle = Lifecycle::new();
        let mut signal = lifecycle.shutdown_signal();
        lifecycle.spawn("watcher", async move {
            let _ = signal.wait_for(|stop| *stop).await;
        });
        tokio::time::sleep(ms(10)).await;
        assert_eq!(lifecycle.running(), 1);

        tokio::time::timeout(ms(100), lifecycle.shutdown())
            .await
            .unwrap();
    }
}
