//! Background drain worker for queue-routed modules.
//!
//! On a fixed interval the worker reads the current routing snapshot, finds
//! every enabled module in queue-routing mode, and drains up to a bounded
//! batch per queue per tick, submitting each request back through
//! `Router::route`. Handler-level failures are logged, never retried: the
//! item was already consumed at dequeue.
//!
//! Ticks never overlap: a tick's batch completes before the next tick fires.

use std::sync::Arc;

use crate::queue::QueueStore;
use crate::router::Router;
use crate::types::{ConfigStore, DrainConfig};

/// Outcome counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items dequeued and submitted to the router.
    pub processed: usize,
    /// Submitted items whose response was FAILURE.
    pub failed: usize,
}

/// Periodic drain loop feeding queued requests into the router.
pub struct DrainWorker {
    config: Arc<ConfigStore>,
    queue: Arc<dyn QueueStore>,
    router: Arc<Router>,
    drain: DrainConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl std::fmt::Debug for DrainWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainWorker")
            .field("poll_interval", &self.drain.poll_interval)
            .field("batch_size", &self.drain.batch_size)
            .finish()
    }
}

impl DrainWorker {
    pub fn new(
        config: Arc<ConfigStore>,
        queue: Arc<dyn QueueStore>,
        router: Arc<Router>,
        drain: DrainConfig,
    ) -> Self {
        Self {
            config,
            queue,
            router,
            drain,
            stop_tx: None,
        }
    }

    /// Start the drain loop in the background.
    /// Returns immediately; draining runs in a spawned task.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let config = Arc::clone(&self.config);
        let queue = Arc::clone(&self.queue);
        let router = Arc::clone(&self.router);
        let drain = self.drain.clone();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(drain.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::drain_once(&config, &queue, &router, drain.batch_size).await;
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("drain_worker_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the drain loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run a single drain pass over every queue-routed module.
    ///
    /// Exposed for tests and manual flushing; the background loop calls this
    /// on every tick.
    pub async fn drain_once(
        config: &ConfigStore,
        queue: &Arc<dyn QueueStore>,
        router: &Router,
        batch_size: usize,
    ) -> DrainReport {
        let snapshot = config.current();
        let mut report = DrainReport::default();

        for queue_name in snapshot.queue_names() {
            report = Self::drain_queue(queue, router, &queue_name, batch_size, report).await;
        }
        report
    }

    async fn drain_queue(
        queue: &Arc<dyn QueueStore>,
        router: &Router,
        queue_name: &str,
        batch_size: usize,
        mut report: DrainReport,
    ) -> DrainReport {
        let mut processed = 0usize;

        while processed < batch_size {
            let request = match queue.dequeue(queue_name).await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("dequeue failed queue={}: {}", queue_name, err);
                    break;
                }
            };

            let response = router.route(&request).await;
            if response.is_success() {
                tracing::debug!(
                    "drained queue={} corr_id={} status=SUCCESS",
                    queue_name,
                    request.correlation_id
                );
            } else {
                // Item is already consumed; log and move on.
                report.failed += 1;
                tracing::warn!(
                    "drained request failed queue={} corr_id={} code={:?}",
                    queue_name,
                    request.correlation_id,
                    response.error_code
                );
            }
            processed += 1;
        }

        if processed > 0 {
            tracing::info!("processed {} message(s) from queue {}", processed, queue_name);
        }
        report.processed += processed;
        report
    }
}
