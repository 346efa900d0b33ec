//! Queue offload - FIFO request queues per named queue.
//!
//! Producers enqueue requests and get immediate acknowledgment; the drain
//! worker (see [`worker`]) later dequeues and submits them to the router,
//! decoupling producer latency from router capacity.
//!
//! Contract per named queue: FIFO for a single producer/consumer pair, and
//! each item is handed to exactly one dequeuer under concurrency. The
//! in-memory store consumes an item on dequeue, so a drain-side processing
//! failure is logged, never re-enqueued. Durable stores can implement
//! [`QueueStore`] with at-least-once semantics instead.

pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::types::{Error, Result, ServiceRequest};

/// A queued request with its enqueue timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub queue_name: String,
    pub request: ServiceRequest,
    pub enqueued_at: DateTime<Utc>,
}

/// Backing store for named FIFO queues.
///
/// Store-level failures (a durable backend being unreachable) surface as
/// `Err` to the producer; "queue empty" is `Ok(None)`, not an error.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Append to the tail of the named queue.
    async fn enqueue(&self, queue_name: &str, request: ServiceRequest) -> Result<()>;

    /// Remove and return the head of the named queue, if any.
    async fn dequeue(&self, queue_name: &str) -> Result<Option<ServiceRequest>>;

    /// Approximate item count for the named queue.
    async fn len(&self, queue_name: &str) -> usize;
}

/// In-memory queue store backed by a `VecDeque` per queue name.
///
/// Not durable: suitable for tests, demos and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<QueueItem>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<QueueItem>>> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, queue_name: &str, request: ServiceRequest) -> Result<()> {
        if queue_name.trim().is_empty() {
            return Err(Error::validation("queue name must not be empty"));
        }
        let item = QueueItem {
            queue_name: queue_name.to_string(),
            request,
            enqueued_at: Utc::now(),
        };
        tracing::debug!(
            "enqueue queue={} corr_id={} service={}",
            queue_name,
            item.request.correlation_id,
            item.request.service_name
        );
        self.lock()
            .entry(queue_name.to_string())
            .or_default()
            .push_back(item);
        Ok(())
    }

    async fn dequeue(&self, queue_name: &str) -> Result<Option<ServiceRequest>> {
        let item = self
            .lock()
            .get_mut(queue_name)
            .and_then(|queue| queue.pop_front());
        if let Some(item) = &item {
            tracing::debug!(
                "dequeue queue={} corr_id={} service={}",
                queue_name,
                item.request.correlation_id,
                item.request.service_name
            );
        }
        Ok(item.map(|i| i.request))
    }

    async fn len(&self, queue_name: &str) -> usize {
        self.lock().get(queue_name).map_or(0, VecDeque::len)
    }
}
