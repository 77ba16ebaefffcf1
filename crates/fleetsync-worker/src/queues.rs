//! Task queue abstraction.
//!
//! A provider hands out publishers and runs consumers for named queues.
//! Payloads are opaque bytes so a broker-backed provider can carry them
//! unchanged.
//!
//! ## Shutdown
//!
//! `stop` closes every queue: publishers fail from then on, while
//! consumers keep draining what was already enqueued. `wait` resolves once
//! every consumer has drained and exited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::QueueError;

/// Queue that carries [`Task`](crate::tasks::Task)s.
pub const TASK_QUEUE: &str = "task-queue";

/// Sends payloads to one queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Enqueue a payload. Waits while the queue is full.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Enqueue a payload without waiting; [`QueueError::Full`] when the
    /// queue is at capacity.
    fn try_publish(&self, payload: Vec<u8>) -> Result<(), QueueError>;
}

/// Processes payloads taken from a queue.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>) -> anyhow::Result<()>;
}

/// Source of publishers and consumers.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// A publisher for `queue`.
    fn publisher(&self, queue: &str) -> Result<Arc<dyn Publisher>, QueueError>;

    /// Start one consumer on `queue`. Each payload goes to exactly one
    /// consumer.
    fn consume(&self, queue: &str, handler: Arc<dyn QueueHandler>) -> Result<(), QueueError>;

    /// Stop accepting new work.
    fn stop(&self);

    /// Wait for every consumer to finish.
    async fn wait(&self);
}

type Channel = (async_channel::Sender<Vec<u8>>, async_channel::Receiver<Vec<u8>>);

/// In-process provider backed by bounded channels.
pub struct MemoryQueueProvider {
    capacity: usize,
    queues: Mutex<HashMap<String, Channel>>,
    consumers: TaskTracker,
    stopped: AtomicBool,
}

impl MemoryQueueProvider {
    /// A provider whose queues buffer up to `capacity` payloads each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
            consumers: TaskTracker::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Payloads waiting in `queue`.
    pub fn pending(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, |(tx, _)| tx.len())
    }

    fn channel(&self, queue: &str) -> Result<Channel, QueueError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }
        let mut queues = self.queues.lock();
        let channel = queues
            .entry(queue.to_owned())
            .or_insert_with(|| async_channel::bounded(self.capacity));
        Ok(channel.clone())
    }
}

struct ChannelPublisher {
    queue: String,
    tx: async_channel::Sender<Vec<u8>>,
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| QueueError::Closed(self.queue.clone()))
    }

    fn try_publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.tx.try_send(payload).map_err(|e| match e {
            async_channel::TrySendError::Full(_) => QueueError::Full(self.queue.clone()),
            async_channel::TrySendError::Closed(_) => QueueError::Closed(self.queue.clone()),
        })
    }
}

#[async_trait]
impl QueueProvider for MemoryQueueProvider {
    fn publisher(&self, queue: &str) -> Result<Arc<dyn Publisher>, QueueError> {
        let (tx, _) = self.channel(queue)?;
        Ok(Arc::new(ChannelPublisher {
            queue: queue.to_owned(),
            tx,
        }))
    }

    fn consume(&self, queue: &str, handler: Arc<dyn QueueHandler>) -> Result<(), QueueError> {
        let (_, rx) = self.channel(queue)?;
        let queue = queue.to_owned();

        self.consumers.spawn(async move {
            while let Ok(payload) = rx.recv().await {
                if let Err(e) = handler.handle(payload).await {
                    warn!(queue = %queue, error = %e, "task failed");
                }
            }
            debug!(queue = %queue, "consumer drained");
        });
        Ok(())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for (tx, _) in self.queues.lock().values() {
            tx.close();
        }
        self.consumers.close();
        debug!("queue provider stopped");
    }

    async fn wait(&self) {
        self.consumers.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        seen: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl QueueHandler for Counting {
        async fn handle(&self, payload: Vec<u8>) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.seen.fetch_add(1, Ordering::SeqCst);
            if payload == b"bad" {
                anyhow::bail!("rejected payload");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_consumers_drain_after_stop() {
        let provider = MemoryQueueProvider::new(16);
        let publisher = provider.publisher(TASK_QUEUE).unwrap();
        for i in 0..10u8 {
            publisher.publish(vec![i]).await.unwrap();
        }

        let handler = Arc::new(Counting {
            delay: Duration::from_millis(5),
            ..Counting::default()
        });
        provider.consume(TASK_QUEUE, handler.clone()).unwrap();
        provider.consume(TASK_QUEUE, handler.clone()).unwrap();

        provider.stop();
        provider.wait().await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 10);
        assert_eq!(provider.pending(TASK_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_publish_after_stop_fails() {
        let provider = MemoryQueueProvider::new(4);
        let publisher = provider.publisher(TASK_QUEUE).unwrap();
        provider.stop();

        assert!(matches!(publisher.publish(vec![1]).await, Err(QueueError::Closed(_))));
        assert!(matches!(provider.publisher(TASK_QUEUE), Err(QueueError::Stopped)));
        assert!(matches!(
            provider.consume(TASK_QUEUE, Arc::new(Counting::default())),
            Err(QueueError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_consumer() {
        let provider = MemoryQueueProvider::new(4);
        let publisher = provider.publisher(TASK_QUEUE).unwrap();
        let handler = Arc::new(Counting::default());
        provider.consume(TASK_QUEUE, handler.clone()).unwrap();

        publisher.publish(b"bad".to_vec()).await.unwrap();
        publisher.publish(b"good".to_vec()).await.unwrap();

        provider.stop();
        provider.wait().await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_try_publish_reports_a_full_queue() {
        let provider = MemoryQueueProvider::new(2);
        let publisher = provider.publisher(TASK_QUEUE).unwrap();

        publisher.try_publish(vec![1]).unwrap();
        publisher.try_publish(vec![2]).unwrap();
        assert!(matches!(publisher.try_publish(vec![3]), Err(QueueError::Full(_))));
        assert_eq!(provider.pending(TASK_QUEUE), 2);

        let stopped = MemoryQueueProvider::new(2);
        let publisher = stopped.publisher(TASK_QUEUE).unwrap();
        stopped.stop();
        assert!(matches!(publisher.try_publish(vec![4]), Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn test_wait_without_consumers_returns_after_stop() {
        let provider = MemoryQueueProvider::new(4);
        provider.stop();
        tokio::time::timeout(Duration::from_secs(1), provider.wait())
            .await
            .unwrap();
    }
}
