use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::task::TaskId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("dispatch queue is closed")]
    Closed,
}

pub type QueueResult<T> = Result<T, QueueError>;

/// FIFO handoff of pending task identifiers from the API layer to idle
/// workers. Unbounded: admission control is the fixed worker count, not the
/// queue. Clones share the same channel.
///
/// Closure is signalled out-of-band on a watch channel so a parked consumer
/// never blocks it: `dequeue` holds the receiver lock across its wait, and
/// routing `close` through that lock would deadlock shutdown.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: UnboundedSender<TaskId>,
    rx: Arc<AsyncMutex<UnboundedReceiver<TaskId>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            closed: Arc::new(closed),
        }
    }

    /// Appends a task identifier to the tail.
    pub fn enqueue(&self, id: TaskId) -> QueueResult<()> {
        if *self.closed.borrow() {
            return Err(QueueError::Closed);
        }
        self.tx.send(id).map_err(|_| QueueError::Closed)
    }

    /// Removes and returns the head, waiting while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<TaskId> {
        let mut closed = self.closed.subscribe();
        let mut rx = self.rx.lock().await;
        loop {
            // Drain buffered entries first so closure never drops work.
            match rx.try_recv() {
                Ok(id) => return Some(id),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if *closed.borrow() {
                return None;
            }
            tokio::select! {
                msg = rx.recv() => return msg,
                _ = closed.changed() => {}
            }
        }
    }

    /// Closes the queue: pending entries still drain, then every waiting
    /// worker observes `None` and further `enqueue` calls are refused.
    pub fn close(&self) {
        // `watch::Sender::send` discards the value when no receiver is
        // subscribed (consumers only subscribe while inside `dequeue`), so
        // store unconditionally.
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use uuid::Uuid;

    #[tokio::test]
    async fn dispatch_preserves_fifo_order() {
        let queue = DispatchQueue::new();
        let ids: Vec<TaskId> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }
        for id in &ids {
            assert_eq!(queue.dequeue().await, Some(*id));
        }
    }

    #[tokio::test]
    async fn close_drains_then_wakes_consumers() {
        let queue = DispatchQueue::new();
        let id = Uuid::new_v4();
        queue.enqueue(id).unwrap();
        queue.close();
        assert_eq!(queue.dequeue().await, Some(id));
        assert_eq!(queue.dequeue().await, None);
        assert!(matches!(queue.enqueue(id), Err(QueueError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_wakes_a_parked_consumer() {
        let queue = DispatchQueue::new();
        let parked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        // Let the consumer reach its empty-queue wait before closing.
        sleep(Duration::from_millis(50)).await;
        queue.close();

        let result = timeout(Duration::from_secs(1), parked)
            .await
            .expect("close must wake the parked consumer")
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_is_not_blocked_by_waiting_consumers() {
        let queue = DispatchQueue::new();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();
        sleep(Duration::from_millis(50)).await;

        // Closing must complete promptly even with every consumer parked.
        timeout(Duration::from_secs(1), async { queue.close() })
            .await
            .expect("close must not wait on consumers");
        for consumer in consumers {
            assert_eq!(consumer.await.unwrap(), None);
        }
    }
}
