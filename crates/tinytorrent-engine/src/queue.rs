//! Bounded FIFO of work destined for the engine task.
//!
//! # Design
//! - Any thread may push; only the engine task drains.
//! - Draining swaps the whole queue out, so work submitted while a batch runs waits for the next
//!   tick instead of extending the current one.
//! - Once closed the queue rejects new work but keeps what is already queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use crate::error::{EngineError, EngineResult};

/// Default number of tasks that may wait for the engine.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4_096;

/// Multi-producer, single-consumer task queue with a wake signal.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    wake: Notify,
}

impl<T> TaskQueue<T> {
    /// Construct a queue holding at most `capacity` items (minimum one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Append an item and wake the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] once closed and [`EngineError::QueueFull`] at
    /// capacity.
    pub fn push(&self, item: T) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }
        {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            if items.len() >= self.capacity {
                return Err(EngineError::QueueFull {
                    capacity: self.capacity,
                });
            }
            items.push_back(item);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Take everything queued so far, oldest first.
    pub fn take_all(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Items waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further pushes and wake the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Resolve on the next push or close.
    ///
    /// A wake-up issued while nobody was waiting is kept for the next call.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn take_all_returns_items_in_order() -> EngineResult<()> {
        let queue = TaskQueue::with_capacity(8);
        for value in 1..=3 {
            queue.push(value)?;
        }
        assert_eq!(queue.take_all().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(queue.is_empty());
        Ok(())
    }

    #[test]
    fn full_queue_rejects_without_blocking() -> EngineResult<()> {
        let queue = TaskQueue::with_capacity(2);
        queue.push(1)?;
        queue.push(2)?;
        assert!(matches!(
            queue.push(3),
            Err(EngineError::QueueFull { capacity: 2 })
        ));
        assert_eq!(queue.len(), 2);
        Ok(())
    }

    #[test]
    fn closed_queue_keeps_backlog_but_rejects_new_items() -> EngineResult<()> {
        let queue = TaskQueue::with_capacity(4);
        queue.push("early")?;
        queue.close();
        assert!(matches!(queue.push("late"), Err(EngineError::ShuttingDown)));
        assert_eq!(queue.take_all().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn push_wakes_waiting_consumer() -> anyhow::Result<()> {
        let queue = Arc::new(TaskQueue::with_capacity(4));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;
        queue.push(7)?;
        timeout(Duration::from_secs(1), waiter).await??;
        Ok(())
    }

    #[tokio::test]
    async fn wake_before_wait_is_not_lost() -> anyhow::Result<()> {
        let queue: TaskQueue<u8> = TaskQueue::with_capacity(1);
        queue.close();
        timeout(Duration::from_millis(200), queue.notified()).await?;
        Ok(())
    }
}
