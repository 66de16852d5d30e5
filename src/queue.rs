// ===============================
// src/queue.rs
// ===============================
//
// Bounded blocking FIFO with shutdown. Producers suspend while the queue is
// full, the consumer suspends while it is empty, and shutdown() wakes
// everyone: pending pushes are refused, pops keep draining what is already
// queued and only then report shutdown. Capacity 0 means unbounded.
//
// State lives under a std mutex (critical sections are a few pointer moves);
// waiting is done with tokio Notify so the queue composes with the engine's
// tasks. Waiters register before re-checking state, so a wakeup between the
// check and the await is never lost.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The queue shut down before a slot was available.
    Refused,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PopOutcome<T> {
    Item(T),
    Timeout,
    Shutdown,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

#[derive(Debug)]
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    consumer: Notify,
    producer: Notify,
}

impl<T> BlockingQueue<T> {
    /// Capacity 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                shutdown: false,
            }),
            capacity,
            consumer: Notify::new(),
            producer: Notify::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // queue state stays consistent even if a lock holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits for a slot while the queue is full; refused once shut down.
    pub async fn push(&self, item: T) -> PushOutcome {
        let mut item = Some(item);
        loop {
            let notified = self.producer.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if st.shutdown {
                    return PushOutcome::Refused;
                }
                if self.capacity == 0 || st.items.len() < self.capacity {
                    st.items.push_back(item.take().expect("push item consumed twice"));
                    drop(st);
                    self.consumer.notify_one();
                    return PushOutcome::Pushed;
                }
            }
            notified.await;
        }
    }

    /// Waits while empty. Returns None only after shutdown AND the queue has
    /// fully drained.
    pub async fn wait_and_pop(&self) -> Option<T> {
        loop {
            let notified = self.consumer.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if let Some(item) = st.items.pop_front() {
                    drop(st);
                    self.producer.notify_one();
                    return Some(item);
                }
                if st.shutdown {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking pop; None when empty or already shut down.
    pub fn try_pop(&self) -> Option<T> {
        let mut st = self.lock();
        if st.shutdown || st.items.is_empty() {
            return None;
        }
        let item = st.items.pop_front();
        drop(st);
        self.producer.notify_one();
        item
    }

    pub async fn timed_wait_and_pop(&self, timeout: Duration) -> PopOutcome<T> {
        match tokio::time::timeout(timeout, self.wait_and_pop()).await {
            Ok(Some(item)) => PopOutcome::Item(item),
            Ok(None) => PopOutcome::Shutdown,
            Err(_) => PopOutcome::Timeout,
        }
    }

    /// Idempotent; wakes every blocked producer and consumer.
    pub fn shutdown(&self) {
        {
            let mut st = self.lock();
            st.shutdown = true;
        }
        self.consumer.notify_waiters();
        self.producer.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TEST_WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn push_then_pop() {
        let q = BlockingQueue::unbounded();
        assert_eq!(q.push(10).await, PushOutcome::Pushed);
        assert_eq!(q.wait_and_pop().await, Some(10));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn try_pop_is_non_blocking() {
        let q = BlockingQueue::unbounded();
        assert_eq!(q.try_pop(), None);
        q.push(20).await;
        assert_eq!(q.try_pop(), Some(20));
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn single_producer_fifo() {
        let q = Arc::new(BlockingQueue::new(5));
        let producer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move {
                for i in 0..100 {
                    assert_eq!(q.push(i).await, PushOutcome::Pushed);
                }
            })
        };

        for i in 0..100 {
            assert_eq!(q.wait_and_pop().await, Some(i));
        }
        producer.await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn multiple_producers_single_consumer_sees_every_item() {
        let q = Arc::new(BlockingQueue::new(4));
        let mut handles = Vec::new();
        for p in 0..4 {
            let q = Arc::clone(&q);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    q.push(p * 25 + i).await;
                }
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(q.wait_and_pop().await.unwrap());
        }
        for h in handles {
            h.await.unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn shutdown_on_empty_queue_releases_waiter() {
        let q = Arc::new(BlockingQueue::<i32>::unbounded());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.wait_and_pop().await })
        };
        tokio::task::yield_now().await;
        q.shutdown();
        let popped = tokio::time::timeout(TEST_WAIT, waiter).await.unwrap().unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn shutdown_drains_remaining_items_first() {
        let q = BlockingQueue::unbounded();
        q.push(30).await;
        q.shutdown();
        assert_eq!(q.wait_and_pop().await, Some(30));
        assert_eq!(q.wait_and_pop().await, None);
    }

    #[tokio::test]
    async fn push_refused_after_shutdown() {
        let q = BlockingQueue::unbounded();
        q.shutdown();
        q.shutdown(); // idempotent
        assert_eq!(q.push(1).await, PushOutcome::Refused);
        assert!(q.is_shutdown());
    }

    #[tokio::test]
    async fn blocked_push_on_full_queue_is_refused_by_shutdown() {
        let q = Arc::new(BlockingQueue::new(1));
        q.push(1).await;
        let blocked = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.push(2).await })
        };
        tokio::task::yield_now().await;
        q.shutdown();
        let outcome = tokio::time::timeout(TEST_WAIT, blocked).await.unwrap().unwrap();
        assert_eq!(outcome, PushOutcome::Refused);
    }

    #[tokio::test]
    async fn bounded_push_resumes_when_slot_frees() {
        let q = Arc::new(BlockingQueue::new(1));
        q.push(1).await;
        let blocked = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.push(2).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.wait_and_pop().await, Some(1));
        let outcome = tokio::time::timeout(TEST_WAIT, blocked).await.unwrap().unwrap();
        assert_eq!(outcome, PushOutcome::Pushed);
        assert_eq!(q.wait_and_pop().await, Some(2));
    }

    #[tokio::test]
    async fn timed_pop_times_out_then_delivers() {
        let q = BlockingQueue::unbounded();
        assert_eq!(
            q.timed_wait_and_pop(Duration::from_millis(10)).await,
            PopOutcome::Timeout
        );
        q.push(7).await;
        assert_eq!(
            q.timed_wait_and_pop(Duration::from_millis(10)).await,
            PopOutcome::Item(7)
        );
        q.shutdown();
        assert_eq!(
            q.timed_wait_and_pop(Duration::from_millis(10)).await,
            PopOutcome::Shutdown
        );
    }
}
