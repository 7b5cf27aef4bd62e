//! FIFO queue with timed producer backpressure.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::observability::metrics;

/// A thread-safe FIFO whose producers can block until consumers make room.
///
/// The capacity threshold is not a property of the queue: each caller of
/// [`BoundedQueue::wait_until_below`] brings its own, so occupancy may
/// transiently exceed any of them.
pub struct BoundedQueue<T> {
    /// Queue name, used as the metrics label.
    name: String,
    items: Mutex<VecDeque<T>>,
    /// Signalled when an item is enqueued.
    not_empty: Condvar,
    /// Signalled when an item is dequeued.
    not_full: Condvar,
    /// Wakes async consumers on enqueue.
    arrivals: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            arrivals: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert an item. Never blocks and never checks capacity.
    pub fn enqueue(&self, item: T) {
        let mut items = self.items.lock();
        items.push_back(item);
        let len = items.len();
        drop(items);

        self.not_empty.notify_one();
        self.arrivals.notify_waiters();
        metrics::record_queue_depth(&self.name, len);
    }

    /// Pop the oldest item, blocking until one is available.
    pub fn dequeue(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.after_pop(items.len());
                return item;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Pop the oldest item, failing with `Empty` once `timeout` has elapsed.
    pub fn dequeue_timeout(&self, timeout: Duration) -> CoordinatorResult<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.after_pop(items.len());
                return Ok(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut items, deadline).timed_out()
                        && items.is_empty()
                    {
                        return Err(CoordinatorError::Empty);
                    }
                }
                None => self.not_empty.wait(&mut items),
            }
        }
    }

    /// Pop the oldest item without parking a thread, failing with `Empty`
    /// once `timeout` has elapsed.
    ///
    /// Nothing is removed until the future resolves, so dropping it mid-wait
    /// leaves the queue untouched.
    pub async fn dequeue_async(&self, timeout: Duration) -> CoordinatorResult<T> {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between is not missed.
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return Ok(item);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_dequeue().ok_or(CoordinatorError::Empty);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Pop the oldest item if there is one.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front()?;
        self.after_pop(items.len());
        Some(item)
    }

    /// Block until occupancy drops below `threshold`.
    ///
    /// `threshold <= 0` returns immediately. `timeout` is in seconds; a
    /// negative value fails with `InvalidArgument`, and an elapsed deadline
    /// with occupancy still at or above the threshold fails with `Full`.
    /// Every call gets its own deadline. Returns how long the caller waited.
    pub fn wait_until_below(&self, threshold: i64, timeout: Option<f64>) -> CoordinatorResult<Duration> {
        let started = Instant::now();
        if threshold <= 0 {
            return Ok(started.elapsed());
        }

        let budget = match timeout {
            Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                CoordinatorError::InvalidArgument(format!(
                    "'timeout' must be a non-negative number, got {}",
                    secs
                ))
            })?),
            None => None,
        };
        let deadline = budget.and_then(|budget| started.checked_add(budget));

        let mut items = self.items.lock();
        while occupancy(items.len()) >= threshold {
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(CoordinatorError::Full);
                    }
                    self.not_full.wait_until(&mut items, deadline);
                }
                None => self.not_full.wait(&mut items),
            }
        }
        drop(items);

        let waited = started.elapsed();
        metrics::record_capacity_wait(&self.name, waited);
        Ok(waited)
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn after_pop(&self, remaining: usize) {
        // Waiters may hold different thresholds, so all of them re-check.
        self.not_full.notify_all();
        metrics::record_queue_depth(&self.name, remaining);
    }
}

fn occupancy(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn occupancy_tracks_enqueues_minus_dequeues() {
        let queue = BoundedQueue::new("test");
        for i in 0..10 {
            queue.enqueue(i);
        }
        assert_eq!(queue.len(), 10);

        for _ in 0..4 {
            queue.dequeue();
        }
        assert_eq!(queue.len(), 6);

        queue.enqueue(99);
        assert!(queue.try_dequeue().is_some());
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn dequeue_preserves_fifo_order() {
        let queue = BoundedQueue::new("fifo");
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");

        assert_eq!(queue.dequeue(), "a");
        assert_eq!(queue.dequeue(), "b");
        assert_eq!(queue.dequeue(), "c");
        assert!(queue.is_empty());
    }

    #[test]
    fn non_positive_threshold_returns_immediately() {
        let queue = BoundedQueue::new("unbounded");
        for i in 0..5 {
            queue.enqueue(i);
        }
        let waited = queue.wait_until_below(0, None).unwrap();
        assert!(waited < Duration::from_millis(50));
        assert!(queue.wait_until_below(-3, Some(0.0)).is_ok());
    }

    #[test]
    fn negative_timeout_is_invalid() {
        let queue = BoundedQueue::<u32>::new("invalid");
        let err = queue.wait_until_below(5, Some(-1.0)).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
    }

    #[test]
    fn stuck_queue_reports_full_within_deadline() {
        let queue = BoundedQueue::new("stuck");
        queue.enqueue(1);

        let started = Instant::now();
        let err = queue.wait_until_below(1, Some(0.1)).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, CoordinatorError::Full));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(500), "waited {:?}", elapsed);
    }

    #[test]
    fn below_threshold_returns_without_waiting() {
        let queue = BoundedQueue::new("roomy");
        queue.enqueue(1);
        assert!(queue.wait_until_below(2, Some(0.0)).is_ok());
    }

    #[test]
    fn consumer_releases_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new("handoff"));
        queue.enqueue(1);
        queue.enqueue(2);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_until_below(2, None))
        };

        thread::sleep(Duration::from_millis(50));
        queue.dequeue();

        let waited = producer.join().unwrap().unwrap();
        assert!(waited >= Duration::from_millis(40));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn waiters_with_different_thresholds_are_released_independently() {
        let queue = Arc::new(BoundedQueue::new("many"));
        for i in 0..3 {
            queue.enqueue(i);
        }

        let strict = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_until_below(1, Some(2.0)))
        };
        let loose = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_until_below(3, Some(2.0)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.dequeue();
        assert!(loose.join().unwrap().is_ok());

        queue.dequeue();
        queue.dequeue();
        assert!(strict.join().unwrap().is_ok());
    }

    #[test]
    fn dequeue_timeout_reports_empty() {
        let queue = BoundedQueue::<u8>::new("empty");
        let err = queue.dequeue_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CoordinatorError::Empty));
    }

    #[tokio::test]
    async fn async_consumer_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::new("async"));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_async(Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("job");
        assert_eq!(consumer.await.unwrap().unwrap(), "job");
    }

    #[tokio::test]
    async fn abandoned_async_consumer_leaves_item_queued() {
        let queue = BoundedQueue::new("abandoned");
        let waited = tokio::time::timeout(
            Duration::from_millis(30),
            queue.dequeue_async(Duration::from_secs(5)),
        )
        .await;
        assert!(waited.is_err());

        queue.enqueue("kept");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue_async(Duration::ZERO).await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn async_dequeue_timeout_reports_empty() {
        let queue = BoundedQueue::<u8>::new("async-empty");
        let err = queue
            .dequeue_async(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Empty));
    }

    #[test]
    fn blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::new("wake"));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_timeout(Duration::from_secs(2)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue("job");
        assert_eq!(consumer.join().unwrap().unwrap(), "job");
    }
}
