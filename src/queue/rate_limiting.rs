use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use backoff::RateLimiter;
use futures::StreamExt;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;
use tracing::trace;

use super::WorkQueue;

/// A [`WorkQueue`] with delayed and rate limited adds.
///
/// Delayed items are held by a background task until they are due, so the
/// queue must be created inside a tokio runtime.
pub struct RateLimitingQueue<T> {
    queue: Arc<WorkQueue<T>>,
    limiter: Box<dyn RateLimiter<T>>,
    delayed: mpsc::UnboundedSender<(T, Instant)>,
    stop: Arc<Notify>,
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(limiter: impl RateLimiter<T> + 'static) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let stop = Arc::new(Notify::new());
        let (delayed, rx) = mpsc::unbounded_channel();

        tokio::spawn(feed(Arc::clone(&queue), rx, Arc::clone(&stop)));

        Self {
            queue,
            limiter: Box::new(limiter),
            delayed,
            stop,
        }
    }

    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// Add `item` once `delay` has passed. A later call with an earlier
    /// deadline moves the item forward, a later deadline is ignored.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }

        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        if self.delayed.send((item, Instant::now() + delay)).is_err() {
            trace!(message = "delayed add dropped, queue is shut down");
        }
    }

    /// Add `item` after the delay the rate limiter says it is due.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.limiter.when(&item);
        self.add_after(item, delay);
    }

    /// Clear the retry history of `item`. It does not remove the item from
    /// the queue.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> usize {
        self.limiter.num_requeues(item)
    }

    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// Shut the queue down, items waiting for their delay are dropped.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.stop.notify_one();
    }
}

impl<T> Drop for RateLimitingQueue<T> {
    fn drop(&mut self) {
        self.stop.notify_one();
    }
}

/// Moves delayed items into the queue when they are due.
async fn feed<T>(
    queue: Arc<WorkQueue<T>>,
    mut rx: mpsc::UnboundedReceiver<(T, Instant)>,
    stop: Arc<Notify>,
) where
    T: Clone + Eq + Hash,
{
    let mut delays = DelayQueue::new();
    let mut waiting: HashMap<T, (Key, Instant)> = HashMap::new();

    loop {
        tokio::select! {
            _ = stop.notified() => break,

            Some((item, deadline)) = rx.recv() => {
                match waiting.get_mut(&item) {
                    Some((key, due)) => {
                        if deadline < *due {
                            delays.reset_at(key, deadline);
                            *due = deadline;
                        }
                    }
                    None => {
                        let key = delays.insert_at(item.clone(), deadline);
                        waiting.insert(item, (key, deadline));
                    }
                }
            }

            Some(expired) = delays.next() => {
                let item = expired.into_inner();
                waiting.remove(&item);
                queue.add(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use backoff::{ItemExponential, default_controller_rate_limiter};

    use super::*;

    fn queue() -> RateLimitingQueue<&'static str> {
        RateLimitingQueue::new(default_controller_rate_limiter())
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_waits() {
        let queue = queue();
        let start = Instant::now();

        queue.add_after("a", Duration::from_millis(50));
        assert!(queue.is_empty());

        assert_eq!(queue.get().await, Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_keeps_earliest_deadline() {
        let queue = queue();
        let start = Instant::now();

        queue.add_after("a", Duration::from_secs(10));
        queue.add_after("a", Duration::from_secs(1));
        queue.add_after("a", Duration::from_secs(5));

        assert_eq!(queue.get().await, Some("a"));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(5));
        queue.done(&"a");

        // no second copy shows up later
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_is_immediate() {
        let queue = queue();
        queue.add_after("a", Duration::ZERO);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_backs_off_per_item() {
        let queue = RateLimitingQueue::new(ItemExponential::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
        ));

        queue.add_rate_limited("a");
        queue.add_rate_limited("a");
        assert_eq!(queue.num_requeues(&"a"), 2);
        assert_eq!(queue.num_requeues(&"b"), 0);

        let start = Instant::now();
        assert_eq!(queue.get().await, Some("a"));
        // the first failure waits for the base delay
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(200));

        queue.forget(&"a");
        assert_eq!(queue.num_requeues(&"a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_delayed_items() {
        let queue = queue();
        queue.add_after("a", Duration::from_secs(1));
        queue.shutdown();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);

        queue.add_after("b", Duration::from_secs(1));
        queue.add("c");
        assert!(queue.is_empty());
    }
}
