use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct State<T> {
    /// Items in processing order, each of them is in `dirty` too.
    queue: VecDeque<T>,
    /// Items that need processing.
    dirty: HashSet<T>,
    /// Items handed out by `get`, waiting for `done`.
    processing: HashSet<T>,
    shutting_down: bool,
}

/// A FIFO queue which deduplicates items and keeps each item exclusive to
/// one worker.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `item` as needing processing. Ignored after shutdown.
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }

        if !state.dirty.insert(item.clone()) {
            // already queued, or will be requeued by `done`
            return;
        }

        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        drop(state);

        self.notify.notify_one();
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the item until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking, so an `add` in between is not lost
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }

                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());

                    // a single stored permit may stand for several adds
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }

                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `item`. If it was added again in the meantime it
    /// goes back to the queue.
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        state.processing.remove(item);

        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);

            self.notify.notify_one();
        }
    }

    /// Stop handing out items. Blocked and future `get` calls return `None`,
    /// queued items are dropped.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);

        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of items waiting to be processed.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
