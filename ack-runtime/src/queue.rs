//! Deduplicating work queue.
//!
//! - A key is handed to at most one worker at a time.
//! - Adding a key that is already pending is a no-op.
//! - Adding a key that is being processed marks it dirty; it is re-queued
//!   exactly once when the worker calls [`WorkQueue::done`].
//! - Delayed adds are kept in a ready-at heap; the earliest request wins.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

struct Delayed<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Delayed<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Delayed<K> {}

impl<K> PartialOrd for Delayed<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Delayed<K> {
    // Min-heap on (ready_at, seq).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    delayed: BinaryHeap<Delayed<K>>,
    waiting: HashMap<K, Instant>,
    seq: u64,
    shutting_down: bool,
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    /// Returns `true` if the key became available to a worker.
    fn insert(&mut self, key: K) -> bool {
        if self.shutting_down {
            return false;
        }
        self.waiting.remove(&key);
        if !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn promote(&mut self, now: Instant) {
        while let Some(top) = self.delayed.peek() {
            if top.ready_at > now {
                break;
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            // Stale entries were superseded by an earlier or immediate add.
            if self.waiting.get(&entry.key) == Some(&entry.ready_at) {
                self.insert(entry.key);
            }
        }
    }

    fn next_ready(&self) -> Option<Instant> {
        self.delayed.peek().map(|d| d.ready_at)
    }
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K: Clone + Eq + Hash + Send> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: BinaryHeap::new(),
                waiting: HashMap::new(),
                seq: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    pub async fn add(&self, key: K) {
        let ready = self.state.lock().await.insert(key);
        if ready {
            self.notify.notify_one();
        }
    }

    pub async fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let mut state = self.state.lock().await;
        if state.shutting_down || (state.dirty.contains(&key) && !state.processing.contains(&key)) {
            // Already pending for immediate processing.
            return;
        }
        let ready_at = Instant::now() + delay;
        if let Some(existing) = state.waiting.get(&key) {
            if *existing <= ready_at {
                return;
            }
        }
        state.waiting.insert(key.clone(), ready_at);
        state.seq += 1;
        let seq = state.seq;
        state.delayed.push(Delayed { ready_at, seq, key });
        drop(state);

        // Let a waiting worker recompute its deadline.
        self.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock().await;
                state.promote(Instant::now());

                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }

                if state.shutting_down {
                    return None;
                }
                state.next_ready()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark a key returned by [`get`](Self::get) as finished.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker.
    pub async fn shut_down(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        state.delayed.clear();
        state.waiting.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Keys ready for a worker (excludes delayed and in-flight keys).
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K: Clone + Eq + Hash + Send> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_deduplicates_pending_keys() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        queue.add("a").await;
        queue.add("b").await;
        assert_eq!(queue.len().await, 2);

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_adds_while_processing_coalesce() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        let key = queue.get().await.unwrap();

        queue.add("a").await;
        queue.add("a").await;
        queue.add("a").await;
        assert_eq!(queue.len().await, 0, "in-flight key must not be handed out again");

        queue.done(&key).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a").await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_key() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5)).await;
        assert_eq!(queue.len().await, 0);

        let started = Instant::now();
        assert_eq!(queue.get().await, Some("a"));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_delayed_add_wins() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(60)).await;
        queue.add_after("a", Duration::from_secs(1)).await;

        let started = Instant::now();
        assert_eq!(queue.get().await, Some("a"));
        assert!(started.elapsed() < Duration::from_secs(60));
        queue.done(&"a").await;

        // The superseded entry must not fire again.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue: Arc<WorkQueue<&str>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down().await;
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("late").await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_waiting_worker_is_woken_by_add() {
        let queue: Arc<WorkQueue<&str>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.add("a").await;
        assert_eq!(waiter.await.unwrap(), Some("a"));
    }
}
