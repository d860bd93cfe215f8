//! Cold-leaf queue feeding the background sort worker.
//!
//! A FIFO of leaf ids with a dedup set so a leaf waits in line at most
//! once, plus a condition variable so the worker sleeps between
//! enqueues. `stop` lets the worker drain what is queued and then exit.

use lasdb_common::page::NodeId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};

struct ColdInner {
    queue: VecDeque<NodeId>,
    enqueued: HashSet<NodeId>,
    stopped: bool,
}

/// FIFO of cold leaf ids with deduplicated enqueues.
pub struct ColdLeafQueue {
    inner: Mutex<ColdInner>,
    available: Condvar,
}

impl ColdLeafQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ColdInner {
                queue: VecDeque::new(),
                enqueued: HashSet::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a leaf unless it is already waiting (or being sorted).
    /// Returns true if the leaf was added.
    pub fn push(&self, id: NodeId) -> bool {
        let mut inner = self.inner.lock();
        if inner.stopped || !inner.enqueued.insert(id) {
            return false;
        }
        inner.queue.push_back(id);
        self.available.notify_one();
        true
    }

    /// Blocks until a leaf id is available or the queue is stopped.
    ///
    /// Pending ids are drained even after `stop`; None means stopped
    /// and empty.
    pub fn pop_blocking(&self) -> Option<NodeId> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(id) = inner.queue.pop_front() {
                return Some(id);
            }
            if inner.stopped {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Drops a leaf from the dedup set once the worker is done with it
    /// (sorted or failed), making it eligible to queue again.
    pub fn forget(&self, id: NodeId) {
        self.inner.lock().enqueued.remove(&id);
    }

    /// Stops the queue and wakes the worker.
    pub fn stop(&self) {
        self.inner.lock().stopped = true;
        self.available.notify_all();
    }

    /// Number of ids waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ColdLeafQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_pop() {
        let q = ColdLeafQueue::new();
        assert!(q.push(1));
        assert!(q.push(2));
        assert_eq!(q.pop_blocking(), Some(1));
        assert_eq!(q.pop_blocking(), Some(2));
    }

    #[test]
    fn test_dedup() {
        let q = ColdLeafQueue::new();
        assert!(q.push(1));
        assert!(!q.push(1));
        assert_eq!(q.len(), 1);

        // Still deduped while the worker holds it
        assert_eq!(q.pop_blocking(), Some(1));
        assert!(!q.push(1));

        // Eligible again after forget
        q.forget(1);
        assert!(q.push(1));
    }

    #[test]
    fn test_stop_drains_then_none() {
        let q = ColdLeafQueue::new();
        q.push(1);
        q.stop();

        assert_eq!(q.pop_blocking(), Some(1));
        assert_eq!(q.pop_blocking(), None);
    }

    #[test]
    fn test_push_after_stop_rejected() {
        let q = ColdLeafQueue::new();
        q.stop();
        assert!(!q.push(1));
        assert_eq!(q.pop_blocking(), None);
    }

    #[test]
    fn test_blocking_wakeup() {
        let q = Arc::new(ColdLeafQueue::new());
        let handle = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop_blocking())
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        q.push(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn test_stop_wakes_blocked_worker() {
        let q = Arc::new(ColdLeafQueue::new());
        let handle = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop_blocking())
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        q.stop();
        assert_eq!(handle.join().unwrap(), None);
    }
}
