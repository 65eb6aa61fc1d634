//! Process-launch notification queue
//!
//! Bounded, lock-free and best-effort. Producers never block; when the
//! queue is full the notification is dropped.

use crossbeam::queue::ArrayQueue;
use nfsops_common::LaunchEvent;

/// Queue of pids that loaded a new program image
pub struct LaunchQueue {
    queue: ArrayQueue<LaunchEvent>,
}

impl LaunchQueue {
    /// Create a queue holding at most `capacity` notifications
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Queue a notification for `pid`
    ///
    /// Returns false when the queue was full and the notification dropped.
    pub fn notify(&self, pid: u32) -> bool {
        self.queue.push(LaunchEvent { pid }).is_ok()
    }

    /// Take the oldest pending notification
    pub fn pop(&self) -> Option<LaunchEvent> {
        self.queue.pop()
    }

    /// Take every pending notification
    pub fn drain(&self) -> Vec<LaunchEvent> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Number of pending notifications
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of pending notifications
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_when_full() {
        let queue = LaunchQueue::new(2);
        assert!(queue.notify(1));
        assert!(queue.notify(2));
        assert!(!queue.notify(3));

        let pids: Vec<u32> = queue.drain().iter().map(|e| e.pid).collect();
        assert_eq!(pids, vec![1, 2]);
        assert!(queue.is_empty());
        assert!(queue.notify(4));
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let queue = LaunchQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.notify(9));
        assert_eq!(queue.pop(), Some(LaunchEvent { pid: 9 }));
    }
}
