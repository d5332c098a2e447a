//! The two handoff queues between pipeline stages: a newest-wins,
//! capacity-one slot for utterances, and a FIFO queue for commands. Both
//! are `Mutex`+`Condvar`-based blocking queues rather than channels, so a
//! pending item can be replaced or cleared in place.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Single-slot, newest-wins handoff. `push` always replaces whatever was
/// there; `pop` blocks until an item is available or the queue is closed.
pub struct UtteranceQueue<T> {
    slot: Mutex<Option<T>>,
    not_empty: Condvar,
    closed: Mutex<bool>,
}

impl<T> Default for UtteranceQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UtteranceQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            not_empty: Condvar::new(),
            closed: Mutex::new(false),
        }
    }

    /// Replace any prior contents with `item` and wake the consumer.
    pub fn replace(&self, item: T) {
        let mut slot = self.slot.lock().expect("utterance queue poisoned");
        *slot = Some(item);
        self.not_empty.notify_one();
    }

    /// Drop any pending item without consuming it. Called on every gated
    /// audio frame so a stale utterance never reaches the ASR worker.
    pub fn clear(&self) {
        let mut slot = self.slot.lock().expect("utterance queue poisoned");
        *slot = None;
    }

    /// Block until an item is available or the queue is closed. Returns
    /// `None` only once closed with no pending item.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut slot = self.slot.lock().expect("utterance queue poisoned");
        loop {
            if let Some(item) = slot.take() {
                return Some(item);
            }
            if *self.closed.lock().expect("utterance queue poisoned") {
                return None;
            }
            let (guard, timeout) = self
                .not_empty
                .wait_timeout(slot, Duration::from_millis(200))
                .expect("utterance queue poisoned");
            slot = guard;
            let _ = timeout;
        }
    }

    /// `true` if a consumer would not block right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.lock().expect("utterance queue poisoned").is_none()
    }

    /// Unblock any waiting consumer for good; further pops drain the slot
    /// then return `None`.
    pub fn close(&self) {
        *self.closed.lock().expect("utterance queue poisoned") = true;
        self.not_empty.notify_all();
    }
}

/// FIFO handoff. In steady state holds at most one entry because the state
/// machine serializes the pipeline, but is not itself bounded to one —
/// nothing downstream depends on a hard cap.
pub struct CommandQueue<T> {
    deque: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    closed: Mutex<bool>,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            closed: Mutex::new(false),
        }
    }

    pub fn push(&self, item: T) {
        let mut deque = self.deque.lock().expect("command queue poisoned");
        deque.push_back(item);
        self.not_empty.notify_one();
    }

    pub fn pop_blocking(&self) -> Option<T> {
        let mut deque = self.deque.lock().expect("command queue poisoned");
        loop {
            if let Some(item) = deque.pop_front() {
                return Some(item);
            }
            if *self.closed.lock().expect("command queue poisoned") {
                return None;
            }
            let (guard, timeout) = self
                .not_empty
                .wait_timeout(deque, Duration::from_millis(200))
                .expect("command queue poisoned");
            deque = guard;
            let _ = timeout;
        }
    }

    /// Block for at most `timeout` total, returning `None` either because
    /// the queue was closed or because nothing arrived in time. Used by
    /// tests that need a bounded wait for a command that may legitimately
    /// never come (e.g. an ignored transcript).
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut deque = self.deque.lock().expect("command queue poisoned");
        loop {
            if let Some(item) = deque.pop_front() {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() || *self.closed.lock().expect("command queue poisoned") {
                return None;
            }
            let (guard, _timeout) = self
                .not_empty
                .wait_timeout(deque, remaining.min(Duration::from_millis(50)))
                .expect("command queue poisoned");
            deque = guard;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deque.lock().expect("command queue poisoned").is_empty()
    }

    pub fn close(&self) {
        *self.closed.lock().expect("command queue poisoned") = true;
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_queue_is_newest_wins() {
        let q: UtteranceQueue<i32> = UtteranceQueue::new();
        q.replace(1);
        q.replace(2);
        assert_eq!(q.pop_blocking(), Some(2));
        assert!(q.is_empty());
    }

    #[test]
    fn utterance_queue_clear_drops_pending_item() {
        let q: UtteranceQueue<i32> = UtteranceQueue::new();
        q.replace(1);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn utterance_queue_close_unblocks_consumer() {
        let q: UtteranceQueue<i32> = UtteranceQueue::new();
        q.close();
        assert_eq!(q.pop_blocking(), None);
    }

    #[test]
    fn command_queue_is_fifo() {
        let q: CommandQueue<i32> = CommandQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop_blocking(), Some(1));
        assert_eq!(q.pop_blocking(), Some(2));
    }

    #[test]
    fn command_queue_close_drains_then_none() {
        let q: CommandQueue<i32> = CommandQueue::new();
        q.push(1);
        q.close();
        assert_eq!(q.pop_blocking(), Some(1));
        assert_eq!(q.pop_blocking(), None);
    }
}
