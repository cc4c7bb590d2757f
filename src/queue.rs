//! The bounded queue behind `send_async`, for replies that must not block
//! the dispatcher (global-request answers and the like).
//!
//! The draining worker is transient: it evaporates after a short idle
//! period and is respawned by the next enqueue.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{Error, Result};

/// Pending payloads tolerated before the peer is deemed to be forcing
/// replies without reading them.
pub(crate) const CAPACITY: usize = 100;

/// How long the worker lingers on an empty queue before exiting.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(2);

struct State {
    items: VecDeque<Vec<u8>>,
    worker: bool,
}

pub(crate) struct AsyncSendQueue {
    state: Mutex<State>,
    available: Condvar,
    idle: Duration,
}

impl Default for AsyncSendQueue {
    fn default() -> Self {
        Self::with_idle_timeout(IDLE_TIMEOUT)
    }
}

impl AsyncSendQueue {
    pub(crate) fn with_idle_timeout(idle: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                worker: false,
            }),
            available: Condvar::new(),
            idle,
        }
    }

    /// Append a payload; `Ok(true)` asks the caller to spawn a worker.
    pub(crate) fn enqueue(&self, payload: Vec<u8>) -> Result<bool> {
        let mut state = self.state.lock().expect("async queue poisoned");

        if state.items.len() >= CAPACITY {
            return Err(Error::PeerFlooding);
        }

        state.items.push_back(payload);
        self.available.notify_one();

        Ok(!std::mem::replace(&mut state.worker, true))
    }

    /// Worker side: the oldest payload, or `None` once the queue stayed
    /// empty for the whole idle period; `None` also clears the worker
    /// marker, the caller must exit.
    pub(crate) fn next(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().expect("async queue poisoned");
        let deadline = Instant::now() + self.idle;

        loop {
            if let Some(payload) = state.items.pop_front() {
                return Some(payload);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state.worker = false;
                return None;
            }

            (state, _) = self
                .available
                .wait_timeout(state, remaining)
                .expect("async queue poisoned");
        }
    }

    /// Worker side: give up the marker on an error exit so the next
    /// enqueue respawns.
    pub(crate) fn abandon(&self) {
        self.state.lock().expect("async queue poisoned").worker = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let queue = AsyncSendQueue::with_idle_timeout(Duration::from_millis(10));

        assert!(queue.enqueue(vec![1]).unwrap());
        assert!(!queue.enqueue(vec![2]).unwrap(), "worker already marked");

        assert_eq!(queue.next(), Some(vec![1]));
        assert_eq!(queue.next(), Some(vec![2]));
        assert_eq!(queue.next(), None);

        assert!(queue.enqueue(vec![3]).unwrap(), "idle exit released the marker");
    }

    #[test]
    fn caps_the_backlog() {
        let queue = AsyncSendQueue::default();

        for n in 0..CAPACITY {
            queue.enqueue(vec![n as u8]).unwrap();
        }

        assert!(matches!(queue.enqueue(vec![0]), Err(Error::PeerFlooding)));
    }

    #[test]
    fn abandon_releases_the_marker() {
        let queue = AsyncSendQueue::with_idle_timeout(Duration::from_millis(10));

        queue.enqueue(vec![1]).unwrap();
        queue.abandon();

        assert!(queue.enqueue(vec![2]).unwrap());
    }
}
