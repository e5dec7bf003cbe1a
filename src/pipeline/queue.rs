//! FIFO request queue with the single-drainer flag.
//!
//! The pending items and the `draining` flag live under one mutex. That makes
//! "queue is empty, stop draining" a single step with respect to
//! "enqueue, then try to become the drainer": a request that lands while the
//! drainer is finishing either gets popped by it or finds the flag cleared
//! and starts a new drain. The lock is never held across an `.await`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;

use super::types::{Reply, Request};

/// Queue entry: the request plus the channel its reply goes back on.
#[derive(Debug)]
pub struct Pending {
    pub request: Request,
    reply_tx: oneshot::Sender<Reply>,
}

impl Pending {
    pub fn new(request: Request) -> (Self, oneshot::Receiver<Reply>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (Self { request, reply_tx }, reply_rx)
    }

    /// Hand the reply to the originator. Returns false if they stopped waiting.
    pub fn deliver(self, reply: Reply) -> bool {
        self.reply_tx.send(reply).is_ok()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Pending>,
    draining: bool,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Returns the 1-based position in line.
    pub fn enqueue(&self, pending: Pending) -> usize {
        let mut state = self.state.lock();
        state.items.push_back(pending);
        state.items.len()
    }

    /// Become the drainer if nobody is. Returns whether the caller won.
    pub fn try_start_drain(&self) -> bool {
        let mut state = self.state.lock();
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    /// Pop the head for the drainer, or clear the flag when nothing is left.
    ///
    /// Only the task that won [`try_start_drain`](Self::try_start_drain) may call this.
    pub fn next_or_finish(&self) -> Option<Pending> {
        let mut state = self.state.lock();
        let next = state.items.pop_front();
        if next.is_none() {
            state.draining = false;
        }
        next
    }

    /// Number of requests waiting behind the one being processed.
    pub fn depth(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }
}
