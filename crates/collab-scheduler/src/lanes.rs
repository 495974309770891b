//! Priority lanes: five FIFO queues scanned highest-first.
//!
//! All lanes sit behind one mutex with a condition variable. A worker
//! always takes from the highest non-empty lane, so it never sees a
//! lower-priority task while a higher one is waiting, and it never
//! idles while any lane has work. Buffering is unbounded: producers
//! never block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use collab_core::Priority;

use crate::future::Ticket;

/// Queue depth per lane, indexed by [`Priority::lane`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneDepth(pub [usize; Priority::COUNT]);

impl LaneDepth {
    pub fn get(&self, priority: Priority) -> usize {
        self.0[priority.lane()]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

#[derive(Default)]
struct LaneState {
    queues: [VecDeque<Ticket>; Priority::COUNT],
    closed: bool,
}

#[derive(Default)]
pub(crate) struct Lanes {
    state: Mutex<LaneState>,
    ready: Condvar,
}

impl Lanes {
    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a ticket on its priority lane. Hands it back if closed.
    pub(crate) fn push(&self, ticket: Ticket) -> Result<(), Ticket> {
        let mut state = self.lock();
        if state.closed {
            return Err(ticket);
        }
        let lane = ticket.task.priority.lane();
        state.queues[lane].push_back(ticket);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until a ticket is available, the worker's quit flag is
    /// raised, or the lanes are closed.
    pub(crate) fn pop(&self, quit: &AtomicBool) -> Option<Ticket> {
        let mut state = self.lock();
        loop {
            if quit.load(Ordering::Acquire) {
                return None;
            }
            if let Some(ticket) = state.queues.iter_mut().find_map(VecDeque::pop_front) {
                return Some(ticket);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wake every waiting worker so it re-checks its quit flag.
    pub(crate) fn wake_all(&self) {
        let _state = self.lock();
        self.ready.notify_all();
    }

    pub(crate) fn depth(&self) -> LaneDepth {
        let state = self.lock();
        let mut depth = LaneDepth::default();
        for (i, q) in state.queues.iter().enumerate() {
            depth.0[i] = q.len();
        }
        depth
    }

    /// Close all lanes. Queued tickets are dropped, which resolves their
    /// futures as closed. Returns how many were dropped.
    pub(crate) fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped: usize = state.queues.iter_mut().map(|q| q.drain(..).count()).sum();
        drop(state);
        self.ready.notify_all();
        dropped
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
