//! Concurrency ceiling with a FIFO wait queue
//!
//! Unlike a semaphore, waiters that have not started can be dropped as a
//! group ([`SlotQueue::clear`]); their callers observe
//! [`LoadError::Cancelled`]. Requests waiting to retry have already started
//! and survive a clear.

use crate::error::LoadError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lowest ceiling the adaptive formula produces
pub const MIN_CONCURRENCY: usize = 4;

/// Highest ceiling the adaptive formula produces
pub const MAX_CONCURRENCY: usize = 12;

/// Ceiling when the platform gives no parallelism hint
pub const FALLBACK_CONCURRENCY: usize = 6;

/// Ceiling derived from a hardware parallelism hint
///
/// `hint - 2`, clamped to `[MIN_CONCURRENCY, MAX_CONCURRENCY]`;
/// [`FALLBACK_CONCURRENCY`] without a hint.
#[must_use]
pub fn adaptive_concurrency(hint: Option<usize>) -> usize {
    match hint {
        Some(cores) => cores
            .saturating_sub(2)
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
        None => FALLBACK_CONCURRENCY,
    }
}

/// Ceiling for the current machine
#[must_use]
pub fn default_concurrency() -> usize {
    adaptive_concurrency(std::thread::available_parallelism().ok().map(NonZeroUsize::get))
}

#[derive(Debug)]
struct Waiter {
    tx: oneshot::Sender<()>,
    /// Waiting for a retry attempt
    started: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    active: usize,
    waiters: VecDeque<Waiter>,
}

#[derive(Debug)]
pub(crate) struct SlotQueue {
    max: usize,
    state: Mutex<QueueState>,
}

impl SlotQueue {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Wait for a slot; the slot is held until the permit is dropped
    ///
    /// `started` marks a request on a retry attempt, which [`clear`](Self::clear)
    /// leaves queued.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        started: bool,
    ) -> Result<SlotPermit, LoadError> {
        let ready = {
            let mut state = self.state.lock();
            if state.active < self.max {
                state.active += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter { tx, started });
                Some(rx)
            }
        };

        if let Some(rx) = ready {
            // The releasing permit hands its slot over; `active` is unchanged
            rx.await.map_err(|_| LoadError::Cancelled)?;
        }

        Ok(SlotPermit {
            queue: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    /// Drop every waiter that has not started, returning how many were dropped
    pub(crate) fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let mut dropped = 0;
        state.waiters.retain(|waiter| {
            if waiter.tx.is_closed() {
                return false;
            }
            if !waiter.started {
                dropped += 1;
            }
            waiter.started
        });
        dropped
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }

    /// `(active, queued)`
    pub(crate) fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        let queued = state.waiters.iter().filter(|w| !w.tx.is_closed()).count();
        (state.active, queued)
    }
}

/// Held slot; releasing hands it to the oldest waiter
#[derive(Debug)]
pub(crate) struct SlotPermit {
    queue: Arc<SlotQueue>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.queue.release();
    }
}
