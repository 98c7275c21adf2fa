//! Handle for a page load that has been registered but may not have run yet

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::images::DecodedImage;

use super::error::PageLoadError;

pub(crate) type LoadResult = Result<Arc<DecodedImage>, PageLoadError>;

/// Lifecycle of an [`InFlightLoad`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Queued, nobody is executing it yet
    Pending,
    /// Claimed by exactly one thread, which will deliver the result
    Running,
    /// Result delivered
    Done,
    /// Abandoned before it ran
    Cancelled,
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

impl LoadState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => Self::Pending,
            RUNNING => Self::Running,
            DONE => Self::Done,
            _ => Self::Cancelled,
        }
    }
}

/// One registered load for one page index.
///
/// Whoever wins [`InFlightLoad::claim`] runs the load; everyone else waits on
/// the completion signal. A queued background task that loses the claim has
/// been pre-empted and simply returns.
pub struct InFlightLoad {
    index: usize,
    state: AtomicU8,
    result: Mutex<Option<LoadResult>>,
    done: Condvar,
}

impl InFlightLoad {
    pub(crate) fn pending(index: usize) -> Self {
        Self::with_state(index, PENDING)
    }

    /// Registered by a thread that runs the load itself right away
    pub(crate) fn running(index: usize) -> Self {
        Self::with_state(index, RUNNING)
    }

    fn with_state(index: usize, state: u8) -> Self {
        Self {
            index,
            state: AtomicU8::new(state),
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn state(&self) -> LoadState {
        LoadState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// PENDING -> RUNNING. Succeeds for exactly one caller.
    pub(crate) fn claim(&self) -> bool {
        self.transition(PENDING, RUNNING)
    }

    /// PENDING -> CANCELLED. Fails once the load has been claimed.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(PENDING, CANCELLED)
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish the outcome and wake all waiters. Only the first call counts.
    pub(crate) fn finish(&self, result: LoadResult) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        *slot = Some(result);
        if self.state.load(Ordering::Acquire) == RUNNING {
            self.state.store(DONE, Ordering::Release);
        }
        self.done.notify_all();
    }

    /// Block until [`InFlightLoad::finish`] has been called
    pub(crate) fn wait(&self) -> LoadResult {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl std::fmt::Debug for InFlightLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightLoad")
            .field("index", &self.index)
            .field("state", &self.state())
            .finish()
    }
}
