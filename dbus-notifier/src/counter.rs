//! Open-notification bookkeeping for the auto-teardown policy.
//!
//! Two numbers are tracked: notifications that are open (shown and not yet
//! closed) and `show()` calls still in flight. Every increment of either
//! bumps an epoch, so a teardown scheduled while idle can tell at execution
//! time whether anything happened in between.

use std::sync::Mutex;

use crate::sync::lock;

#[derive(Debug, Default)]
struct CounterState {
    open: usize,
    in_flight: usize,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct ReferenceCounter {
    state: Mutex<CounterState>,
}

impl ReferenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).open
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    /// A notification reached `Opened`. Returns the new open count.
    pub fn increment(&self) -> usize {
        let mut state = lock(&self.state);
        state.open += 1;
        state.epoch += 1;
        state.open
    }

    /// A notification reached `Closed`. Returns the new open count.
    pub fn decrement(&self) -> usize {
        let mut state = lock(&self.state);
        if state.open == 0 {
            tracing::warn!("Open notification count would go negative; ignoring decrement.");
        } else {
            state.open -= 1;
        }
        state.open
    }

    /// Whether nothing is open or in flight.
    pub fn is_idle(&self) -> bool {
        let state = lock(&self.state);
        state.open == 0 && state.in_flight == 0
    }

    pub(crate) fn begin_show(&self) {
        let mut state = lock(&self.state);
        state.in_flight += 1;
        state.epoch += 1;
    }

    /// Returns `true` if this left the counter idle.
    pub(crate) fn end_show(&self) -> bool {
        let mut state = lock(&self.state);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.open == 0 && state.in_flight == 0
    }

    /// Runs `teardown` if the counter has been idle since `epoch`.
    ///
    /// The counter stays locked while `teardown` runs, so a concurrent
    /// `show()` either cancels the teardown or starts after it completed.
    pub(crate) fn run_if_idle_since<T>(&self, epoch: u64, teardown: impl FnOnce() -> T) -> Option<T> {
        let state = lock(&self.state);
        if state.open == 0 && state.in_flight == 0 && state.epoch == epoch {
            Some(teardown())
        } else {
            None
        }
    }
}
