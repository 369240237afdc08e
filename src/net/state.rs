//! Server lifecycle state
//!
//! ```text
//! Stopped ──start──▶ Starting ──ok──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                        └────fail────▶ Stopped
//! ```
//!
//! Transitions are compare-and-swap, so exactly one caller wins each edge.

use std::sync::atomic::{AtomicU8, Ordering};

/// Observable lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Starting,
            2 => RunState::Running,
            3 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

/// Atomic cell holding a `RunState`
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Stopped as u8),
        }
    }

    pub(crate) fn get(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.get() == RunState::Running
    }

    /// Move `from -> to`; false if the current state was not `from`
    pub(crate) fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn set(&self, to: RunState) {
        self.state.store(to as u8, Ordering::SeqCst);
    }
}
