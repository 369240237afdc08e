//! Task result handles
//!
//! A one-shot channel carrying the task's return value (or its panic).

use std::any::Any;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{NetError, Result};

pub(crate) type TaskOutcome<T> = std::thread::Result<T>;

/// Handle to the eventual result of a submitted task
///
/// Dropping the handle does not cancel the task; the result is discarded.
pub struct TaskHandle<T> {
    receiver: Receiver<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(receiver: Receiver<TaskOutcome<T>>) -> Self {
        Self { receiver }
    }

    /// Block until the task finishes
    ///
    /// Returns `TaskPanicked` if the task panicked, or `PoolClosed` if the
    /// task was dropped without running.
    pub fn join(self) -> Result<T> {
        match self.receiver.recv() {
            Ok(outcome) => outcome.map_err(panic_error),
            Err(_) => Err(NetError::PoolClosed),
        }
    }

    /// Block for at most `timeout`; `Ok(None)` means still running
    pub fn join_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome.map(Some).map_err(panic_error),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(NetError::PoolClosed),
        }
    }

    /// Poll without blocking; `Ok(None)` means not finished yet
    pub fn try_join(&self) -> Result<Option<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => outcome.map(Some).map_err(panic_error),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(NetError::PoolClosed),
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> NetError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    NetError::TaskPanicked(message)
}
