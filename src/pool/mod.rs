//! Worker Pool Module
//!
//! Fixed-size pool of OS threads draining a shared FIFO task queue.
//!
//! ## Responsibilities
//! - Run submitted closures on whichever worker is free
//! - Hand back a [`TaskHandle`] for each task's result
//! - Drain every queued task before shutdown returns
//!
//! ## Queue Discipline
//! ```text
//!   submit ──lock──▶ VecDeque<Task> ──notify_one──▶ idle worker
//!                         │
//!   shutdown ──lock──▶ closing = true ──notify_all──▶ workers drain, exit
//! ```
//!
//! Tasks run outside the queue lock, so a long task never blocks dequeues.

mod handle;
mod worker_pool;

pub use handle::TaskHandle;
pub use worker_pool::WorkerPool;

/// A unit of queued work
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;
