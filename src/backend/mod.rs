//! # Backend
//!
//! Abstracts the worker pool the bus dispatches onto. This is the only
//! concurrency primitive the bus uses directly: it never spawns threads or
//! tasks itself, it only `submit`s nullary tasks to whatever backend it was
//! constructed with.

mod integration;
mod standalone;

pub use integration::IntegrationBackend;
pub use standalone::StandaloneBackend;

use crate::error::Result;

/// A unit of work submitted to the backend. Runs to completion on some
/// worker; never dropped silently.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker-pool abstraction shared by one or more buses.
///
/// Two canonical implementations are provided: [`StandaloneBackend`], which
/// owns its own OS threads, and [`IntegrationBackend`], which delegates to
/// an externally supplied pool. The bus treats both identically.
pub trait Backend: Send + Sync {
    /// Prepares the backend to accept work. Idempotent: calling this again
    /// on an already-initialized backend returns success.
    fn initialize(&self) -> Result<()>;

    /// Stops accepting new tasks and joins all workers. After this call,
    /// `submit` returns `shutdown`.
    fn shutdown(&self);

    /// Schedules `task` for execution by some worker. Returns once the task
    /// has been enqueued, not once it has run.
    fn submit(&self, task: Task) -> Result<()>;

    /// Whether the backend is currently accepting work.
    fn is_ready(&self) -> bool;
}
