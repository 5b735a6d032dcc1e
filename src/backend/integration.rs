//! Integration backend: wraps an externally supplied worker pool (the same
//! pool used elsewhere in a host application) so the bus can reuse it
//! instead of owning its own threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Backend, Task};
use crate::error::{BusError, Result};

type InitializeFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;
type ShutdownFn = Arc<dyn Fn() + Send + Sync>;
type SubmitFn = Arc<dyn Fn(Task) -> Result<()> + Send + Sync>;

/// Delegates `initialize`/`shutdown`/`submit` to closures provided by the
/// host application, so the bus can share a worker pool that already
/// exists elsewhere rather than spawning its own.
pub struct IntegrationBackend {
    initialize_fn: InitializeFn,
    shutdown_fn: ShutdownFn,
    submit_fn: SubmitFn,
    ready: AtomicBool,
}

impl IntegrationBackend {
    pub fn new(
        initialize_fn: impl Fn() -> Result<()> + Send + Sync + 'static,
        shutdown_fn: impl Fn() + Send + Sync + 'static,
        submit_fn: impl Fn(Task) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        IntegrationBackend {
            initialize_fn: Arc::new(initialize_fn),
            shutdown_fn: Arc::new(shutdown_fn),
            submit_fn: Arc::new(submit_fn),
            ready: AtomicBool::new(false),
        }
    }
}

impl Backend for IntegrationBackend {
    fn initialize(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        (self.initialize_fn)()?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        (self.shutdown_fn)();
    }

    fn submit(&self, task: Task) -> Result<()> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(BusError::Shutdown);
        }
        (self.submit_fn)(task)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StandaloneBackend;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn delegates_to_wrapped_pool() {
        // Wrap a StandaloneBackend as the "external pool" to exercise
        // delegation without spinning up a second thread implementation.
        let inner = Arc::new(StandaloneBackend::new(1));
        let init_inner = inner.clone();
        let shutdown_inner = inner.clone();
        let submit_inner = inner.clone();

        let backend = IntegrationBackend::new(
            move || init_inner.initialize(),
            move || shutdown_inner.shutdown(),
            move |task| submit_inner.submit(task),
        );

        backend.initialize().unwrap();
        assert!(backend.is_ready());

        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        backend
            .submit(Box::new(move || {
                counter2.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        backend.shutdown();
        assert!(!backend.is_ready());
        let err = backend.submit(Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), "shutdown");
    }
}
