//! Standalone backend: owns its own worker threads and an internal work
//! queue, coordinated through a crossbeam channel rather than a hand-rolled
//! mutex+condvar pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Backend, Task};
use crate::error::{BusError, Result};

/// Owns `worker_threads` OS threads pulling tasks off a shared queue.
/// Workers run until the backend is shut down, then drain any
/// already-queued tasks before exiting.
pub struct StandaloneBackend {
    worker_threads: usize,
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    ready: AtomicBool,
}

impl StandaloneBackend {
    /// Creates a backend with `worker_threads` workers. `0` is treated as
    /// "use hardware concurrency" per the default, clamped to a minimum of 1.
    pub fn new(worker_threads: usize) -> Self {
        let worker_threads = if worker_threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            worker_threads
        };
        StandaloneBackend {
            worker_threads,
            sender: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
        }
    }
}

impl Default for StandaloneBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Backend for StandaloneBackend {
    fn initialize(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let (tx, rx) = channel::unbounded::<Task>();
        let mut handles = Vec::with_capacity(self.worker_threads);
        for worker_id in 0..self.worker_threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("bus-worker-{worker_id}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                    debug!(worker_id, "standalone backend worker drained and exiting");
                })
                .map_err(|e| BusError::ResourceError(format!("spawn worker {worker_id}: {e}")))?;
            handles.push(handle);
        }

        *self.sender.lock() = Some(tx);
        *self.handles.lock() = handles;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender closes the channel; workers drain whatever
        // was already queued and exit when `recv` returns `Err`.
        self.sender.lock().take();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("standalone backend worker panicked during shutdown");
            }
        }
    }

    fn submit(&self, task: Task) -> Result<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| BusError::Shutdown),
            None => Err(BusError::Shutdown),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Drop for StandaloneBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn initialize_is_idempotent() {
        let backend = StandaloneBackend::new(2);
        backend.initialize().unwrap();
        backend.initialize().unwrap();
        assert!(backend.is_ready());
        backend.shutdown();
    }

    #[test]
    fn submit_runs_tasks() {
        let backend = StandaloneBackend::new(2);
        backend.initialize().unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            backend
                .submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }))
                .unwrap();
        }
        // Give the pool a moment to drain; the work is trivial.
        thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        backend.shutdown();
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let backend = StandaloneBackend::new(1);
        backend.initialize().unwrap();
        backend.shutdown();
        let err = backend.submit(Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), "shutdown");
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let backend = StandaloneBackend::new(1);
        backend.initialize().unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            backend
                .submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }))
                .unwrap();
        }
        backend.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }
}
