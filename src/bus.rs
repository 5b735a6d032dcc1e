//! # Message Bus
//!
//! The orchestrator: accepts publishes, consults the router, enqueues
//! deliveries, and dispatches them on a [`Backend`]. Owns subscription
//! lifecycle, statistics, and the optional transport hook. A bus is
//! thread-safe for all public operations and is typically shared as
//! `Arc<MessageBus>`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::backend::{Backend, Task};
use crate::error::{BusError, Result};
use crate::message::Message;
use crate::queue::{Entry, OverflowPolicy, Queue, QueueMode};
use crate::router::{Callback, Filter, Router, SubscriptionId};
use crate::transport::OutboundTransport;

/// Deployment mode: whether the bus only delivers locally, only forwards
/// to the transport, or does both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    LocalOnly,
    RemoteOnly,
    Hybrid,
}

/// Configuration accepted at bus construction time.
pub struct BusConfig {
    pub queue_capacity: usize,
    /// Hint for standalone backend creation; ignored if an external
    /// backend is supplied to [`MessageBus::new`].
    pub worker_threads: usize,
    pub enable_priority_queue: bool,
    pub overflow_policy: OverflowPolicy,
    pub mode: BusMode,
    pub transport: Option<Arc<dyn OutboundTransport>>,
    pub shutdown_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            queue_capacity: 1000,
            worker_threads: 0,
            enable_priority_queue: false,
            overflow_policy: OverflowPolicy::default(),
            mode: BusMode::LocalOnly,
            transport: None,
            shutdown_timeout: None,
        }
    }
}

/// Monotonic counters readable concurrently with publishing. Readers may
/// observe a consistent-enough snapshot but not a strict cross-counter
/// snapshot, per the concurrency model.
#[derive(Default)]
struct Statistics {
    messages_published: AtomicU64,
    messages_processed: AtomicU64,
    messages_failed: AtomicU64,
    dropped_overflow: AtomicU64,
}

/// A point-in-time read of the bus's statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub messages_published: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub subscriptions_active: u64,
    pub queue_depth_current: u64,
    pub queue_depth_peak: u64,
    pub dropped_overflow: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Created,
    Running,
    Stopped,
}

/// Counts deliveries that have been queued but not yet completed, so
/// `stop()` can wait for drain and tests can assert quiescence.
#[derive(Default)]
struct InFlight {
    count: AtomicU64,
    lock: Mutex<()>,
    cv: Condvar,
}

impl InFlight {
    fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    fn done_one(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            let _guard = self.lock.lock();
            self.cv.notify_all();
        }
    }

    fn sub(&self, n: u64) {
        if n == 0 {
            return;
        }
        let prev = self.count.fetch_sub(n, Ordering::AcqRel);
        if prev == n {
            let _guard = self.lock.lock();
            self.cv.notify_all();
        }
    }

    fn wait_until_zero(&self, timeout: Option<Duration>) -> bool {
        if self.count.load(Ordering::Acquire) == 0 {
            return true;
        }
        let mut guard = self.lock.lock();
        let deadline = timeout.map(|d| std::time::Instant::now() + d);
        loop {
            if self.count.load(Ordering::Acquire) == 0 {
                return true;
            }
            match deadline {
                Some(d) => {
                    let now = std::time::Instant::now();
                    if now >= d {
                        return false;
                    }
                    self.cv.wait_for(&mut guard, d - now);
                }
                None => self.cv.wait(&mut guard),
            }
        }
    }
}

/// A per-subscription FIFO lane: guarantees that one subscriber's
/// callbacks run in the order their deliveries were dequeued, even though
/// different subscribers' deliveries may run concurrently across backend
/// workers.
struct Lane {
    pending: Mutex<VecDeque<Task>>,
    running: std::sync::atomic::AtomicBool,
}

#[derive(Default)]
struct Lanes {
    map: Mutex<HashMap<SubscriptionId, Arc<Lane>>>,
}

impl Lanes {
    /// Queues `task` for subscription `id` and, if no drain loop is
    /// currently running for it, submits one to the backend.
    fn push(&self, id: SubscriptionId, task: Task, backend: &Arc<dyn Backend>) -> Result<()> {
        let lane = {
            let mut map = self.map.lock();
            map.entry(id)
                .or_insert_with(|| {
                    Arc::new(Lane {
                        pending: Mutex::new(VecDeque::new()),
                        running: std::sync::atomic::AtomicBool::new(false),
                    })
                })
                .clone()
        };

        let should_start = {
            let mut pending = lane.pending.lock();
            pending.push_back(task);
            !lane.running.swap(true, Ordering::AcqRel)
        };

        if should_start {
            let lane = lane.clone();
            backend.submit(Box::new(move || loop {
                let next = lane.pending.lock().pop_front();
                match next {
                    Some(t) => t(),
                    None => {
                        let pending = lane.pending.lock();
                        if pending.is_empty() {
                            lane.running.store(false, Ordering::Release);
                            break;
                        }
                    }
                }
            }))?;
        }
        Ok(())
    }
}

/// The orchestrator that accepts publishes and delivers to subscribers.
pub struct MessageBus {
    config: BusConfig,
    router: Router,
    queue: Queue,
    backend: Arc<dyn Backend>,
    stats: Statistics,
    in_flight: InFlight,
    lanes: Lanes,
    state: Mutex<BusState>,
    dispatcher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl MessageBus {
    pub fn new(backend: Arc<dyn Backend>, config: BusConfig) -> Arc<Self> {
        let mode = if config.enable_priority_queue {
            QueueMode::Priority
        } else {
            QueueMode::Fifo
        };
        let queue = Queue::new(mode, config.queue_capacity, config.overflow_policy);
        Arc::new(MessageBus {
            config,
            router: Router::new(),
            queue,
            backend,
            stats: Statistics::default(),
            in_flight: InFlight::default(),
            lanes: Lanes::default(),
            state: Mutex::new(BusState::Created),
            dispatcher: Mutex::new(None),
        })
    }

    /// Transitions `created -> running`. Initializes the backend if not
    /// already ready, then starts the dispatcher loop on its own OS
    /// thread, never on a backend worker: the backend's workers run
    /// per-subscription delivery lanes, and a dispatcher that occupied one
    /// of those workers would starve callback delivery whenever the
    /// backend's worker count was small (a single-worker backend would
    /// deadlock outright, since the one worker never returns to pick up a
    /// lane task).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != BusState::Created {
                return Err(BusError::InvalidArgument("bus already started".into()));
            }
            *state = BusState::Running;
        }

        self.backend.initialize()?;

        let bus = self.clone();
        let handle = std::thread::Builder::new()
            .name("bus-dispatcher".into())
            .spawn(move || bus.dispatch_loop())
            .map_err(|e| BusError::ResourceError(format!("spawn dispatcher thread: {e}")))?;
        *self.dispatcher.lock() = Some(handle);
        Ok(())
    }

    /// Transitions to `stopped`. Stops accepting new publishes, wakes the
    /// dispatcher, waits (bounded by `shutdown_timeout`) for in-flight
    /// deliveries to finish, and joins the dispatcher thread. Does not
    /// touch the backend, which is shared.
    pub fn stop(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state == BusState::Stopped {
                return;
            }
            *state = BusState::Stopped;
        }
        self.queue.stop();
        if !self.in_flight.wait_until_zero(self.config.shutdown_timeout) {
            warn!("bus stop: shutdown_timeout elapsed with deliveries still in flight");
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                warn!("bus dispatcher thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == BusState::Running
    }

    /// Resolves subscriptions, enqueues a delivery, and (in remote/hybrid
    /// mode) forwards the message to the transport without waiting on the
    /// network.
    pub fn publish(&self, message: Message) -> Result<()> {
        if !self.is_running() {
            return Err(BusError::Shutdown);
        }

        let matches = self.router.resolve(&message.topic)?;
        self.stats.messages_published.fetch_add(1, Ordering::Relaxed);

        if matches.is_empty() {
            if self.config.mode == BusMode::LocalOnly {
                self.stats.messages_processed.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            let fanout = matches.len() as u64;
            let entry = Entry::new(message.clone(), matches);
            match self.queue.enqueue(entry, None) {
                Ok(None) => self.in_flight.add(fanout),
                Ok(Some(evicted)) => {
                    self.stats.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                    self.in_flight.add(fanout);
                    self.in_flight.sub(evicted.matches.len() as u64);
                }
                Err(BusError::Overflow) => {
                    self.stats.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                    return Err(BusError::Overflow);
                }
                Err(e) => return Err(e),
            }
        }

        if matches!(self.config.mode, BusMode::RemoteOnly | BusMode::Hybrid) {
            if let Some(transport) = &self.config.transport {
                if let Err(e) = transport.send(&message) {
                    debug!(error = %e, "transport send failed for published message");
                }
            }
        }

        Ok(())
    }

    /// Validates `pattern` and registers `callback` (with optional
    /// `filter`) with the router.
    pub fn subscribe(
        &self,
        pattern: &str,
        callback: Callback,
        filter: Option<Filter>,
    ) -> Result<SubscriptionId> {
        if *self.state.lock() == BusState::Stopped {
            return Err(BusError::Shutdown);
        }
        self.router.subscribe(pattern, callback, filter)
    }

    /// Removes a subscription. In-flight callbacks for it are allowed to
    /// complete.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.router.unsubscribe(id)
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            messages_published: self.stats.messages_published.load(Ordering::Relaxed),
            messages_processed: self.stats.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.stats.messages_failed.load(Ordering::Relaxed),
            subscriptions_active: self.router.active_count() as u64,
            queue_depth_current: self.queue.size() as u64,
            queue_depth_peak: self.queue.peak(),
            dropped_overflow: self.stats.dropped_overflow.load(Ordering::Relaxed),
        }
    }

    /// Publishes `message` (stamping a fresh `correlation_id` if empty)
    /// and waits for a reply on `reply_pattern` carrying the same
    /// correlation id, up to `timeout`. Built entirely on
    /// `publish`/`subscribe`/`unsubscribe` — there is no dedicated
    /// request/reply primitive on the bus.
    pub async fn request(
        self: &Arc<Self>,
        mut message: Message,
        reply_pattern: &str,
        timeout: Duration,
    ) -> Result<Message> {
        let token = if message.correlation_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            message.correlation_id.clone()
        };
        message.correlation_id = token.clone();

        let (tx, rx) = tokio::sync::oneshot::channel::<Message>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let filter_token = token.clone();
        let filter: Filter = Arc::new(move |m: &Message| m.correlation_id == filter_token);

        let callback_tx = tx.clone();
        let callback: Callback = Arc::new(move |m: &Message| {
            if let Some(sender) = callback_tx.lock().take() {
                let _ = sender.send(m.clone());
            }
            Ok(())
        });

        let sub_id = self.subscribe(reply_pattern, callback, Some(filter))?;
        if let Err(e) = self.publish(message) {
            let _ = self.unsubscribe(sub_id);
            return Err(e);
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        let _ = self.unsubscribe(sub_id);

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => Err(BusError::Timeout),
        }
    }

    /// Runs on the backend: dequeues entries and submits one callback task
    /// per still-registered subscription until the queue is stopped. Never
    /// blocks on a slow subscriber — per-delivery work is itself submitted
    /// to the backend.
    fn dispatch_loop(self: Arc<Self>) {
        loop {
            let entry = match self.queue.dequeue() {
                Ok(entry) => entry,
                Err(_) => break,
            };

            for m in entry.matches {
                if !self.router.contains(m.id) {
                    self.in_flight.done_one();
                    continue;
                }
                let message = entry.message.clone();
                let bus = self.clone();
                let callback = m.callback.clone();
                let filter = m.filter.clone();

                let task: Task = Box::new(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        if let Some(filter) = &filter {
                            if !filter(&message) {
                                return Ok(());
                            }
                        }
                        callback(&message)
                    }));

                    match outcome {
                        Ok(Ok(())) => {
                            bus.stats.messages_processed.fetch_add(1, Ordering::Relaxed)
                        }
                        Ok(Err(_)) | Err(_) => {
                            bus.stats.messages_failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                    bus.in_flight.done_one();
                });

                if let Err(e) = self.lanes.push(m.id, task, &self.backend) {
                    debug!(error = %e, "failed to schedule delivery, backend shut down");
                    self.in_flight.done_one();
                }
            }
        }
    }
}
