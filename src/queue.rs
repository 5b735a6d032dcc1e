//! # Queue
//!
//! The sole backpressure surface of the bus. Bounded by `capacity`, in
//! either FIFO or priority mode, selected at construction. A single data
//! structure protected by one mutex + condvar pair, per the concurrency
//! model: a lock-free queue is not required at the fan-in this substrate
//! targets.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BusError, Result};
use crate::message::Priority;
use crate::router::Match;

/// A pending delivery: the resolved message plus the subscriptions it must
/// be dispatched to.
#[derive(Clone)]
pub struct Entry {
    pub message: crate::message::Message,
    pub matches: Vec<Match>,
}

impl Entry {
    pub fn new(message: crate::message::Message, matches: Vec<Match>) -> Self {
        Entry { message, matches }
    }
}

struct PriorityEntry {
    priority: Priority,
    sequence: u64,
    entry: Entry,
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for PriorityEntry {}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: higher priority first, and within the
        // same priority, earlier sequence number first (so reverse it).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// FIFO or bounded-priority queue selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Fifo,
    Priority,
}

/// Behavior when `enqueue` is called on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropNewest,
    DropOldest,
    Block,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropNewest
    }
}

enum Storage {
    Fifo(VecDeque<Entry>),
    Priority(BinaryHeap<PriorityEntry>),
}

impl Storage {
    fn len(&self) -> usize {
        match self {
            Storage::Fifo(q) => q.len(),
            Storage::Priority(q) => q.len(),
        }
    }

    fn push(&mut self, entry: Entry, sequence: u64) {
        match self {
            Storage::Fifo(q) => q.push_back(entry),
            Storage::Priority(q) => {
                let priority = entry.message.priority;
                q.push(PriorityEntry {
                    priority,
                    sequence,
                    entry,
                })
            }
        }
    }

    fn pop_front(&mut self) -> Option<Entry> {
        match self {
            Storage::Fifo(q) => q.pop_front(),
            Storage::Priority(q) => q.pop().map(|p| p.entry),
        }
    }

    /// Evicts the entry that `drop_oldest` should remove: the head of the
    /// FIFO, or the lowest-priority/oldest entry in the priority heap.
    fn evict_for_drop_oldest(&mut self) -> Option<Entry> {
        match self {
            Storage::Fifo(q) => q.pop_front(),
            Storage::Priority(q) => {
                if q.is_empty() {
                    return None;
                }
                let mut items: Vec<PriorityEntry> = std::mem::take(q).into_vec();
                // Smallest by (priority asc, sequence desc-of-reverse) is the
                // natural minimum of the same Ord used for the heap.
                let min_idx = items
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| a.cmp(b))
                    .map(|(i, _)| i)?;
                let evicted = items.remove(min_idx);
                *q = items.into_iter().collect();
                Some(evicted.entry)
            }
        }
    }
}

struct State {
    storage: Storage,
    stopped: bool,
}

/// Bounded FIFO or priority delivery queue, the sole backpressure surface
/// of the bus.
pub struct Queue {
    capacity: usize,
    overflow_policy: OverflowPolicy,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    sequence: AtomicU64,
    stopped_flag: AtomicBool,
    peak_depth: AtomicU64,
}

impl Queue {
    pub fn new(mode: QueueMode, capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        let storage = match mode {
            QueueMode::Fifo => Storage::Fifo(VecDeque::with_capacity(capacity.min(1024))),
            QueueMode::Priority => Storage::Priority(BinaryHeap::with_capacity(capacity.min(1024))),
        };
        Queue {
            capacity: capacity.max(1),
            overflow_policy,
            state: Mutex::new(State {
                storage,
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            sequence: AtomicU64::new(0),
            stopped_flag: AtomicBool::new(false),
            peak_depth: AtomicU64::new(0),
        }
    }

    /// Enqueues an entry. Returns `Ok(None)` on plain success, `Ok(Some(evicted))`
    /// when `drop_oldest` evicted an entry to make room, or `Err` per the
    /// configured overflow policy (`Overflow` for `drop_newest`, `Shutdown`
    /// if the queue has been stopped).
    pub fn enqueue(&self, entry: Entry, block_timeout: Option<Duration>) -> Result<Option<Entry>> {
        if self.stopped_flag.load(Ordering::Acquire) {
            return Err(BusError::Shutdown);
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();

        if state.storage.len() < self.capacity {
            state.storage.push(entry, sequence);
            self.record_depth(state.storage.len());
            self.not_empty.notify_one();
            return Ok(None);
        }

        match self.overflow_policy {
            OverflowPolicy::DropNewest => Err(BusError::Overflow),
            OverflowPolicy::DropOldest => {
                let evicted = state.storage.evict_for_drop_oldest();
                state.storage.push(entry, sequence);
                self.record_depth(state.storage.len());
                self.not_empty.notify_one();
                Ok(evicted)
            }
            OverflowPolicy::Block => {
                let deadline = block_timeout.map(|d| Instant::now() + d);
                loop {
                    if state.stopped {
                        return Err(BusError::Shutdown);
                    }
                    if state.storage.len() < self.capacity {
                        state.storage.push(entry, sequence);
                        self.record_depth(state.storage.len());
                        self.not_empty.notify_one();
                        return Ok(None);
                    }
                    match deadline {
                        Some(d) => {
                            let now = Instant::now();
                            if now >= d {
                                return Err(BusError::Timeout);
                            }
                            self.not_full.wait_for(&mut state, d - now);
                        }
                        None => {
                            self.not_full.wait(&mut state);
                        }
                    }
                }
            }
        }
    }

    /// Blocks until an entry is available or the queue is stopped.
    pub fn dequeue(&self) -> Result<Entry> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.storage.pop_front() {
                self.record_depth(state.storage.len());
                self.not_full.notify_one();
                return Ok(entry);
            }
            if state.stopped {
                return Err(BusError::Shutdown);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Wakes all blocked callers; further `enqueue` calls return `shutdown`.
    pub fn stop(&self) {
        self.stopped_flag.store(true, Ordering::Release);
        let mut state = self.state.lock();
        state.stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Advisory current depth.
    pub fn size(&self) -> usize {
        self.state.lock().storage.len()
    }

    /// Highest depth observed since construction.
    pub fn peak(&self) -> u64 {
        self.peak_depth.load(Ordering::Relaxed)
    }

    fn record_depth(&self, depth: usize) {
        self.peak_depth.fetch_max(depth as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;
    use std::sync::Arc;
    use std::thread;

    fn entry(topic: &str, priority: Priority) -> Entry {
        let msg = MessageBuilder::new()
            .topic(topic)
            .priority(priority)
            .build()
            .unwrap();
        Entry::new(msg, Vec::new())
    }

    #[test]
    fn fifo_preserves_enqueue_order() {
        let q = Queue::new(QueueMode::Fifo, 10, OverflowPolicy::DropNewest);
        q.enqueue(entry("a", Priority::Normal), None).unwrap();
        q.enqueue(entry("b", Priority::Normal), None).unwrap();
        q.enqueue(entry("c", Priority::Normal), None).unwrap();
        assert_eq!(q.dequeue().unwrap().message.topic, "a");
        assert_eq!(q.dequeue().unwrap().message.topic, "b");
        assert_eq!(q.dequeue().unwrap().message.topic, "c");
    }

    #[test]
    fn priority_orders_critical_first_fifo_ties() {
        let q = Queue::new(QueueMode::Priority, 10, OverflowPolicy::DropNewest);
        q.enqueue(entry("p.a", Priority::Low), None).unwrap();
        q.enqueue(entry("p.b", Priority::Critical), None).unwrap();
        q.enqueue(entry("p.c", Priority::Normal), None).unwrap();
        assert_eq!(q.dequeue().unwrap().message.topic, "p.b");
        assert_eq!(q.dequeue().unwrap().message.topic, "p.c");
        assert_eq!(q.dequeue().unwrap().message.topic, "p.a");
    }

    #[test]
    fn priority_ties_break_fifo() {
        let q = Queue::new(QueueMode::Priority, 10, OverflowPolicy::DropNewest);
        q.enqueue(entry("first", Priority::Normal), None).unwrap();
        q.enqueue(entry("second", Priority::Normal), None).unwrap();
        assert_eq!(q.dequeue().unwrap().message.topic, "first");
        assert_eq!(q.dequeue().unwrap().message.topic, "second");
    }

    #[test]
    fn drop_newest_rejects_at_capacity() {
        let q = Queue::new(QueueMode::Fifo, 2, OverflowPolicy::DropNewest);
        q.enqueue(entry("a", Priority::Normal), None).unwrap();
        q.enqueue(entry("b", Priority::Normal), None).unwrap();
        let err = q.enqueue(entry("c", Priority::Normal), None).unwrap_err();
        assert_eq!(err.kind(), "overflow");
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let q = Queue::new(QueueMode::Fifo, 2, OverflowPolicy::DropOldest);
        q.enqueue(entry("a", Priority::Normal), None).unwrap();
        q.enqueue(entry("b", Priority::Normal), None).unwrap();
        let evicted = q.enqueue(entry("c", Priority::Normal), None).unwrap();
        assert_eq!(evicted.unwrap().message.topic, "a");
        assert_eq!(q.dequeue().unwrap().message.topic, "b");
        assert_eq!(q.dequeue().unwrap().message.topic, "c");
    }

    #[test]
    fn stop_wakes_blocked_dequeue() {
        let q = Arc::new(Queue::new(QueueMode::Fifo, 10, OverflowPolicy::DropNewest));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());
        thread::sleep(Duration::from_millis(50));
        q.stop();
        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err().kind(), "shutdown");
    }

    #[test]
    fn enqueue_after_stop_is_rejected() {
        let q = Queue::new(QueueMode::Fifo, 10, OverflowPolicy::DropNewest);
        q.stop();
        let err = q.enqueue(entry("a", Priority::Normal), None).unwrap_err();
        assert_eq!(err.kind(), "shutdown");
    }

    #[test]
    fn block_policy_unblocks_on_stop() {
        let q = Arc::new(Queue::new(QueueMode::Fifo, 1, OverflowPolicy::Block));
        q.enqueue(entry("a", Priority::Normal), None).unwrap();
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.enqueue(entry("b", Priority::Normal), None));
        thread::sleep(Duration::from_millis(50));
        q.stop();
        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err().kind(), "shutdown");
    }
}
