//! # Topic Router
//!
//! Maps a published topic to the ordered list of matching subscriptions.
//! Patterns are dot-delimited strings that may contain `*` (matches exactly
//! one segment) and a terminal `#` (matches zero or more trailing
//! segments). Matching is evaluated per the rules in the messaging
//! substrate's contract; the concrete data structure here is a flat,
//! linearly-scanned list behind a read-write lock, which the contract
//! explicitly allows in place of a trie at realistic fan-in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BusError, Result};
use crate::message::Message;

pub type SubscriptionId = u64;

/// A subscriber callback: takes a message, returns success or a failure
/// description. Represented as a function value, not an inheritance
/// hierarchy, per the design notes.
pub type Callback = Arc<dyn Fn(&Message) -> std::result::Result<(), String> + Send + Sync>;

/// Optional predicate evaluated before invoking the callback. `false`
/// records the delivery as processed without invoking the subscriber.
pub type Filter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Single,
    MultiTrailing,
}

fn compile_pattern(pattern: &str) -> Result<Vec<PatternSegment>> {
    if pattern.is_empty() {
        return Err(BusError::InvalidArgument(
            "subscription pattern must not be empty".into(),
        ));
    }
    let raw: Vec<&str> = pattern.split('.').collect();
    if raw.iter().any(|s| s.is_empty()) {
        return Err(BusError::InvalidArgument(format!(
            "pattern '{}' contains an empty segment",
            pattern
        )));
    }

    let mut segments = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        match *seg {
            "#" => {
                if i != raw.len() - 1 {
                    return Err(BusError::InvalidArgument(format!(
                        "pattern '{}': '#' must be the last token",
                        pattern
                    )));
                }
                segments.push(PatternSegment::MultiTrailing);
            }
            "*" => segments.push(PatternSegment::Single),
            lit => segments.push(PatternSegment::Literal(lit.to_string())),
        }
    }
    Ok(segments)
}

fn matches(segments: &[PatternSegment], topic_segments: &[&str]) -> bool {
    let mut ti = 0;
    for (i, seg) in segments.iter().enumerate() {
        match seg {
            PatternSegment::MultiTrailing => {
                debug_assert_eq!(i, segments.len() - 1);
                return true;
            }
            PatternSegment::Single => {
                if ti >= topic_segments.len() {
                    return false;
                }
                ti += 1;
            }
            PatternSegment::Literal(lit) => {
                if topic_segments.get(ti) != Some(&lit.as_str()) {
                    return false;
                }
                ti += 1;
            }
        }
    }
    ti == topic_segments.len()
}

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    segments: Vec<PatternSegment>,
    callback: Callback,
    filter: Option<Filter>,
}

/// A single resolved match: the subscription id, its callback, and its
/// optional filter, cloned out from under the router's lock so dispatch
/// never holds it while invoking subscriber code.
#[derive(Clone)]
pub struct Match {
    pub id: SubscriptionId,
    pub callback: Callback,
    pub filter: Option<Filter>,
}

/// Maps topics to subscriptions with wildcard matching.
pub struct Router {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new subscription, returning its (unique, monotonically
    /// increasing) id. Rejects malformed patterns before taking the write
    /// lock.
    pub fn subscribe(
        &self,
        pattern: &str,
        callback: Callback,
        filter: Option<Filter>,
    ) -> Result<SubscriptionId> {
        let segments = compile_pattern(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push(Subscription {
            id,
            pattern: pattern.to_string(),
            segments,
            callback,
            filter,
        });
        Ok(id)
    }

    /// Removes a subscription by id. Idempotent: a second call for the same
    /// id returns `not_found` without side effects.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        if subs.len() == before {
            return Err(BusError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    /// Resolves every subscription whose pattern matches `topic`. The order
    /// across distinct subscriptions is unspecified; callers that need
    /// per-subscription FIFO get it by construction (each subscription's
    /// queue entries are produced in publish order).
    pub fn resolve(&self, topic: &str) -> Result<Vec<Match>> {
        let topic_segments = Message::split_topic(topic)?;
        let subs = self.subscriptions.read();
        Ok(subs
            .iter()
            .filter(|s| matches(&s.segments, &topic_segments))
            .map(|s| Match {
                id: s.id,
                callback: s.callback.clone(),
                filter: s.filter.clone(),
            })
            .collect())
    }

    /// Number of currently registered subscriptions.
    pub fn active_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether a subscription id is still registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().iter().any(|s| s.id == id)
    }

    /// Pattern string for a given subscription id, if still registered.
    /// Used by diagnostics/tests; not part of the dispatch hot path.
    #[cfg(test)]
    fn pattern_of(&self, id: SubscriptionId) -> Option<String> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.pattern.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn noop_callback() -> Callback {
        Arc::new(|_msg| Ok(()))
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let router = Router::new();
        router
            .subscribe("orders.created", noop_callback(), None)
            .unwrap();
        assert_eq!(router.resolve("orders.created").unwrap().len(), 1);
        assert_eq!(router.resolve("orders.updated").unwrap().len(), 0);
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        let router = Router::new();
        router.subscribe("orders.*", noop_callback(), None).unwrap();
        assert_eq!(router.resolve("orders.created").unwrap().len(), 1);
        assert_eq!(router.resolve("orders").unwrap().len(), 0);
        assert_eq!(router.resolve("orders.created.v2").unwrap().len(), 0);
    }

    #[test]
    fn trailing_hash_matches_zero_or_more() {
        let router = Router::new();
        router.subscribe("a.#", noop_callback(), None).unwrap();
        assert_eq!(router.resolve("a").unwrap().len(), 1);
        assert_eq!(router.resolve("a.b").unwrap().len(), 1);
        assert_eq!(router.resolve("a.b.c").unwrap().len(), 1);
        assert_eq!(router.resolve("x.b.c").unwrap().len(), 0);
    }

    #[test]
    fn interior_hash_is_rejected() {
        let router = Router::new();
        let err = router.subscribe("a.#.c", noop_callback(), None).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let router = Router::new();
        let id = router.subscribe("a.b", noop_callback(), None).unwrap();
        router.unsubscribe(id).unwrap();
        let err = router.unsubscribe(id).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn subscription_ids_are_monotonically_increasing() {
        let router = Router::new();
        let a = router.subscribe("a", noop_callback(), None).unwrap();
        let b = router.subscribe("b", noop_callback(), None).unwrap();
        let c = router.subscribe("c", noop_callback(), None).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn wildcard_fan_out_scenario() {
        let router = Router::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let record = |tag: &'static str, hits: Arc<Mutex<Vec<&'static str>>>| -> Callback {
            Arc::new(move |_msg| {
                hits.lock().unwrap().push(tag);
                Ok(())
            })
        };

        router
            .subscribe("orders.*", record("c1", hits.clone()), None)
            .unwrap();
        router
            .subscribe("orders.#", record("c2", hits.clone()), None)
            .unwrap();
        router
            .subscribe("orders.created", record("c3", hits.clone()), None)
            .unwrap();

        let matches = router.resolve("orders.created").unwrap();
        assert_eq!(matches.len(), 3);
        for m in matches {
            (m.callback)(
                &crate::message::MessageBuilder::new()
                    .topic("orders.created")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        }
        let recorded = hits.lock().unwrap();
        assert!(recorded.contains(&"c1"));
        assert!(recorded.contains(&"c2"));
        assert!(recorded.contains(&"c3"));

        let matches = router.resolve("orders.items.added").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(router.pattern_of(matches[0].id).as_deref(), Some("orders.#"));
    }
}
