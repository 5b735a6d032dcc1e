//! # Message Model and Builder
//!
//! The immutable unit of traffic on the bus: identity, routing metadata,
//! and an opaque, reference-counted payload. Messages are constructed
//! exclusively through [`MessageBuilder`], which validates required fields
//! on [`MessageBuilder::build`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};

/// Classification of a message for routing and request/reply pairing.
///
/// A closed sum type, not a subclass hierarchy: route logic inspects the
/// tag only to pair requests with replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Event,
    Command,
    Query,
    Reply,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Event
    }
}

/// Delivery priority, ordered `Lowest < Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A reference-counted, immutable byte buffer.
///
/// Sharing the payload by reference among fan-out deliveries avoids O(N)
/// copying on wide subscription sets (see the bus's concurrency notes).
#[derive(Clone, Serialize, Deserialize)]
pub struct Bytes(Arc<Vec<u8>>);

impl Bytes {
    pub fn new(data: Vec<u8>) -> Self {
        Bytes(Arc::new(data))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Bytes::new(data)
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Bytes::new(data.to_vec())
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Process-wide monotonic message-id counter, combined with a random seed
/// so ids stay globally unique across a bus's lifetime without requiring
/// coordination between buses in the same process.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_message_id(seed: u64) -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}-{:016x}", seed, counter)
}

fn process_seed() -> u64 {
    use rand::RngCore;
    rand::thread_rng().next_u64()
}

/// The immutable unit of traffic on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub message_type: MessageType,
    pub priority: Priority,
    pub source: String,
    pub correlation_id: String,
    #[serde(with = "system_time_as_nanos")]
    pub timestamp: SystemTime,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

mod system_time_as_nanos {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let nanos = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        nanos.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
    }
}

impl Message {
    /// Splits a topic into its dot-delimited segments, rejecting empty
    /// segments. Shared by the router for pattern matching.
    pub fn split_topic(topic: &str) -> Result<Vec<&str>> {
        if topic.is_empty() {
            return Err(BusError::InvalidArgument("topic must not be empty".into()));
        }
        let segments: Vec<&str> = topic.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(BusError::InvalidArgument(format!(
                "topic '{}' contains an empty segment",
                topic
            )));
        }
        Ok(segments)
    }

    /// Serializes the message to bytes for wire transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| BusError::InvalidArgument(format!("message serialization failed: {e}")))
    }

    /// Reconstructs a message from its wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| BusError::InvalidArgument(format!("message deserialization failed: {e}")))
    }
}

/// Accumulates fields and validates on [`MessageBuilder::build`].
///
/// Only `topic` is required; every other field defaults per spec:
/// type = event, priority = normal, source/correlation_id = empty,
/// timestamp = now, id = freshly generated.
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    topic: Option<String>,
    message_type: MessageType,
    priority: Priority,
    source: String,
    correlation_id: String,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Validates and constructs the message. The timestamp is assigned here
    /// (at build time), not at publish time, so retries preserve the
    /// original origination time.
    pub fn build(self) -> Result<Message> {
        let topic = self
            .topic
            .ok_or_else(|| BusError::InvalidArgument("topic is required".into()))?;
        Message::split_topic(&topic)?;

        Ok(Message {
            id: next_message_id(process_seed()),
            topic,
            message_type: self.message_type,
            priority: self.priority,
            source: self.source,
            correlation_id: self.correlation_id,
            timestamp: SystemTime::now(),
            payload: Bytes::new(self.payload),
            headers: self.headers,
        })
    }
}
