//! # Messaging Substrate
//!
//! An in-process publish/subscribe and request/reply message bus with
//! topic-based wildcard routing, bounded backpressure, a pluggable
//! worker-pool backend, and an optional framed TCP transport for bridging
//! two buses across processes.
//!
//! The core pieces, roughly in dependency order:
//!
//! - [`message`]: the [`Message`] type and its [`MessageBuilder`].
//! - [`router`]: topic pattern compilation and subscription matching.
//! - [`queue`]: the bounded FIFO/priority queue and its overflow policies.
//! - [`backend`]: the worker-pool abstraction ([`StandaloneBackend`],
//!   [`IntegrationBackend`]).
//! - [`bus`]: [`MessageBus`], which wires the above into publish,
//!   subscribe, and request/reply.
//! - [`transport`]: the optional TCP bridge between buses in different
//!   processes.

pub mod backend;
pub mod bus;
pub mod error;
pub mod logging;
pub mod message;
pub mod queue;
pub mod router;
pub mod transport;

pub use backend::{Backend, IntegrationBackend, StandaloneBackend};
pub use bus::{BusConfig, BusMode, MessageBus, StatisticsSnapshot};
pub use error::{BusError, Result};
pub use message::{Bytes, Message, MessageBuilder, MessageType, Priority};
pub use queue::OverflowPolicy;
pub use router::{Callback, Filter, SubscriptionId};
pub use transport::{OutboundTransport, Pipeline, TcpTransport, TransportConfig};

/// The crate's version, as declared in its manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
