//! # Error Taxonomy
//!
//! A single error enum covering every caller-facing and bus-internal error
//! kind named by the messaging substrate's contract. Bus-internal kinds
//! (`CallbackError`) are recorded in statistics and never returned to a
//! caller; every other variant is returned from the public API operation
//! that triggered it.

use thiserror::Error;

/// The crate-wide result alias. Every public operation returns this.
pub type Result<T> = std::result::Result<T, BusError>;

/// Error kinds produced by the router, queue, backend, bus, and transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A malformed topic/pattern or a missing required builder field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unknown subscription id was referenced.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was attempted on a stopped bus, queue, or backend.
    #[error("shutdown")]
    Shutdown,

    /// The queue rejected an enqueue under the `drop_newest` overflow policy.
    #[error("queue overflow")]
    Overflow,

    /// A request/reply exchange exceeded its deadline.
    #[error("timed out waiting for reply")]
    Timeout,

    /// The transport failed to connect, or lost an established connection.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A framing or size rule was violated on the wire.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The backend failed to initialize its worker pool.
    #[error("resource error: {0}")]
    ResourceError(String),

    /// A subscriber callback returned an error or panicked.
    #[error("callback error: {0}")]
    CallbackError(String),
}

impl BusError {
    /// Short, stable tag for the error kind, used in logging and tests that
    /// want to assert on the *kind* of failure without matching the enum.
    pub fn kind(&self) -> &'static str {
        match self {
            BusError::InvalidArgument(_) => "invalid_argument",
            BusError::NotFound(_) => "not_found",
            BusError::Shutdown => "shutdown",
            BusError::Overflow => "overflow",
            BusError::Timeout => "timeout",
            BusError::NetworkError(_) => "network_error",
            BusError::ProtocolViolation(_) => "protocol_violation",
            BusError::ResourceError(_) => "resource_error",
            BusError::CallbackError(_) => "callback_error",
        }
    }
}
