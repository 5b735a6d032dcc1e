//! # Transport
//!
//! Optional framed TCP bridge between buses in different processes. Two
//! responsibilities: bidirectional framed byte transfer, and a pluggable
//! byte pipeline (compress/encrypt) applied before/after the wire.
//!
//! ## Frame format (bit-exact)
//!
//! - 4 bytes: big-endian unsigned length `L` of everything that follows.
//! - 1 byte: flags. Bit 0 = compressed, bit 1 = encrypted, bits 2-7
//!   reserved (must be zero on send; ignored on receive for forward
//!   compatibility, unless length checks fail).
//! - `L - 1` bytes: the body, produced by serializing the message, then
//!   optionally compressing, then optionally encrypting (encryption is
//!   outermost).

mod tcp;

pub use tcp::TcpTransport;

use crate::error::Result;
use crate::message::Message;

/// Bit 0 of the frame flags byte.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
/// Bit 1 of the frame flags byte.
pub const FLAG_ENCRYPTED: u8 = 0b0000_0010;
const FLAG_RESERVED_MASK: u8 = !(FLAG_COMPRESSED | FLAG_ENCRYPTED);

/// Default maximum accepted frame size: 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Composable byte transformations applied around the wire. The default
/// pipeline is identity; real deployments plug in their chosen compression
/// and symmetric-encryption scheme. Both peers must agree on the pipeline
/// out of band — the transport does not negotiate it.
#[derive(Clone)]
pub struct Pipeline {
    pub compress: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub decompress: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub encrypt: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub decrypt: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    pub compression_enabled: bool,
    pub encryption_enabled: bool,
}

use std::sync::Arc;

fn identity(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline {
            compress: Arc::new(identity),
            decompress: Arc::new(identity),
            encrypt: Arc::new(identity),
            decrypt: Arc::new(identity),
            compression_enabled: false,
            encryption_enabled: false,
        }
    }
}

impl Pipeline {
    /// Applies compress (if enabled) then encrypt (if enabled), returning
    /// the wire body and the flags byte to prepend it with.
    pub fn encode(&self, raw: &[u8]) -> (Vec<u8>, u8) {
        let mut flags = 0u8;
        let mut body = raw.to_vec();
        if self.compression_enabled {
            body = (self.compress)(&body);
            flags |= FLAG_COMPRESSED;
        }
        if self.encryption_enabled {
            body = (self.encrypt)(&body);
            flags |= FLAG_ENCRYPTED;
        }
        (body, flags)
    }

    /// Reverses [`Pipeline::encode`]: decrypt (outermost first) then
    /// decompress, guided by the flags byte read off the wire.
    pub fn decode(&self, flags: u8, body: &[u8]) -> Vec<u8> {
        let mut out = body.to_vec();
        if flags & FLAG_ENCRYPTED != 0 {
            out = (self.decrypt)(&out);
        }
        if flags & FLAG_COMPRESSED != 0 {
            out = (self.decompress)(&out);
        }
        out
    }
}

/// Connection lifecycle state, announced via a [`StateChangeHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Terminal for the current socket; reconnecting requires a new
    /// `connect`. Carries a diagnostic string.
    Error(String),
}

pub type StateChangeHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Configuration accepted by [`TcpTransport`].
#[derive(Clone)]
pub struct TransportConfig {
    pub max_frame_bytes: u32,
    pub pipeline: Pipeline,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            pipeline: Pipeline::default(),
        }
    }
}

/// Per-connection counters.
#[derive(Debug, Default)]
pub struct TransportStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Capability the bus needs from its transport handle: hand it a message
/// to frame and send, without waiting for network completion.
pub trait OutboundTransport: Send + Sync {
    fn send(&self, message: &Message) -> Result<()>;
}

/// Encodes a frame header (length + flags) for a body of `body_len` bytes.
/// `body_len` must include the flags byte per the wire format (`L` covers
/// everything after the 4-byte length, i.e. `1 + payload.len()`).
pub fn encode_header(total_len_after_length_field: u32, flags: u8) -> [u8; 5] {
    let mut out = [0u8; 5];
    out[0..4].copy_from_slice(&total_len_after_length_field.to_be_bytes());
    out[4] = flags;
    out
}

/// Validates a received flags byte: reserved bits must be clear on send,
/// but the spec mandates accepting them on receive (forward
/// compatibility) as long as length checks pass. This helper is used only
/// to decide whether *we* are about to send invalid flags.
pub fn reject_reserved_flags_on_send(flags: u8) -> Result<()> {
    if flags & FLAG_RESERVED_MASK != 0 {
        return Err(crate::error::BusError::ProtocolViolation(
            "reserved flag bits must be zero on send".into(),
        ));
    }
    Ok(())
}
