//! Framed TCP transport. Grounded in the teacher's `ipc::tcp_socket`
//! length-prefixed read/write loop over `tokio::net::TcpStream`, adapted to
//! the big-endian `[len:u32][flags:u8]` frame this crate's contract fixes
//! and to the compress/encrypt pipeline of `transport::Pipeline`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    encode_header, reject_reserved_flags_on_send, ConnectionState, MessageHandler,
    OutboundTransport, StateChangeHandler, TransportConfig, TransportStatsSnapshot,
};
use crate::error::{BusError, Result};
use crate::message::Message;

#[derive(Default)]
struct Stats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// One TCP connection, bidirectional, with a background send pipeline and
/// a dedicated receive loop.
pub struct TcpTransport {
    config: TransportConfig,
    state: Mutex<ConnectionState>,
    state_handler: Option<StateChangeHandler>,
    stats: Stats,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Connects to `addr` as a client and starts the send/receive loops.
    pub async fn connect(
        addr: SocketAddr,
        config: TransportConfig,
        message_handler: MessageHandler,
        state_handler: Option<StateChangeHandler>,
    ) -> Result<Arc<Self>> {
        let transport = Arc::new(TcpTransport {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            state_handler,
            stats: Stats::default(),
            outbound_tx: Mutex::new(None),
            write_task: Mutex::new(None),
            read_task: Mutex::new(None),
        });
        transport.set_state(ConnectionState::Connecting);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BusError::NetworkError(format!("connect to {addr}: {e}")))?;

        transport.clone().start(stream, message_handler);
        Ok(transport)
    }

    /// Wraps an already-accepted stream (the server side of a bridge) and
    /// starts the send/receive loops.
    pub fn from_stream(
        stream: TcpStream,
        config: TransportConfig,
        message_handler: MessageHandler,
        state_handler: Option<StateChangeHandler>,
    ) -> Arc<Self> {
        let transport = Arc::new(TcpTransport {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            state_handler,
            stats: Stats::default(),
            outbound_tx: Mutex::new(None),
            write_task: Mutex::new(None),
            read_task: Mutex::new(None),
        });
        transport.clone().start(stream, message_handler);
        transport
    }

    fn start(self: Arc<Self>, stream: TcpStream, message_handler: MessageHandler) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        *self.outbound_tx.lock() = Some(tx);

        let writer = self.clone();
        let write_task = tokio::spawn(async move { writer.write_loop(write_half, rx).await });

        let reader = self.clone();
        let read_task = tokio::spawn(async move { reader.read_loop(read_half, message_handler).await });

        *self.write_task.lock() = Some(write_task);
        *self.read_task.lock() = Some(read_task);
        self.set_state(ConnectionState::Connected);
    }

    async fn write_loop(self: Arc<Self>, mut half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(raw) = rx.recv().await {
            let (body, flags) = self.config.pipeline.encode(&raw);
            if let Err(e) = reject_reserved_flags_on_send(flags) {
                warn!(error = %e, "refusing to send frame with reserved flag bits set");
                continue;
            }
            let total_len = 1u32.saturating_add(body.len() as u32);
            let header = encode_header(total_len, flags);

            if let Err(e) = half.write_all(&header).await {
                self.fail(format!("write header: {e}"));
                return;
            }
            if let Err(e) = half.write_all(&body).await {
                self.fail(format!("write body: {e}"));
                return;
            }
            if let Err(e) = half.flush().await {
                self.fail(format!("flush: {e}"));
                return;
            }

            self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes_sent
                .fetch_add((header.len() + body.len()) as u64, Ordering::Relaxed);
        }
        debug!("tcp transport write loop exiting: sender dropped");
    }

    async fn read_loop(self: Arc<Self>, mut half: OwnedReadHalf, handler: MessageHandler) {
        loop {
            let mut header = [0u8; 5];
            if let Err(e) = half.read_exact(&mut header).await {
                // A clean EOF on an orderly close is not an error state;
                // anything else is.
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    self.fail(format!("read header: {e}"));
                }
                return;
            }

            let total_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let flags = header[4];
            if total_len == 0 {
                self.fail("frame length must cover at least the flags byte".into());
                return;
            }
            let body_len = total_len - 1;
            if body_len > self.config.max_frame_bytes {
                self.fail(format!(
                    "frame body {body_len} exceeds max_frame_bytes {}",
                    self.config.max_frame_bytes
                ));
                return;
            }

            let mut body = vec![0u8; body_len as usize];
            if let Err(e) = half.read_exact(&mut body).await {
                self.fail(format!("read body: {e}"));
                return;
            }

            self.stats
                .bytes_received
                .fetch_add((header.len() + body.len()) as u64, Ordering::Relaxed);

            let decoded = self.config.pipeline.decode(flags, &body);
            match Message::from_bytes(&decoded) {
                Ok(message) => {
                    self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                    handler(message);
                }
                Err(e) => {
                    // Handler/decode failures are counted, not fatal to the
                    // connection.
                    warn!(error = %e, "failed to decode received frame");
                }
            }
        }
    }

    fn fail(&self, reason: String) {
        self.set_state(ConnectionState::Error(reason));
    }

    fn set_state(&self, new_state: ConnectionState) {
        *self.state.lock() = new_state.clone();
        if let Some(handler) = &self.state_handler {
            handler(new_state);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Queues `message` for transmission. Returns once the frame has been
    /// handed to the background writer, not once the write has completed.
    pub fn send(&self, message: &Message) -> Result<()> {
        let raw = message.to_bytes()?;
        let guard = self.outbound_tx.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send(raw)
                .map_err(|_| BusError::NetworkError("connection_closed".into())),
            None => Err(BusError::NetworkError("not connected".into())),
        }
    }

    /// Stops accepting new sends, aborts the read loop, and transitions to
    /// `Disconnected`. A send initiated before this call either completes
    /// or fails with `connection_closed`; it is never silently dropped.
    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnecting);
        self.outbound_tx.lock().take();
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.write_task.lock().take() {
            task.abort();
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl OutboundTransport for TcpTransport {
    fn send(&self, message: &Message) -> Result<()> {
        TcpTransport::send(self, message)
    }
}
