//! # Connection Pipeline
//!
//! One [`Connection`] owns one TCP stream to a server and moves packets
//! between the socket and the dispatch chains of its [`Protocol`].
//!
//! # Architecture
//!
//! Each connection runs a named OS thread that blocks on the socket and
//! delivers packets in wire order. Any thread may send.
//!
//! ```text
//! receive: socket → [decrypt] → frame → [inflate] → id → mapping → container
//!          → phase/global received → typed → phase/global any
//!
//! send:    payload → mapping by type → typed → phase/global sending
//!          → phase/global any → encode → [deflate] → [encrypt] → socket
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Inactive → Active → Closed
//!     └──────────────────↑
//! ```
//!
//! The read thread waits until [`Connection::activate`]; that gives callers a
//! window to install handlers before the first packet is read. `Closed` is
//! terminal.
//!
//! # Locking
//!
//! - `writer` before `compression`, never the other way round
//! - The read thread takes `compression` only to check the threshold and to
//!   inflate, so a handler on the read thread may send or change the threshold
//! - No lock is held while handlers run

use crate::cipher::{cipher_pair, Aes128Cfb8Dec, DecryptingReader, EncryptingWriter};
use crate::config::ClientConfig;
use crate::framing::{read_frame, write_frame};
use botwire_core::{ConnectionId, Direction, Phase, Result, WireError};
use botwire_protocol::{
    BoxedPayload, Buffer, BufferPool, Chain, CompressionState, PacketContainer, PacketMapping,
    Payload, Protocol, Session, UnknownPacket,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Where the connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, read thread waiting for [`Connection::activate`]
    Inactive,

    /// Read thread delivering packets
    Active,

    /// Socket shut down
    Closed,
}

/// Why a connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Connection::close`] was called
    Local,

    /// The server closed the stream
    RemoteClosed,

    /// A transport or protocol error ended the connection
    Error,

    /// The server sent a disconnect packet
    Kicked(String),
}

/// Fired exactly once per connection
#[derive(Debug, Clone)]
pub struct DisconnectEvent {
    pub connection: ConnectionId,
    pub reason: DisconnectReason,
}

/// Per-connection event chains
#[derive(Debug, Default)]
pub struct ConnectionEvents {
    /// Read failures, before the disconnect event, and encode or write
    /// failures of [`Connection::send_payload`]
    pub error: Chain<WireError>,

    pub disconnect: Chain<DisconnectEvent>,
}

/// Write half: cipher-wrapped socket plus the deflate scratch space
struct FrameWriter {
    stream: EncryptingWriter<BufWriter<TcpStream>>,
    deflated: Vec<u8>,
}

type FrameReader = DecryptingReader<BufReader<TcpStream>>;

/// A client connection to one server
///
/// Shared as `Arc<Connection>`; the read thread holds one reference until
/// the connection closes.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    protocol: Arc<Protocol>,
    self_ref: Weak<Connection>,

    /// Handle used to shut the socket down from any thread
    socket: TcpStream,
    writer: Mutex<FrameWriter>,
    pending_decryptor: Mutex<Option<Aes128Cfb8Dec>>,
    compression: Mutex<CompressionState>,
    pool: BufferPool,

    phase: RwLock<Phase>,
    state: Mutex<ConnectionState>,
    activated: Condvar,
    disconnected: AtomicBool,
    read_thread: Mutex<Option<JoinHandle<()>>>,

    max_frame_size: usize,
    read_buffer_size: usize,
    events: ConnectionEvents,

    connected_at: Instant,
    last_activity: Mutex<Instant>,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
}

impl Connection {
    /// Wrap a connected stream and start its (inactive) read thread
    ///
    /// The connection starts in [`Phase::HANDSHAKE`] without compression or
    /// encryption.
    pub fn new(
        id: ConnectionId,
        socket: TcpStream,
        protocol: Arc<Protocol>,
        config: &ClientConfig,
    ) -> Result<Arc<Self>> {
        let peer_addr = socket.peer_addr()?;
        let reader = BufReader::with_capacity(config.read_buffer_size, socket.try_clone()?);
        let writer = BufWriter::with_capacity(config.write_buffer_size, socket.try_clone()?);

        let connection = Arc::new_cyclic(|self_ref| Self {
            id,
            peer_addr,
            protocol,
            self_ref: self_ref.clone(),
            socket,
            writer: Mutex::new(FrameWriter {
                stream: EncryptingWriter::new(writer),
                deflated: Vec::new(),
            }),
            pending_decryptor: Mutex::new(None),
            compression: Mutex::new(CompressionState::new(config.compression_level)),
            pool: BufferPool::default(),
            phase: RwLock::new(Phase::HANDSHAKE),
            state: Mutex::new(ConnectionState::Inactive),
            activated: Condvar::new(),
            disconnected: AtomicBool::new(false),
            read_thread: Mutex::new(None),
            max_frame_size: config.max_frame_size,
            read_buffer_size: config.read_buffer_size,
            events: ConnectionEvents::default(),
            connected_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
        });

        let runner = Arc::clone(&connection);
        let handle = thread::Builder::new()
            .name(format!("botwire-read-{}", id.get()))
            .spawn(move || runner.run(DecryptingReader::new(reader)))?;
        *connection.read_thread.lock() = Some(handle);

        tracing::debug!("New connection {}: {}", id, peer_addr);
        Ok(connection)
    }

    /// Let the read thread start delivering packets
    ///
    /// # Errors
    /// [`WireError::Closed`] if the connection already closed.
    pub fn activate(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Inactive => {
                *state = ConnectionState::Active;
                self.activated.notify_all();
                tracing::info!("Connection {} active ({})", self.id, self.peer_addr);
                Ok(())
            }
            ConnectionState::Active => Ok(()),
            ConnectionState::Closed => Err(WireError::Closed),
        }
    }

    /// Read loop, run on the connection's own thread
    fn run(self: Arc<Self>, mut reader: FrameReader) {
        {
            let mut state = self.state.lock();
            while *state == ConnectionState::Inactive {
                self.activated.wait(&mut state);
            }
            if *state == ConnectionState::Closed {
                return;
            }
        }

        let mut buffer = Buffer::allocate(self.read_buffer_size);
        let mut scratch = Vec::new();

        let reason = loop {
            if let Some(cipher) = self.pending_decryptor.lock().take() {
                reader.enable(cipher);
                tracing::debug!("Connection {} decrypting input", self.id);
            }

            let consumed = match read_frame(
                &mut reader,
                &self.compression,
                self.max_frame_size,
                &mut buffer,
                &mut scratch,
            ) {
                Ok(Some(consumed)) => consumed,
                Ok(None) => break DisconnectReason::RemoteClosed,
                Err(e) => break self.read_failed(e),
            };

            self.bytes_received.fetch_add(consumed as u64, Ordering::Relaxed);
            self.packets_received.fetch_add(1, Ordering::Relaxed);
            *self.last_activity.lock() = Instant::now();

            if let Err(e) = self.handle_frame(&mut buffer) {
                break self.read_failed(e);
            }
            if self.is_closed() {
                break DisconnectReason::Local;
            }
        };

        buffer.free();
        self.disconnect(reason);
    }

    fn read_failed(&self, mut error: WireError) -> DisconnectReason {
        if self.is_closed() {
            // the socket was shut down under us
            return DisconnectReason::Local;
        }
        if error.is_corruption() {
            tracing::error!("Connection {} corrupt stream: {}", self.id, error);
        } else {
            tracing::warn!("Connection {} read error: {}", self.id, error);
        }
        self.events.error.dispatch(&mut error);
        DisconnectReason::Error
    }

    /// Resolve, decode and dispatch the frame body in `buffer`
    fn handle_frame(&self, buffer: &mut Buffer) -> Result<()> {
        let network_id = buffer.read_var_int()?;
        let phase = self.phase();

        match self.protocol.lookup(phase, Direction::Clientbound, network_id) {
            Some(mapping) => {
                let payload = mapping.decode(buffer)?;
                if buffer.readable() > 0 {
                    tracing::trace!(
                        "Connection {} {} left {} byte(s) unread",
                        self.id,
                        mapping.name(),
                        buffer.readable()
                    );
                }
                let mut container = PacketContainer::mapped(Arc::clone(mapping), payload, self.session());
                self.dispatch_received(&mut container, Some(mapping));
            }
            None => {
                tracing::trace!(
                    "Connection {} unmapped packet 0x{:02X} in {} ({} bytes)",
                    self.id,
                    network_id,
                    phase,
                    buffer.readable()
                );
                let data = std::mem::replace(buffer, Buffer::allocate(0));
                let mut container = PacketContainer::unknown(
                    phase,
                    Direction::Clientbound,
                    UnknownPacket::new(network_id, data),
                    self.session(),
                );
                self.dispatch_received(&mut container, None);
                if let Payload::Unknown(packet) = container.into_payload() {
                    *buffer = packet.into_buffer();
                }
            }
        }
        Ok(())
    }

    fn dispatch_received(&self, container: &mut PacketContainer, mapping: Option<&Arc<PacketMapping>>) {
        let global = self.protocol.chains();
        let local = self.protocol.try_phase(container.phase()).map(|registry| registry.chains());
        let typed = mapping.and_then(|mapping| self.protocol.typed_chain(mapping));

        let order = [
            local.map(|chains| &chains.received),
            Some(&global.received),
            typed.as_deref(),
            local.map(|chains| &chains.any),
            Some(&global.any),
        ];
        for chain in order.into_iter().flatten() {
            if container.is_cancelled() {
                break;
            }
            chain.dispatch(container);
        }
    }

    fn dispatch_sending(&self, container: &mut PacketContainer, mapping: &PacketMapping) {
        let global = self.protocol.chains();
        let local = self.protocol.try_phase(container.phase()).map(|registry| registry.chains());
        let typed = self.protocol.typed_chain(mapping);

        let order = [
            typed.as_deref(),
            local.map(|chains| &chains.sending),
            Some(&global.sending),
            local.map(|chains| &chains.any),
            Some(&global.any),
        ];
        for chain in order.into_iter().flatten() {
            if container.is_cancelled() {
                break;
            }
            chain.dispatch(container);
        }
    }

    /// Send a payload in the current phase
    ///
    /// # Returns
    /// `Ok(false)` if an outgoing handler cancelled the packet
    ///
    /// # Errors
    /// - [`WireError::Closed`] after the connection closed
    /// - [`WireError::UnmappedPayload`] if the current phase has no
    ///   serverbound mapping for the payload type
    /// - [`WireError::Send`] wrapping the encode or write failure; the error
    ///   also goes to [`ConnectionEvents::error`], and a write failure closes
    ///   the connection
    pub fn send_payload(&self, payload: BoxedPayload) -> Result<bool> {
        if self.is_closed() {
            return Err(WireError::Closed);
        }
        let phase = self.phase();
        let type_id = Any::type_id(&*payload);
        let mapping = match self.protocol.by_type(phase, type_id, Direction::Serverbound) {
            Some(mapping) => Arc::clone(mapping),
            None => {
                let name = self
                    .protocol
                    .mappings()
                    .find(|m| m.payload_type() == type_id)
                    .map_or("<unregistered payload>", |m| m.payload_name());
                return Err(WireError::UnmappedPayload { payload: name, phase });
            }
        };

        let mut container = PacketContainer::mapped(Arc::clone(&mapping), payload, self.session());
        self.dispatch_sending(&mut container, &mapping);
        if container.is_cancelled() {
            tracing::trace!("Connection {} {} cancelled", self.id, mapping.name());
            return Ok(false);
        }
        let Payload::Decoded(payload) = container.into_payload() else {
            return Ok(false);
        };

        let result = self.pool.with(|body| {
            body.write_var_int(mapping.network_id())?;
            mapping.encode(&*payload, body)?;
            self.write_body(body.readable_bytes())
        });

        match result {
            Ok(written) => {
                self.bytes_sent.fetch_add(written as u64, Ordering::Relaxed);
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Connection {} sent {} ({} bytes)", self.id, mapping.name(), written);
                Ok(true)
            }
            Err(e) => {
                let transport = matches!(e, WireError::Io(_));
                let mut error = e.context(mapping.name());
                tracing::error!("Connection {} {}", self.id, error);
                self.events.error.dispatch(&mut error);
                if transport {
                    self.disconnect(DisconnectReason::Error);
                }
                Err(error)
            }
        }
    }

    /// Frame, compress, encrypt and flush one packet body
    fn write_body(&self, body: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock();
        let FrameWriter { stream, deflated } = &mut *writer;
        let written = {
            let mut compression = self.compression.lock();
            write_frame(stream, body, &mut compression, deflated)?
        };
        stream.flush()?;
        Ok(written)
    }

    /// Close the connection and fire the disconnect event, once
    fn disconnect(&self, reason: DisconnectReason) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            *state = ConnectionState::Closed;
            self.activated.notify_all();
        }
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            tracing::trace!("Connection {} shutdown: {}", self.id, e);
        }
        self.pool.clear();

        tracing::info!("Connection {} closed: {:?}", self.id, reason);
        tracing::info!(
            "Connection {} stats - Duration: {:?}, RX: {} bytes / {} packets, TX: {} bytes / {} packets",
            self.id,
            self.connected_at.elapsed(),
            self.bytes_received(),
            self.packets_received(),
            self.bytes_sent(),
            self.packets_sent()
        );

        self.events.disconnect.dispatch(&mut DisconnectEvent {
            connection: self.id,
            reason,
        });
    }

    /// Close locally and wait for the read thread
    ///
    /// Called from the read thread itself (for example by a handler) the
    /// wait is skipped.
    pub fn close(&self) {
        self.disconnect(DisconnectReason::Local);
        let handle = self.read_thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Connection {} read thread panicked", self.id);
            }
        }
    }

    /// This connection as a handler-facing session
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.self_ref.upgrade().map(|connection| connection as Arc<dyn Session>)
    }

    /// Block until the connection closes or `timeout` passes
    ///
    /// # Returns
    /// `true` if the connection is closed
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != ConnectionState::Closed {
            if self.activated.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == ConnectionState::Closed
    }

    // === Accessors ===

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub fn set_phase(&self, phase: Phase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            tracing::debug!("Connection {} phase {} -> {}", self.id, previous, phase);
        }
    }

    pub fn events(&self) -> &ConnectionEvents {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Current threshold, `None` while compression is off
    pub fn compression_threshold(&self) -> Option<usize> {
        self.compression.lock().threshold()
    }

    pub fn is_encrypted(&self) -> bool {
        self.writer.lock().stream.is_enabled()
    }

    // === Statistics ===

    /// Time since the last frame was received
    pub fn idle_time(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }
}

impl Session for Connection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    fn phase(&self) -> Phase {
        Connection::phase(self)
    }

    fn set_phase(&self, phase: Phase) {
        Connection::set_phase(self, phase)
    }

    fn set_compression_threshold(&self, threshold: i32) {
        self.compression.lock().set_threshold(threshold);
        if threshold >= 0 {
            tracing::debug!("Connection {} compression threshold {}", self.id, threshold);
        } else {
            tracing::debug!("Connection {} compression disabled", self.id);
        }
    }

    /// Encrypt output immediately and input from the next frame on
    fn enable_encryption(&self, secret: &[u8]) -> Result<()> {
        let (encryptor, decryptor) = cipher_pair(secret)?;
        self.writer.lock().stream.enable(encryptor);
        *self.pending_decryptor.lock() = Some(decryptor);
        tracing::debug!("Connection {} encrypting output", self.id);
        Ok(())
    }

    fn send_boxed(&self, payload: BoxedPayload) -> Result<bool> {
        self.send_payload(payload)
    }

    fn kick(&self, reason: String) {
        tracing::info!("Connection {} kicked: {}", self.id, reason);
        self.disconnect(DisconnectReason::Kicked(reason));
    }

    fn close(&self) {
        self.disconnect(DisconnectReason::Local);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("phase", &self.phase())
            .field("state", &self.state())
            .finish()
    }
}
