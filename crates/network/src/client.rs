//! # Client Flow
//!
//! [`Client`] drives one connection through the handshake and either the
//! login sequence or a status query.
//!
//! # Login
//!
//! ```text
//! → Handshake(intent = login)            HANDSHAKE → LOGIN
//! → LoginStart
//! ← SetCompression                       threshold applied before the next frame
//! ← EncryptionRequest                    → EncryptionResponse, then AES/CFB8
//! ← LoginSuccess                         → LoginAcknowledged, LOGIN → CONFIGURATION
//!                                          (or straight to PLAY without one)
//! ← FinishConfiguration                  → ack, CONFIGURATION → PLAY
//! ```
//!
//! Keep-alives and configuration pings are answered for as long as the
//! client lives. A disconnect packet in any phase closes the connection with
//! [`DisconnectReason::Kicked`](crate::connection::DisconnectReason::Kicked).
//!
//! # Status
//!
//! ```text
//! → Handshake(intent = status)           HANDSHAKE → STATUS
//! → StatusRequest   ← StatusResponse
//! → PingRequest     ← PongResponse       round trip = ping
//! ```

use crate::config::ClientConfig;
use crate::connection::{Connection, DisconnectEvent};
use crate::encryption::{EncryptionSession, SessionAuthenticator};
use botwire_core::{ConnectionId, Direction, IdGenerator, Phase, Result, WireError};
use botwire_protocol::packets::{
    ChatInput, ChatMessage, ClientboundKeepAlive, ConfigurationPing, ConfigurationPong, Disconnect,
    EncryptionRequest, FinishConfiguration, FinishConfigurationAck, Handshake, Intent,
    LoginAcknowledged, LoginStart, LoginSuccess, PingRequest, PongResponse, ServerStatus,
    SetCompression, StatusRequest, StatusResponse, MAX_USERNAME_LEN,
};
use botwire_protocol::{Chain, Flow, PacketContainer, Protocol, ProtocolResource, Session, Subscription};
use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};
use std::any::{Any, TypeId};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Connection ids are handed out per protocol table
static CONNECTION_IDS: ProtocolResource<IdGenerator> = ProtocolResource::new("botwire.connection_ids");

/// How long a status query waits for each answer without a read timeout
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Fired when the client enters the play phase
#[derive(Debug, Clone)]
pub struct Joined {
    pub connection: ConnectionId,
    pub uuid: Uuid,
    pub username: String,
}

/// One client connection and its control handlers
pub struct Client {
    config: ClientConfig,
    connection: Arc<Connection>,
    joined: Arc<Chain<Joined>>,
    authenticator: Option<Arc<dyn SessionAuthenticator>>,
    subscriptions: Mutex<Vec<Subscription<PacketContainer>>>,
}

impl Client {
    /// Open the TCP connection described by `config`
    ///
    /// The connection stays inactive until [`login`](Self::login) or
    /// [`status`](Self::status) starts it.
    pub fn connect(config: ClientConfig, protocol: Arc<Protocol>) -> Result<Self> {
        config.validate()?;
        let address = config.socket_addr()?;
        tracing::info!("Connecting to {} (protocol {})", address, protocol.protocol_version());

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_nodelay(config.tcp_nodelay)?;
        socket.set_keepalive(true)?;
        socket.connect_timeout(&address.into(), config.connect_timeout())?;
        socket.set_read_timeout(config.read_timeout())?;
        let stream: TcpStream = socket.into();

        let id = protocol.resource_or_init(&CONNECTION_IDS, IdGenerator::new).next_id();
        let connection = Connection::new(id, stream, protocol, &config)?;
        tracing::info!("Connection {} connected to {}", id, address);

        Ok(Self {
            config,
            connection,
            joined: Arc::new(Chain::new()),
            authenticator: None,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Consult `authenticator` when the server asks for authentication
    pub fn with_authenticator(mut self, authenticator: Arc<dyn SessionAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Chain fired once the client reaches the play phase
    pub fn joined(&self) -> &Chain<Joined> {
        &self.joined
    }

    /// Send a payload over the connection
    pub fn send<P: Any + Send + Sync>(&self, payload: P) -> Result<bool> {
        self.connection.send_payload(Box::new(payload))
    }

    /// Send a chat line, on versions that map one
    pub fn chat(&self, message: &str) -> Result<bool> {
        self.send(ChatInput::new(message))
    }

    /// Start logging in as `username`
    ///
    /// Returns once the handshake and login start are sent; the rest of the
    /// sequence runs on the read thread. Use
    /// [`wait_for_play`](Self::wait_for_play) to block until it completes.
    pub fn login(&self, username: &str) -> Result<()> {
        let name_len = username.chars().count();
        if name_len == 0 || name_len > MAX_USERNAME_LEN {
            return Err(WireError::Config(format!(
                "username must be 1-{} characters",
                MAX_USERNAME_LEN
            )));
        }
        self.expect_fresh()?;
        self.install_login_handlers();
        self.connection.activate()?;

        self.handshake(Intent::Login)?;
        self.send(LoginStart::new(username))?;
        tracing::info!("Connection {} logging in as {}", self.connection.id(), username);
        Ok(())
    }

    /// Log in with the configured username
    pub fn login_default(&self) -> Result<()> {
        let username = self.config.username.clone();
        self.login(&username)
    }

    /// Block until the play phase is reached
    ///
    /// # Errors
    /// - [`WireError::Closed`] if the connection closes first
    /// - [`WireError::Protocol`] on timeout
    pub fn wait_for_play(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.connection.phase() == Phase::PLAY {
                return Ok(());
            }
            if self.connection.is_closed() {
                return Err(WireError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WireError::Protocol(format!(
                    "Not in play after {:?} (phase {})",
                    timeout,
                    self.connection.phase()
                )));
            }
            // short slices: the join may land between the check and the wait
            self.joined.wait((deadline - now).min(Duration::from_millis(50)));
        }
    }

    /// Query the server list status and measure the ping
    ///
    /// Uses up the connection: it is closed once the pong arrives.
    pub fn status(&self) -> Result<(ServerStatus, Duration)> {
        self.expect_fresh()?;
        let timeout = self.config.read_timeout().unwrap_or(DEFAULT_STATUS_TIMEOUT);

        let (responses, response_rx) = mpsc::channel::<String>();
        let (pongs, pong_rx) = mpsc::channel::<i64>();
        self.watch::<StatusResponse, _>(move |response, session| {
            forward(&responses, response.json.clone(), session.id(), "status response");
            Ok(())
        });
        self.watch::<PongResponse, _>(move |pong, session| {
            forward(&pongs, pong.payload, session.id(), "pong");
            Ok(())
        });
        self.connection.activate()?;

        self.handshake(Intent::Status)?;
        self.send(StatusRequest)?;
        let json = self.receive(&response_rx, timeout, "status response")?;
        let status = ServerStatus::parse(&json)?;

        let payload = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64);
        let started = Instant::now();
        self.send(PingRequest { payload })?;
        let echoed = self.receive(&pong_rx, timeout, "pong")?;
        let ping = started.elapsed();
        if echoed != payload {
            tracing::warn!(
                "Connection {} pong payload {} does not match ping {}",
                self.connection.id(),
                echoed,
                payload
            );
        }

        tracing::info!(
            "Connection {} status: {} ({} ms)",
            self.connection.id(),
            status.description_text(),
            ping.as_millis()
        );
        self.connection.close();
        Ok((status, ping))
    }

    /// Close the connection
    pub fn disconnect(&self) {
        self.connection.close();
    }

    fn expect_fresh(&self) -> Result<()> {
        let phase = self.connection.phase();
        if phase != Phase::HANDSHAKE {
            return Err(WireError::Protocol(format!(
                "Connection {} already left the handshake (phase {})",
                self.connection.id(),
                phase
            )));
        }
        Ok(())
    }

    fn handshake(&self, intent: Intent) -> Result<()> {
        let (host, port) = self.config.host_and_port()?;
        let protocol_version = self.connection.protocol().protocol_version();
        self.send(Handshake::new(protocol_version, host, port, intent))?;
        self.connection.set_phase(intent.phase());
        Ok(())
    }

    fn receive<T>(&self, rx: &mpsc::Receiver<T>, timeout: Duration, what: &str) -> Result<T> {
        rx.recv_timeout(timeout).map_err(|_| {
            if self.connection.is_closed() {
                WireError::Closed
            } else {
                WireError::Protocol(format!("No {} within {:?}", what, timeout))
            }
        })
    }

    /// Run `handler` for every clientbound `T` on this connection
    ///
    /// Types the protocol never maps are skipped silently.
    fn watch<T, F>(&self, handler: F)
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Arc<dyn Session>) -> Result<()> + Send + Sync + 'static,
    {
        let protocol = self.connection.protocol();
        if protocol.match_key(TypeId::of::<T>()).is_empty() {
            return;
        }
        let id = self.connection.id();
        let subscription = protocol.on::<T, _>(move |container: &mut PacketContainer| {
            if container.direction() != Direction::Clientbound {
                return Flow::CONTINUE;
            }
            let Some(session) = container.session().filter(|s| s.id() == id).cloned() else {
                return Flow::CONTINUE;
            };
            if let Some(packet) = container.payload::<T>() {
                if let Err(e) = handler(packet, &session) {
                    tracing::error!(
                        "Connection {} failed to handle {}: {}",
                        id,
                        container.name().unwrap_or("packet"),
                        e
                    );
                    session.close();
                }
            }
            Flow::CONTINUE
        });
        self.subscriptions.lock().push(subscription);
    }

    fn install_login_handlers(&self) {
        let id = self.connection.id();
        let profile: Arc<Mutex<Option<(Uuid, String)>>> = Arc::new(Mutex::new(None));

        self.watch::<SetCompression, _>(|packet, session| {
            session.set_compression_threshold(packet.threshold);
            Ok(())
        });

        let authenticator = self.authenticator.clone();
        self.watch::<EncryptionRequest, _>(move |request, session| {
            let exchange = EncryptionSession::new(request)?;
            if request.should_authenticate {
                exchange.authenticate(authenticator.as_deref())?;
            }
            session.send(exchange.response(&request.verify_token)?)?;
            session.enable_encryption(exchange.secret())
        });

        let joined = Arc::clone(&self.joined);
        let login_profile = Arc::clone(&profile);
        self.watch::<LoginSuccess, _>(move |success, session| {
            tracing::info!("Connection {} logged in as {} ({})", id, success.username, success.uuid);
            *login_profile.lock() = Some((success.uuid, success.username.clone()));

            let protocol = session.protocol();
            let acknowledges = protocol
                .by_type(Phase::LOGIN, TypeId::of::<LoginAcknowledged>(), Direction::Serverbound)
                .is_some();
            if acknowledges {
                session.send(LoginAcknowledged)?;
                session.set_phase(Phase::CONFIGURATION);
            } else {
                session.set_phase(Phase::PLAY);
                fire_joined(&joined, id, success.uuid, success.username.clone());
            }
            Ok(())
        });

        let joined = Arc::clone(&self.joined);
        self.watch::<FinishConfiguration, _>(move |_, session| {
            session.send(FinishConfigurationAck)?;
            session.set_phase(Phase::PLAY);
            let (uuid, username) = profile.lock().clone().unwrap_or_default();
            fire_joined(&joined, id, uuid, username);
            Ok(())
        });

        self.watch::<ClientboundKeepAlive, _>(|keep_alive, session| {
            session.send(keep_alive.reply()).map(|_| ())
        });

        self.watch::<ConfigurationPing, _>(|ping, session| {
            session.send(ConfigurationPong { id: ping.id }).map(|_| ())
        });

        self.watch::<Disconnect, _>(|disconnect, session| {
            session.kick(disconnect.reason_text());
            Ok(())
        });

        let protocol = self.connection.protocol();
        if !protocol.match_key(TypeId::of::<dyn ChatMessage>()).is_empty() {
            let chat = protocol.on::<dyn ChatMessage, _>(move |container: &mut PacketContainer| {
                if container.session().map(|s| s.id()) == Some(id) {
                    if let Some(message) = container.view::<dyn ChatMessage>() {
                        tracing::info!("Connection {} chat: {}", id, message.text());
                    }
                }
                Flow::CONTINUE
            });
            self.subscriptions.lock().push(chat);
        }

        // drop the handlers with the connection
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        let pending = Mutex::new(Some(subscriptions));
        self.connection.events().disconnect.add(move |_: &mut DisconnectEvent| {
            if let Some(subscriptions) = pending.lock().take() {
                subscriptions.into_iter().for_each(Subscription::cancel);
            }
            Flow::REMOVE
        });
    }
}

/// Hand a value to the caller blocked in [`Client::status`]
///
/// Returns `false` when the caller already gave up waiting.
fn forward<T>(sender: &mpsc::Sender<T>, value: T, connection: ConnectionId, what: &str) -> bool {
    match sender.send(value) {
        Ok(()) => true,
        Err(_) => {
            tracing::trace!("Connection {} dropped late {}: no receiver", connection, what);
            false
        }
    }
}

fn fire_joined(chain: &Chain<Joined>, connection: ConnectionId, uuid: Uuid, username: String) {
    tracing::info!("Connection {} joined the game", connection);
    chain.dispatch(&mut Joined {
        connection,
        uuid,
        username,
    });
}

impl Drop for Client {
    fn drop(&mut self) {
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.cancel();
        }
        self.connection.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config.address)
            .field("connection", &self.connection)
            .finish()
    }
}
