//! # Botwire Networking Layer
//!
//! Blocking client networking on top of `botwire-protocol`: one OS thread per
//! connection, no async runtime.
//!
//! ## Modules
//!
//! - [`config`] - Client configuration options
//! - [`cipher`] - AES-128/CFB8 stream wrappers
//! - [`framing`] - Length-prefixed, optionally compressed frames
//! - [`connection`] - Connection pipeline and its read thread
//! - [`encryption`] - Login key exchange
//! - [`client`] - Login and status flows
//!
//! ## Example
//!
//! ```rust,no_run
//! use botwire_network::{Client, ClientConfig};
//! use botwire_protocol::protocol::Protocol;
//! use botwire_protocol::version::V1_20_2;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let protocol = Arc::new(Protocol::assemble(&V1_20_2)?);
//! let client = Client::connect(ClientConfig::default(), protocol)?;
//! client.login("bot_01")?;
//! client.wait_for_play(Duration::from_secs(10))?;
//! # Ok::<(), botwire_core::WireError>(())
//! ```

pub mod cipher;
pub mod client;
pub mod config;
pub mod connection;
pub mod encryption;
pub mod framing;

// Re-export commonly used items
pub use client::{Client, Joined};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionEvents, ConnectionState, DisconnectEvent, DisconnectReason};
pub use encryption::{EncryptionSession, SessionAuthenticator};
