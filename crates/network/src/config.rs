//! # Client Configuration
//!
//! Configuration options for a client connection.
//!
//! # Example
//!
//! ```rust
//! use botwire_network::ClientConfig;
//!
//! let config = ClientConfig {
//!     address: "play.example.net:25565".to_string(),
//!     username: "bot_01".to_string(),
//!     read_timeout_ms: 30_000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! Configurations can also be loaded from JSON; missing fields keep their
//! defaults:
//!
//! ```json
//! { "address": "127.0.0.1:25565", "username": "bot_01", "tcp_nodelay": false }
//! ```

use botwire_core::{Result, WireError};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Port used when the address does not name one
pub const DEFAULT_PORT: u16 = 25565;

/// Largest frame a 3-byte VarInt length can announce
pub const DEFAULT_MAX_FRAME_SIZE: usize = (1 << 21) - 1;

/// Client configuration options
///
/// # Purpose
/// Defines every tunable of one client connection: where to connect, how
/// long to wait, how to compress and how large frames may get.
///
/// # Default Values
///
/// - `127.0.0.1:25565`
/// - 5-second connect timeout, blocking reads
/// - zlib level 6 once the server enables compression
/// - 2 MiB maximum frame size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address as `host` or `host:port`
    ///
    /// # Default
    /// `"127.0.0.1:25565"`
    pub address: String,

    /// How long to wait for the TCP connection, in milliseconds
    ///
    /// # Default
    /// 5000
    pub connect_timeout_ms: u64,

    /// How long a read may block, in milliseconds
    ///
    /// # Default
    /// 0 (block until data arrives or the socket closes)
    ///
    /// # Notes
    /// - A timed out read is a transport error and disconnects the client
    /// - Servers send keep-alives every few seconds, so 30000 is a safe value
    pub read_timeout_ms: u64,

    /// zlib level (0-9) used for outgoing packets above the threshold
    ///
    /// # Default
    /// 6 (good balance)
    pub compression_level: u32,

    /// Capacity of the socket read buffer and the initial frame buffer
    ///
    /// # Default
    /// 8192 bytes (8KB)
    pub read_buffer_size: usize,

    /// Capacity of the socket write buffer
    ///
    /// # Default
    /// 8192 bytes (8KB)
    pub write_buffer_size: usize,

    /// Largest frame accepted from the server, in bytes
    ///
    /// # Default
    /// 2097151 (the largest length a 3-byte VarInt holds)
    ///
    /// # Notes
    /// - Also bounds the announced decompressed size
    pub max_frame_size: usize,

    /// Disable Nagle's algorithm
    ///
    /// # Default
    /// `true`
    pub tcp_nodelay: bool,

    /// Name sent in the login start packet
    ///
    /// # Default
    /// `"botwire"`
    pub username: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 0,
            compression_level: 6,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tcp_nodelay: true,
            username: "botwire".to_string(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| WireError::Config(format!("Invalid client config: {}", e)))
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| WireError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        tracing::debug!("Loaded client config from {}", path.display());
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Checks
    /// - `address` must not be empty and its port must parse
    /// - `connect_timeout_ms` must be > 0
    /// - `compression_level` must be 0-9
    /// - Buffer sizes must be >= 1024
    /// - `max_frame_size` must be >= 256
    /// - `username` must be 1-16 characters
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(WireError::Config("address must not be empty".to_string()));
        }
        self.host_and_port()?;

        if self.connect_timeout_ms == 0 {
            return Err(WireError::Config("connect_timeout_ms must be > 0".to_string()));
        }

        if self.compression_level > 9 {
            return Err(WireError::Config("compression_level must be 0-9".to_string()));
        }

        if self.read_buffer_size < 1024 {
            return Err(WireError::Config("read_buffer_size must be >= 1024".to_string()));
        }

        if self.write_buffer_size < 1024 {
            return Err(WireError::Config("write_buffer_size must be >= 1024".to_string()));
        }

        if self.max_frame_size < 256 {
            return Err(WireError::Config("max_frame_size must be >= 256".to_string()));
        }

        let name_len = self.username.chars().count();
        if name_len == 0 || name_len > 16 {
            return Err(WireError::Config("username must be 1-16 characters".to_string()));
        }

        if !self.read_buffer_size.is_power_of_two() {
            tracing::warn!("read_buffer_size is not a power of 2, this may reduce performance");
        }

        if self.max_frame_size > DEFAULT_MAX_FRAME_SIZE {
            tracing::warn!(
                "max_frame_size {} exceeds what a 3-byte frame length can announce",
                self.max_frame_size
            );
        }

        Ok(())
    }

    /// Host and port as sent in the handshake
    pub fn host_and_port(&self) -> Result<(&str, u16)> {
        let address = self.address.trim();
        // bracketed IPv6 literal, with or without a port
        if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| WireError::Config(format!("Invalid address: {}", address)))?;
            return match tail.strip_prefix(':') {
                Some(port) => Ok((host, parse_port(port)?)),
                None if tail.is_empty() => Ok((host, DEFAULT_PORT)),
                None => Err(WireError::Config(format!("Invalid address: {}", address))),
            };
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok((host, parse_port(port)?)),
            _ => Ok((address, DEFAULT_PORT)),
        }
    }

    /// Resolve the address to the first socket address it names
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let (host, port) = self.host_and_port()?;
        (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| WireError::NotFound(format!("No address found for {}", self.address)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` means reads block indefinitely
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| WireError::Config(format!("Invalid port: {}", port)))
}
