//! # Botwire Protocol Library
//!
//! Wire engine for a versioned, length-framed game protocol: the buffer and
//! its codecs, the packet tables of every supported version and the handler
//! chains packets are routed through.
//!
//! ## Architecture
//!
//! The library is organized into several layers:
//!
//! ### 1. Buffer Layer ([`buffer`], [`codecs`], [`stream`], [`pool`])
//! A growable byte region with independent read and write cursors:
//! - Big-endian primitive accessors with `_le` variants
//! - VarInt / VarLong (7 bits per byte, at most 5 / 10 bytes)
//! - VarInt-prefixed strings and byte arrays, UUIDs as two longs
//! - `Read` / `Write` / `bytes::Buf` views for external codecs
//! - Per-thread scratch buffers for senders
//!
//! ### 2. Compression ([`compression`])
//! zlib deflate/inflate above a per-connection threshold.
//!
//! ### 3. Packet Tables ([`mapping`], [`registry`], [`protocol`])
//! - [`PacketDescriptor`]: declaration of one packet of one phase
//! - [`PacketMapping`]: compiled, immutable metadata and codec
//! - [`PhaseRegistry`]: lookups by id, name and payload type per phase
//! - [`Protocol`]: all phases of one version plus handler chains
//!
//! ### 4. Dispatch ([`dispatch`], [`container`])
//! Synchronous handler chains with `STOP` / `REMOVE` control flags, and the
//! [`PacketContainer`] that carries each packet through them.
//!
//! ### 5. Payloads and Versions ([`packets`], [`version`])
//! Payload types and the per-version adapters that register them.
//!
//! ## Id Space
//!
//! Within a phase, a packet is identified by its registry id:
//!
//! ```text
//! registry_id = network_id * 2 + direction   (serverbound 0, clientbound 1)
//! ```
//!
//! ## Usage Example
//!
//! ```rust
//! use botwire_protocol::{Buffer, Protocol};
//! use botwire_protocol::packets::{Handshake, Intent};
//! use botwire_protocol::version::adapter_for;
//! use botwire_core::{Direction, Phase};
//! use std::any::TypeId;
//!
//! let protocol = Protocol::assemble(adapter_for(47).unwrap()).unwrap();
//! let mapping = protocol
//!     .by_type(Phase::HANDSHAKE, TypeId::of::<Handshake>(), Direction::Serverbound)
//!     .unwrap();
//!
//! let mut buf = Buffer::allocate(64);
//! let handshake = Handshake::new(47, "localhost", 25565, Intent::Login);
//! mapping.encode(&handshake, &mut buf).unwrap();
//! assert_eq!(buf.readable(), 14);
//! ```

pub mod buffer;
pub mod codecs;
pub mod compression;
pub mod container;
pub mod dispatch;
pub mod mapping;
pub mod packets;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod stream;
pub mod version;

// Re-export commonly used items
pub use buffer::Buffer;
pub use codecs::{var_int_len, var_long_len, MAX_STRING_LEN, MAX_VAR_INT_LEN, MAX_VAR_LONG_LEN};
pub use compression::CompressionState;
pub use container::{PacketContainer, Payload, Session, UnknownPacket};
pub use dispatch::{Chain, ChainSet, Flow, HandlerId, Subscription};
pub use mapping::{compile, BoxedPayload, MappingKey, Packet, PacketDescriptor, PacketMapping};
pub use pool::BufferPool;
pub use protocol::{Protocol, ProtocolResource};
pub use registry::{PacketChains, PhaseRegistry, DENSE_LIMIT};
pub use version::VersionAdapter;
