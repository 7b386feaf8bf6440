//! Play phase payloads
//!
//! Keep-alives are shared shapes: the id is a VarInt on older versions and a
//! long on newer ones, so the version modules supply the wire functions.
//! Chat payloads differ per version and are unified by [`ChatMessage`].
//! [`ChunkData`] is a shape too: its section layout is version specific.

use super::flatten_text;
use crate::buffer::Buffer;
use crate::mapping::Packet;
use botwire_core::{Result, WireError};

/// Longest chat line a client may send
pub const MAX_CHAT_LEN: usize = 100;

/// Liveness check sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientboundKeepAlive {
    pub id: i64,
}

impl ClientboundKeepAlive {
    /// The answer the server expects
    pub fn reply(&self) -> ServerboundKeepAlive {
        ServerboundKeepAlive { id: self.id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerboundKeepAlive {
    pub id: i64,
}

/// A chat line received from the server, whatever the version
pub trait ChatMessage: Send + Sync {
    /// JSON text component
    fn json(&self) -> &str;

    /// Whether the line is shown above the hotbar instead of in the chat box
    fn is_overlay(&self) -> bool;

    /// The line without formatting
    fn text(&self) -> String {
        match serde_json::from_str::<serde_json::Value>(self.json()) {
            Ok(value) => flatten_text(&value),
            Err(_) => self.json().to_string(),
        }
    }
}

/// Chat line with a position byte (0 chat, 1 system, 2 hotbar)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedChatMessage {
    pub json: String,
    pub position: u8,
}

impl ChatMessage for PositionedChatMessage {
    fn json(&self) -> &str {
        &self.json
    }

    fn is_overlay(&self) -> bool {
        self.position == 2
    }
}

impl Packet for PositionedChatMessage {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_string(&self.json)?;
        buf.write_u8(self.position)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            json: buf.read_string()?,
            position: buf.read_u8()?,
        })
    }
}

/// Unsigned system chat line with an overlay flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemChatMessage {
    pub json: String,
    pub overlay: bool,
}

impl ChatMessage for SystemChatMessage {
    fn json(&self) -> &str {
        &self.json
    }

    fn is_overlay(&self) -> bool {
        self.overlay
    }
}

impl Packet for SystemChatMessage {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_string(&self.json)?;
        buf.write_bool(self.overlay)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            json: buf.read_string()?,
            overlay: buf.read_bool()?,
        })
    }
}

/// Unsigned chat line or command typed by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInput {
    pub message: String,
}

impl ChatInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Packet for ChatInput {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        if self.message.chars().count() > MAX_CHAT_LEN {
            return Err(WireError::InvalidData(format!(
                "Chat message exceeds {} characters",
                MAX_CHAT_LEN
            )));
        }
        buf.write_string(&self.message)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            message: buf.read_string_max(MAX_CHAT_LEN)?,
        })
    }
}

/// Blocks per 16×16×16 section
pub const SECTION_BLOCKS: usize = 4096;

/// Block states of one chunk section, indexed `(y * 16 + z) * 16 + x`
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkSection {
    states: Box<[u16]>,
}

impl ChunkSection {
    /// A section of air
    pub fn empty() -> Self {
        Self {
            states: vec![0; SECTION_BLOCKS].into_boxed_slice(),
        }
    }

    /// # Errors
    /// [`WireError::InvalidData`] unless `states` holds exactly
    /// [`SECTION_BLOCKS`] entries.
    pub fn from_states(states: Vec<u16>) -> Result<Self> {
        if states.len() != SECTION_BLOCKS {
            return Err(WireError::InvalidData(format!(
                "Chunk section has {} block states",
                states.len()
            )));
        }
        Ok(Self {
            states: states.into_boxed_slice(),
        })
    }

    #[inline]
    fn index(x: usize, y: usize, z: usize) -> usize {
        ((y & 15) * 16 + (z & 15)) * 16 + (x & 15)
    }

    /// Raw state (`block_id << 4 | metadata`) at section-local coordinates
    pub fn state(&self, x: usize, y: usize, z: usize) -> u16 {
        self.states[Self::index(x, y, z)]
    }

    pub fn set_state(&mut self, x: usize, y: usize, z: usize, state: u16) {
        self.states[Self::index(x, y, z)] = state;
    }

    pub fn block_id(&self, x: usize, y: usize, z: usize) -> u16 {
        self.state(x, y, z) >> 4
    }

    pub fn states(&self) -> &[u16] {
        &self.states
    }
}

impl std::fmt::Debug for ChunkSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let solid = self.states.iter().filter(|&&state| state != 0).count();
        f.debug_struct("ChunkSection").field("non_air", &solid).finish()
    }
}

/// One chunk column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub x: i32,
    pub z: i32,
    /// Whole column, biomes included
    pub full: bool,
    /// Bit `n` set when section `n` (from the bottom) is present
    pub section_mask: u16,
    /// Present sections, bottom up
    pub sections: Vec<ChunkSection>,
    /// Light arrays and biomes after the block states, as sent
    pub trailing: Vec<u8>,
}
