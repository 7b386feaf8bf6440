//! Core error types for Botwire

use crate::types::Phase;

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// An access whose last byte falls outside the buffer.
    #[error("Buffer access out of bounds: offset {offset} + {len} bytes exceeds {limit}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        limit: usize,
    },

    #[error("VarInt longer than {max_bytes} bytes")]
    VarIntTooLong { max_bytes: usize },

    #[error("Cannot grow fixed-capacity buffer from {capacity} to {requested} bytes")]
    FixedCapacity { capacity: usize, requested: usize },

    #[error("Buffer used after free")]
    BufferFreed,

    #[error("No registry for phase {0}")]
    UnmappedPhase(Phase),

    #[error("No serverbound mapping for payload {payload} in phase {phase}")]
    UnmappedPayload { payload: &'static str, phase: Phase },

    #[error("Failed to send {packet}: {source}")]
    Send {
        packet: String,
        #[source]
        source: Box<WireError>,
    },

    #[error("Connection closed")]
    Closed,
}

impl WireError {
    /// Errors that mean the byte stream can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WireError::OutOfBounds { .. }
                | WireError::VarIntTooLong { .. }
                | WireError::InvalidData(_)
                | WireError::FixedCapacity { .. }
                | WireError::BufferFreed
        )
    }

    /// Wrap this error with the name of the packet being sent.
    pub fn context(self, packet: impl Into<String>) -> Self {
        WireError::Send {
            packet: packet.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
