//! Compression layer for protocol packets
//!
//! Packets whose encoded size reaches the connection's threshold are zlib
//! deflated. [`CompressionState`] keeps one deflater and one inflater per
//! connection so that the codec objects are reused between frames; callers
//! guard it with a mutex because the read thread and senders share it.

use crate::buffer::Buffer;
use botwire_core::{Result, WireError};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::io::{Read, Write};

/// Default zlib level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compress data with zlib in one shot
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress zlib data in one shot
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| WireError::Compression(e.to_string()))?;
    Ok(decompressed)
}

/// Per-connection compression codec and threshold
pub struct CompressionState {
    /// `None` while compression is disabled for the connection
    threshold: Option<usize>,
    level: u32,
    deflater: Compress,
    inflater: Decompress,
}

impl CompressionState {
    /// Create a disabled codec that will deflate at `level` once enabled
    pub fn new(level: u32) -> Self {
        Self {
            threshold: None,
            level,
            deflater: Compress::new(Compression::new(level), true),
            inflater: Decompress::new(true),
        }
    }

    #[inline]
    pub fn threshold(&self) -> Option<usize> {
        self.threshold
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.threshold.is_some()
    }

    #[inline]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Apply a threshold as announced by the server
    ///
    /// A negative value disables compression.
    pub fn set_threshold(&mut self, threshold: i32) {
        self.threshold = usize::try_from(threshold).ok();
        tracing::debug!("Compression threshold set to {:?}", self.threshold);
    }

    /// Whether a packet of `len` encoded bytes must be deflated
    #[inline]
    pub fn should_compress(&self, len: usize) -> bool {
        self.threshold.map_or(false, |threshold| len >= threshold)
    }

    /// Deflate `input` into `out`, replacing its contents
    pub fn deflate(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.deflater.reset();
        out.clear();
        out.reserve(input.len() / 2 + 64);

        loop {
            let consumed = self.deflater.total_in() as usize;
            let status = self
                .deflater
                .compress_vec(&input[consumed..], out, FlushCompress::Finish)
                .map_err(|e| WireError::Compression(e.to_string()))?;
            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => out.reserve(out.capacity().max(64)),
            }
        }
    }

    /// Inflate `input` into `out` at its write cursor
    ///
    /// # Errors
    /// [`WireError::Compression`] if the stream is corrupt or does not
    /// inflate to exactly `expected` bytes.
    pub fn inflate(&mut self, input: &[u8], expected: usize, out: &mut Buffer) -> Result<()> {
        self.inflater.reset(true);
        let target = out.writable_slice(expected)?;
        let status = self
            .inflater
            .decompress(input, target, FlushDecompress::Finish)
            .map_err(|e| WireError::Compression(e.to_string()))?;

        let produced = self.inflater.total_out() as usize;
        if status != Status::StreamEnd || produced != expected {
            return Err(WireError::Compression(format!(
                "Inflated size mismatch: announced {}, produced {} ({:?})",
                expected, produced, status
            )));
        }
        out.advance_write(produced)
    }
}

impl Default for CompressionState {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_roundtrip() {
        let original = b"Hello, World! This is a test of the compression system.";

        let compressed = compress(original, DEFAULT_COMPRESSION_LEVEL).unwrap();
        let decompressed = decompress(&compressed).unwrap();

        assert_eq!(original, &decompressed[..]);
    }

    #[test]
    fn test_state_roundtrip_reuses_codecs() {
        let mut state = CompressionState::default();
        let mut scratch = Vec::new();

        for round in 0..3 {
            let original: Vec<u8> = (0..4096u32).map(|i| (i * round % 251) as u8).collect();
            state.deflate(&original, &mut scratch).unwrap();
            assert_eq!(decompress(&scratch).unwrap(), original);

            let mut out = Buffer::allocate(16);
            state.inflate(&scratch, original.len(), &mut out).unwrap();
            assert_eq!(out.readable_bytes(), &original[..]);
        }
    }

    #[test]
    fn test_inflate_size_mismatch() {
        let mut state = CompressionState::default();
        let compressed = compress(&[7u8; 100], 6).unwrap();

        let mut out = Buffer::allocate(16);
        assert!(state.inflate(&compressed, 99, &mut out).is_err());
        let mut out = Buffer::allocate(16);
        assert!(state.inflate(&compressed, 101, &mut out).is_err());
        let mut out = Buffer::allocate(16);
        assert!(state.inflate(&compressed, 100, &mut out).is_ok());
    }

    #[test]
    fn test_threshold() {
        let mut state = CompressionState::default();
        assert!(!state.is_enabled());
        assert!(!state.should_compress(1_000_000));

        state.set_threshold(256);
        assert!(state.should_compress(256));
        assert!(!state.should_compress(255));

        state.set_threshold(-1);
        assert!(!state.is_enabled());
    }

    #[test]
    fn test_corrupt_stream() {
        let mut state = CompressionState::default();
        let mut out = Buffer::allocate(16);
        assert!(matches!(
            state.inflate(&[1, 2, 3, 4], 10, &mut out),
            Err(WireError::Compression(_))
        ));
    }
}
