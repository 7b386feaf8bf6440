//! Variable-length integer, string and UUID codecs
//!
//! VarInts store 7 bits per byte, least significant group first; the high
//! bit of each byte says whether another byte follows. A 32-bit value takes
//! at most 5 bytes and a 64-bit value at most 10. Anything longer is a
//! malformed (or hostile) stream and is rejected.

use crate::buffer::Buffer;
use botwire_core::{Result, WireError};
use std::io::{ErrorKind, Read, Write};
use uuid::Uuid;

/// Maximum encoded size of a 32-bit VarInt
pub const MAX_VAR_INT_LEN: usize = 5;

/// Maximum encoded size of a 64-bit VarLong
pub const MAX_VAR_LONG_LEN: usize = 10;

/// Default maximum string length in characters
pub const MAX_STRING_LEN: usize = 32767;

/// Encoded size of a VarInt, without writing it
///
/// Used to size frame headers before the payload is known.
#[inline]
pub const fn var_int_len(value: i32) -> usize {
    let bits = 32 - (value as u32).leading_zeros() as usize;
    if bits == 0 {
        1
    } else {
        (bits + 6) / 7
    }
}

/// Encoded size of a VarLong, without writing it
#[inline]
pub const fn var_long_len(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    if bits == 0 {
        1
    } else {
        (bits + 6) / 7
    }
}

/// Encode a VarInt into a fixed array, returning the array and its used length
#[inline]
pub fn encode_var_int(value: i32) -> ([u8; MAX_VAR_INT_LEN], usize) {
    let mut out = [0u8; MAX_VAR_INT_LEN];
    let mut value = value as u32;
    let mut len = 0;
    loop {
        if value & !0x7F == 0 {
            out[len] = value as u8;
            return (out, len + 1);
        }
        out[len] = (value as u8 & 0x7F) | 0x80;
        value >>= 7;
        len += 1;
    }
}

/// Encode a VarLong into a fixed array, returning the array and its used length
#[inline]
pub fn encode_var_long(value: i64) -> ([u8; MAX_VAR_LONG_LEN], usize) {
    let mut out = [0u8; MAX_VAR_LONG_LEN];
    let mut value = value as u64;
    let mut len = 0;
    loop {
        if value & !0x7F == 0 {
            out[len] = value as u8;
            return (out, len + 1);
        }
        out[len] = (value as u8 & 0x7F) | 0x80;
        value >>= 7;
        len += 1;
    }
}

/// Read a VarInt directly from a byte stream
///
/// # Returns
/// - `Ok(Some((value, len)))` - decoded value and its encoded size
/// - `Ok(None)` - the stream ended cleanly before the first byte
///
/// # Errors
/// - [`WireError::VarIntTooLong`] after 5 continuation bytes
/// - [`WireError::Io`] if the stream ends inside the VarInt
pub fn read_var_int_from<R: Read>(reader: &mut R) -> Result<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    for position in 0..MAX_VAR_INT_LEN {
        let mut byte = [0u8; 1];
        if let Err(e) = reader.read_exact(&mut byte) {
            if position == 0 && e.kind() == ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(WireError::Io(e));
        }
        value |= ((byte[0] & 0x7F) as u32) << (7 * position);
        if byte[0] & 0x80 == 0 {
            return Ok(Some((value as i32, position + 1)));
        }
    }
    Err(WireError::VarIntTooLong {
        max_bytes: MAX_VAR_INT_LEN,
    })
}

/// Write a VarInt directly to a byte stream
pub fn write_var_int_to<W: Write>(writer: &mut W, value: i32) -> Result<usize> {
    let (bytes, len) = encode_var_int(value);
    writer.write_all(&bytes[..len])?;
    Ok(len)
}

impl Buffer {
    /// Read a VarInt at the read cursor
    pub fn read_var_int(&mut self) -> Result<i32> {
        let mut value: u32 = 0;
        for position in 0..MAX_VAR_INT_LEN {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u32) << (7 * position);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(WireError::VarIntTooLong {
            max_bytes: MAX_VAR_INT_LEN,
        })
    }

    /// Write a VarInt at the write cursor, returning its encoded size
    pub fn write_var_int(&mut self, value: i32) -> Result<usize> {
        let (bytes, len) = encode_var_int(value);
        self.write_bytes(&bytes[..len])?;
        Ok(len)
    }

    /// Read a VarLong at the read cursor
    pub fn read_var_long(&mut self) -> Result<i64> {
        let mut value: u64 = 0;
        for position in 0..MAX_VAR_LONG_LEN {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u64) << (7 * position);
            if byte & 0x80 == 0 {
                return Ok(value as i64);
            }
        }
        Err(WireError::VarIntTooLong {
            max_bytes: MAX_VAR_LONG_LEN,
        })
    }

    /// Write a VarLong at the write cursor, returning its encoded size
    pub fn write_var_long(&mut self, value: i64) -> Result<usize> {
        let (bytes, len) = encode_var_long(value);
        self.write_bytes(&bytes[..len])?;
        Ok(len)
    }

    /// Read a VarInt-prefixed UTF-8 string of at most [`MAX_STRING_LEN`] characters
    pub fn read_string(&mut self) -> Result<String> {
        self.read_string_max(MAX_STRING_LEN)
    }

    /// Read a VarInt-prefixed UTF-8 string of at most `max_chars` characters
    ///
    /// # Errors
    /// Fails on negative lengths, byte lengths above `4 * max_chars`, invalid
    /// UTF-8 and decoded strings longer than `max_chars`.
    pub fn read_string_max(&mut self, max_chars: usize) -> Result<String> {
        let len = self.read_var_int()?;
        if len < 0 {
            return Err(WireError::InvalidData(format!("Negative string length: {}", len)));
        }
        let len = len as usize;
        if len > max_chars.saturating_mul(4) {
            return Err(WireError::InvalidData(format!(
                "String of {} bytes exceeds limit of {} characters",
                len, max_chars
            )));
        }

        let bytes = self.read_bytes(len)?;
        let value = std::str::from_utf8(bytes)
            .map_err(|e| WireError::InvalidData(format!("Invalid UTF-8: {}", e)))?
            .to_string();
        if value.chars().count() > max_chars {
            return Err(WireError::InvalidData(format!(
                "String exceeds limit of {} characters",
                max_chars
            )));
        }
        Ok(value)
    }

    /// Write a VarInt-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_var_int(value.len() as i32)?;
        self.write_bytes(value.as_bytes())
    }

    /// Write a string the peer reads with a `max_chars` limit
    ///
    /// # Errors
    /// [`WireError::InvalidData`] before anything is written if `value` has
    /// more than `max_chars` characters.
    pub fn write_string_max(&mut self, value: &str, max_chars: usize) -> Result<()> {
        if value.chars().count() > max_chars {
            return Err(WireError::InvalidData(format!(
                "String exceeds limit of {} characters",
                max_chars
            )));
        }
        self.write_string(value)
    }

    /// Read a VarInt-prefixed byte array
    pub fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let len = self.read_var_int()?;
        if len < 0 {
            return Err(WireError::InvalidData(format!("Negative array length: {}", len)));
        }
        Ok(self.read_bytes(len as usize)?.to_vec())
    }

    /// Write a VarInt-prefixed byte array
    pub fn write_byte_array(&mut self, value: &[u8]) -> Result<()> {
        self.write_var_int(value.len() as i32)?;
        self.write_bytes(value)
    }

    /// Read a UUID as two big-endian 64-bit words (most, then least significant)
    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let most = self.read_u64()?;
        let least = self.read_u64()?;
        Ok(Uuid::from_u64_pair(most, least))
    }

    /// Write a UUID as two big-endian 64-bit words
    pub fn write_uuid(&mut self, value: &Uuid) -> Result<()> {
        let (most, least) = value.as_u64_pair();
        self.write_u64(most)?;
        self.write_u64(least)
    }
}
