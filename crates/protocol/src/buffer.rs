//! # Growable Packet Buffer
//!
//! A byte region with independent read and write cursors, used for every
//! packet that crosses the wire.
//!
//! ## Layout
//!
//! ```text
//! 0 <= read_index <= write_index <= capacity
//! |---- consumed ----|---- readable ----|---- writable ----|
//! ```
//!
//! ## Ownership
//!
//! A buffer is owned by exactly one thread at a time. Its storage is released
//! by [`Buffer::free`] (idempotent) or when the buffer is dropped.
//!
//! ## Byte Order
//!
//! Primitives are big-endian (network order). Every primitive also has an
//! `_le` variant with reversed byte order, for the protocol versions that
//! encode selected numeric fields little-endian.
//!
//! ## Bounds
//!
//! Absolute accesses (`get_*`/`set_*`) must keep their last byte inside the
//! capacity. Cursor reads (`read_*`) must keep their last byte below the
//! write cursor. Cursor writes past the capacity reallocate, unless the
//! buffer was allocated with [`Buffer::allocate_fixed`].

use botwire_core::{Result, WireError};
use bytes::BytesMut;
use std::fmt;
use std::io::Read;

/// Growable byte buffer with read/write cursors
pub struct Buffer {
    /// Backing storage; `storage.len()` is the capacity
    storage: BytesMut,
    read_index: usize,
    write_index: usize,
    fixed: bool,
    freed: bool,
}

macro_rules! primitive_accessors {
    ($($ty:ty => $get:ident, $set:ident, $read:ident, $write:ident,
        $get_le:ident, $set_le:ident, $read_le:ident, $write_le:ident;)*) => {
        $(
            #[doc = concat!("Get a big-endian `", stringify!($ty), "` at an absolute offset")]
            #[inline]
            pub fn $get(&self, offset: usize) -> Result<$ty> {
                Ok(<$ty>::from_be_bytes(self.array_at(offset)?))
            }

            #[doc = concat!("Set a big-endian `", stringify!($ty), "` at an absolute offset")]
            #[inline]
            pub fn $set(&mut self, offset: usize, value: $ty) -> Result<()> {
                self.put_array(offset, value.to_be_bytes())
            }

            #[doc = concat!("Read a big-endian `", stringify!($ty), "` at the read cursor")]
            #[inline]
            pub fn $read(&mut self) -> Result<$ty> {
                Ok(<$ty>::from_be_bytes(self.read_array()?))
            }

            #[doc = concat!("Write a big-endian `", stringify!($ty), "` at the write cursor")]
            #[inline]
            pub fn $write(&mut self, value: $ty) -> Result<()> {
                self.write_array(value.to_be_bytes())
            }

            #[doc = concat!("Get a reversed (little-endian) `", stringify!($ty), "`")]
            #[inline]
            pub fn $get_le(&self, offset: usize) -> Result<$ty> {
                Ok(<$ty>::from_le_bytes(self.array_at(offset)?))
            }

            #[doc = concat!("Set a reversed (little-endian) `", stringify!($ty), "`")]
            #[inline]
            pub fn $set_le(&mut self, offset: usize, value: $ty) -> Result<()> {
                self.put_array(offset, value.to_le_bytes())
            }

            #[doc = concat!("Read a reversed (little-endian) `", stringify!($ty), "`")]
            #[inline]
            pub fn $read_le(&mut self) -> Result<$ty> {
                Ok(<$ty>::from_le_bytes(self.read_array()?))
            }

            #[doc = concat!("Write a reversed (little-endian) `", stringify!($ty), "`")]
            #[inline]
            pub fn $write_le(&mut self, value: $ty) -> Result<()> {
                self.write_array(value.to_le_bytes())
            }
        )*
    };
}

impl Buffer {
    /// Allocate a growable buffer with the given initial capacity
    pub fn allocate(capacity: usize) -> Self {
        Self {
            storage: BytesMut::zeroed(capacity),
            read_index: 0,
            write_index: 0,
            fixed: false,
            freed: false,
        }
    }

    /// Allocate a buffer that must never reallocate
    ///
    /// Writes beyond the capacity fail with [`WireError::FixedCapacity`].
    pub fn allocate_fixed(capacity: usize) -> Self {
        Self {
            fixed: true,
            ..Self::allocate(capacity)
        }
    }

    /// Build a buffer whose readable region is a copy of `bytes`
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::allocate(bytes.len());
        buffer.storage[..bytes.len()].copy_from_slice(bytes);
        buffer.write_index = bytes.len();
        buffer
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    #[inline]
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Number of bytes between the read and write cursors
    #[inline]
    pub fn readable(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Number of bytes that can be written without reallocating
    #[inline]
    pub fn writable(&self) -> usize {
        self.capacity() - self.write_index
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    #[inline]
    pub fn is_freed(&self) -> bool {
        self.freed
    }

    /// Move the read cursor to an absolute position
    pub fn set_read_index(&mut self, index: usize) -> Result<()> {
        if index > self.write_index {
            return Err(WireError::OutOfBounds {
                offset: index,
                len: 0,
                limit: self.write_index,
            });
        }
        self.read_index = index;
        Ok(())
    }

    /// Move the write cursor to an absolute position
    pub fn set_write_index(&mut self, index: usize) -> Result<()> {
        if index < self.read_index || index > self.capacity() {
            return Err(WireError::OutOfBounds {
                offset: index,
                len: 0,
                limit: self.capacity(),
            });
        }
        self.write_index = index;
        Ok(())
    }

    /// Grow the storage so that it holds at least `target` bytes
    ///
    /// # Growth
    /// The new capacity is `max(target, target * 1.5)`. All bytes of the old
    /// region are copied and the old region is released.
    ///
    /// # Errors
    /// - [`WireError::FixedCapacity`] for fixed buffers
    /// - [`WireError::BufferFreed`] after [`Buffer::free`]
    pub fn reallocate(&mut self, target: usize) -> Result<()> {
        if self.freed {
            return Err(WireError::BufferFreed);
        }
        if self.fixed {
            return Err(WireError::FixedCapacity {
                capacity: self.capacity(),
                requested: target,
            });
        }
        if target <= self.capacity() {
            return Ok(());
        }

        let new_capacity = target.max(target.saturating_add(target / 2));
        let mut storage = BytesMut::zeroed(new_capacity);
        storage[..self.storage.len()].copy_from_slice(&self.storage);

        tracing::trace!("Buffer grew {} -> {} bytes", self.capacity(), new_capacity);
        self.storage = storage;
        Ok(())
    }

    /// Make room for `len` more bytes at the write cursor
    #[inline]
    pub fn ensure_writable(&mut self, len: usize) -> Result<()> {
        if self.freed {
            return Err(WireError::BufferFreed);
        }
        let end = self.write_index.checked_add(len).ok_or(WireError::OutOfBounds {
            offset: self.write_index,
            len,
            limit: usize::MAX,
        })?;
        if end > self.capacity() {
            self.reallocate(end)?;
        }
        Ok(())
    }

    /// Release the storage
    ///
    /// Calling this more than once is a no-op. Any later access fails with
    /// [`WireError::BufferFreed`].
    pub fn free(&mut self) {
        if self.freed {
            return;
        }
        self.storage = BytesMut::new();
        self.read_index = 0;
        self.write_index = 0;
        self.freed = true;
    }

    /// Move both cursors back to zero; the capacity is kept
    #[inline]
    pub fn reset(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }

    #[inline]
    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        if self.freed {
            return Err(WireError::BufferFreed);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(WireError::OutOfBounds {
                offset,
                len,
                limit: self.capacity(),
            }),
        }
    }

    #[inline]
    fn check_readable(&self, len: usize) -> Result<()> {
        if self.freed {
            return Err(WireError::BufferFreed);
        }
        if len > self.readable() {
            return Err(WireError::OutOfBounds {
                offset: self.read_index,
                len,
                limit: self.write_index,
            });
        }
        Ok(())
    }

    #[inline]
    fn array_at<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        self.check_bounds(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.storage[offset..offset + N]);
        Ok(out)
    }

    #[inline]
    fn put_array<const N: usize>(&mut self, offset: usize, bytes: [u8; N]) -> Result<()> {
        self.check_bounds(offset, N)?;
        self.storage[offset..offset + N].copy_from_slice(&bytes);
        Ok(())
    }

    #[inline]
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.check_readable(N)?;
        let out = self.array_at(self.read_index)?;
        self.read_index += N;
        Ok(out)
    }

    #[inline]
    fn write_array<const N: usize>(&mut self, bytes: [u8; N]) -> Result<()> {
        self.ensure_writable(N)?;
        self.put_array(self.write_index, bytes)?;
        self.write_index += N;
        Ok(())
    }

    primitive_accessors! {
        u8 => get_u8, set_u8, read_u8, write_u8, get_u8_le, set_u8_le, read_u8_le, write_u8_le;
        i8 => get_i8, set_i8, read_i8, write_i8, get_i8_le, set_i8_le, read_i8_le, write_i8_le;
        u16 => get_u16, set_u16, read_u16, write_u16, get_u16_le, set_u16_le, read_u16_le, write_u16_le;
        i16 => get_i16, set_i16, read_i16, write_i16, get_i16_le, set_i16_le, read_i16_le, write_i16_le;
        u32 => get_u32, set_u32, read_u32, write_u32, get_u32_le, set_u32_le, read_u32_le, write_u32_le;
        i32 => get_i32, set_i32, read_i32, write_i32, get_i32_le, set_i32_le, read_i32_le, write_i32_le;
        u64 => get_u64, set_u64, read_u64, write_u64, get_u64_le, set_u64_le, read_u64_le, write_u64_le;
        i64 => get_i64, set_i64, read_i64, write_i64, get_i64_le, set_i64_le, read_i64_le, write_i64_le;
        f32 => get_f32, set_f32, read_f32, write_f32, get_f32_le, set_f32_le, read_f32_le, write_f32_le;
        f64 => get_f64, set_f64, read_f64, write_f64, get_f64_le, set_f64_le, read_f64_le, write_f64_le;
    }

    #[inline]
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    /// Copy bytes at an absolute offset into `dst`
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, dst.len())?;
        dst.copy_from_slice(&self.storage[offset..offset + dst.len()]);
        Ok(())
    }

    /// Copy `src` to an absolute offset (never grows the buffer)
    pub fn set_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_bounds(offset, src.len())?;
        self.storage[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Borrow the next `len` readable bytes and advance the read cursor
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        self.check_readable(len)?;
        let start = self.read_index;
        self.read_index += len;
        Ok(&self.storage[start..start + len])
    }

    /// Fill `dst` from the read cursor
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        let src = self.read_bytes(dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Copy everything that is still readable and consume it
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let out = self.readable_bytes().to_vec();
        self.read_index = self.write_index;
        out
    }

    /// Append `src` at the write cursor
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        let start = self.write_index;
        self.storage[start..start + src.len()].copy_from_slice(src);
        self.write_index += src.len();
        Ok(())
    }

    /// Skip `len` readable bytes
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.check_readable(len)?;
        self.read_index += len;
        Ok(())
    }

    /// The bytes between the read and write cursors
    #[inline]
    pub fn readable_bytes(&self) -> &[u8] {
        &self.storage[self.read_index..self.write_index]
    }

    /// Reserve `len` bytes at the write cursor and expose them for writing
    ///
    /// The cursor is not moved; call [`Buffer::advance_write`] with the number
    /// of bytes actually produced.
    pub fn writable_slice(&mut self, len: usize) -> Result<&mut [u8]> {
        self.ensure_writable(len)?;
        let start = self.write_index;
        Ok(&mut self.storage[start..start + len])
    }

    /// Commit `len` bytes written through [`Buffer::writable_slice`]
    pub fn advance_write(&mut self, len: usize) -> Result<()> {
        self.set_write_index(self.write_index + len)
    }

    /// Read exactly `len` bytes from `reader` into the buffer
    pub fn fill_from<R: Read>(&mut self, reader: &mut R, len: usize) -> Result<()> {
        let slice = self.writable_slice(len)?;
        reader.read_exact(slice)?;
        self.write_index += len;
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("read_index", &self.read_index)
            .field("write_index", &self.write_index)
            .field("fixed", &self.fixed)
            .field("freed", &self.freed)
            .finish()
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::allocate(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut buf = Buffer::allocate(4);
        buf.write_i32(-5).unwrap();
        buf.write_u16(0xBEEF).unwrap();
        buf.write_f64(1.5).unwrap();
        buf.write_bool(true).unwrap();

        assert_eq!(buf.read_i32().unwrap(), -5);
        assert_eq!(buf.read_u16().unwrap(), 0xBEEF);
        assert_eq!(buf.read_f64().unwrap(), 1.5);
        assert!(buf.read_bool().unwrap());
        assert_eq!(buf.readable(), 0);
    }

    #[test]
    fn test_reversed_byte_order() {
        let mut buf = Buffer::allocate(8);
        buf.write_u32(0x0102_0304).unwrap();
        buf.write_u32_le(0x0102_0304).unwrap();

        assert_eq!(buf.readable_bytes(), &[1, 2, 3, 4, 4, 3, 2, 1]);
        assert_eq!(buf.get_u32_le(0).unwrap(), 0x0403_0201);
        assert_eq!(buf.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(buf.read_u32_le().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_absolute_access_does_not_move_cursors() {
        let mut buf = Buffer::allocate(16);
        buf.set_i64(8, i64::MIN).unwrap();
        assert_eq!(buf.get_i64(8).unwrap(), i64::MIN);
        assert_eq!(buf.read_index(), 0);
        assert_eq!(buf.write_index(), 0);
    }

    #[test]
    fn test_absolute_bounds() {
        let mut buf = Buffer::allocate(8);
        // last byte at index 7 is inside
        assert!(buf.set_u32(4, 1).is_ok());
        assert!(matches!(buf.get_u32(5), Err(WireError::OutOfBounds { .. })));
        assert!(matches!(buf.set_u8(8, 1), Err(WireError::OutOfBounds { .. })));
        assert!(buf.get_u8(usize::MAX).is_err());
    }

    #[test]
    fn test_boundary_exact_access() {
        // a packet that fills the buffer to the last byte stays readable
        let mut buf = Buffer::allocate_fixed(4);
        buf.write_u32(0xDEAD_BEEF).unwrap();
        assert_eq!(buf.get_u8(3).unwrap(), 0xEF);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);

        assert!(matches!(buf.get_u8(4), Err(WireError::OutOfBounds { offset: 4, len: 1, limit: 4 })));
        assert!(matches!(buf.get_u16(3), Err(WireError::OutOfBounds { .. })));
        assert!(matches!(buf.write_u8(0), Err(WireError::FixedCapacity { .. })));
    }

    #[test]
    fn test_read_past_write_index_fails() {
        let mut buf = Buffer::allocate(32);
        buf.write_u8(1).unwrap();
        assert!(matches!(buf.read_u16(), Err(WireError::OutOfBounds { .. })));
        // failed read leaves the cursor alone
        assert_eq!(buf.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_growth_preserves_content() {
        let mut buf = Buffer::allocate(4);
        let first: Vec<u8> = (0..4).collect();
        buf.write_bytes(&first).unwrap();
        assert_eq!(buf.capacity(), 4);

        let second: Vec<u8> = (4..100).collect();
        buf.write_bytes(&second).unwrap();

        assert_eq!(buf.write_index(), 100);
        assert!(buf.capacity() >= 100);
        let expected: Vec<u8> = (0..100).collect();
        assert_eq!(buf.readable_bytes(), &expected[..]);
    }

    #[test]
    fn test_reallocate_growth_factor() {
        let mut buf = Buffer::allocate(10);
        buf.reallocate(100).unwrap();
        assert_eq!(buf.capacity(), 150);

        // shrinking requests are ignored
        buf.reallocate(20).unwrap();
        assert_eq!(buf.capacity(), 150);
    }

    #[test]
    fn test_fixed_capacity_never_grows() {
        let mut buf = Buffer::allocate_fixed(4);
        buf.write_u32(7).unwrap();
        assert!(matches!(
            buf.write_u8(1),
            Err(WireError::FixedCapacity { capacity: 4, requested: 5 })
        ));
        assert!(buf.reallocate(64).is_err());
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut buf = Buffer::allocate(64);
        buf.write_u8(1).unwrap();
        buf.free();
        buf.free();
        assert!(buf.is_freed());
        assert_eq!(buf.capacity(), 0);
        assert!(matches!(buf.write_u8(1), Err(WireError::BufferFreed)));
        assert!(matches!(buf.get_u8(0), Err(WireError::BufferFreed)));
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut buf = Buffer::allocate(8);
        buf.write_bytes(&[0u8; 40]).unwrap();
        let capacity = buf.capacity();
        buf.reset();
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.readable(), 0);
        assert_eq!(buf.write_index(), 0);
    }

    #[test]
    fn test_writable_slice_and_fill() {
        let mut buf = Buffer::allocate(2);
        let slice = buf.writable_slice(3).unwrap();
        slice.copy_from_slice(b"abc");
        buf.advance_write(3).unwrap();

        let mut src: &[u8] = b"defg";
        buf.fill_from(&mut src, 4).unwrap();
        assert_eq!(buf.readable_bytes(), b"abcdefg");
    }

    #[test]
    fn test_cursor_setters() {
        let mut buf = Buffer::from_slice(b"hello");
        assert!(buf.set_read_index(6).is_err());
        buf.set_read_index(3).unwrap();
        assert_eq!(buf.read_remaining(), b"lo");
        assert!(buf.set_write_index(2).is_err());
    }
}
