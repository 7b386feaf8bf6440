//! Byte-stream views of [`Buffer`]
//!
//! External codecs (JSON, NBT, text components) only see a byte source or
//! sink. Reading consumes from the read cursor; writing appends at the write
//! cursor and grows the buffer like any other write.

use crate::buffer::Buffer;
use botwire_core::WireError;
use std::io;

impl io::Read for Buffer {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let len = dst.len().min(self.readable());
        self.read_into(&mut dst[..len]).map_err(into_io)?;
        Ok(len)
    }
}

impl io::Write for Buffer {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.write_bytes(src).map_err(into_io)?;
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl bytes::Buf for Buffer {
    fn remaining(&self) -> usize {
        self.readable()
    }

    fn chunk(&self) -> &[u8] {
        self.readable_bytes()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.readable(),
            "cannot advance past the write cursor: {} > {}",
            cnt,
            self.readable()
        );
        let index = self.read_index() + cnt;
        // bounded by the assertion above
        let _ = self.set_read_index(index);
    }
}

fn into_io(error: WireError) -> io::Error {
    match error {
        WireError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
