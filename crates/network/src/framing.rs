//! Frame layer
//!
//! ```text
//! varint  frame_length          counts every byte after itself
//! varint  data_length           only while compression is enabled;
//!                               0 = body sent raw
//! bytes   body                  packet id + payload, zlib deflated when
//!                               data_length > 0
//! ```
//!
//! Encryption, when enabled, wraps the whole stream and is handled by the
//! reader and writer passed in.

use botwire_core::{Result, WireError};
use botwire_protocol::codecs::{encode_var_int, read_var_int_from, var_int_len};
use botwire_protocol::{Buffer, CompressionState};
use parking_lot::Mutex;
use std::io::{Read, Write};

/// Write one frame around `body`
///
/// # Arguments
/// * `body` - encoded packet id and payload
/// * `scratch` - reused deflate output
///
/// # Returns
/// Number of bytes written, headers included
pub fn write_frame<W: Write>(
    writer: &mut W,
    body: &[u8],
    compression: &mut CompressionState,
    scratch: &mut Vec<u8>,
) -> Result<usize> {
    let written = if !compression.is_enabled() {
        write_header(writer, body.len())?;
        writer.write_all(body)?;
        var_int_len(body.len() as i32) + body.len()
    } else if !compression.should_compress(body.len()) {
        write_header(writer, body.len() + 1)?;
        writer.write_all(&[0])?;
        writer.write_all(body)?;
        var_int_len(body.len() as i32 + 1) + 1 + body.len()
    } else {
        compression.deflate(body, scratch)?;
        let data_len = body.len() as i32;
        let frame_len = scratch.len() + var_int_len(data_len);
        write_header(writer, frame_len)?;
        write_header(writer, body.len())?;
        writer.write_all(scratch)?;
        var_int_len(frame_len as i32) + frame_len
    };
    Ok(written)
}

fn write_header<W: Write>(writer: &mut W, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| WireError::Protocol(format!("Frame of {} bytes is too large", len)))?;
    let (bytes, n) = encode_var_int(len);
    writer.write_all(&bytes[..n])?;
    Ok(())
}

/// Read one frame into `out`, leaving the body between its cursors
///
/// The compression lock is only taken to check the threshold and to
/// inflate, never while blocked on the reader.
///
/// # Returns
/// `Ok(None)` on a clean end of stream before the first header byte,
/// otherwise the number of bytes consumed from the reader
///
/// # Errors
/// - [`WireError::Protocol`] for a frame length outside `1..=max_frame`
/// - [`WireError::Compression`] for a corrupt or mis-sized deflate stream
pub fn read_frame<R: Read>(
    reader: &mut R,
    compression: &Mutex<CompressionState>,
    max_frame: usize,
    out: &mut Buffer,
    scratch: &mut Vec<u8>,
) -> Result<Option<usize>> {
    let Some((frame_len, header_len)) = read_var_int_from(reader)? else {
        return Ok(None);
    };
    if frame_len <= 0 || frame_len as usize > max_frame {
        return Err(WireError::Protocol(format!(
            "Frame length {} outside 1..={}",
            frame_len, max_frame
        )));
    }
    let frame_len = frame_len as usize;
    out.reset();

    if !compression.lock().is_enabled() {
        out.fill_from(reader, frame_len)?;
        return Ok(Some(header_len + frame_len));
    }

    let (data_len, data_header_len) = read_var_int_from(reader)?
        .ok_or_else(|| WireError::Protocol("Stream ended inside a frame header".to_string()))?;
    if data_header_len >= frame_len {
        return Err(WireError::Protocol(format!(
            "Frame of {} bytes has no body",
            frame_len
        )));
    }
    let body_len = frame_len - data_header_len;

    if data_len == 0 {
        out.fill_from(reader, body_len)?;
    } else {
        if data_len < 0 || data_len as usize > max_frame {
            return Err(WireError::Protocol(format!(
                "Decompressed length {} outside 1..={}",
                data_len, max_frame
            )));
        }
        scratch.resize(body_len, 0);
        reader.read_exact(scratch)?;
        compression.lock().inflate(scratch, data_len as usize, out)?;
    }
    Ok(Some(header_len + frame_len))
}
