//! AES-128/CFB8 stream cipher wrappers
//!
//! After the key exchange both directions are encrypted with AES-128 in
//! 8-bit cipher feedback mode; the shared secret is both key and IV. CFB8
//! works one byte at a time, so the wrappers can sit directly on the socket
//! streams and encrypt or decrypt exactly the bytes that pass through them.
//!
//! Until a cipher is installed the wrappers pass bytes through unchanged.

use botwire_core::{Result, WireError};
use cfb8::cipher::generic_array::GenericArray;
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::io::{self, Read, Write};

pub type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
pub type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Length of the shared secret
pub const SECRET_LEN: usize = 16;

/// Build the cipher pair for a shared secret
///
/// # Errors
/// [`WireError::Encryption`] if the secret is not 16 bytes long.
pub fn cipher_pair(secret: &[u8]) -> Result<(Aes128Cfb8Enc, Aes128Cfb8Dec)> {
    let enc = Aes128Cfb8Enc::new_from_slices(secret, secret)
        .map_err(|_| WireError::Encryption(format!("Shared secret must be {} bytes", SECRET_LEN)))?;
    let dec = Aes128Cfb8Dec::new_from_slices(secret, secret)
        .map_err(|_| WireError::Encryption(format!("Shared secret must be {} bytes", SECRET_LEN)))?;
    Ok((enc, dec))
}

/// Encrypt a byte slice in place
pub fn encrypt_in_place(cipher: &mut Aes128Cfb8Enc, data: &mut [u8]) {
    for byte in data.iter_mut() {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
    }
}

/// Decrypt a byte slice in place
pub fn decrypt_in_place(cipher: &mut Aes128Cfb8Dec, data: &mut [u8]) {
    for byte in data.iter_mut() {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
    }
}

/// Writer that encrypts everything written once a cipher is installed
pub struct EncryptingWriter<W> {
    inner: W,
    cipher: Option<Aes128Cfb8Enc>,
    scratch: Vec<u8>,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            cipher: None,
            scratch: Vec::new(),
        }
    }

    /// Encrypt every byte written from now on
    pub fn enable(&mut self, cipher: Aes128Cfb8Enc) {
        self.cipher = Some(cipher);
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.cipher {
            None => self.inner.write(buf),
            Some(cipher) => {
                // the cipher state advances per byte, so the whole slice must land
                self.scratch.clear();
                self.scratch.extend_from_slice(buf);
                encrypt_in_place(cipher, &mut self.scratch);
                self.inner.write_all(&self.scratch)?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that decrypts everything read once a cipher is installed
pub struct DecryptingReader<R> {
    inner: R,
    cipher: Option<Aes128Cfb8Dec>,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, cipher: None }
    }

    /// Decrypt every byte read from now on
    pub fn enable(&mut self, cipher: Aes128Cfb8Dec) {
        self.cipher = Some(cipher);
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(cipher) = &mut self.cipher {
            decrypt_in_place(cipher, &mut buf[..n]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SECRET: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn test_secret_length() {
        assert!(cipher_pair(&SECRET).is_ok());
        assert!(matches!(cipher_pair(&SECRET[..15]), Err(WireError::Encryption(_))));
    }

    #[test]
    fn test_stream_roundtrip_across_writes() {
        let (enc, dec) = cipher_pair(&SECRET).unwrap();

        let mut writer = EncryptingWriter::new(Vec::new());
        writer.write_all(b"plain ").unwrap();
        writer.enable(enc);
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        let wire = writer.get_ref().clone();

        assert_eq!(&wire[..6], b"plain ");
        assert_ne!(&wire[6..], b"hello world");

        let mut reader = DecryptingReader::new(Cursor::new(wire));
        let mut plain = [0u8; 6];
        reader.read_exact(&mut plain).unwrap();
        assert_eq!(&plain, b"plain ");

        reader.enable(dec);
        let mut rest = Vec::new();
        // small reads keep the feedback register in step
        let mut chunk = [0u8; 3];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            rest.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(rest, b"hello world");
    }

    #[test]
    fn test_in_place_matches_stream() {
        let (mut enc, _) = cipher_pair(&SECRET).unwrap();
        let mut whole = b"sixteen byte msg".to_vec();
        encrypt_in_place(&mut enc, &mut whole);

        let (enc, _) = cipher_pair(&SECRET).unwrap();
        let mut writer = EncryptingWriter::new(Vec::new());
        writer.enable(enc);
        for byte in b"sixteen byte msg" {
            writer.write_all(&[*byte]).unwrap();
        }
        assert_eq!(writer.get_ref(), &whole);
    }
}
