//! Handshake phase payloads

use crate::buffer::Buffer;
use crate::mapping::Packet;
use botwire_core::{Phase, Result, WireError};

/// Longest server address accepted in a handshake
pub const MAX_ADDRESS_LEN: usize = 255;

/// Phase the client asks to enter after the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Status = 1,
    Login = 2,
}

impl Intent {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Intent::Status),
            2 => Some(Intent::Login),
            _ => None,
        }
    }

    /// The phase both sides switch to once the handshake is sent
    pub fn phase(&self) -> Phase {
        match self {
            Intent::Status => Phase::STATUS,
            Intent::Login => Phase::LOGIN,
        }
    }
}

/// First packet of every connection
///
/// # Wire Format
/// ```text
/// varint  protocol_version
/// string  address            (at most 255 characters)
/// u16     port
/// varint  intent
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub address: String,
    pub port: u16,
    pub intent: Intent,
}

impl Handshake {
    pub fn new(protocol_version: i32, address: impl Into<String>, port: u16, intent: Intent) -> Self {
        Self {
            protocol_version,
            address: address.into(),
            port,
            intent,
        }
    }
}

impl Packet for Handshake {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        if self.address.chars().count() > MAX_ADDRESS_LEN {
            return Err(WireError::InvalidData(format!(
                "Handshake address exceeds {} characters",
                MAX_ADDRESS_LEN
            )));
        }
        buf.write_var_int(self.protocol_version)?;
        buf.write_string(&self.address)?;
        buf.write_u16(self.port)?;
        buf.write_var_int(self.intent as i32)?;
        Ok(())
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        let protocol_version = buf.read_var_int()?;
        let address = buf.read_string_max(MAX_ADDRESS_LEN)?;
        let port = buf.read_u16()?;
        let raw = buf.read_var_int()?;
        let intent = Intent::from_i32(raw)
            .ok_or_else(|| WireError::InvalidData(format!("Unknown handshake intent: {}", raw)))?;
        Ok(Self {
            protocol_version,
            address,
            port,
            intent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_body_bytes() {
        let handshake = Handshake::new(47, "localhost", 25565, Intent::Login);
        let mut buf = Buffer::allocate(32);
        handshake.encode(&mut buf).unwrap();

        let mut expected = vec![0x2F, 0x09];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&[0x63, 0xDD, 0x02]);
        assert_eq!(buf.readable_bytes(), &expected[..]);

        assert_eq!(Handshake::decode(&mut buf).unwrap(), handshake);
    }

    #[test]
    fn test_unknown_intent() {
        let mut buf = Buffer::allocate(16);
        buf.write_var_int(47).unwrap();
        buf.write_string("a").unwrap();
        buf.write_u16(1).unwrap();
        buf.write_var_int(9).unwrap();
        assert!(Handshake::decode(&mut buf).is_err());
    }

    #[test]
    fn test_address_limit() {
        let handshake = Handshake::new(47, "x".repeat(256), 1, Intent::Status);
        assert!(handshake.encode(&mut Buffer::allocate(16)).is_err());
    }
}
