//! Login phase payloads
//!
//! [`LoginStart`], [`EncryptionRequest`] and [`LoginSuccess`] are shapes
//! shared between versions: their wire functions live in the version modules.
//! The rest own their wire format.

use super::flatten_text;
use crate::buffer::Buffer;
use crate::mapping::Packet;
use botwire_core::Result;
use uuid::Uuid;

/// Longest username a server accepts
pub const MAX_USERNAME_LEN: usize = 16;

/// Client introduction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub username: String,
    /// Profile id, sent by versions that carry one
    pub uuid: Option<Uuid>,
}

impl LoginStart {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            uuid: None,
        }
    }
}

/// Key exchange request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    /// Empty on modern servers
    pub server_id: String,
    /// X.509 SubjectPublicKeyInfo, DER encoded
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
    /// Whether the client must contact the session service
    pub should_authenticate: bool,
}

/// Key exchange answer, both fields RSA encrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Vec<u8>,
    pub verify_token: Vec<u8>,
}

impl Packet for EncryptionResponse {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_byte_array(&self.shared_secret)?;
        buf.write_byte_array(&self.verify_token)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            shared_secret: buf.read_byte_array()?,
            verify_token: buf.read_byte_array()?,
        })
    }
}

/// One signed profile property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

impl ProfileProperty {
    pub(crate) fn write(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_string(&self.name)?;
        buf.write_string(&self.value)?;
        buf.write_bool(self.signature.is_some())?;
        if let Some(signature) = &self.signature {
            buf.write_string(signature)?;
        }
        Ok(())
    }

    pub(crate) fn read(buf: &mut Buffer) -> Result<Self> {
        let name = buf.read_string()?;
        let value = buf.read_string()?;
        let signature = if buf.read_bool()? {
            Some(buf.read_string()?)
        } else {
            None
        };
        Ok(Self {
            name,
            value,
            signature,
        })
    }
}

/// The server accepted the login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub uuid: Uuid,
    pub username: String,
    pub properties: Vec<ProfileProperty>,
}

/// Enable compression for every following packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCompression {
    /// Minimum encoded size to compress; negative disables compression
    pub threshold: i32,
}

impl Packet for SetCompression {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_var_int(self.threshold).map(|_| ())
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            threshold: buf.read_var_int()?,
        })
    }
}

/// Client confirmation of [`LoginSuccess`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoginAcknowledged;

impl Packet for LoginAcknowledged {
    fn encode(&self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self> {
        Ok(LoginAcknowledged)
    }
}

/// The server closes the connection with a JSON text reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    /// The reason without formatting
    ///
    /// Falls back to the raw string if it is not valid JSON.
    pub fn reason_text(&self) -> String {
        match serde_json::from_str::<serde_json::Value>(&self.reason) {
            Ok(value) => flatten_text(&value),
            Err(_) => self.reason.clone(),
        }
    }
}

impl Packet for Disconnect {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_string(&self.reason)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            reason: buf.read_string()?,
        })
    }
}
