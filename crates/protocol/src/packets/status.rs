//! Status phase payloads and the server list response
//!
//! The response carries a JSON document. [`ServerStatus`] is its typed form;
//! unknown fields are ignored so that newer servers still parse.

use super::flatten_text;
use crate::buffer::Buffer;
use crate::mapping::Packet;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use botwire_core::{Result, WireError};
use serde::{Deserialize, Serialize};

const FAVICON_PREFIX: &str = "data:image/png;base64,";

/// Ask the server for its status document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRequest;

impl Packet for StatusRequest {
    fn encode(&self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self> {
        Ok(StatusRequest)
    }
}

/// Raw JSON status document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub json: String,
}

impl StatusResponse {
    /// Parse the document
    pub fn status(&self) -> Result<ServerStatus> {
        ServerStatus::parse(&self.json)
    }
}

impl Packet for StatusResponse {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_string(&self.json)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            json: buf.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRequest {
    pub payload: i64,
}

impl Packet for PingRequest {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_i64(self.payload)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            payload: buf.read_i64()?,
        })
    }
}

/// Echo of a [`PingRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongResponse {
    pub payload: i64,
}

impl Packet for PongResponse {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_i64(self.payload)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            payload: buf.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPlayers {
    pub max: i32,
    pub online: i32,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

/// Typed server list document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub version: Option<StatusVersion>,
    #[serde(default)]
    pub players: Option<StatusPlayers>,
    /// Text component, either a string or an object
    #[serde(default)]
    pub description: serde_json::Value,
    /// `data:image/png;base64,...` URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, rename = "enforcesSecureChat", skip_serializing_if = "Option::is_none")]
    pub enforces_secure_chat: Option<bool>,
}

impl ServerStatus {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| WireError::InvalidData(format!("Invalid status document: {}", e)))
    }

    /// The message of the day without formatting
    pub fn description_text(&self) -> String {
        flatten_text(&self.description)
    }

    /// Decoded PNG bytes of the favicon, if the server sent one
    ///
    /// # Errors
    /// [`WireError::InvalidData`] if the favicon is not a base64 PNG data URI.
    pub fn favicon_png(&self) -> Result<Option<Vec<u8>>> {
        let Some(favicon) = &self.favicon else {
            return Ok(None);
        };
        let encoded = favicon.strip_prefix(FAVICON_PREFIX).ok_or_else(|| {
            WireError::InvalidData("Favicon is not a PNG data URI".to_string())
        })?;
        // some servers wrap the payload like a MIME body
        let encoded: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| WireError::InvalidData(format!("Invalid favicon encoding: {}", e)))
    }
}
