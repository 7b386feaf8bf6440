//! Configuration phase payloads

use crate::buffer::Buffer;
use crate::mapping::Packet;
use botwire_core::Result;

/// The server is done configuring the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinishConfiguration;

impl Packet for FinishConfiguration {
    fn encode(&self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self> {
        Ok(FinishConfiguration)
    }
}

/// Client confirmation; both sides enter PLAY afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinishConfigurationAck;

impl Packet for FinishConfigurationAck {
    fn encode(&self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn decode(_buf: &mut Buffer) -> Result<Self> {
        Ok(FinishConfigurationAck)
    }
}

/// Liveness check the client must echo with [`ConfigurationPong`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationPing {
    pub id: i32,
}

impl Packet for ConfigurationPing {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_i32(self.id)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self { id: buf.read_i32()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationPong {
    pub id: i32,
}

impl Packet for ConfigurationPong {
    fn encode(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_i32(self.id)
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self { id: buf.read_i32()? })
    }
}
