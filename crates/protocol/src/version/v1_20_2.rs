//! Protocol 764 (1.20.2)
//!
//! Login is acknowledged by the client and followed by a CONFIGURATION phase.
//! Keep-alive ids are longs, UUIDs are binary and chat from the server
//! arrives as unsigned system chat.

use super::v1_8::{decode_encryption_request, encode_encryption_request};
use super::VersionAdapter;
use crate::buffer::Buffer;
use crate::mapping::PacketDescriptor;
use crate::packets::*;
use crate::protocol::Protocol;
use botwire_core::{Phase, Result, WireError};

/// Upper bound on profile properties in a login success
const MAX_PROPERTIES: i32 = 16;

pub struct V1_20_2;

impl VersionAdapter for V1_20_2 {
    fn protocol_version(&self) -> i32 {
        764
    }

    fn name(&self) -> &'static str {
        "1.20.2"
    }

    fn register(&self, protocol: &mut Protocol) -> Result<()> {
        // LOGIN
        protocol.register(PacketDescriptor::packet::<Disconnect>(0x00, Phase::LOGIN, "LoginDisconnect").build())?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x01,
                Phase::LOGIN,
                "EncryptionRequest",
                encode_encryption_request,
                decode_encryption_request,
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::with_codec(0x02, Phase::LOGIN, "LoginSuccess", encode_login_success, decode_login_success)
                .build(),
        )?;
        protocol.register(PacketDescriptor::packet::<SetCompression>(0x03, Phase::LOGIN, "LoginCompression").build())?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x00,
                Phase::LOGIN,
                "ServerboundLoginStart",
                encode_login_start,
                decode_login_start,
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<EncryptionResponse>(0x01, Phase::LOGIN, "ServerboundEncryptionResponse").build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<LoginAcknowledged>(0x03, Phase::LOGIN, "ServerboundLoginAcknowledged").build(),
        )?;

        // CONFIGURATION
        protocol.register(
            PacketDescriptor::packet::<Disconnect>(0x01, Phase::CONFIGURATION, "ConfigurationDisconnect").build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<FinishConfiguration>(0x02, Phase::CONFIGURATION, "FinishConfiguration").build(),
        )?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x03,
                Phase::CONFIGURATION,
                "ConfigurationKeepAlive",
                encode_clientbound_keep_alive,
                decode_clientbound_keep_alive,
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<ConfigurationPing>(0x04, Phase::CONFIGURATION, "ConfigurationPing").build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<FinishConfigurationAck>(
                0x02,
                Phase::CONFIGURATION,
                "ServerboundFinishConfiguration",
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x03,
                Phase::CONFIGURATION,
                "ServerboundConfigurationKeepAlive",
                encode_serverbound_keep_alive,
                decode_serverbound_keep_alive,
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<ConfigurationPong>(0x04, Phase::CONFIGURATION, "ServerboundConfigurationPong")
                .build(),
        )?;

        // PLAY
        protocol.register(PacketDescriptor::packet::<Disconnect>(0x1B, Phase::PLAY, "Disconnect").build())?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x24,
                Phase::PLAY,
                "KeepAlive",
                encode_clientbound_keep_alive,
                decode_clientbound_keep_alive,
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<SystemChatMessage>(0x67, Phase::PLAY, "SystemChat")
                .implements::<dyn ChatMessage>(|p| p)
                .build(),
        )?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x14,
                Phase::PLAY,
                "ServerboundKeepAlive",
                encode_serverbound_keep_alive,
                decode_serverbound_keep_alive,
            )
            .build(),
        )?;
        Ok(())
    }
}

fn encode_login_success(packet: &LoginSuccess, buf: &mut Buffer) -> Result<()> {
    buf.write_uuid(&packet.uuid)?;
    buf.write_string_max(&packet.username, MAX_USERNAME_LEN)?;
    buf.write_var_int(packet.properties.len() as i32)?;
    for property in &packet.properties {
        property.write(buf)?;
    }
    Ok(())
}

fn decode_login_success(buf: &mut Buffer) -> Result<LoginSuccess> {
    let uuid = buf.read_uuid()?;
    let username = buf.read_string_max(MAX_USERNAME_LEN)?;
    let count = buf.read_var_int()?;
    if !(0..=MAX_PROPERTIES).contains(&count) {
        return Err(WireError::InvalidData(format!(
            "Login success carries {} properties",
            count
        )));
    }
    let properties = (0..count)
        .map(|_| ProfileProperty::read(buf))
        .collect::<Result<Vec<_>>>()?;
    Ok(LoginSuccess {
        uuid,
        username,
        properties,
    })
}

/// A missing profile id is sent as the nil UUID
fn encode_login_start(packet: &LoginStart, buf: &mut Buffer) -> Result<()> {
    buf.write_string_max(&packet.username, MAX_USERNAME_LEN)?;
    buf.write_uuid(&packet.uuid.unwrap_or_default())
}

fn decode_login_start(buf: &mut Buffer) -> Result<LoginStart> {
    Ok(LoginStart {
        username: buf.read_string_max(MAX_USERNAME_LEN)?,
        uuid: Some(buf.read_uuid()?),
    })
}

fn encode_clientbound_keep_alive(packet: &ClientboundKeepAlive, buf: &mut Buffer) -> Result<()> {
    buf.write_i64(packet.id)
}

fn decode_clientbound_keep_alive(buf: &mut Buffer) -> Result<ClientboundKeepAlive> {
    Ok(ClientboundKeepAlive { id: buf.read_i64()? })
}

fn encode_serverbound_keep_alive(packet: &ServerboundKeepAlive, buf: &mut Buffer) -> Result<()> {
    buf.write_i64(packet.id)
}

fn decode_serverbound_keep_alive(buf: &mut Buffer) -> Result<ServerboundKeepAlive> {
    Ok(ServerboundKeepAlive { id: buf.read_i64()? })
}
