//! Protocol 47 (1.8.x)
//!
//! Login goes straight to PLAY. Keep-alive ids are VarInts, the login success
//! UUID is sent as a hyphenated string and chat lines carry a position byte.
//! Chunk section block states are the one little-endian field on this wire.

use super::VersionAdapter;
use crate::buffer::Buffer;
use crate::mapping::PacketDescriptor;
use crate::packets::*;
use crate::protocol::Protocol;
use botwire_core::{Phase, Result, WireError};
use uuid::Uuid;

/// Longest server id string in an encryption request
const MAX_SERVER_ID_LEN: usize = 20;

/// Length of a hyphenated UUID string
const UUID_STRING_LEN: usize = 36;

/// Encoded size of one section's block states
const SECTION_STATE_BYTES: usize = SECTION_BLOCKS * 2;

pub struct V1_8;

impl VersionAdapter for V1_8 {
    fn protocol_version(&self) -> i32 {
        47
    }

    fn name(&self) -> &'static str {
        "1.8"
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

        // PLAY
        protocol.register(
            PacketDescriptor::with_codec(
                0x00,
                Phase::PLAY,
                "KeepAlive",
                encode_clientbound_keep_alive,
                decode_clientbound_keep_alive,
            )
            .build(),
        )?;
        protocol.register(
            PacketDescriptor::packet::<PositionedChatMessage>(0x02, Phase::PLAY, "ChatMessage")
                .implements::<dyn ChatMessage>(|p| p)
                .build(),
        )?;
        protocol.register(
            PacketDescriptor::with_codec(0x21, Phase::PLAY, "ChunkData", encode_chunk_data, decode_chunk_data).build(),
        )?;
        protocol.register(PacketDescriptor::packet::<Disconnect>(0x40, Phase::PLAY, "Disconnect").build())?;
        protocol.register(PacketDescriptor::packet::<SetCompression>(0x46, Phase::PLAY, "SetCompression").build())?;
        protocol.register(
            PacketDescriptor::with_codec(
                0x00,
                Phase::PLAY,
                "ServerboundKeepAlive",
                encode_serverbound_keep_alive,
                decode_serverbound_keep_alive,
            )
            .build(),
        )?;
        protocol.register(PacketDescriptor::packet::<ChatInput>(0x01, Phase::PLAY, "ServerboundChat").build())?;
        Ok(())
    }
}

pub(crate) fn encode_encryption_request(packet: &EncryptionRequest, buf: &mut Buffer) -> Result<()> {
    buf.write_string(&packet.server_id)?;
    buf.write_byte_array(&packet.public_key)?;
    buf.write_byte_array(&packet.verify_token)
}

/// Servers of this era always expect session authentication
pub(crate) fn decode_encryption_request(buf: &mut Buffer) -> Result<EncryptionRequest> {
    Ok(EncryptionRequest {
        server_id: buf.read_string_max(MAX_SERVER_ID_LEN)?,
        public_key: buf.read_byte_array()?,
        verify_token: buf.read_byte_array()?,
        should_authenticate: true,
    })
}

fn encode_login_success(packet: &LoginSuccess, buf: &mut Buffer) -> Result<()> {
    buf.write_string(&packet.uuid.hyphenated().to_string())?;
    buf.write_string_max(&packet.username, MAX_USERNAME_LEN)
}

fn decode_login_success(buf: &mut Buffer) -> Result<LoginSuccess> {
    let raw = buf.read_string_max(UUID_STRING_LEN)?;
    let uuid = Uuid::parse_str(&raw)
        .map_err(|e| WireError::InvalidData(format!("Invalid login UUID {:?}: {}", raw, e)))?;
    Ok(LoginSuccess {
        uuid,
        username: buf.read_string_max(MAX_USERNAME_LEN)?,
        properties: Vec::new(),
    })
}

fn encode_login_start(packet: &LoginStart, buf: &mut Buffer) -> Result<()> {
    buf.write_string_max(&packet.username, MAX_USERNAME_LEN)
}

fn decode_login_start(buf: &mut Buffer) -> Result<LoginStart> {
    Ok(LoginStart::new(buf.read_string_max(MAX_USERNAME_LEN)?))
}

fn encode_clientbound_keep_alive(packet: &ClientboundKeepAlive, buf: &mut Buffer) -> Result<()> {
    buf.write_var_int(packet.id as i32).map(|_| ())
}

fn decode_clientbound_keep_alive(buf: &mut Buffer) -> Result<ClientboundKeepAlive> {
    Ok(ClientboundKeepAlive {
        id: buf.read_var_int()? as i64,
    })
}

fn encode_serverbound_keep_alive(packet: &ServerboundKeepAlive, buf: &mut Buffer) -> Result<()> {
    buf.write_var_int(packet.id as i32).map(|_| ())
}

fn decode_serverbound_keep_alive(buf: &mut Buffer) -> Result<ServerboundKeepAlive> {
    Ok(ServerboundKeepAlive {
        id: buf.read_var_int()? as i64,
    })
}

pub(crate) fn encode_chunk_data(packet: &ChunkData, buf: &mut Buffer) -> Result<()> {
    if packet.sections.len() != packet.section_mask.count_ones() as usize {
        return Err(WireError::InvalidData(format!(
            "Chunk mask {:#06X} does not match {} sections",
            packet.section_mask,
            packet.sections.len()
        )));
    }
    buf.write_i32(packet.x)?;
    buf.write_i32(packet.z)?;
    buf.write_bool(packet.full)?;
    buf.write_u16(packet.section_mask)?;

    let size = packet.sections.len() * SECTION_STATE_BYTES + packet.trailing.len();
    buf.write_var_int(size as i32)?;
    for section in &packet.sections {
        for &state in section.states() {
            buf.write_u16_le(state)?;
        }
    }
    buf.write_bytes(&packet.trailing)
}

pub(crate) fn decode_chunk_data(buf: &mut Buffer) -> Result<ChunkData> {
    let x = buf.read_i32()?;
    let z = buf.read_i32()?;
    let full = buf.read_bool()?;
    let section_mask = buf.read_u16()?;

    let size = buf.read_var_int()?;
    let count = section_mask.count_ones() as usize;
    let blocks = count * SECTION_STATE_BYTES;
    if size < 0 || (size as usize) < blocks || size as usize > buf.readable() {
        return Err(WireError::InvalidData(format!(
            "Chunk ({}, {}) data of {} bytes for {} sections",
            x, z, size, count
        )));
    }

    let mut sections = Vec::with_capacity(count);
    for _ in 0..count {
        let states = (0..SECTION_BLOCKS)
            .map(|_| buf.read_u16_le())
            .collect::<Result<Vec<_>>>()?;
        sections.push(ChunkSection::from_states(states)?);
    }
    let trailing = buf.read_bytes(size as usize - blocks)?.to_vec();

    Ok(ChunkData {
        x,
        z,
        full,
        section_mask,
        sections,
        trailing,
    })
}
