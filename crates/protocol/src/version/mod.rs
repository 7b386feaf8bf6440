//! # Version Adapters
//!
//! Each supported protocol version is a [`VersionAdapter`] that registers its
//! own packet layer. [`Protocol::assemble`] puts the version-independent
//! packets underneath and merges the adapter's layer on top.
//!
//! Only the versions listed in [`SUPPORTED`] exist; there is no attempt to
//! guess the packet table of any other version.
//!
//! ```rust
//! use botwire_protocol::protocol::Protocol;
//! use botwire_protocol::version::adapter_for;
//!
//! let adapter = adapter_for(47).expect("1.8 is supported");
//! let protocol = Protocol::assemble(adapter).unwrap();
//! assert_eq!(protocol.protocol_version(), 47);
//! ```

mod v1_20_2;
mod v1_8;

pub use v1_20_2::V1_20_2;
pub use v1_8::V1_8;

use crate::protocol::Protocol;
use botwire_core::Result;

/// Registers the packet layer of one protocol version
pub trait VersionAdapter: Send + Sync {
    /// Protocol number sent in the handshake
    fn protocol_version(&self) -> i32;

    /// Release name, for logs
    fn name(&self) -> &'static str;

    /// Register every version-specific packet into `protocol`
    fn register(&self, protocol: &mut Protocol) -> Result<()>;
}

/// Every adapter this crate ships, oldest first
pub static SUPPORTED: &[&dyn VersionAdapter] = &[&V1_8, &V1_20_2];

/// The adapter for a protocol number
pub fn adapter_for(protocol_version: i32) -> Option<&'static dyn VersionAdapter> {
    SUPPORTED
        .iter()
        .copied()
        .find(|adapter| adapter.protocol_version() == protocol_version)
}

/// Protocol numbers of every supported version
pub fn supported_versions() -> impl Iterator<Item = i32> {
    SUPPORTED.iter().map(|adapter| adapter.protocol_version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::packets::*;
    use botwire_core::{Direction, Phase, WireError};
    use std::any::TypeId;
    use uuid::Uuid;

    fn assemble(version: i32) -> Protocol {
        Protocol::assemble(adapter_for(version).unwrap()).unwrap()
    }

    #[test]
    fn test_adapter_lookup() {
        assert_eq!(adapter_for(47).unwrap().name(), "1.8");
        assert_eq!(adapter_for(764).unwrap().name(), "1.20.2");
        assert!(adapter_for(340).is_none());
        assert_eq!(supported_versions().collect::<Vec<_>>(), vec![47, 764]);
    }

    #[test]
    fn test_common_layer_present() {
        for version in supported_versions() {
            let protocol = assemble(version);
            assert!(protocol
                .by_type(Phase::HANDSHAKE, TypeId::of::<Handshake>(), Direction::Serverbound)
                .is_some());
            assert!(protocol
                .by_type(Phase::STATUS, TypeId::of::<StatusResponse>(), Direction::Clientbound)
                .is_some());
        }
    }

    #[test]
    fn test_v1_8_ids() {
        let protocol = assemble(47);
        let lookup = |phase, direction, id| protocol.lookup(phase, direction, id).map(|m| m.name().to_string());

        assert_eq!(lookup(Phase::LOGIN, Direction::Clientbound, 0x02).as_deref(), Some("LoginSuccess"));
        assert_eq!(lookup(Phase::LOGIN, Direction::Serverbound, 0x00).as_deref(), Some("ServerboundLoginStart"));
        assert_eq!(lookup(Phase::PLAY, Direction::Clientbound, 0x46).as_deref(), Some("SetCompression"));
        assert_eq!(lookup(Phase::PLAY, Direction::Serverbound, 0x01).as_deref(), Some("ServerboundChat"));
        assert!(protocol.try_phase(Phase::CONFIGURATION).is_none());
        assert!(protocol
            .by_type(Phase::LOGIN, TypeId::of::<LoginAcknowledged>(), Direction::Serverbound)
            .is_none());
    }

    #[test]
    fn test_v1_20_2_ids() {
        let protocol = assemble(764);
        let lookup = |phase, direction, id| protocol.lookup(phase, direction, id).map(|m| m.name().to_string());

        assert_eq!(
            lookup(Phase::LOGIN, Direction::Serverbound, 0x03).as_deref(),
            Some("ServerboundLoginAcknowledged")
        );
        assert_eq!(
            lookup(Phase::CONFIGURATION, Direction::Clientbound, 0x02).as_deref(),
            Some("FinishConfiguration")
        );
        assert_eq!(lookup(Phase::PLAY, Direction::Clientbound, 0x24).as_deref(), Some("KeepAlive"));
        assert_eq!(lookup(Phase::PLAY, Direction::Clientbound, 0x67).as_deref(), Some("SystemChat"));
        assert_eq!(
            lookup(Phase::PLAY, Direction::Serverbound, 0x14).as_deref(),
            Some("ServerboundKeepAlive")
        );
    }

    #[test]
    fn test_keep_alive_wire_differs_per_version() {
        let keep_alive = ClientboundKeepAlive { id: 300 };

        let legacy = assemble(47);
        let mapping = legacy
            .by_type(Phase::PLAY, TypeId::of::<ClientboundKeepAlive>(), Direction::Clientbound)
            .unwrap();
        let mut buf = Buffer::allocate(16);
        mapping.encode(&keep_alive, &mut buf).unwrap();
        assert_eq!(buf.readable_bytes(), &[0xAC, 0x02]);

        let modern = assemble(764);
        let mapping = modern
            .by_type(Phase::PLAY, TypeId::of::<ClientboundKeepAlive>(), Direction::Clientbound)
            .unwrap();
        let mut buf = Buffer::allocate(16);
        mapping.encode(&keep_alive, &mut buf).unwrap();
        assert_eq!(buf.readable_bytes(), &300i64.to_be_bytes());
        let decoded = mapping.decode(&mut buf).unwrap();
        assert_eq!(decoded.downcast_ref::<ClientboundKeepAlive>(), Some(&keep_alive));
    }

    #[test]
    fn test_login_success_shapes() {
        let success = LoginSuccess {
            uuid: Uuid::from_u128(0x069a79f4_44e9_4726_a5be_fca90e38aaf5),
            username: "Notch".into(),
            properties: Vec::new(),
        };

        let legacy = assemble(47);
        let mapping = legacy.for_phase(Phase::LOGIN).unwrap().by_name("LoginSuccess").unwrap();
        let mut buf = Buffer::allocate(64);
        mapping.encode(&success, &mut buf).unwrap();
        assert_eq!(buf.read_string().unwrap(), "069a79f4-44e9-4726-a5be-fca90e38aaf5");

        let modern = assemble(764);
        let mapping = modern.for_phase(Phase::LOGIN).unwrap().by_name("LoginSuccess").unwrap();
        let mut buf = Buffer::allocate(64);
        mapping.encode(&success, &mut buf).unwrap();
        assert_eq!(buf.readable(), 16 + 6 + 1);
        let decoded = mapping.decode(&mut buf).unwrap();
        assert_eq!(decoded.downcast_ref::<LoginSuccess>(), Some(&success));
    }

    #[test]
    fn test_chat_interface_spans_versions() {
        for version in supported_versions() {
            let protocol = assemble(version);
            let matches = protocol.match_key(TypeId::of::<dyn ChatMessage>());
            assert_eq!(matches.len(), 1, "version {}", version);
            assert_eq!(matches[0].phase(), Phase::PLAY);
        }
    }

    #[test]
    fn test_v1_8_chunk_states_little_endian() {
        let mut bottom = ChunkSection::empty();
        bottom.set_state(0, 0, 0, 0x0102);
        let mut top = ChunkSection::empty();
        top.set_state(15, 15, 15, 1 << 4);
        let chunk = ChunkData {
            x: -3,
            z: 7,
            full: true,
            section_mask: 0b101,
            sections: vec![bottom, top],
            trailing: vec![0xAA, 0xBB, 0xCC, 0xDD],
        };

        let protocol = assemble(47);
        let mapping = protocol
            .by_type(Phase::PLAY, TypeId::of::<ChunkData>(), Direction::Clientbound)
            .unwrap();
        assert_eq!(mapping.network_id(), 0x21);

        let mut buf = Buffer::allocate(64);
        mapping.encode(&chunk, &mut buf).unwrap();
        let wire = buf.readable_bytes();
        assert_eq!(&wire[..11], &[0xFF, 0xFF, 0xFF, 0xFD, 0, 0, 0, 7, 1, 0x00, 0x05]);
        // 2 * 8192 + 4 bytes of section data
        assert_eq!(&wire[11..14], &[0x84, 0x80, 0x01]);
        assert_eq!(&wire[14..16], &[0x02, 0x01]);
        assert_eq!(wire.len(), 14 + 2 * 8192 + 4);

        let decoded = mapping.decode(&mut buf).unwrap();
        let decoded = decoded.downcast_ref::<ChunkData>().unwrap();
        assert_eq!(decoded, &chunk);
        assert_eq!(decoded.sections[1].block_id(15, 15, 15), 1);
        assert_eq!(buf.readable(), 0);
    }

    #[test]
    fn test_v1_8_chunk_rejects_short_data() {
        let protocol = assemble(47);
        let mapping = protocol.for_phase(Phase::PLAY).unwrap().by_name("ChunkData").unwrap();

        let mismatched = ChunkData {
            x: 0,
            z: 0,
            full: false,
            section_mask: 0b1,
            sections: Vec::new(),
            trailing: Vec::new(),
        };
        let mut buf = Buffer::allocate(16);
        assert!(mapping.encode(&mismatched, &mut buf).is_err());

        let mut buf = Buffer::allocate(16);
        buf.write_i32(0).unwrap();
        buf.write_i32(0).unwrap();
        buf.write_bool(false).unwrap();
        buf.write_u16(0b1).unwrap();
        buf.write_var_int(100).unwrap();
        buf.write_bytes(&[0; 100]).unwrap();
        assert!(matches!(mapping.decode(&mut buf), Err(WireError::InvalidData(_))));
    }
}
