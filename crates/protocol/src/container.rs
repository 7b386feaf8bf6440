//! Packet containers and the session seam
//!
//! A [`PacketContainer`] carries one packet through the dispatch chains:
//! routing metadata, the cancel flag and either a decoded payload or an
//! [`UnknownPacket`] holding the raw body. Handlers talk back to the
//! connection through the [`Session`] trait.

use crate::buffer::Buffer;
use crate::mapping::{BoxedPayload, PacketMapping};
use crate::protocol::Protocol;
use botwire_core::{ConnectionId, Direction, Phase, Result, WireError};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// What handlers may do with the connection that produced a packet
pub trait Session: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn protocol(&self) -> &Arc<Protocol>;

    fn phase(&self) -> Phase;

    /// Switch both directions to another phase
    fn set_phase(&self, phase: Phase);

    /// Apply a compression threshold; negative disables compression
    fn set_compression_threshold(&self, threshold: i32);

    /// Wrap both directions in the stream cipher keyed by `secret`
    fn enable_encryption(&self, secret: &[u8]) -> Result<()>;

    /// Send a type-erased payload
    ///
    /// # Returns
    /// `Ok(false)` if an outgoing handler cancelled the packet
    fn send_boxed(&self, payload: BoxedPayload) -> Result<bool>;

    /// Close the connection because the peer asked for it
    fn kick(&self, reason: String);

    /// Close the connection locally
    fn close(&self);
}

impl dyn Session {
    /// Send a typed payload
    pub fn send<P: Any + Send + Sync>(&self, payload: P) -> Result<bool> {
        self.send_boxed(Box::new(payload))
    }
}

/// Raw body of a packet the current phase has no mapping for
///
/// Owns the connection's working buffer for the duration of the dispatch;
/// the connection takes it back with [`UnknownPacket::into_buffer`].
pub struct UnknownPacket {
    network_id: i32,
    data: Buffer,
}

impl UnknownPacket {
    pub fn new(network_id: i32, data: Buffer) -> Self {
        Self { network_id, data }
    }

    pub fn network_id(&self) -> i32 {
        self.network_id
    }

    /// The unread body bytes
    pub fn bytes(&self) -> &[u8] {
        self.data.readable_bytes()
    }

    pub fn len(&self) -> usize {
        self.data.readable()
    }

    pub fn is_empty(&self) -> bool {
        self.data.readable() == 0
    }

    /// Hand the working buffer back
    pub fn into_buffer(self) -> Buffer {
        self.data
    }
}

impl fmt::Debug for UnknownPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnknownPacket")
            .field("network_id", &format_args!("0x{:02X}", self.network_id))
            .field("len", &self.len())
            .finish()
    }
}

/// Packet body carried by a container
pub enum Payload {
    Decoded(BoxedPayload),
    Unknown(UnknownPacket),
}

/// One packet travelling through the dispatch chains
pub struct PacketContainer {
    phase: Phase,
    network_id: i32,
    direction: Direction,
    mapping: Option<Arc<PacketMapping>>,
    cancelled: bool,
    payload: Payload,
    session: Option<Arc<dyn Session>>,
}

impl PacketContainer {
    /// Container for a payload decoded or about to be encoded by `mapping`
    pub fn mapped(
        mapping: Arc<PacketMapping>,
        payload: BoxedPayload,
        session: Option<Arc<dyn Session>>,
    ) -> Self {
        Self {
            phase: mapping.phase(),
            network_id: mapping.network_id(),
            direction: mapping.direction(),
            mapping: Some(mapping),
            cancelled: false,
            payload: Payload::Decoded(payload),
            session,
        }
    }

    /// Container for a packet id the phase does not map
    pub fn unknown(
        phase: Phase,
        direction: Direction,
        packet: UnknownPacket,
        session: Option<Arc<dyn Session>>,
    ) -> Self {
        Self {
            phase,
            network_id: packet.network_id(),
            direction,
            mapping: None,
            cancelled: false,
            payload: Payload::Unknown(packet),
            session,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn network_id(&self) -> i32 {
        self.network_id
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mapping(&self) -> Option<&Arc<PacketMapping>> {
        self.mapping.as_ref()
    }

    /// Primary name of the mapping, if the packet is known
    pub fn name(&self) -> Option<&str> {
        self.mapping.as_deref().map(PacketMapping::name)
    }

    pub fn is_known(&self) -> bool {
        self.mapping.is_some()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Skip the remaining chains (and the write, for outgoing packets)
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    /// The decoded payload as its concrete type
    pub fn payload<T: Any>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Decoded(payload) => payload.downcast_ref::<T>(),
            Payload::Unknown(_) => None,
        }
    }

    pub fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        match &mut self.payload {
            Payload::Decoded(payload) => payload.downcast_mut::<T>(),
            Payload::Unknown(_) => None,
        }
    }

    /// The decoded payload viewed through one of its declared interfaces
    pub fn view<I: ?Sized + 'static>(&self) -> Option<&I> {
        match (&self.payload, &self.mapping) {
            (Payload::Decoded(payload), Some(mapping)) => mapping.view::<I>(&**payload),
            _ => None,
        }
    }

    pub fn unknown_packet(&self) -> Option<&UnknownPacket> {
        match &self.payload {
            Payload::Unknown(packet) => Some(packet),
            Payload::Decoded(_) => None,
        }
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    /// Send a payload back over the session this packet belongs to
    pub fn reply<P: Any + Send + Sync>(&self, payload: P) -> Result<bool> {
        match &self.session {
            Some(session) => session.send(payload),
            None => Err(WireError::NotFound(format!(
                "No session to reply to packet 0x{:02X} in {}",
                self.network_id, self.phase
            ))),
        }
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl fmt::Debug for PacketContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketContainer")
            .field("phase", &self.phase)
            .field("network_id", &format_args!("0x{:02X}", self.network_id))
            .field("direction", &self.direction)
            .field("name", &self.name())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{compile, Packet, PacketDescriptor};

    #[derive(Debug, PartialEq)]
    struct Tick(u32);

    impl Packet for Tick {
        fn encode(&self, buf: &mut Buffer) -> Result<()> {
            buf.write_u32(self.0)
        }

        fn decode(buf: &mut Buffer) -> Result<Self> {
            Ok(Tick(buf.read_u32()?))
        }
    }

    trait Counter {
        fn count(&self) -> u32;
    }

    impl Counter for Tick {
        fn count(&self) -> u32 {
            self.0
        }
    }

    fn tick_mapping() -> Arc<PacketMapping> {
        Arc::new(
            compile(
                PacketDescriptor::packet::<Tick>(0x10, Phase::PLAY, "Tick")
                    .implements::<dyn Counter>(|t| t)
                    .build(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_mapped_container() {
        let mut container = PacketContainer::mapped(tick_mapping(), Box::new(Tick(3)), None);
        assert_eq!(container.phase(), Phase::PLAY);
        assert_eq!(container.network_id(), 0x10);
        assert_eq!(container.direction(), Direction::Clientbound);
        assert_eq!(container.name(), Some("Tick"));
        assert_eq!(container.payload::<Tick>(), Some(&Tick(3)));
        assert!(container.payload::<u32>().is_none());
        assert_eq!(container.view::<dyn Counter>().unwrap().count(), 3);

        container.payload_mut::<Tick>().unwrap().0 = 9;
        assert_eq!(container.view::<dyn Counter>().unwrap().count(), 9);

        assert!(!container.is_cancelled());
        container.cancel();
        assert!(container.is_cancelled());
    }

    #[test]
    fn test_unknown_container_returns_buffer() {
        let mut buf = Buffer::allocate(32);
        buf.write_bytes(&[0x7F, 1, 2, 3]).unwrap();
        buf.read_u8().unwrap();

        let container = PacketContainer::unknown(
            Phase::PLAY,
            Direction::Clientbound,
            UnknownPacket::new(0x7F, buf),
            None,
        );
        assert!(!container.is_known());
        assert_eq!(container.unknown_packet().unwrap().bytes(), &[1, 2, 3]);
        assert!(container.view::<dyn Counter>().is_none());

        match container.into_payload() {
            Payload::Unknown(packet) => {
                let buf = packet.into_buffer();
                assert_eq!(buf.capacity(), 32);
            }
            Payload::Decoded(_) => panic!("expected unknown payload"),
        }
    }

    #[test]
    fn test_reply_without_session() {
        let container = PacketContainer::mapped(tick_mapping(), Box::new(Tick(1)), None);
        assert!(matches!(container.reply(Tick(2)), Err(WireError::NotFound(_))));
    }
}
