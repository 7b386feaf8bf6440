//! # Packet Mappings
//!
//! A [`PacketDescriptor`] declares one packet of one phase: its wire id, its
//! name and aliases, the payload type it decodes into and the interfaces that
//! payload can be viewed as. [`compile`] turns the descriptor into an
//! immutable [`PacketMapping`] that the registries index.
//!
//! ## Registration Modes
//!
//! - **Instance**: the payload type implements [`Packet`] and owns its wire
//!   format ([`PacketDescriptor::packet`]).
//! - **Static**: a version module supplies encode/decode functions for a
//!   payload shape shared between versions ([`PacketDescriptor::with_codec`]).
//!
//! ## Interfaces
//!
//! Each mapping carries a set of type-erased views. The payload's own type is
//! always part of the set, and further views are added with
//! [`DescriptorBuilder::implements`]:
//!
//! ```rust,ignore
//! PacketDescriptor::packet::<SystemChatMessage>(0x67, Phase::PLAY, "SystemChat")
//!     .implements::<dyn ChatMessage>(|p| p)
//!     .build()
//! ```

use crate::buffer::Buffer;
use botwire_core::{registry_id, Direction, Phase, Result, WireError, MAX_NETWORK_ID};
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A decoded payload whose concrete type is only known to its mapping
pub type BoxedPayload = Box<dyn Any + Send + Sync>;

/// A payload that owns its wire format
pub trait Packet: Any + Send + Sync + Sized {
    /// Write the payload body (without the packet id)
    fn encode(&self, buf: &mut Buffer) -> Result<()>;

    /// Read the payload body (the packet id is already consumed)
    fn decode(buf: &mut Buffer) -> Result<Self>;
}

type EncodeFn = Arc<dyn Fn(&(dyn Any + Send + Sync), &mut Buffer) -> Result<()> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&mut Buffer) -> Result<BoxedPayload> + Send + Sync>;
type ViewFn<I> = Box<dyn for<'a> Fn(&'a (dyn Any + Send + Sync)) -> Option<&'a I> + Send + Sync>;

/// One interface a payload can be viewed as
#[derive(Clone)]
struct InterfaceView {
    type_id: TypeId,
    name: &'static str,
    /// Holds a `ViewFn<I>` for the interface `I`
    view: Arc<dyn Any + Send + Sync>,
}

impl InterfaceView {
    fn new<P, I>(view: fn(&P) -> &I) -> Self
    where
        P: Any + Send + Sync,
        I: ?Sized + 'static,
    {
        let view: ViewFn<I> = Box::new(move |payload| payload.downcast_ref::<P>().map(view));
        Self {
            type_id: TypeId::of::<I>(),
            name: type_name::<I>(),
            view: Arc::new(view),
        }
    }
}

/// Uncompiled packet declaration
#[derive(Clone)]
pub struct PacketDescriptor {
    network_id: i32,
    phase: Phase,
    direction: Option<Direction>,
    name: String,
    aliases: Vec<String>,
    payload_type: TypeId,
    payload_name: &'static str,
    interfaces: Vec<InterfaceView>,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl PacketDescriptor {
    /// Declare a packet whose payload implements [`Packet`]
    pub fn packet<P: Packet>(network_id: i32, phase: Phase, name: &str) -> DescriptorBuilder<P> {
        Self::with_codec(network_id, phase, name, P::encode, P::decode)
    }

    /// Declare a packet with wire functions supplied by the caller
    ///
    /// # Arguments
    /// * `encode` - writes the payload body
    /// * `decode` - reads the payload body
    pub fn with_codec<P>(
        network_id: i32,
        phase: Phase,
        name: &str,
        encode: fn(&P, &mut Buffer) -> Result<()>,
        decode: fn(&mut Buffer) -> Result<P>,
    ) -> DescriptorBuilder<P>
    where
        P: Any + Send + Sync,
    {
        let encode: EncodeFn = Arc::new(
            move |payload: &(dyn Any + Send + Sync), buf: &mut Buffer| match payload.downcast_ref::<P>() {
                Some(payload) => encode(payload, buf),
                None => Err(WireError::InvalidData(format!(
                    "Payload is not a {}",
                    type_name::<P>()
                ))),
            },
        );
        let decode: DecodeFn =
            Arc::new(move |buf: &mut Buffer| Ok(Box::new(decode(buf)?) as BoxedPayload));

        DescriptorBuilder {
            descriptor: PacketDescriptor {
                network_id,
                phase,
                direction: None,
                name: name.to_string(),
                aliases: Vec::new(),
                payload_type: TypeId::of::<P>(),
                payload_name: type_name::<P>(),
                interfaces: vec![InterfaceView::new::<P, P>(|p| p)],
                encode,
                decode,
            },
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl fmt::Debug for PacketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDescriptor")
            .field("network_id", &self.network_id)
            .field("phase", &self.phase)
            .field("direction", &self.direction)
            .field("name", &self.name)
            .field("payload", &self.payload_name)
            .finish()
    }
}

/// Typed builder for a [`PacketDescriptor`]
pub struct DescriptorBuilder<P> {
    descriptor: PacketDescriptor,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Any + Send + Sync> DescriptorBuilder<P> {
    /// Set the direction explicitly instead of inferring it from the name
    pub fn direction(mut self, direction: Direction) -> Self {
        self.descriptor.direction = Some(direction);
        self
    }

    /// Add an alternative name
    pub fn alias(mut self, alias: &str) -> Self {
        self.descriptor.aliases.push(alias.to_string());
        self
    }

    /// Declare that the payload can be viewed as `I`
    pub fn implements<I: ?Sized + 'static>(mut self, view: fn(&P) -> &I) -> Self {
        let interface = InterfaceView::new::<P, I>(view);
        if !self.descriptor.interfaces.iter().any(|i| i.type_id == interface.type_id) {
            self.descriptor.interfaces.push(interface);
        }
        self
    }

    pub fn build(self) -> PacketDescriptor {
        self.descriptor
    }
}

/// Key of a mapping inside a [`Protocol`](crate::protocol::Protocol)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub phase: Phase,
    pub registry_id: i32,
}

/// Compiled, immutable packet metadata
pub struct PacketMapping {
    registry_id: i32,
    network_id: i32,
    phase: Phase,
    direction: Direction,
    name: String,
    aliases: Vec<String>,
    payload_type: TypeId,
    payload_name: &'static str,
    interfaces: Vec<InterfaceView>,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Compile a descriptor into a mapping
///
/// # Purpose
/// Resolves the direction (explicit, or inferred from the name: names that
/// start with `serverbound`, in any case, are serverbound and everything else
/// is clientbound) and computes the registry id.
///
/// # Errors
/// [`WireError::InvalidData`] for a network id outside `0..=MAX_NETWORK_ID`
/// or an empty name.
pub fn compile(descriptor: PacketDescriptor) -> Result<PacketMapping> {
    if !(0..=MAX_NETWORK_ID).contains(&descriptor.network_id) {
        return Err(WireError::InvalidData(format!(
            "Packet {} has out-of-range id {}",
            descriptor.name, descriptor.network_id
        )));
    }
    if descriptor.name.is_empty() {
        return Err(WireError::InvalidData(format!(
            "Packet 0x{:02X} in {} has no name",
            descriptor.network_id, descriptor.phase
        )));
    }

    let direction = descriptor
        .direction
        .unwrap_or_else(|| Direction::from_name(&descriptor.name));
    let id = registry_id(descriptor.network_id, direction).ok_or_else(|| {
        WireError::InvalidData(format!("Packet {} has out-of-range id {}", descriptor.name, descriptor.network_id))
    })?;

    Ok(PacketMapping {
        registry_id: id,
        network_id: descriptor.network_id,
        phase: descriptor.phase,
        direction,
        name: descriptor.name,
        aliases: descriptor.aliases,
        payload_type: descriptor.payload_type,
        payload_name: descriptor.payload_name,
        interfaces: descriptor.interfaces,
        encode: descriptor.encode,
        decode: descriptor.decode,
    })
}

impl PacketMapping {
    #[inline]
    pub fn registry_id(&self) -> i32 {
        self.registry_id
    }

    #[inline]
    pub fn network_id(&self) -> i32 {
        self.network_id
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn key(&self) -> MappingKey {
        MappingKey {
            phase: self.phase,
            registry_id: self.registry_id,
        }
    }

    /// Primary name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Primary name followed by the aliases
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    /// Rust type name of the payload, for diagnostics
    pub fn payload_name(&self) -> &'static str {
        self.payload_name
    }

    /// Whether the payload can be viewed as the type with `type_id`
    pub fn implements(&self, type_id: TypeId) -> bool {
        self.interfaces.iter().any(|i| i.type_id == type_id)
    }

    /// Names of every interface in the set
    pub fn interface_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.interfaces.iter().map(|i| i.name)
    }

    /// View a payload decoded by this mapping as `I`
    pub fn view<'a, I: ?Sized + 'static>(&self, payload: &'a (dyn Any + Send + Sync)) -> Option<&'a I> {
        let interface = self.interfaces.iter().find(|i| i.type_id == TypeId::of::<I>())?;
        let view = interface.view.downcast_ref::<ViewFn<I>>()?;
        view(payload)
    }

    /// Encode a payload body into `buf`
    pub fn encode(&self, payload: &(dyn Any + Send + Sync), buf: &mut Buffer) -> Result<()> {
        (self.encode)(payload, buf)
    }

    /// Decode a payload body from `buf`
    pub fn decode(&self, buf: &mut Buffer) -> Result<BoxedPayload> {
        (self.decode)(buf)
    }
}

impl fmt::Debug for PacketMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketMapping")
            .field("registry_id", &self.registry_id)
            .field("network_id", &format_args!("0x{:02X}", self.network_id))
            .field("phase", &self.phase)
            .field("direction", &self.direction)
            .field("name", &self.name)
            .field("payload", &self.payload_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping(i64);

    impl Packet for Ping {
        fn encode(&self, buf: &mut Buffer) -> Result<()> {
            buf.write_i64(self.0)
        }

        fn decode(buf: &mut Buffer) -> Result<Self> {
            Ok(Ping(buf.read_i64()?))
        }
    }

    trait Timestamped {
        fn timestamp(&self) -> i64;
    }

    impl Timestamped for Ping {
        fn timestamp(&self) -> i64 {
            self.0
        }
    }

    #[derive(Debug, PartialEq)]
    struct Shared {
        value: i32,
    }

    fn encode_shared_varint(p: &Shared, buf: &mut Buffer) -> Result<()> {
        buf.write_var_int(p.value).map(|_| ())
    }

    fn decode_shared_varint(buf: &mut Buffer) -> Result<Shared> {
        Ok(Shared { value: buf.read_var_int()? })
    }

    #[test]
    fn test_direction_inferred_from_name() {
        let serverbound = compile(PacketDescriptor::packet::<Ping>(0x01, Phase::STATUS, "ServerboundPing").build()).unwrap();
        assert_eq!(serverbound.direction(), Direction::Serverbound);
        assert_eq!(serverbound.registry_id(), 2);

        let clientbound = compile(PacketDescriptor::packet::<Ping>(0x01, Phase::STATUS, "Pong").build()).unwrap();
        assert_eq!(clientbound.direction(), Direction::Clientbound);
        assert_eq!(clientbound.registry_id(), 3);
    }

    #[test]
    fn test_explicit_direction_wins() {
        let mapping = compile(
            PacketDescriptor::packet::<Ping>(0x05, Phase::PLAY, "Ping")
                .direction(Direction::Serverbound)
                .build(),
        )
        .unwrap();
        assert_eq!(mapping.direction(), Direction::Serverbound);
        assert_eq!(mapping.registry_id(), 10);
    }

    #[test]
    fn test_instance_codec() {
        let mapping = compile(PacketDescriptor::packet::<Ping>(0x01, Phase::STATUS, "Ping").build()).unwrap();
        let mut buf = Buffer::allocate(16);
        mapping.encode(&Ping(42), &mut buf).unwrap();
        let decoded = mapping.decode(&mut buf).unwrap();
        assert_eq!(decoded.downcast_ref::<Ping>(), Some(&Ping(42)));
    }

    #[test]
    fn test_static_codec() {
        let mapping = compile(
            PacketDescriptor::with_codec::<Shared>(
                0x00,
                Phase::PLAY,
                "KeepAlive",
                encode_shared_varint,
                decode_shared_varint,
            )
            .build(),
        )
        .unwrap();

        let mut buf = Buffer::allocate(16);
        mapping.encode(&Shared { value: 300 }, &mut buf).unwrap();
        assert_eq!(buf.readable_bytes(), &[0xAC, 0x02]);
        let decoded = mapping.decode(&mut buf).unwrap();
        assert_eq!(decoded.downcast_ref::<Shared>(), Some(&Shared { value: 300 }));
    }

    #[test]
    fn test_encode_rejects_foreign_payload() {
        let mapping = compile(PacketDescriptor::packet::<Ping>(0x01, Phase::STATUS, "Ping").build()).unwrap();
        let mut buf = Buffer::allocate(16);
        assert!(mapping.encode(&Shared { value: 1 }, &mut buf).is_err());
    }

    #[test]
    fn test_interfaces_and_views() {
        let mapping = compile(
            PacketDescriptor::packet::<Ping>(0x01, Phase::STATUS, "Ping")
                .alias("ping_request")
                .implements::<dyn Timestamped>(|p| p)
                .build(),
        )
        .unwrap();

        assert!(mapping.implements(TypeId::of::<Ping>()));
        assert!(mapping.implements(TypeId::of::<dyn Timestamped>()));
        assert!(!mapping.implements(TypeId::of::<Shared>()));

        let payload: BoxedPayload = Box::new(Ping(7));
        let view = mapping.view::<dyn Timestamped>(payload.as_ref()).unwrap();
        assert_eq!(view.timestamp(), 7);
        assert_eq!(mapping.view::<Ping>(payload.as_ref()), Some(&Ping(7)));

        let names: Vec<_> = mapping.names().collect();
        assert_eq!(names, vec!["Ping", "ping_request"]);
    }

    #[test]
    fn test_compile_rejects_bad_descriptors() {
        assert!(compile(PacketDescriptor::packet::<Ping>(-1, Phase::PLAY, "Ping").build()).is_err());
        assert!(compile(PacketDescriptor::packet::<Ping>(1, Phase::PLAY, "").build()).is_err());
        assert!(compile(PacketDescriptor::packet::<Ping>(0x4000_0000, Phase::PLAY, "Ping").build()).is_err());
        assert!(compile(PacketDescriptor::packet::<Ping>(i32::MAX, Phase::PLAY, "Ping").build()).is_err());
    }

    #[test]
    fn test_compile_multibyte_name() {
        let mapping = compile(PacketDescriptor::packet::<Ping>(0x02, Phase::PLAY, "aaaaaaaaaaé_packet").build()).unwrap();
        assert_eq!(mapping.direction(), Direction::Clientbound);
        assert_eq!(mapping.name(), "aaaaaaaaaaé_packet");
    }
}
