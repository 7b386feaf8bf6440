//! # Protocol
//!
//! A [`Protocol`] is the assembled packet table of one protocol version: one
//! [`PhaseRegistry`] per phase, the global handler chains, the type-specific
//! handler chains and a keyed resource map for subsystems that need to attach
//! per-protocol state.
//!
//! ## Lifecycle
//!
//! 1. [`Protocol::assemble`] registers the version-independent packets, lets a
//!    [`VersionAdapter`] build its own layer and merges that layer on top
//! 2. The protocol is wrapped in an `Arc` and shared by every connection
//! 3. Handlers are attached through `&self` at any time afterwards
//!
//! ## Match Cache
//!
//! [`Protocol::match_key`] answers "which mappings implement this type" across
//! all phases. Answers are cached for the lifetime of the table; every `&mut`
//! mutation clears the cache.

use crate::container::PacketContainer;
use crate::dispatch::{Chain, ChainSet, Flow, Subscription};
use crate::mapping::{MappingKey, PacketDescriptor, PacketMapping};
use crate::packets;
use crate::registry::{PacketChains, PhaseRegistry};
use crate::version::VersionAdapter;
use botwire_core::{Direction, Phase, Result, WireError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Phases with an ordinal below this limit live in the dense array
const PHASE_DENSE_LIMIT: usize = 16;

/// Typed key for state attached to a [`Protocol`]
///
/// ```rust
/// use botwire_protocol::protocol::{Protocol, ProtocolResource};
///
/// static COUNTER: ProtocolResource<std::sync::atomic::AtomicU32> =
///     ProtocolResource::new("example.counter");
///
/// let protocol = Protocol::new(47, "1.8");
/// let counter = protocol.resource_or_init(&COUNTER, Default::default);
/// counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
/// ```
pub struct ProtocolResource<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> ProtocolResource<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Assembled packet table of one protocol version
pub struct Protocol {
    version: i32,
    name: String,
    phases: Vec<Option<PhaseRegistry>>,
    overflow: HashMap<Phase, PhaseRegistry>,
    chains: PacketChains,
    typed: ChainSet<MappingKey, TypeId, PacketContainer>,
    match_cache: DashMap<TypeId, Arc<[Arc<PacketMapping>]>>,
    resources: DashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl Protocol {
    /// Create an empty table
    pub fn new(version: i32, name: &str) -> Self {
        Self {
            version,
            name: name.to_string(),
            phases: Vec::new(),
            overflow: HashMap::new(),
            chains: PacketChains::default(),
            typed: ChainSet::new(),
            match_cache: DashMap::new(),
            resources: DashMap::new(),
        }
    }

    /// Build the full table for one version
    ///
    /// # Purpose
    /// Registers the packets every version shares (handshake and status),
    /// then the adapter's own layer, which wins on any collision.
    pub fn assemble(adapter: &dyn VersionAdapter) -> Result<Self> {
        let mut protocol = Self::new(adapter.protocol_version(), adapter.name());
        packets::register_common(&mut protocol)?;

        let mut layer = Self::new(adapter.protocol_version(), adapter.name());
        adapter.register(&mut layer)?;
        protocol.merge(layer);

        tracing::debug!(
            "Assembled protocol {} ({}) with {} mappings",
            protocol.name,
            protocol.version,
            protocol.mappings().count()
        );
        Ok(protocol)
    }

    #[inline]
    pub fn protocol_version(&self) -> i32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry of a phase
    ///
    /// # Errors
    /// [`WireError::UnmappedPhase`] if nothing was registered for `phase`.
    pub fn for_phase(&self, phase: Phase) -> Result<&PhaseRegistry> {
        self.try_phase(phase).ok_or(WireError::UnmappedPhase(phase))
    }

    pub fn try_phase(&self, phase: Phase) -> Option<&PhaseRegistry> {
        let ordinal = phase.ordinal();
        if ordinal < PHASE_DENSE_LIMIT {
            self.phases.get(ordinal)?.as_ref()
        } else {
            self.overflow.get(&phase)
        }
    }

    /// Registry of a phase, created if missing
    pub fn phase_mut(&mut self, phase: Phase) -> &mut PhaseRegistry {
        self.invalidate();
        let ordinal = phase.ordinal();
        if ordinal < PHASE_DENSE_LIMIT {
            if ordinal >= self.phases.len() {
                self.phases.resize_with(ordinal + 1, || None);
            }
            self.phases[ordinal].get_or_insert_with(|| PhaseRegistry::new(phase))
        } else {
            self.overflow
                .entry(phase)
                .or_insert_with(|| PhaseRegistry::new(phase))
        }
    }

    /// Every registered phase registry
    pub fn phases(&self) -> impl Iterator<Item = &PhaseRegistry> {
        self.phases.iter().flatten().chain(self.overflow.values())
    }

    /// Every mapping of every phase
    pub fn mappings(&self) -> impl Iterator<Item = &Arc<PacketMapping>> {
        self.phases().flat_map(|registry| registry.mappings())
    }

    /// Compile a descriptor into the registry of its phase
    pub fn register(&mut self, descriptor: PacketDescriptor) -> Result<Arc<PacketMapping>> {
        let phase = descriptor.phase();
        self.phase_mut(phase).register(descriptor)
    }

    /// Insert an already compiled mapping into the registry of its phase
    pub fn register_mapping(&mut self, mapping: Arc<PacketMapping>) {
        self.phase_mut(mapping.phase()).insert(mapping);
    }

    /// Layer `other` over this table phase by phase
    ///
    /// Mappings of `other` win on collision. Handlers and resources of
    /// `self` are kept.
    pub fn merge(&mut self, other: Protocol) {
        let Protocol {
            phases, overflow, ..
        } = other;
        for registry in phases.into_iter().flatten().chain(overflow.into_values()) {
            self.phase_mut(registry.phase()).merge(registry);
        }
    }

    /// Resolve an incoming or outgoing wire id
    pub fn lookup(&self, phase: Phase, direction: Direction, network_id: i32) -> Option<&Arc<PacketMapping>> {
        self.try_phase(phase)?.lookup(direction, network_id)
    }

    /// Resolve a payload type within a phase
    pub fn by_type(&self, phase: Phase, type_id: TypeId, direction: Direction) -> Option<&Arc<PacketMapping>> {
        self.try_phase(phase)?.by_type(type_id, direction)
    }

    /// Every mapping in every phase whose interface set contains `key`
    pub fn match_key(&self, key: TypeId) -> Arc<[Arc<PacketMapping>]> {
        if let Some(cached) = self.match_cache.get(&key) {
            return Arc::clone(cached.value());
        }
        let matches: Arc<[Arc<PacketMapping>]> = self
            .phases()
            .flat_map(|registry| registry.match_key(key))
            .collect::<Vec<_>>()
            .into();
        self.match_cache.insert(key, Arc::clone(&matches));
        matches
    }

    fn invalidate(&mut self) {
        self.match_cache.clear();
        self.typed.clear_resolutions();
    }

    /// Protocol-wide received, sending and catch-all chains
    pub fn chains(&self) -> &PacketChains {
        &self.chains
    }

    /// Type-specific chain of a mapping, if a handler was ever attached
    pub fn typed_chain(&self, mapping: &PacketMapping) -> Option<Arc<Chain<PacketContainer>>> {
        self.typed.chain(&mapping.key())
    }

    /// Attach a handler to every packet whose payload implements `I`
    ///
    /// `I` is either a payload type or an interface declared with
    /// [`implements`](crate::mapping::DescriptorBuilder::implements). The
    /// handler covers both directions and every phase.
    pub fn on<I, F>(&self, handler: F) -> Subscription<PacketContainer>
    where
        I: ?Sized + 'static,
        F: Fn(&mut PacketContainer) -> Flow + Send + Sync + 'static,
    {
        let key = TypeId::of::<I>();
        let subscription = self.typed.subscribe(
            &key,
            || self.match_key(key).iter().map(|m| m.key()).collect(),
            handler,
        );
        if subscription.is_empty() {
            tracing::warn!(
                "Handler for {} matches no packet in protocol {}",
                std::any::type_name::<I>(),
                self.version
            );
        } else {
            tracing::debug!(
                "Handler for {} attached to {} packet(s)",
                std::any::type_name::<I>(),
                subscription.len()
            );
        }
        subscription
    }

    /// Resource stored under `key`, if present with the right type
    pub fn resource<T: Any + Send + Sync>(&self, key: &ProtocolResource<T>) -> Option<Arc<T>> {
        let value = Arc::clone(self.resources.get(&key.name)?.value());
        value.downcast::<T>().ok()
    }

    /// Store a resource, returning the one it replaced
    pub fn insert_resource<T: Any + Send + Sync>(&self, key: &ProtocolResource<T>, value: T) -> Option<Arc<T>> {
        self.resources
            .insert(key.name, Arc::new(value))
            .and_then(|old| old.downcast::<T>().ok())
    }

    /// Resource stored under `key`, created by `init` on first use
    ///
    /// `init` runs while the resource slot is locked and must not touch the
    /// resources of this protocol.
    pub fn resource_or_init<T, F>(&self, key: &ProtocolResource<T>, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        match self.resources.entry(key.name) {
            Entry::Occupied(mut occupied) => {
                if let Ok(value) = Arc::clone(occupied.get()).downcast::<T>() {
                    return value;
                }
                tracing::warn!(
                    "Resource {} held another type, replacing it with {}",
                    key.name,
                    std::any::type_name::<T>()
                );
                let value = Arc::new(init());
                occupied.insert(Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
                value
            }
            Entry::Vacant(vacant) => {
                let value = Arc::new(init());
                vacant.insert(Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
                value
            }
        }
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("phases", &self.phases().map(PhaseRegistry::phase).collect::<Vec<_>>())
            .finish()
    }
}
