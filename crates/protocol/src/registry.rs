//! # Phase Registries
//!
//! A [`PhaseRegistry`] indexes the compiled mappings of one phase:
//!
//! - by registry id: a dense slot array for ids below [`DENSE_LIMIT`] and a
//!   hash map for the rest
//! - by name, primary name and aliases alike
//! - by payload type and direction
//!
//! Registries are filled while a protocol is assembled and only read
//! afterwards. Each registry also carries the phase-local handler chains.

use crate::container::PacketContainer;
use crate::dispatch::Chain;
use crate::mapping::{compile, PacketDescriptor, PacketMapping};
use botwire_core::{registry_id, Direction, Phase, Result};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry ids below this limit live in the dense slot array
pub const DENSE_LIMIT: usize = 256;

/// Extra slots reserved whenever the dense array has to grow
const DENSE_GROWTH: usize = 20;

/// The received, sending and catch-all chains of one scope
#[derive(Debug, Default)]
pub struct PacketChains {
    /// Incoming packets, before the type-specific chain
    pub received: Chain<PacketContainer>,
    /// Outgoing packets, after the type-specific chain
    pub sending: Chain<PacketContainer>,
    /// Every packet in both directions, last
    pub any: Chain<PacketContainer>,
}

/// Mappings of one phase
pub struct PhaseRegistry {
    phase: Phase,
    dense: Vec<Option<Arc<PacketMapping>>>,
    overflow: HashMap<i32, Arc<PacketMapping>>,
    by_name: HashMap<String, Arc<PacketMapping>>,
    by_type: HashMap<(TypeId, Direction), Arc<PacketMapping>>,
    chains: PacketChains,
}

impl PhaseRegistry {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            dense: Vec::new(),
            overflow: HashMap::new(),
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            chains: PacketChains::default(),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn chains(&self) -> &PacketChains {
        &self.chains
    }

    /// Compile a descriptor and insert the result
    pub fn register(&mut self, descriptor: PacketDescriptor) -> Result<Arc<PacketMapping>> {
        let mapping = Arc::new(compile(descriptor)?);
        self.insert(Arc::clone(&mapping));
        Ok(mapping)
    }

    /// Insert a mapping, evicting every mapping it collides with
    ///
    /// A collision is a shared registry id, a shared name or alias, or the
    /// same payload type in the same direction. The newer mapping wins.
    pub fn insert(&mut self, mapping: Arc<PacketMapping>) {
        if mapping.phase() != self.phase {
            tracing::warn!(
                "Mapping {} declared for {} inserted into {} registry",
                mapping.name(),
                mapping.phase(),
                self.phase
            );
        }

        let mut evicted: Vec<Arc<PacketMapping>> = Vec::new();
        if let Some(old) = self.by_registry_id(mapping.registry_id()) {
            evicted.push(Arc::clone(old));
        }
        for name in mapping.names() {
            if let Some(old) = self.by_name.get(name) {
                evicted.push(Arc::clone(old));
            }
        }
        if let Some(old) = self.by_type.get(&(mapping.payload_type(), mapping.direction())) {
            evicted.push(Arc::clone(old));
        }
        for old in evicted {
            self.evict(&old);
        }

        let id = mapping.registry_id();
        if (id as usize) < DENSE_LIMIT {
            let slot = id as usize;
            if slot >= self.dense.len() {
                self.dense.resize(slot + DENSE_GROWTH, None);
            }
            self.dense[slot] = Some(Arc::clone(&mapping));
        } else {
            self.overflow.insert(id, Arc::clone(&mapping));
        }
        for name in mapping.names() {
            self.by_name.insert(name.to_string(), Arc::clone(&mapping));
        }
        self.by_type
            .insert((mapping.payload_type(), mapping.direction()), Arc::clone(&mapping));

        tracing::trace!("Registered {:?}", mapping);
    }

    fn evict(&mut self, old: &Arc<PacketMapping>) {
        let id = old.registry_id();
        let slot = if (id as usize) < DENSE_LIMIT {
            self.dense.get_mut(id as usize)
        } else {
            None
        };
        match slot {
            Some(slot) => {
                if slot.as_ref().map_or(false, |m| Arc::ptr_eq(m, old)) {
                    *slot = None;
                }
            }
            None => {
                if self.overflow.get(&id).map_or(false, |m| Arc::ptr_eq(m, old)) {
                    self.overflow.remove(&id);
                }
            }
        }
        self.by_name.retain(|_, m| !Arc::ptr_eq(m, old));
        self.by_type.retain(|_, m| !Arc::ptr_eq(m, old));
    }

    /// Mapping stored under a registry id
    pub fn by_registry_id(&self, registry_id: i32) -> Option<&Arc<PacketMapping>> {
        if registry_id < 0 {
            return None;
        }
        if (registry_id as usize) < DENSE_LIMIT {
            self.dense.get(registry_id as usize)?.as_ref()
        } else {
            self.overflow.get(&registry_id)
        }
    }

    /// Mapping for a wire id travelling in `direction`
    #[inline]
    pub fn lookup(&self, direction: Direction, network_id: i32) -> Option<&Arc<PacketMapping>> {
        self.by_registry_id(registry_id(network_id, direction)?)
    }

    /// Mapping by primary name or alias
    pub fn by_name(&self, name: &str) -> Option<&Arc<PacketMapping>> {
        self.by_name.get(name)
    }

    /// Mapping whose payload type is `type_id` in `direction`
    pub fn by_type(&self, type_id: TypeId, direction: Direction) -> Option<&Arc<PacketMapping>> {
        self.by_type.get(&(type_id, direction))
    }

    /// Every mapping whose interface set contains `key`
    pub fn match_key(&self, key: TypeId) -> Vec<Arc<PacketMapping>> {
        self.mappings().filter(|m| m.implements(key)).cloned().collect()
    }

    /// Every mapping, ordered by registry id
    pub fn mappings(&self) -> impl Iterator<Item = &Arc<PacketMapping>> {
        let mut overflow: Vec<_> = self.overflow.values().collect();
        overflow.sort_by_key(|m| m.registry_id());
        self.dense.iter().flatten().chain(overflow)
    }

    pub fn len(&self) -> usize {
        self.dense.iter().flatten().count() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Layer `other` over this registry; its mappings win on collision
    ///
    /// The handler chains of `self` are kept.
    pub fn merge(&mut self, other: PhaseRegistry) {
        let mappings: Vec<_> = other.mappings().cloned().collect();
        for mapping in mappings {
            self.insert(mapping);
        }
    }
}

impl fmt::Debug for PhaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseRegistry")
            .field("phase", &self.phase)
            .field("mappings", &self.len())
            .finish()
    }
}
