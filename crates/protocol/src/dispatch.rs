//! # Dispatch Chains
//!
//! A [`Chain`] is an ordered list of handlers sharing one signature. A
//! dispatch calls every handler synchronously in registration order, which
//! keeps delivery for one connection single-threaded relative to itself.
//!
//! ## Accumulator
//!
//! Each dispatch starts from a seed value and folds every handler result into
//! it with a merge function. The default result type is [`Flow`], seeded with
//! [`Flow::CONTINUE`] and merged with bitwise OR.
//!
//! ## Control Flags
//!
//! - [`Flow::STOP`] - skip the remaining handlers of this pass
//! - [`Flow::REMOVE`] - deregister the handler that returned it
//!
//! Removals are collected during the pass and applied after it. Handlers run
//! over a snapshot of the list, so adding or removing handlers from inside a
//! handler never changes the pass that is running.
//!
//! ## Multi-key Chains
//!
//! A [`ChainSet`] owns one chain per concrete key and resolves a logical key
//! (for example "every packet implementing this interface") to the set of
//! chains it covers. Resolutions are cached per logical key for the life of
//! the set.
//!
//! # Example
//!
//! ```rust
//! use botwire_protocol::dispatch::{Chain, Flow};
//!
//! let chain: Chain<u32> = Chain::new();
//! chain.add(|value: &mut u32| {
//!     *value += 1;
//!     Flow::CONTINUE
//! });
//! let mut value = 0;
//! chain.dispatch(&mut value);
//! assert_eq!(value, 1);
//! ```

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::hash::Hash;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handler result flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flow(u32);

impl Flow {
    pub const CONTINUE: Flow = Flow(0);
    /// Abort the remaining handlers of this pass
    pub const STOP: Flow = Flow(1);
    /// Deregister the returning handler once the pass completes
    pub const REMOVE: Flow = Flow(1 << 1);

    /// First bit free for caller-defined flags
    pub const USER_SHIFT: u32 = 8;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(&self, other: Flow) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flow {
    type Output = Flow;

    fn bitor(self, rhs: Flow) -> Flow {
        Flow(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flow {
    fn bitor_assign(&mut self, rhs: Flow) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Flow::STOP) {
            names.push("STOP".to_string());
        }
        if self.contains(Flow::REMOVE) {
            names.push("REMOVE".to_string());
        }
        let user = self.0 & !(Flow::STOP.0 | Flow::REMOVE.0);
        if user != 0 {
            names.push(format!("0x{:x}", user));
        }
        if names.is_empty() {
            write!(f, "Flow(CONTINUE)")
        } else {
            write!(f, "Flow({})", names.join(" | "))
        }
    }
}

/// Handler results the chain can read control flags from
pub trait Outcome {
    fn control(&self) -> Flow;
}

impl Outcome for Flow {
    #[inline]
    fn control(&self) -> Flow {
        *self
    }
}

impl Outcome for () {
    #[inline]
    fn control(&self) -> Flow {
        Flow::CONTINUE
    }
}

/// Shared handler function
pub type Handler<E, R> = Arc<dyn Fn(&mut E) -> R + Send + Sync>;

/// Identifies one registration inside one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry<E: ?Sized, R> {
    id: HandlerId,
    handler: Handler<E, R>,
}

impl<E: ?Sized, R> Clone for Entry<E, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Ordered handler list with accumulator semantics
pub struct Chain<E: ?Sized, R = Flow> {
    /// Copy-on-write handler list; dispatch iterates a snapshot
    handlers: RwLock<Arc<Vec<Entry<E, R>>>>,
    next_id: AtomicU64,
    seed: Arc<dyn Fn() -> R + Send + Sync>,
    merge: Arc<dyn Fn(R, R) -> R + Send + Sync>,
    /// Completed dispatch count, for [`Chain::wait`]
    generation: Mutex<u64>,
    signal: Condvar,
}

impl<E: ?Sized> Chain<E, Flow> {
    /// Create a chain of [`Flow`] handlers merged with bitwise OR
    pub fn new() -> Self {
        Self::with_accumulator(|| Flow::CONTINUE, |acc, flow| acc | flow)
    }
}

impl<E: ?Sized> Default for Chain<E, Flow> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized, R: Outcome> Chain<E, R> {
    /// Create a chain with a custom accumulator
    ///
    /// # Arguments
    /// * `seed` - produces the starting value of every dispatch
    /// * `merge` - folds one handler result into the accumulator
    pub fn with_accumulator<S, M>(seed: S, merge: M) -> Self
    where
        S: Fn() -> R + Send + Sync + 'static,
        M: Fn(R, R) -> R + Send + Sync + 'static,
    {
        Self {
            handlers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(0),
            seed: Arc::new(seed),
            merge: Arc::new(merge),
            generation: Mutex::new(0),
            signal: Condvar::new(),
        }
    }

    /// Append a handler
    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&mut E) -> R + Send + Sync + 'static,
    {
        self.add_shared(Arc::new(handler))
    }

    /// Append an already shared handler
    pub fn add_shared(&self, handler: Handler<E, R>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        let mut next = Vec::with_capacity(handlers.len() + 1);
        next.extend(handlers.iter().cloned());
        next.push(Entry { id, handler });
        *handlers = Arc::new(next);
        id
    }

    /// Remove a handler; returns `false` if it was not registered
    pub fn remove(&self, id: HandlerId) -> bool {
        self.remove_all(&[id]) > 0
    }

    fn remove_all(&self, ids: &[HandlerId]) -> usize {
        let mut handlers = self.handlers.write();
        let next: Vec<_> = handlers
            .iter()
            .filter(|entry| !ids.contains(&entry.id))
            .cloned()
            .collect();
        let removed = handlers.len() - next.len();
        if removed > 0 {
            *handlers = Arc::new(next);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        *self.handlers.write() = Arc::new(Vec::new());
    }

    /// Run every handler in order and return the merged result
    pub fn dispatch(&self, event: &mut E) -> R {
        let snapshot = Arc::clone(&*self.handlers.read());
        let mut acc = (self.seed)();
        let mut removed = Vec::new();

        for entry in snapshot.iter() {
            let result = (entry.handler)(event);
            let control = result.control();
            acc = (self.merge)(acc, result);

            if control.contains(Flow::REMOVE) {
                removed.push(entry.id);
            }
            if control.contains(Flow::STOP) {
                break;
            }
        }

        if !removed.is_empty() {
            self.remove_all(&removed);
        }

        *self.generation.lock() += 1;
        self.signal.notify_all();
        acc
    }

    /// Block until the next dispatch of this chain completes
    ///
    /// # Returns
    /// `true` if a dispatch completed, `false` on timeout
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        let start = *generation;
        while *generation == start {
            if self.signal.wait_until(&mut generation, deadline).timed_out() {
                return *generation != start;
            }
        }
        true
    }
}

impl<E: ?Sized, R> fmt::Debug for Chain<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

/// A handler registered on several chains at once
pub struct Subscription<E: ?Sized, R = Flow> {
    entries: Vec<(Arc<Chain<E, R>>, HandlerId)>,
}

impl<E: ?Sized, R: Outcome> Subscription<E, R> {
    /// Number of chains the handler was registered on
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the handler from every chain it was registered on
    pub fn cancel(self) {
        for (chain, id) in self.entries {
            chain.remove(id);
        }
    }
}

/// Chains keyed by a concrete key, addressable through cached logical keys
pub struct ChainSet<K, L, E: ?Sized, R = Flow> {
    chains: DashMap<K, Arc<Chain<E, R>>>,
    resolved: DashMap<L, Arc<[K]>>,
    factory: Box<dyn Fn() -> Chain<E, R> + Send + Sync>,
}

impl<K, L, E> ChainSet<K, L, E, Flow>
where
    K: Eq + Hash + Clone,
    L: Eq + Hash + Clone,
    E: ?Sized + 'static,
{
    pub fn new() -> Self {
        Self::with_factory(Chain::new)
    }
}

impl<K, L, E> Default for ChainSet<K, L, E, Flow>
where
    K: Eq + Hash + Clone,
    L: Eq + Hash + Clone,
    E: ?Sized + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, L, E, R> ChainSet<K, L, E, R>
where
    K: Eq + Hash + Clone,
    L: Eq + Hash + Clone,
    E: ?Sized,
    R: Outcome,
{
    /// Create a set whose chains are built by `factory`
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Chain<E, R> + Send + Sync + 'static,
    {
        Self {
            chains: DashMap::new(),
            resolved: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// The chain for a concrete key, if one was ever created
    pub fn chain(&self, key: &K) -> Option<Arc<Chain<E, R>>> {
        self.chains.get(key).map(|chain| Arc::clone(chain.value()))
    }

    /// The chain for a concrete key, created on first use
    pub fn chain_or_create(&self, key: K) -> Arc<Chain<E, R>> {
        Arc::clone(
            self.chains
                .entry(key)
                .or_insert_with(|| Arc::new((self.factory)()))
                .value(),
        )
    }

    /// Resolve a logical key to its concrete keys, caching the answer
    ///
    /// `resolve` only runs the first time a logical key is seen.
    pub fn resolve<F>(&self, logical: &L, resolve: F) -> Arc<[K]>
    where
        F: FnOnce() -> Vec<K>,
    {
        if let Some(keys) = self.resolved.get(logical) {
            return Arc::clone(keys.value());
        }
        Arc::clone(
            self.resolved
                .entry(logical.clone())
                .or_insert_with(|| resolve().into())
                .value(),
        )
    }

    /// Register one handler on every chain a logical key resolves to
    pub fn subscribe<F>(&self, logical: &L, resolve: impl FnOnce() -> Vec<K>, handler: F) -> Subscription<E, R>
    where
        F: Fn(&mut E) -> R + Send + Sync + 'static,
    {
        let handler: Handler<E, R> = Arc::new(handler);
        let keys = self.resolve(logical, resolve);
        let entries = keys
            .iter()
            .map(|key| {
                let chain = self.chain_or_create(key.clone());
                let id = chain.add_shared(Arc::clone(&handler));
                (chain, id)
            })
            .collect();
        Subscription { entries }
    }

    /// Number of cached logical resolutions
    pub fn cached_resolutions(&self) -> usize {
        self.resolved.len()
    }

    /// Forget every cached resolution; existing chains and handlers stay
    pub fn clear_resolutions(&self) {
        self.resolved.clear();
    }
}
