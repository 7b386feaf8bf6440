//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection phase (ordinal-addressed)
///
/// Each phase has its own packet id namespace. The five standard phases are
/// associated constants; version adapters may address further ordinals with
/// [`Phase::new`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Phase(u8);

impl Phase {
    pub const HANDSHAKE: Phase = Phase(0);
    pub const STATUS: Phase = Phase(1);
    pub const LOGIN: Phase = Phase(2);
    pub const CONFIGURATION: Phase = Phase(3);
    pub const PLAY: Phase = Phase(4);

    pub const fn new(ordinal: u8) -> Self {
        Self(ordinal)
    }

    pub const fn ordinal(&self) -> usize {
        self.0 as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self.0 {
            0 => "handshake",
            1 => "status",
            2 => "login",
            3 => "configuration",
            4 => "play",
            _ => "custom",
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0..=4 => write!(f, "{}", self.as_str().to_uppercase()),
            n => write!(f, "PHASE_{}", n),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Packet direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client to server
    Serverbound = 0,
    /// Server to client
    Clientbound = 1,
}

impl Direction {
    pub const fn parity(&self) -> i32 {
        *self as i32
    }

    pub const fn opposite(&self) -> Self {
        match self {
            Self::Serverbound => Self::Clientbound,
            Self::Clientbound => Self::Serverbound,
        }
    }

    /// Infer a direction from a packet name.
    ///
    /// Names starting with `serverbound` (any case) are serverbound,
    /// everything else is clientbound.
    pub fn from_name(name: &str) -> Self {
        let prefix = "serverbound";
        if name.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            Self::Serverbound
        } else {
            Self::Clientbound
        }
    }
}

/// Largest network id whose registry id still fits in an `i32`.
pub const MAX_NETWORK_ID: i32 = (i32::MAX - 1) / 2;

/// Combine a per-direction network id and a direction into one registry id.
///
/// Serverbound ids are even and clientbound ids odd, so a single flat index
/// holds both directions without collisions. Returns `None` for negative ids
/// and for ids above [`MAX_NETWORK_ID`].
#[inline]
pub const fn registry_id(network_id: i32, direction: Direction) -> Option<i32> {
    if network_id < 0 {
        return None;
    }
    match network_id.checked_mul(2) {
        Some(doubled) => doubled.checked_add(direction.parity()),
        None => None,
    }
}

/// Recover the network id from a registry id.
#[inline]
pub const fn network_id(registry_id: i32, direction: Direction) -> i32 {
    (registry_id - direction.parity()) / 2
}
