//! # Identifiers
//!
//! Newtype identifiers shared across processes.
//!
//! ## Design
//!
//! Every identifier is a plain integer behind a newtype so an entity ID can
//! never be passed where a controller ID is expected. Zero is reserved as
//! the null value for entity and controller IDs.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Game time measured in ticks since the space started.
pub type GameTime = u64;

/// Globally unique entity identifier.
///
/// The same ID names the real entity and every ghost of it, in every
/// process of the space.
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Null entity ID.
    pub const NULL: Self = Self(0);

    /// Creates an entity ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns true if this is the null ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Controller identifier, unique within one entity.
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct ControllerId(pub u32);

impl ControllerId {
    /// Null controller ID. Never allocated.
    pub const NULL: Self = Self(0);

    /// Returns true if this is the null ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for ControllerId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Space identifier.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceId(pub u32);

/// One-byte alias a witness hands to its client in place of a full entity ID.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct IdAlias(pub u8);

/// Opaque process address.
///
/// Cells, clients and other processes are all named by an address. The
/// core never interprets it; the transport maps it to a channel.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Address {
    /// IPv4 address in host order.
    pub ip: u32,
    /// Port.
    pub port: u16,
}

impl Address {
    /// The null address.
    pub const NONE: Self = Self { ip: 0, port: 0 };

    /// Creates an address.
    #[inline]
    #[must_use]
    pub const fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    /// Loopback address with the given port. Handy for in-process cells.
    #[inline]
    #[must_use]
    pub const fn local(port: u16) -> Self {
        Self::new(0x7F00_0001, port)
    }

    /// Returns true for the null address.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.ip == 0 && self.port == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.ip.to_be_bytes();
        write!(f, "{a}.{b}.{c}.{d}:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_ids() {
        assert!(EntityId::default().is_null());
        assert!(ControllerId::default().is_null());
        assert!(!EntityId::new(7).is_null());
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::local(4001).to_string(), "127.0.0.1:4001");
        assert!(Address::NONE.is_none());
        assert!(!Address::local(1).is_none());
    }

    #[test]
    fn test_address_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            addr: Address,
        }
        let parsed: Wrapper = toml::from_str("addr = { ip = 2130706433, port = 9 }").unwrap();
        assert_eq!(parsed.addr, Address::local(9));
    }
}
