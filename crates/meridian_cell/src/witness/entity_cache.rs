//! # Entity Cache
//!
//! What a witness knows about one entity in its area of interest, and the
//! pool of one-byte aliases handed to the client.

use meridian_core::{BinaryIStream, BinaryOStream, StreamError, StreamResult};
use meridian_shared::{EntityId, IdAlias, MAX_ID_ALIASES};

/// Entity cache flag word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheFlags(u8);

impl CacheFlags {
    /// Inside the AoI, enter not yet sent.
    pub const ENTER_PENDING: Self = Self(0x01);
    /// Left the AoI, leave not yet sent.
    pub const GONE: Self = Self(0x02);
    /// Inside the AoI but without an alias: the pool is exhausted and the
    /// entity lost out on priority.
    pub const WITHHELD: Self = Self(0x04);

    const ALL: u8 = 0x07;

    /// No flags.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Witness-side state of one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityCache {
    id: EntityId,
    pub(crate) flags: CacheFlags,
    pub(crate) alias: Option<IdAlias>,
    /// Virtual time of the next update; smaller goes first.
    pub(crate) priority: f64,
    pub(crate) lod: u8,
    pub(crate) last_volatile: Option<u32>,
}

impl EntityCache {
    /// A fresh entry waiting for its enter to be sent.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            flags: CacheFlags::ENTER_PENDING,
            alias: None,
            priority: 0.0,
            lod: 0,
            last_volatile: None,
        }
    }

    /// The cached entity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Flag word.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> CacheFlags {
        self.flags
    }

    /// Alias the client knows the entity by.
    #[inline]
    #[must_use]
    pub const fn alias(&self) -> Option<IdAlias> {
        self.alias
    }

    /// Current level of detail.
    #[inline]
    #[must_use]
    pub const fn lod(&self) -> u8 {
        self.lod
    }

    /// Update priority (virtual time).
    #[inline]
    #[must_use]
    pub const fn priority(&self) -> f64 {
        self.priority
    }

    /// Known to the client and not leaving.
    #[inline]
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.alias.is_some() && !self.flags.contains(CacheFlags::GONE)
    }

    /// Waiting for an alias.
    #[inline]
    #[must_use]
    pub fn wants_enter(&self) -> bool {
        self.alias.is_none() && !self.flags.contains(CacheFlags::GONE)
    }

    /// Writes the entry for an offload.
    pub fn write(&self, stream: &mut BinaryOStream) {
        stream.write_u32(self.id.0);
        stream.write_u8(self.flags.bits());
        match self.alias {
            Some(alias) => {
                stream.write_bool(true);
                stream.write_u8(alias.0);
            }
            None => stream.write_bool(false),
        }
        stream.write_u64(self.priority.to_bits());
        stream.write_u8(self.lod);
        match self.last_volatile {
            Some(volatile) => {
                stream.write_bool(true);
                stream.write_u32(volatile);
            }
            None => stream.write_bool(false),
        }
    }

    /// Reads an entry written by [`EntityCache::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or the flags are invalid.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        let id = EntityId(stream.read_u32()?);
        let bits = stream.read_u8()?;
        if bits & !CacheFlags::ALL != 0 {
            return Err(StreamError::InvalidValue {
                what: "entity cache flags",
                value: u64::from(bits),
            });
        }
        let alias = if stream.read_bool()? {
            Some(IdAlias(stream.read_u8()?))
        } else {
            None
        };
        let priority = f64::from_bits(stream.read_u64()?);
        let lod = stream.read_u8()?;
        let last_volatile = if stream.read_bool()? {
            Some(stream.read_u32()?)
        } else {
            None
        };
        Ok(Self {
            id,
            flags: CacheFlags(bits),
            alias,
            priority,
            lod,
            last_volatile,
        })
    }
}

/// Free list of the client's one-byte aliases.
#[derive(Clone, Debug)]
pub struct AliasPool {
    free: Vec<u8>,
}

impl AliasPool {
    /// A pool with every alias free. Lower aliases are handed out first.
    #[must_use]
    pub fn new() -> Self {
        let top = u8::try_from(MAX_ID_ALIASES - 1).unwrap_or(u8::MAX);
        Self {
            free: (0..=top).rev().collect(),
        }
    }

    /// Number of free aliases.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Takes a free alias.
    pub fn allocate(&mut self) -> Option<IdAlias> {
        self.free.pop().map(IdAlias)
    }

    /// Returns an alias to the pool.
    pub fn release(&mut self, alias: IdAlias) {
        debug_assert!(!self.free.contains(&alias.0), "alias {} released twice", alias.0);
        self.free.push(alias.0);
    }

    /// Takes a specific alias, e.g. one restored after an offload.
    /// Returns false if it is not free.
    pub fn claim(&mut self, alias: IdAlias) -> bool {
        match self.free.iter().position(|a| *a == alias.0) {
            Some(index) => {
                self.free.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Default for AliasPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = CacheFlags::ENTER_PENDING;
        flags.insert(CacheFlags::WITHHELD);
        assert!(flags.contains(CacheFlags::WITHHELD));
        flags.remove(CacheFlags::ENTER_PENDING);
        assert!(!flags.contains(CacheFlags::ENTER_PENDING));
        assert_eq!(flags.bits(), 0x04);
    }

    #[test]
    fn test_alias_pool_exhaustion() {
        let mut pool = AliasPool::new();
        assert_eq!(pool.allocate(), Some(IdAlias(0)));
        for _ in 1..MAX_ID_ALIASES {
            assert!(pool.allocate().is_some());
        }
        assert_eq!(pool.allocate(), None);

        pool.release(IdAlias(17));
        assert_eq!(pool.allocate(), Some(IdAlias(17)));
    }

    #[test]
    fn test_claim() {
        let mut pool = AliasPool::new();
        assert!(pool.claim(IdAlias(200)));
        assert!(!pool.claim(IdAlias(200)));
        assert_eq!(pool.available(), MAX_ID_ALIASES - 1);
    }

    #[test]
    fn test_entry_stream() {
        let mut entry = EntityCache::new(EntityId(12));
        entry.alias = Some(IdAlias(3));
        entry.flags = CacheFlags::empty();
        entry.priority = 41.5;
        entry.lod = 2;
        entry.last_volatile = Some(9);

        let mut out = BinaryOStream::new();
        entry.write(&mut out);
        let mut input = BinaryIStream::new(out.as_slice());
        assert_eq!(EntityCache::read(&mut input).unwrap(), entry);
        assert!(input.finish().is_ok());
    }

    #[test]
    fn test_bad_flags_rejected() {
        let mut out = BinaryOStream::new();
        out.write_u32(1);
        out.write_u8(0x80);
        assert!(EntityCache::read(&mut BinaryIStream::new(out.as_slice())).is_err());
    }
}
