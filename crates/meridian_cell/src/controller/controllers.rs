//! Per-entity controller collection.

use std::collections::BTreeMap;

use meridian_core::{BinaryIStream, BinaryOStream, StreamResult};
use meridian_shared::ControllerId;

use super::{Controller, ControllerContext, ControllerDomain, ControllerTypeId};

/// Serialised controller: base fields plus the subtype's own stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerRecord {
    /// Registered type.
    pub type_id: ControllerTypeId,
    /// Controller ID.
    pub id: ControllerId,
    /// User argument.
    pub user_arg: i32,
    /// Subtype stream.
    pub data: Vec<u8>,
}

impl ControllerRecord {
    /// Writes the record.
    pub fn write(&self, stream: &mut BinaryOStream) {
        stream.write_u16(self.type_id.0);
        stream.write_u32(self.id.0);
        stream.write_i32(self.user_arg);
        stream.write_blob(&self.data);
    }

    /// Reads a record written by [`ControllerRecord::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        Ok(Self {
            type_id: ControllerTypeId(stream.read_u16()?),
            id: ControllerId(stream.read_u32()?),
            user_arg: stream.read_i32()?,
            data: stream.read_blob()?.to_vec(),
        })
    }
}

/// Controllers of one entity, keyed by ID.
#[derive(Default)]
pub struct Controllers {
    map: BTreeMap<ControllerId, Box<dyn Controller>>,
    last_allocated: u32,
}

impl Controllers {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of controllers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if there are none.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Last ID handed out. Carried across offloads so IDs are not reused
    /// soon after a migration.
    #[inline]
    #[must_use]
    pub const fn last_allocated(&self) -> u32 {
        self.last_allocated
    }

    pub(crate) fn set_last_allocated(&mut self, value: u32) {
        self.last_allocated = value;
    }

    /// Looks up a controller.
    #[must_use]
    pub fn get(&self, id: ControllerId) -> Option<&dyn Controller> {
        self.map.get(&id).map(|c| &**c)
    }

    /// Looks up a controller mutably.
    pub fn get_mut(&mut self, id: ControllerId) -> Option<&mut (dyn Controller + 'static)> {
        self.map.get_mut(&id).map(|c| &mut **c)
    }

    /// Returns true if the ID is in use.
    #[must_use]
    pub fn contains(&self, id: ControllerId) -> bool {
        self.map.contains_key(&id)
    }

    /// IDs in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ControllerId> {
        self.map.keys().copied().collect()
    }

    /// IDs of controllers whose domain includes `domain`.
    #[must_use]
    pub fn ids_in_domain(&self, domain: ControllerDomain) -> Vec<ControllerId> {
        self.map
            .iter()
            .filter(|(_, c)| c.base().domain().contains(domain))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Iterates controllers in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (ControllerId, &dyn Controller)> {
        self.map.iter().map(|(id, c)| (*id, &**c))
    }

    /// Running controller of an exclusive class, if any.
    #[must_use]
    pub fn find_exclusive(&self, class: &str) -> Option<ControllerId> {
        self.map
            .iter()
            .find(|(_, c)| c.base().is_attached() && c.exclusive_class() == Some(class))
            .map(|(id, _)| *id)
    }

    /// Allocates the next free ID by linear probing from the last one.
    /// Zero is never handed out.
    ///
    /// # Panics
    ///
    /// Panics if every ID is in use.
    pub fn allocate_id(&mut self) -> ControllerId {
        assert!(self.map.len() < u32::MAX as usize, "controller IDs exhausted");
        loop {
            self.last_allocated = self.last_allocated.wrapping_add(1);
            let candidate = ControllerId(self.last_allocated);
            if !candidate.is_null() && !self.map.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Inserts a controller under the ID in its base.
    ///
    /// # Panics
    ///
    /// Panics if the ID is null or already taken.
    pub fn insert(&mut self, controller: Box<dyn Controller>) {
        let id = controller.base().id();
        assert!(!id.is_null(), "controller inserted without an ID");
        let previous = self.map.insert(id, controller);
        assert!(previous.is_none(), "controller ID {id} inserted twice");
    }

    /// Removes a controller.
    pub fn remove(&mut self, id: ControllerId) -> Option<Box<dyn Controller>> {
        self.map.remove(&id)
    }

    /// Writes a record per controller whose domain includes `domain`,
    /// preceded by the count.
    ///
    /// Real records carry the real stream, ghost records the ghost stream.
    pub fn write_records(
        &self,
        stream: &mut BinaryOStream,
        domain: ControllerDomain,
        ctx: &ControllerContext<'_>,
    ) {
        let records: Vec<ControllerRecord> = self
            .map
            .values()
            .filter(|c| c.base().domain().contains(domain))
            .map(|c| record_of(&**c, domain, ctx))
            .collect();
        write_record_list(stream, &records);
    }
}

/// Serialises one controller's `domain` half.
#[must_use]
pub fn record_of(
    controller: &dyn Controller,
    domain: ControllerDomain,
    ctx: &ControllerContext<'_>,
) -> ControllerRecord {
    let mut data = BinaryOStream::new();
    if domain == ControllerDomain::GHOST {
        controller.write_ghost_to_stream(&mut data);
    } else {
        controller.write_real_to_stream(&mut data, ctx);
    }
    let base = controller.base();
    ControllerRecord {
        type_id: base.type_id(),
        id: base.id(),
        user_arg: base.user_arg(),
        data: data.into_inner(),
    }
}

/// Writes a count-prefixed record list.
pub fn write_record_list(stream: &mut BinaryOStream, records: &[ControllerRecord]) {
    let count = u32::try_from(records.len()).unwrap_or(u32::MAX);
    stream.write_u32(count);
    for record in records.iter().take(count as usize) {
        record.write(stream);
    }
}

/// Reads a list written by [`write_record_list`].
///
/// # Errors
///
/// Returns an error if the stream is short.
pub fn read_record_list(stream: &mut BinaryIStream<'_>) -> StreamResult<Vec<ControllerRecord>> {
    let count = stream.read_u32()?;
    // Every record is at least 14 bytes; cap the reservation by what the
    // stream can hold.
    let mut records = Vec::with_capacity((count as usize).min(stream.remaining() / 14));
    for _ in 0..count {
        records.push(ControllerRecord::read(stream)?);
    }
    Ok(records)
}
