//! # Witness
//!
//! Area-of-interest manager of a real entity with a client attached.
//!
//! ## Architecture
//!
//! ```text
//!              leave trigger (radius + hysteresis)
//!        ┌───────────────────────────────────────┐
//!        │        enter trigger (radius)         │
//!        │    ┌─────────────────────────────┐    │
//!        │    │                             │    │
//!        │    │            (W)              │    │
//!        │    │                             │    │
//!        │    └─────────────────────────────┘    │
//!        └───────────────────────────────────────┘
//!
//!   enter trigger, entered  ─▶ cache entry ENTER_PENDING
//!   leave trigger, left     ─▶ cache entry GONE
//!   everything else         ─▶ ignored
//! ```
//!
//! An entity has to come within `radius` to be seen and go beyond
//! `radius + hysteresis` to stop being seen, so one hovering on the edge
//! does not flicker in and out.
//!
//! ## Per-tick update
//!
//! 1. Leaves for `GONE` entries (always sent).
//! 2. Enters, nearest first. Each takes a one-byte alias. With the pool
//!    empty, an entity strictly further away is evicted (leave sent, entry
//!    kept as `WITHHELD`) to make room, otherwise the newcomer is withheld.
//! 3. Updates in priority order. Priority is a virtual time: each update
//!    pushes the entry back by `distance * (lod + 1)`, so near entities are
//!    refreshed often and far ones still get their turn.
//!
//! Enters and updates stop when the tick's byte budget is used up; what is
//! left over goes first next tick.

mod entity_cache;

use std::collections::BTreeMap;

use meridian_core::{BinaryIStream, BinaryOStream, StreamError, StreamResult};
use meridian_shared::{Direction, EntityId, IdAlias, Vec3};
use tracing::trace;

use crate::config::WitnessConfig;
use crate::message::ClientMessage;
use crate::range_list::{Crossing, NodeId, RangeList, TriggerId, TriggerOwner};

pub use entity_cache::{AliasPool, CacheFlags, EntityCache};

/// What a witness needs to know about an entity it can see.
#[derive(Clone, Copy, Debug)]
pub struct WitnessSubject {
    /// Entity type.
    pub entity_type: u16,
    /// Position.
    pub position: Vec3,
    /// Direction.
    pub direction: Direction,
    /// Volatile update number.
    pub volatile_number: u32,
}

/// Witness state carried across an offload.
#[derive(Clone, Debug, PartialEq)]
pub struct WitnessData {
    /// AoI radius.
    pub radius: f32,
    /// Extra leave distance.
    pub hysteresis: f32,
    /// Cache entries.
    pub entries: Vec<EntityCache>,
}

impl WitnessData {
    /// Writes the witness data.
    pub fn write(&self, stream: &mut BinaryOStream) {
        stream.write_f32(self.radius);
        stream.write_f32(self.hysteresis);
        stream.write_u32(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        for entry in &self.entries {
            entry.write(stream);
        }
    }

    /// Reads witness data written by [`WitnessData::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or a value is invalid.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        let radius = stream.read_f32()?;
        let hysteresis = stream.read_f32()?;
        if !(radius > 0.0 && radius.is_finite() && hysteresis >= 0.0 && hysteresis.is_finite()) {
            return Err(StreamError::InvalidValue {
                what: "witness radius",
                value: u64::from(radius.to_bits()),
            });
        }
        let count = stream.read_u32()?;
        let mut entries = Vec::with_capacity((count as usize).min(stream.remaining() / 8));
        for _ in 0..count {
            entries.push(EntityCache::read(stream)?);
        }
        Ok(Self {
            radius,
            hysteresis,
            entries,
        })
    }
}

/// Area-of-interest manager of one entity.
#[derive(Debug)]
pub struct Witness {
    entity: EntityId,
    radius: f32,
    hysteresis: f32,
    enter_trigger: Option<TriggerId>,
    leave_trigger: Option<TriggerId>,
    cache: BTreeMap<EntityId, EntityCache>,
    aliases: AliasPool,
    /// Priority of the last entry updated.
    virtual_time: f64,
    config: WitnessConfig,
}

impl Witness {
    /// Creates a detached witness.
    #[must_use]
    pub fn new(entity: EntityId, radius: f32, hysteresis: f32, config: WitnessConfig) -> Self {
        Self {
            entity,
            radius,
            hysteresis,
            enter_trigger: None,
            leave_trigger: None,
            cache: BTreeMap::new(),
            aliases: AliasPool::new(),
            virtual_time: 0.0,
            config,
        }
    }

    /// Rebuilds a witness from offloaded state. Aliases in the entries stay
    /// with their entities; a duplicate alias is dropped and its entity
    /// re-entered.
    #[must_use]
    pub fn from_data(entity: EntityId, data: WitnessData, config: WitnessConfig) -> Self {
        let mut witness = Self::new(entity, data.radius, data.hysteresis, config);
        witness.virtual_time = data
            .entries
            .iter()
            .map(|e| e.priority)
            .min_by(f64::total_cmp)
            .unwrap_or(0.0);
        for mut entry in data.entries {
            if let Some(alias) = entry.alias {
                if !witness.aliases.claim(alias) {
                    entry.alias = None;
                    entry.flags.insert(CacheFlags::ENTER_PENDING);
                }
            }
            witness.cache.insert(entry.id(), entry);
        }
        witness
    }

    /// State to carry across an offload.
    #[must_use]
    pub fn to_data(&self) -> WitnessData {
        WitnessData {
            radius: self.radius,
            hysteresis: self.hysteresis,
            entries: self.cache.values().cloned().collect(),
        }
    }

    /// The witnessing entity.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// AoI radius.
    #[inline]
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// Extra leave distance.
    #[inline]
    #[must_use]
    pub const fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    /// Cache entry of an entity.
    #[must_use]
    pub fn entry(&self, id: EntityId) -> Option<&EntityCache> {
        self.cache.get(&id)
    }

    /// Number of cache entries, pending and leaving ones included.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.cache.len()
    }

    /// Entities the client currently knows about.
    #[must_use]
    pub fn visible(&self) -> Vec<EntityId> {
        self.cache
            .values()
            .filter(|e| e.is_visible())
            .map(EntityCache::id)
            .collect()
    }

    /// Free aliases.
    #[must_use]
    pub fn free_aliases(&self) -> usize {
        self.aliases.available()
    }

    // =========================================================================
    // TRIGGERS
    // =========================================================================

    /// Inserts the two triggers around `node`.
    pub fn attach(&mut self, range_list: &mut RangeList, node: NodeId) {
        let entity = self.entity;
        self.leave_trigger = Some(range_list.add_trigger(
            node,
            self.radius + self.hysteresis,
            TriggerOwner::AoiLeave { entity },
        ));
        self.enter_trigger = Some(range_list.add_trigger(
            node,
            self.radius,
            TriggerOwner::AoiEnter { entity },
        ));
    }

    /// Removes the triggers without reporting leaves.
    pub fn detach(&mut self, range_list: &mut RangeList) {
        let triggers = [self.enter_trigger.take(), self.leave_trigger.take()];
        for trigger in triggers.into_iter().flatten() {
            range_list.remove_trigger_without_contracting(trigger);
        }
    }

    /// Changes radius and hysteresis. The outer trigger grows first and
    /// shrinks last so the enter trigger always stays inside it.
    pub fn set_radius(&mut self, range_list: &mut RangeList, radius: f32, hysteresis: f32) {
        let growing = radius + hysteresis >= self.radius + self.hysteresis;
        self.radius = radius;
        self.hysteresis = hysteresis;
        let (Some(enter), Some(leave)) = (self.enter_trigger, self.leave_trigger) else {
            return;
        };
        if growing {
            range_list.set_range(leave, radius + hysteresis);
            range_list.set_range(enter, radius);
        } else {
            range_list.set_range(enter, radius);
            range_list.set_range(leave, radius + hysteresis);
        }
    }

    /// Feeds a crossing of one of the witness triggers.
    pub fn handle_crossing(&mut self, crossing: &Crossing) {
        match crossing.owner {
            TriggerOwner::AoiEnter { .. }
                if crossing.entered && self.enter_trigger == Some(crossing.trigger) =>
            {
                self.on_enter(crossing.who);
            }
            TriggerOwner::AoiLeave { .. }
                if !crossing.entered && self.leave_trigger == Some(crossing.trigger) =>
            {
                self.on_leave(crossing.who);
            }
            _ => {}
        }
    }

    /// Marks entries outside the leave trigger as gone. Run after the
    /// triggers are re-inserted on a new cell.
    pub fn reconcile(&mut self, range_list: &RangeList) {
        let Some(leave) = self.leave_trigger else {
            return;
        };
        let mut inside = range_list.trigger_members(leave);
        inside.sort_unstable();
        let missing: Vec<EntityId> = self
            .cache
            .keys()
            .filter(|id| inside.binary_search(id).is_err())
            .copied()
            .collect();
        for id in missing {
            self.on_leave(id);
        }
    }

    fn on_enter(&mut self, id: EntityId) {
        match self.cache.get_mut(&id) {
            Some(entry) => entry.flags.remove(CacheFlags::GONE),
            None => {
                let mut entry = EntityCache::new(id);
                entry.priority = self.virtual_time;
                self.cache.insert(id, entry);
            }
        }
    }

    fn on_leave(&mut self, id: EntityId) {
        let Some(entry) = self.cache.get_mut(&id) else {
            return;
        };
        if entry.alias.is_none() {
            // Never reached the client.
            self.cache.remove(&id);
        } else {
            entry.flags.insert(CacheFlags::GONE);
        }
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Level of detail for a distance.
    #[must_use]
    pub fn lod_for(&self, distance: f32) -> u8 {
        let level = self
            .config
            .lod_distances
            .iter()
            .position(|d| distance <= *d)
            .unwrap_or(self.config.lod_distances.len());
        u8::try_from(level).unwrap_or(u8::MAX)
    }

    /// Produces this tick's client messages.
    ///
    /// # Arguments
    ///
    /// * `origin` - Position of the witnessing entity
    /// * `lookup` - Current state of an entity in the cell, `None` if gone
    /// * `out` - Receives the messages
    ///
    /// # Returns
    ///
    /// Bytes produced.
    pub fn update(
        &mut self,
        origin: Vec3,
        lookup: impl Fn(EntityId) -> Option<WitnessSubject>,
        out: &mut Vec<ClientMessage>,
    ) -> usize {
        let budget = self.config.bandwidth_per_tick;
        let mut used = self.send_leaves(&lookup, out);

        // Enters, nearest first.
        let mut candidates: Vec<(f32, EntityId, WitnessSubject)> = self
            .cache
            .values()
            .filter(|e| e.wants_enter())
            .filter_map(|e| lookup(e.id()).map(|s| (s.position.distance(origin), e.id(), s)))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (distance, id, subject) in candidates {
            let lod = self.lod_for(distance);
            // An eviction costs a leave on top of the enter.
            let eviction = if self.aliases.available() == 0 {
                ClientMessage::LEAVE_AOI_LEN
            } else {
                0
            };
            if used + ClientMessage::ENTER_AOI_LEN + eviction > budget {
                break;
            }
            let Some(alias) = self.take_alias(distance, origin, &lookup, out, &mut used) else {
                if let Some(entry) = self.cache.get_mut(&id) {
                    entry.flags.insert(CacheFlags::WITHHELD);
                }
                continue;
            };
            let message = ClientMessage::EnterAoI {
                entity: id,
                alias,
                entity_type: subject.entity_type,
                position: subject.position,
                direction: subject.direction,
                lod,
            };
            used += message.encoded_len();
            out.push(message);

            let priority = self.virtual_time + self.priority_delta(distance, lod);
            if let Some(entry) = self.cache.get_mut(&id) {
                entry.alias = Some(alias);
                entry.flags.remove(CacheFlags::ENTER_PENDING);
                entry.flags.remove(CacheFlags::WITHHELD);
                entry.lod = lod;
                entry.last_volatile = Some(subject.volatile_number);
                entry.priority = priority;
            }
        }

        // Updates, most overdue first.
        let mut order: Vec<(f64, EntityId)> = self
            .cache
            .values()
            .filter(|e| e.is_visible())
            .map(|e| (e.priority, e.id()))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (priority, id) in order {
            let (Some(subject), Some(entry)) = (lookup(id), self.cache.get(&id)) else {
                continue;
            };
            let Some(alias) = entry.alias else {
                continue;
            };
            let distance = subject.position.distance(origin);
            let lod = self.lod_for(distance);

            let mut messages = Vec::with_capacity(2);
            if entry.last_volatile != Some(subject.volatile_number) {
                messages.push(ClientMessage::AvatarUpdate {
                    alias,
                    position: subject.position,
                    direction: subject.direction,
                });
            }
            if lod != entry.lod {
                messages.push(ClientMessage::DetailLevel { alias, lod });
            }
            if messages.is_empty() {
                continue;
            }
            let size: usize = messages.iter().map(ClientMessage::encoded_len).sum();
            if used + size > budget {
                break;
            }
            used += size;
            out.extend(messages);

            self.virtual_time = self.virtual_time.max(priority);
            let delta = self.priority_delta(distance, lod);
            if let Some(entry) = self.cache.get_mut(&id) {
                entry.last_volatile = Some(subject.volatile_number);
                entry.lod = lod;
                entry.priority = priority + delta;
            }
        }

        trace!(entity = %self.entity, used, budget, "witness update");
        used
    }

    fn priority_delta(&self, distance: f32, lod: u8) -> f64 {
        (f64::from(distance) * f64::from(lod + 1)).max(self.config.min_priority_delta)
    }

    fn send_leaves(
        &mut self,
        lookup: &impl Fn(EntityId) -> Option<WitnessSubject>,
        out: &mut Vec<ClientMessage>,
    ) -> usize {
        let leaving: Vec<EntityId> = self
            .cache
            .values()
            .filter(|e| e.flags.contains(CacheFlags::GONE) || lookup(e.id()).is_none())
            .map(EntityCache::id)
            .collect();

        let mut used = 0;
        for id in leaving {
            let Some(entry) = self.cache.remove(&id) else {
                continue;
            };
            if let Some(alias) = entry.alias {
                self.aliases.release(alias);
                let message = ClientMessage::LeaveAoI { entity: id, alias };
                used += message.encoded_len();
                out.push(message);
            }
        }
        used
    }

    /// A free alias, or one taken from the visible entity furthest away if
    /// it is strictly further than `distance`.
    fn take_alias(
        &mut self,
        distance: f32,
        origin: Vec3,
        lookup: &impl Fn(EntityId) -> Option<WitnessSubject>,
        out: &mut Vec<ClientMessage>,
        used: &mut usize,
    ) -> Option<IdAlias> {
        if let Some(alias) = self.aliases.allocate() {
            return Some(alias);
        }

        let (victim_distance, victim) = self
            .cache
            .values()
            .filter(|e| e.is_visible())
            .filter_map(|e| lookup(e.id()).map(|s| (s.position.distance(origin), e.id())))
            .max_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))?;
        if victim_distance <= distance {
            return None;
        }

        let entry = self.cache.get_mut(&victim)?;
        let alias = entry.alias.take()?;
        entry.flags.insert(CacheFlags::WITHHELD);
        let message = ClientMessage::LeaveAoI { entity: victim, alias };
        *used += message.encoded_len();
        out.push(message);
        trace!(witness = %self.entity, evicted = %victim, "alias pool exhausted");
        Some(alias)
    }
}
