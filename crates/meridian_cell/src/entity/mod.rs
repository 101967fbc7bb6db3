//! # Entities
//!
//! An entity exists once as a *real* copy, which is authoritative, and as
//! any number of *ghosts* on neighbouring cells, which mirror it.
//!
//! ## Architecture
//!
//! ```text
//!        cell A                         cell B
//!   ┌─────────────────┐  ghost data  ┌─────────────────┐
//!   │ Entity (real)   │─────────────▶│ Entity (ghost)  │
//!   │  + RealEntity   │  position,   │  real_addr = A  │
//!   │    haunts = [B] │  ghost ctrls │                 │
//!   └─────────────────┘              └─────────────────┘
//!            │   offload: real data, then A keeps a ghost
//!            ▼
//!   ┌─────────────────┐              ┌─────────────────┐
//!   │ Entity (ghost)  │◀─────────────│ Entity (real)   │
//!   │  real_addr = B  │              │    haunts = [A] │
//!   └─────────────────┘              └─────────────────┘
//! ```
//!
//! Cells refer to each other by [`Address`] only. An entity never holds a
//! pointer to another entity or to a cell.

mod data;
mod real;

use meridian_shared::{Address, Direction, EntityId, GameTime, Vec3};

use crate::controller::{Controllers, EntityView};
use crate::range_list::NodeId;

pub use data::{read_address, write_address, GhostData, RealData};
pub use real::RealEntity;

/// One copy of an entity in a cell.
pub struct Entity {
    id: EntityId,
    entity_type: u16,
    position: Vec3,
    direction: Direction,
    /// Bumped on every position or direction change.
    volatile_number: u32,
    node: NodeId,
    pub(crate) controllers: Controllers,
    /// Cell holding the real copy. Our own address when real.
    real_addr: Address,
    num_times_real_offloaded: u32,
    destroyed: bool,
    pub(crate) real: Option<RealEntity>,
}

impl Entity {
    /// Creates a real entity.
    pub(crate) fn new_real(
        id: EntityId,
        entity_type: u16,
        position: Vec3,
        direction: Direction,
        node: NodeId,
        own_addr: Address,
        now: GameTime,
    ) -> Self {
        Self {
            id,
            entity_type,
            position,
            direction,
            volatile_number: 0,
            node,
            controllers: Controllers::new(),
            real_addr: own_addr,
            num_times_real_offloaded: 0,
            destroyed: false,
            real: Some(RealEntity::new(position, now)),
        }
    }

    /// Creates a ghost from ghost data. Controllers are added by the caller.
    pub(crate) fn new_ghost(data: &GhostData, node: NodeId) -> Self {
        Self {
            id: data.id,
            entity_type: data.entity_type,
            position: data.position,
            direction: data.direction,
            volatile_number: data.volatile_number,
            node,
            controllers: Controllers::new(),
            real_addr: data.real_addr,
            num_times_real_offloaded: data.num_times_real_offloaded,
            destroyed: false,
            real: None,
        }
    }

    /// Entity ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Entity type.
    #[inline]
    #[must_use]
    pub const fn entity_type(&self) -> u16 {
        self.entity_type
    }

    /// Position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Direction.
    #[inline]
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Volatile update number.
    #[inline]
    #[must_use]
    pub const fn volatile_number(&self) -> u32 {
        self.volatile_number
    }

    /// Range list node.
    #[inline]
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// True for the authoritative copy.
    #[inline]
    #[must_use]
    pub const fn is_real(&self) -> bool {
        self.real.is_some()
    }

    /// Real-only state.
    #[inline]
    #[must_use]
    pub const fn real(&self) -> Option<&RealEntity> {
        self.real.as_ref()
    }

    /// Cell holding the real copy.
    #[inline]
    #[must_use]
    pub const fn real_addr(&self) -> Address {
        self.real_addr
    }

    /// How many times the real has moved between cells.
    #[inline]
    #[must_use]
    pub const fn num_times_real_offloaded(&self) -> u32 {
        self.num_times_real_offloaded
    }

    /// True once the entity has been destroyed.
    #[inline]
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// The entity's controllers.
    #[inline]
    #[must_use]
    pub const fn controllers(&self) -> &Controllers {
        &self.controllers
    }

    /// Snapshot for a controller call.
    #[must_use]
    pub const fn view(&self) -> EntityView {
        EntityView {
            id: self.id,
            position: self.position,
            direction: self.direction,
            is_real: self.real.is_some(),
            node: self.node,
        }
    }

    /// Ghost data describing this entity, with the real at `real_addr`.
    pub(crate) fn ghost_data(
        &self,
        real_addr: Address,
        controllers: Vec<crate::controller::ControllerRecord>,
    ) -> GhostData {
        GhostData {
            id: self.id,
            entity_type: self.entity_type,
            real_addr,
            position: self.position,
            direction: self.direction,
            volatile_number: self.volatile_number,
            num_times_real_offloaded: self.num_times_real_offloaded,
            controllers,
        }
    }

    pub(crate) fn set_volatile(&mut self, position: Vec3, direction: Direction) {
        self.position = position;
        self.direction = direction;
        self.volatile_number = self.volatile_number.wrapping_add(1);
    }

    /// Applies a position update from the real. Returns false if it is
    /// older than what the ghost already has.
    pub(crate) fn apply_ghost_update(
        &mut self,
        position: Vec3,
        direction: Direction,
        volatile_number: u32,
    ) -> bool {
        // Wrapping comparison: newer if within half the range ahead.
        if volatile_number.wrapping_sub(self.volatile_number) > u32::MAX / 2 {
            return false;
        }
        self.position = position;
        self.direction = direction;
        self.volatile_number = volatile_number;
        true
    }

    /// The real moved to `real_addr` without passing through this cell.
    pub(crate) fn real_moved(&mut self, real_addr: Address) {
        self.real_addr = real_addr;
        self.num_times_real_offloaded = self.num_times_real_offloaded.wrapping_add(1);
    }

    pub(crate) fn mark_offloaded(&mut self, destination: Address) -> Option<RealEntity> {
        self.num_times_real_offloaded = self.num_times_real_offloaded.wrapping_add(1);
        self.real_addr = destination;
        self.real.take()
    }

    pub(crate) fn make_real(
        &mut self,
        real: RealEntity,
        own_addr: Address,
        num_times_real_offloaded: u32,
    ) {
        self.real = Some(real);
        self.real_addr = own_addr;
        self.num_times_real_offloaded = num_times_real_offloaded;
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("type", &self.entity_type)
            .field("position", &self.position)
            .field("real", &self.is_real())
            .field("real_addr", &self.real_addr)
            .field("controllers", &self.controllers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_list::RangeList;

    #[test]
    fn test_real_and_ghost() {
        let mut list = RangeList::new();
        let node = list.add_entity(EntityId(1), 0.0, 0.0);
        let mut entity = Entity::new_real(
            EntityId(1),
            3,
            Vec3::ZERO,
            Direction::default(),
            node,
            Address::local(4001),
            0,
        );
        assert!(entity.is_real());
        assert_eq!(entity.real_addr(), Address::local(4001));

        let data = entity.ghost_data(Address::local(4001), Vec::new());
        let real = entity.mark_offloaded(Address::local(4002));
        assert!(real.is_some());
        assert!(!entity.is_real());
        assert_eq!(entity.num_times_real_offloaded(), 1);
        assert_eq!(data.num_times_real_offloaded, 0);
    }

    #[test]
    fn test_stale_ghost_update_ignored() {
        let mut list = RangeList::new();
        let node = list.add_entity(EntityId(1), 0.0, 0.0);
        let data = GhostData {
            id: EntityId(1),
            entity_type: 0,
            real_addr: Address::local(1),
            position: Vec3::ZERO,
            direction: Direction::default(),
            volatile_number: 10,
            num_times_real_offloaded: 0,
            controllers: Vec::new(),
        };
        let mut ghost = Entity::new_ghost(&data, node);

        assert!(!ghost.apply_ghost_update(Vec3::new(1.0, 0.0, 0.0), Direction::default(), 9));
        assert_eq!(ghost.position(), Vec3::ZERO);
        assert!(ghost.apply_ghost_update(Vec3::new(2.0, 0.0, 0.0), Direction::default(), 11));
        assert_eq!(ghost.volatile_number(), 11);
    }
}
