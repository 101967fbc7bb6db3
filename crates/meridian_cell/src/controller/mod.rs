//! # Controllers
//!
//! Behaviour attached to an entity: timers, traps, movement.
//!
//! ## Lifecycle
//!
//! ```text
//!   UNATTACHED ──attach──▶ RUNNING ──cancel──▶ CANCELLING ──stop──▶ DETACHED
//!                             │
//!                   offload / onload keep it RUNNING,
//!                   only the real half stops and restarts
//! ```
//!
//! ## Domains
//!
//! A controller type declares which copies of an entity it lives on:
//!
//! - `GHOST`: every copy. Its ghost half is created on each haunt and
//!   kept in sync with [`Controller::write_ghost_to_stream`].
//! - `REAL`: only the real entity. Its state moves with the real entity
//!   on offload through [`Controller::write_real_to_stream`].
//! - `BOTH`: a ghost half everywhere plus a real half on the real.
//!
//! ## Re-entrancy
//!
//! A controller never calls back into the cell while it runs. It records
//! what it wants through its [`ControllerContext`] (cancel itself, move
//! the entity, resend its ghost state, notify script) and the cell applies
//! those requests once the call has returned, after checking that the
//! entity and the controller are both still there.

mod controllers;
mod move_to_point;
mod proximity;
mod registry;
mod timer;

use std::any::Any;

use meridian_core::{
    BinaryIStream, BinaryOStream, StreamResult, TimeQueue, TimeStamp, TimerHandle, UserData,
};
use meridian_shared::{ControllerId, Direction, EntityId, GameTime, Vec3};

use crate::range_list::{Crossing, NodeId, RangeList};

pub use controllers::{
    read_record_list, record_of, write_record_list, ControllerRecord, Controllers,
};
pub use move_to_point::MoveToPointController;
pub use proximity::ProximityController;
pub use registry::{ControllerFactory, ControllerInfo, ControllerRegistry};
pub use timer::TimerController;

// ============================================================================
// BASE TYPES
// ============================================================================

/// Wire tag of a registered controller type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ControllerTypeId(pub u16);

/// Which copies of an entity a controller runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerDomain(u8);

impl ControllerDomain {
    /// Runs on ghosts (and the ghost half of the real).
    pub const GHOST: Self = Self(0x01);
    /// Runs on the real entity only.
    pub const REAL: Self = Self(0x02);
    /// Ghost half everywhere, real half on the real.
    pub const BOTH: Self = Self(0x03);

    /// Returns true if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Parses raw bits. Zero and unknown bits are rejected.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1..=3 => Some(Self(bits)),
            _ => None,
        }
    }
}

/// Controller lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// Created but not yet attached to an entity.
    Unattached,
    /// Attached and started.
    Running,
    /// Cancel in progress; its stop hooks are running.
    Cancelling,
    /// Removed from its entity. Never touched again.
    Detached,
}

/// Fields every controller carries.
#[derive(Clone, Debug)]
pub struct ControllerBase {
    id: ControllerId,
    type_id: ControllerTypeId,
    domain: ControllerDomain,
    user_arg: i32,
    state: ControllerState,
    entity: EntityId,
}

impl ControllerBase {
    /// Creates a detached base. The registry fills in type and domain.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: ControllerId::NULL,
            type_id: ControllerTypeId(0),
            domain: ControllerDomain::REAL,
            user_arg: 0,
            state: ControllerState::Unattached,
            entity: EntityId::NULL,
        }
    }

    /// Controller ID, unique within its entity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ControllerId {
        self.id
    }

    /// Registered type.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> ControllerTypeId {
        self.type_id
    }

    /// Domain of the registered type.
    #[inline]
    #[must_use]
    pub const fn domain(&self) -> ControllerDomain {
        self.domain
    }

    /// Opaque argument handed back to script with every callback.
    #[inline]
    #[must_use]
    pub const fn user_arg(&self) -> i32 {
        self.user_arg
    }

    /// Lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    /// Owning entity.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    /// True while the controller is running.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state == ControllerState::Running
    }

    pub(crate) fn set_type(&mut self, type_id: ControllerTypeId, domain: ControllerDomain) {
        self.type_id = type_id;
        self.domain = domain;
    }

    pub(crate) fn attach(&mut self, entity: EntityId, id: ControllerId, user_arg: i32) {
        debug_assert_eq!(self.state, ControllerState::Unattached);
        self.entity = entity;
        self.id = id;
        self.user_arg = user_arg;
        self.state = ControllerState::Running;
    }

    pub(crate) fn set_state(&mut self, state: ControllerState) {
        self.state = state;
    }

    pub(crate) fn set_user_arg(&mut self, user_arg: i32) {
        self.user_arg = user_arg;
    }
}

impl Default for ControllerBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Time queue payload: which controller a timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerTarget {
    /// Owning entity.
    pub entity: EntityId,
    /// Owning controller.
    pub controller: ControllerId,
}

/// Notification for the scripting layer.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptCallback {
    /// A timer controller fired.
    OnTimer {
        /// Entity owning the timer.
        entity: EntityId,
        /// The timer controller.
        controller: ControllerId,
        /// Its user argument.
        user_arg: i32,
    },
    /// An entity entered a proximity trap.
    OnEnterTrap {
        /// Entity owning the trap.
        entity: EntityId,
        /// Entity that entered.
        other: EntityId,
        /// Trap range.
        range: f32,
        /// The proximity controller.
        controller: ControllerId,
        /// Its user argument.
        user_arg: i32,
    },
    /// An entity left a proximity trap.
    OnLeaveTrap {
        /// Entity owning the trap.
        entity: EntityId,
        /// Entity that left.
        other: EntityId,
        /// Trap range.
        range: f32,
        /// The proximity controller.
        controller: ControllerId,
        /// Its user argument.
        user_arg: i32,
    },
    /// An entity that was trapped before an offload is not present on the
    /// new cell. Only its ID is known.
    OnLeaveTrapId {
        /// Entity owning the trap.
        entity: EntityId,
        /// ID of the missing entity.
        other: EntityId,
        /// Trap range.
        range: f32,
        /// The proximity controller.
        controller: ControllerId,
        /// Its user argument.
        user_arg: i32,
    },
    /// A movement controller reached its destination.
    OnMove {
        /// Entity that moved.
        entity: EntityId,
        /// The movement controller.
        controller: ControllerId,
        /// Its user argument.
        user_arg: i32,
    },
    /// A teleported entity arrived on this cell.
    OnTeleportSuccess {
        /// The teleported entity.
        entity: EntityId,
    },
}

impl ScriptCallback {
    /// Entity the callback is delivered to.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match self {
            Self::OnTimer { entity, .. }
            | Self::OnEnterTrap { entity, .. }
            | Self::OnLeaveTrap { entity, .. }
            | Self::OnLeaveTrapId { entity, .. }
            | Self::OnMove { entity, .. }
            | Self::OnTeleportSuccess { entity } => *entity,
        }
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Snapshot of the owning entity taken when the context is built.
#[derive(Clone, Copy, Debug)]
pub struct EntityView {
    /// Entity ID.
    pub id: EntityId,
    /// Position.
    pub position: Vec3,
    /// Direction.
    pub direction: Direction,
    /// True on the real copy.
    pub is_real: bool,
    /// Range list node.
    pub node: NodeId,
}

/// Requests a controller made during a call, applied by the cell after it
/// returns.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControllerOutcome {
    /// Cancel the controller.
    pub cancel_self: bool,
    /// Resend the controller's ghost state to every haunt.
    pub ghost_dirty: bool,
    /// Move the owning entity.
    pub new_position: Option<(Vec3, Direction)>,
}

/// Everything a controller may touch while it runs.
pub struct ControllerContext<'a> {
    now: GameTime,
    entity: EntityView,
    range_list: &'a mut RangeList,
    timers: &'a mut TimeQueue<TimerTarget>,
    callbacks: &'a mut Vec<ScriptCallback>,
    outcome: ControllerOutcome,
}

impl<'a> ControllerContext<'a> {
    /// Builds a context for one call.
    pub fn new(
        now: GameTime,
        entity: EntityView,
        range_list: &'a mut RangeList,
        timers: &'a mut TimeQueue<TimerTarget>,
        callbacks: &'a mut Vec<ScriptCallback>,
    ) -> Self {
        Self {
            now,
            entity,
            range_list,
            timers,
            callbacks,
            outcome: ControllerOutcome::default(),
        }
    }

    /// Current game time.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> GameTime {
        self.now
    }

    /// The owning entity.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> &EntityView {
        &self.entity
    }

    /// The cell's range list.
    pub fn range_list(&mut self) -> &mut RangeList {
        self.range_list
    }

    /// Read-only view of the range list.
    #[must_use]
    pub fn range_list_ref(&self) -> &RangeList {
        self.range_list
    }

    /// Schedules a timer owned by `controller`.
    pub fn add_timer(
        &mut self,
        controller: ControllerId,
        start: TimeStamp,
        interval: TimeStamp,
        user_data: UserData,
    ) -> TimerHandle {
        let target = TimerTarget {
            entity: self.entity.id,
            controller,
        };
        self.timers.add(start, interval, target, user_data)
    }

    /// Cancels a timer. Unknown handles are ignored.
    pub fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    /// Next expiry of a live timer.
    #[must_use]
    pub fn timer_time(&self, handle: TimerHandle) -> Option<TimeStamp> {
        self.timers.time_of(handle)
    }

    /// Repeat interval of a live timer.
    #[must_use]
    pub fn timer_interval(&self, handle: TimerHandle) -> Option<TimeStamp> {
        self.timers.interval_of(handle)
    }

    /// Queues a script callback.
    pub fn notify(&mut self, callback: ScriptCallback) {
        self.callbacks.push(callback);
    }

    /// Asks the cell to cancel the calling controller.
    pub fn cancel_self(&mut self) {
        self.outcome.cancel_self = true;
    }

    /// Asks the cell to resend the calling controller's ghost state.
    pub fn mark_ghost_dirty(&mut self) {
        self.outcome.ghost_dirty = true;
    }

    /// Asks the cell to move the owning entity.
    pub fn move_entity(&mut self, position: Vec3, direction: Direction) {
        self.outcome.new_position = Some((position, direction));
    }

    /// Requests recorded so far.
    #[must_use]
    pub const fn outcome(&self) -> ControllerOutcome {
        self.outcome
    }
}

// ============================================================================
// CONTROLLER TRAIT
// ============================================================================

/// Polymorphic behaviour attached to an entity.
///
/// Every hook has a default so a type only implements what it uses.
/// Stream methods write the subtype's own fields; the base fields
/// (type, ID, user argument) are written by [`Controllers`] before them.
pub trait Controller: Send {
    /// Common controller fields.
    fn base(&self) -> &ControllerBase;

    /// Common controller fields, mutable.
    fn base_mut(&mut self) -> &mut ControllerBase;

    /// Name the type is registered under.
    fn type_name(&self) -> &'static str;

    /// Category of which an entity may run only one controller at a time.
    fn exclusive_class(&self) -> Option<&'static str> {
        None
    }

    /// Starts the real half. `is_initial` is false after an onload.
    fn start_real(&mut self, ctx: &mut ControllerContext<'_>, is_initial: bool) {
        let _ = (ctx, is_initial);
    }

    /// Stops the real half. `is_final` is false before an offload.
    fn stop_real(&mut self, ctx: &mut ControllerContext<'_>, is_final: bool) {
        let _ = (ctx, is_final);
    }

    /// Starts the ghost half.
    fn start_ghost(&mut self, ctx: &mut ControllerContext<'_>) {
        let _ = ctx;
    }

    /// Stops the ghost half.
    fn stop_ghost(&mut self, ctx: &mut ControllerContext<'_>) {
        let _ = ctx;
    }

    /// Writes the real state carried on offload.
    fn write_real_to_stream(&self, stream: &mut BinaryOStream, ctx: &ControllerContext<'_>) {
        let _ = (stream, ctx);
    }

    /// Reads the state written by [`Controller::write_real_to_stream`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or holds a bad value.
    fn read_real_from_stream(&mut self, stream: &mut BinaryIStream<'_>) -> StreamResult<()> {
        let _ = stream;
        Ok(())
    }

    /// Writes the state mirrored on ghosts.
    fn write_ghost_to_stream(&self, stream: &mut BinaryOStream) {
        let _ = stream;
    }

    /// Reads the state written by [`Controller::write_ghost_to_stream`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or holds a bad value.
    fn read_ghost_from_stream(&mut self, stream: &mut BinaryIStream<'_>) -> StreamResult<()> {
        let _ = stream;
        Ok(())
    }

    /// A timer owned by this controller fired.
    fn handle_timeout(
        &mut self,
        ctx: &mut ControllerContext<'_>,
        handle: TimerHandle,
        user_data: UserData,
    ) {
        let _ = (ctx, handle, user_data);
    }

    /// A timer owned by this controller left the queue.
    fn on_timer_released(&mut self, handle: TimerHandle) {
        let _ = handle;
    }

    /// A range trigger owned by this controller reported a crossing.
    fn on_crossing(&mut self, ctx: &mut ControllerContext<'_>, crossing: &Crossing) {
        let _ = (ctx, crossing);
    }

    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_bits() {
        assert!(ControllerDomain::BOTH.contains(ControllerDomain::GHOST));
        assert!(ControllerDomain::BOTH.contains(ControllerDomain::REAL));
        assert!(!ControllerDomain::REAL.contains(ControllerDomain::GHOST));
        assert_eq!(ControllerDomain::from_bits(3), Some(ControllerDomain::BOTH));
        assert_eq!(ControllerDomain::from_bits(0), None);
        assert_eq!(ControllerDomain::from_bits(4), None);
    }

    #[test]
    fn test_base_attach() {
        let mut base = ControllerBase::new();
        assert_eq!(base.state(), ControllerState::Unattached);
        assert!(!base.is_attached());

        base.attach(EntityId(3), ControllerId(7), -2);
        assert!(base.is_attached());
        assert_eq!(base.id(), ControllerId(7));
        assert_eq!(base.entity(), EntityId(3));
        assert_eq!(base.user_arg(), -2);
    }

    #[test]
    fn test_context_records_requests() {
        let mut range_list = RangeList::new();
        let node = range_list.add_entity(EntityId(1), 0.0, 0.0);
        let mut timers = TimeQueue::new();
        let mut callbacks = Vec::new();
        let view = EntityView {
            id: EntityId(1),
            position: Vec3::ZERO,
            direction: Direction::default(),
            is_real: true,
            node,
        };

        let mut ctx =
            ControllerContext::new(10, view, &mut range_list, &mut timers, &mut callbacks);
        let handle = ctx.add_timer(ControllerId(1), 15, 0, 0);
        assert_eq!(ctx.timer_time(handle), Some(15));
        ctx.cancel_self();
        ctx.move_entity(Vec3::new(1.0, 0.0, 1.0), Direction::default());
        ctx.notify(ScriptCallback::OnMove {
            entity: EntityId(1),
            controller: ControllerId(1),
            user_arg: 0,
        });

        let outcome = ctx.outcome();
        assert!(outcome.cancel_self);
        assert!(!outcome.ghost_dirty);
        assert!(outcome.new_position.is_some());
        assert_eq!(callbacks.len(), 1);
        assert_eq!(timers.size(), 1);
    }
}
