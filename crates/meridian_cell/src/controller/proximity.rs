//! # Proximity Controller
//!
//! A square trap centred on its entity. Entities moving into it produce
//! `OnEnterTrap`, entities moving out `OnLeaveTrap`.
//!
//! The set of trapped entities travels with an offload. When the real half
//! restarts on the new cell the trap is re-inserted there and compared
//! against that set:
//!
//! ```text
//!   trapped before   inside now   callback
//!   ──────────────   ──────────   ──────────────────────────────
//!        yes            yes       none
//!        no             yes       OnEnterTrap
//!        yes            no        OnLeaveTrap, or OnLeaveTrapId if
//!                                 the entity is not on this cell
//! ```

use std::any::Any;
use std::collections::BTreeSet;

use meridian_core::{BinaryIStream, BinaryOStream, StreamError, StreamResult};
use meridian_shared::EntityId;

use super::{Controller, ControllerBase, ControllerContext, ScriptCallback};
use crate::range_list::{Crossing, TriggerId, TriggerOwner};

/// Range trap around the owning entity.
#[derive(Debug, Default)]
pub struct ProximityController {
    base: ControllerBase,
    range: f32,
    trigger: Option<TriggerId>,
    trapped: BTreeSet<EntityId>,
}

impl ProximityController {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "Proximity";

    /// Creates a trap of half-width `range`.
    #[must_use]
    pub fn new(range: f32) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    /// Half-width of the trap square.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> f32 {
        self.range
    }

    /// Trigger in the range list while running.
    #[inline]
    #[must_use]
    pub const fn trigger(&self) -> Option<TriggerId> {
        self.trigger
    }

    /// Entities currently inside.
    #[must_use]
    pub fn trapped(&self) -> Vec<EntityId> {
        self.trapped.iter().copied().collect()
    }

    fn callback(
        &self,
        ctx: &ControllerContext<'_>,
        other: EntityId,
        kind: CallbackKind,
    ) -> ScriptCallback {
        let (entity, range, controller, user_arg) =
            (ctx.entity().id, self.range, self.base.id(), self.base.user_arg());
        match kind {
            CallbackKind::Enter => ScriptCallback::OnEnterTrap {
                entity,
                other,
                range,
                controller,
                user_arg,
            },
            CallbackKind::Leave => ScriptCallback::OnLeaveTrap {
                entity,
                other,
                range,
                controller,
                user_arg,
            },
            CallbackKind::LeaveId => ScriptCallback::OnLeaveTrapId {
                entity,
                other,
                range,
                controller,
                user_arg,
            },
        }
    }
}

#[derive(Clone, Copy)]
enum CallbackKind {
    Enter,
    Leave,
    LeaveId,
}

impl Controller for ProximityController {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ControllerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn start_real(&mut self, ctx: &mut ControllerContext<'_>, is_initial: bool) {
        let owner = TriggerOwner::Proximity {
            entity: ctx.entity().id,
            controller: self.base.id(),
        };
        let node = ctx.entity().node;
        let trigger = ctx.range_list().add_trigger(node, self.range, owner);
        self.trigger = Some(trigger);

        if is_initial {
            // Enters arrive through on_crossing like any other.
            return;
        }

        let inside: BTreeSet<EntityId> = ctx
            .range_list()
            .take_crossings_for(trigger)
            .into_iter()
            .filter(|c| c.entered)
            .map(|c| c.who)
            .collect();
        let before = std::mem::replace(&mut self.trapped, inside);

        for &other in self.trapped.difference(&before) {
            let callback = self.callback(ctx, other, CallbackKind::Enter);
            ctx.notify(callback);
        }
        for &other in before.difference(&self.trapped) {
            let kind = if ctx.range_list_ref().find_entity(other).is_some() {
                CallbackKind::Leave
            } else {
                CallbackKind::LeaveId
            };
            let callback = self.callback(ctx, other, kind);
            ctx.notify(callback);
        }
    }

    fn stop_real(&mut self, ctx: &mut ControllerContext<'_>, _is_final: bool) {
        if let Some(trigger) = self.trigger.take() {
            ctx.range_list().remove_trigger_without_contracting(trigger);
        }
    }

    fn write_real_to_stream(&self, stream: &mut BinaryOStream, _ctx: &ControllerContext<'_>) {
        stream.write_f32(self.range);
        stream.write_u32(u32::try_from(self.trapped.len()).unwrap_or(u32::MAX));
        for id in &self.trapped {
            stream.write_u32(id.0);
        }
    }

    fn read_real_from_stream(&mut self, stream: &mut BinaryIStream<'_>) -> StreamResult<()> {
        let range = stream.read_f32()?;
        if !(range > 0.0 && range.is_finite()) {
            return Err(StreamError::InvalidValue {
                what: "proximity range",
                value: u64::from(range.to_bits()),
            });
        }
        self.range = range;

        let count = stream.read_u32()?;
        self.trapped.clear();
        for _ in 0..count {
            self.trapped.insert(EntityId(stream.read_u32()?));
        }
        Ok(())
    }

    fn on_crossing(&mut self, ctx: &mut ControllerContext<'_>, crossing: &Crossing) {
        if self.trigger != Some(crossing.trigger) {
            return;
        }
        let kind = if crossing.entered {
            // Gone before the crossing got here.
            if ctx.range_list_ref().find_entity(crossing.who).is_none() {
                return;
            }
            if !self.trapped.insert(crossing.who) {
                return;
            }
            CallbackKind::Enter
        } else {
            if !self.trapped.remove(&crossing.who) {
                return;
            }
            CallbackKind::Leave
        };
        let callback = self.callback(ctx, crossing.who, kind);
        ctx.notify(callback);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{EntityView, TimerTarget};
    use crate::range_list::RangeList;
    use meridian_core::TimeQueue;
    use meridian_shared::{ControllerId, Direction, Vec3};

    fn view(range_list: &mut RangeList, x: f32, z: f32) -> EntityView {
        EntityView {
            id: EntityId(1),
            position: Vec3::new(x, 0.0, z),
            direction: Direction::default(),
            is_real: true,
            node: range_list.add_entity(EntityId(1), x, z),
        }
    }

    fn trap(range: f32) -> ProximityController {
        let mut trap = ProximityController::new(range);
        trap.base_mut().attach(EntityId(1), ControllerId(2), 9);
        trap
    }

    fn dispatch(
        trap: &mut ProximityController,
        view: EntityView,
        range_list: &mut RangeList,
        callbacks: &mut Vec<ScriptCallback>,
    ) {
        let mut timers: TimeQueue<TimerTarget> = TimeQueue::new();
        for crossing in range_list.take_crossings() {
            let mut ctx = ControllerContext::new(0, view, range_list, &mut timers, callbacks);
            trap.on_crossing(&mut ctx, &crossing);
        }
    }

    #[test]
    fn test_enter_and_leave() {
        let mut range_list = RangeList::new();
        let owner = view(&mut range_list, 0.0, 0.0);
        let other = range_list.add_entity(EntityId(5), 3.0, 3.0);
        let mut timers = TimeQueue::new();
        let mut callbacks = Vec::new();

        let mut proximity = trap(5.0);
        proximity.start_real(
            &mut ControllerContext::new(0, owner, &mut range_list, &mut timers, &mut callbacks),
            true,
        );
        dispatch(&mut proximity, owner, &mut range_list, &mut callbacks);
        assert_eq!(proximity.trapped(), vec![EntityId(5)]);
        assert!(matches!(
            callbacks[0],
            ScriptCallback::OnEnterTrap { other: EntityId(5), user_arg: 9, .. }
        ));

        range_list.move_node(other, 30.0, 3.0);
        dispatch(&mut proximity, owner, &mut range_list, &mut callbacks);
        assert!(proximity.trapped().is_empty());
        assert!(matches!(callbacks[1], ScriptCallback::OnLeaveTrap { other: EntityId(5), .. }));
    }

    #[test]
    fn test_restart_after_onload_reconciles_trapped_set() {
        let mut source = trap(5.0);
        source.trapped.extend([EntityId(5), EntityId(6), EntityId(7)]);

        let mut range_list = RangeList::new();
        let owner = view(&mut range_list, 0.0, 0.0);
        let mut timers = TimeQueue::new();
        let mut callbacks = Vec::new();

        let mut out = BinaryOStream::new();
        source.write_real_to_stream(
            &mut out,
            &ControllerContext::new(0, owner, &mut range_list, &mut timers, &mut callbacks),
        );

        // On the new cell: 5 still inside, 6 outside, 7 absent, 8 new.
        range_list.add_entity(EntityId(5), 1.0, 1.0);
        range_list.add_entity(EntityId(6), 50.0, 1.0);
        range_list.add_entity(EntityId(8), -1.0, 2.0);

        let mut restored = trap(1.0);
        restored.read_real_from_stream(&mut BinaryIStream::new(out.as_slice())).unwrap();
        assert!((restored.range() - 5.0).abs() < f32::EPSILON);

        restored.start_real(
            &mut ControllerContext::new(0, owner, &mut range_list, &mut timers, &mut callbacks),
            false,
        );
        assert!(!range_list.has_crossings());
        assert_eq!(restored.trapped(), vec![EntityId(5), EntityId(8)]);
        assert_eq!(callbacks.len(), 3);
        assert!(callbacks.contains(&ScriptCallback::OnEnterTrap {
            entity: EntityId(1),
            other: EntityId(8),
            range: 5.0,
            controller: ControllerId(2),
            user_arg: 9,
        }));
        assert!(callbacks
            .iter()
            .any(|c| matches!(c, ScriptCallback::OnLeaveTrap { other: EntityId(6), .. })));
        assert!(callbacks
            .iter()
            .any(|c| matches!(c, ScriptCallback::OnLeaveTrapId { other: EntityId(7), .. })));
    }

    #[test]
    fn test_stop_removes_trigger_silently() {
        let mut range_list = RangeList::new();
        let owner = view(&mut range_list, 0.0, 0.0);
        range_list.add_entity(EntityId(5), 1.0, 1.0);
        let mut timers = TimeQueue::new();
        let mut callbacks = Vec::new();

        let mut proximity = trap(5.0);
        let mut ctx =
            ControllerContext::new(0, owner, &mut range_list, &mut timers, &mut callbacks);
        proximity.start_real(&mut ctx, true);
        ctx.range_list().take_crossings();
        proximity.stop_real(&mut ctx, true);

        assert!(proximity.trigger().is_none());
        assert!(!range_list.has_crossings());
        assert_eq!(range_list.num_triggers(), 0);
    }

    #[test]
    fn test_enter_for_removed_entity_ignored() {
        let mut range_list = RangeList::new();
        let owner = view(&mut range_list, 0.0, 0.0);
        let mut timers = TimeQueue::new();
        let mut callbacks = Vec::new();

        let mut proximity = trap(5.0);
        let mut ctx =
            ControllerContext::new(0, owner, &mut range_list, &mut timers, &mut callbacks);
        proximity.start_real(&mut ctx, true);
        let crossing = Crossing {
            trigger: proximity.trigger().unwrap(),
            owner: TriggerOwner::Proximity {
                entity: EntityId(1),
                controller: ControllerId(2),
            },
            who: EntityId(5),
            entered: true,
        };
        proximity.on_crossing(&mut ctx, &crossing);

        assert!(proximity.trapped().is_empty());
        assert!(callbacks.is_empty());
    }

    #[test]
    fn test_rejects_bad_range() {
        let mut out = BinaryOStream::new();
        out.write_f32(-1.0);
        out.write_u32(0);
        let mut proximity = ProximityController::default();
        assert!(proximity.read_real_from_stream(&mut BinaryIStream::new(out.as_slice())).is_err());
    }
}
