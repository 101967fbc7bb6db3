//! Straight-line movement towards a point at constant speed.

use std::any::Any;

use meridian_core::{BinaryIStream, BinaryOStream, StreamError, StreamResult, TimerHandle, UserData};
use meridian_shared::{Direction, Vec3};

use super::{Controller, ControllerBase, ControllerContext, ScriptCallback};

/// Moves its entity one step per tick until it reaches the destination,
/// then calls `OnMove` and cancels itself.
#[derive(Debug, Default)]
pub struct MoveToPointController {
    base: ControllerBase,
    destination: Vec3,
    /// Distance covered per tick.
    speed: f32,
    face_movement: bool,
    handle: Option<TimerHandle>,
}

impl MoveToPointController {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "MoveToPoint";

    /// Exclusive class shared by every movement controller.
    pub const EXCLUSIVE_CLASS: &'static str = "Movement";

    /// Creates a controller moving `speed` units per tick. With
    /// `face_movement` the entity turns towards where it is going.
    #[must_use]
    pub fn new(destination: Vec3, speed: f32, face_movement: bool) -> Self {
        Self {
            base: ControllerBase::new(),
            destination,
            speed,
            face_movement,
            handle: None,
        }
    }

    /// Target position.
    #[inline]
    #[must_use]
    pub const fn destination(&self) -> Vec3 {
        self.destination
    }

    /// Units per tick.
    #[inline]
    #[must_use]
    pub const fn speed(&self) -> f32 {
        self.speed
    }
}

impl Controller for MoveToPointController {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ControllerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn exclusive_class(&self) -> Option<&'static str> {
        Some(Self::EXCLUSIVE_CLASS)
    }

    fn start_real(&mut self, ctx: &mut ControllerContext<'_>, _is_initial: bool) {
        let start = ctx.now() + 1;
        self.handle = Some(ctx.add_timer(self.base.id(), start, 1, 0));
    }

    fn stop_real(&mut self, ctx: &mut ControllerContext<'_>, _is_final: bool) {
        if let Some(handle) = self.handle.take() {
            ctx.cancel_timer(handle);
        }
    }

    fn write_real_to_stream(&self, stream: &mut BinaryOStream, _ctx: &ControllerContext<'_>) {
        stream.write_pod(&self.destination);
        stream.write_f32(self.speed);
        stream.write_bool(self.face_movement);
    }

    fn read_real_from_stream(&mut self, stream: &mut BinaryIStream<'_>) -> StreamResult<()> {
        let destination: Vec3 = stream.read_pod()?;
        let speed = stream.read_f32()?;
        if !destination.is_valid_position() || !(speed > 0.0 && speed.is_finite()) {
            return Err(StreamError::InvalidValue {
                what: "movement target",
                value: u64::from(speed.to_bits()),
            });
        }
        self.destination = destination;
        self.speed = speed;
        self.face_movement = stream.read_bool()?;
        Ok(())
    }

    fn handle_timeout(
        &mut self,
        ctx: &mut ControllerContext<'_>,
        _handle: TimerHandle,
        _user_data: UserData,
    ) {
        let here = ctx.entity().position;
        let delta = self.destination - here;
        let distance = delta.length();

        let direction = if self.face_movement && distance > 0.0 {
            Direction::facing(delta)
        } else {
            ctx.entity().direction
        };

        if distance <= self.speed {
            ctx.move_entity(self.destination, direction);
            ctx.notify(ScriptCallback::OnMove {
                entity: ctx.entity().id,
                controller: self.base.id(),
                user_arg: self.base.user_arg(),
            });
            ctx.cancel_self();
        } else {
            ctx.move_entity(here + delta * (self.speed / distance), direction);
        }
    }

    fn on_timer_released(&mut self, handle: TimerHandle) {
        if self.handle == Some(handle) {
            self.handle = None;
        }
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
    use meridian_shared::{ControllerId, EntityId};

    fn step(
        controller: &mut MoveToPointController,
        position: Vec3,
    ) -> (crate::controller::ControllerOutcome, usize) {
        let mut range_list = RangeList::new();
        let node = range_list.add_entity(EntityId(1), position.x, position.z);
        let mut timers: TimeQueue<TimerTarget> = TimeQueue::new();
        let mut callbacks = Vec::new();
        let view = EntityView {
            id: EntityId(1),
            position,
            direction: Direction::default(),
            is_real: true,
            node,
        };
        let mut ctx = ControllerContext::new(0, view, &mut range_list, &mut timers, &mut callbacks);
        let handle = ctx.add_timer(ControllerId(1), 0, 1, 0);
        controller.handle_timeout(&mut ctx, handle, 0);
        let outcome = ctx.outcome();
        (outcome, callbacks.len())
    }

    #[test]
    fn test_steps_towards_destination() {
        let mut controller = MoveToPointController::new(Vec3::new(10.0, 0.0, 0.0), 4.0, true);
        let (outcome, fired) = step(&mut controller, Vec3::ZERO);

        let (position, _) = outcome.new_position.unwrap();
        assert!((position.x - 4.0).abs() < 1e-5);
        assert!(!outcome.cancel_self);
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_arrival_fires_on_move() {
        let mut controller = MoveToPointController::new(Vec3::new(10.0, 0.0, 0.0), 4.0, false);
        let (outcome, fired) = step(&mut controller, Vec3::new(8.0, 0.0, 0.0));

        assert_eq!(outcome.new_position.map(|(p, _)| p), Some(Vec3::new(10.0, 0.0, 0.0)));
        assert!(outcome.cancel_self);
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_is_exclusive_movement() {
        let controller = MoveToPointController::default();
        assert_eq!(controller.exclusive_class(), Some("Movement"));
    }
}
