//! Timer controller: calls `OnTimer` after a delay, once or repeatedly.

use std::any::Any;

use meridian_core::{BinaryIStream, BinaryOStream, StreamResult, TimeStamp, TimerHandle, UserData};

use super::{Controller, ControllerBase, ControllerContext, ScriptCallback};

/// One-shot or repeating script timer.
///
/// A one-shot timer cancels itself after firing. On offload the ticks left
/// until the next expiry travel with the entity, so the timer fires on the
/// new cell as if nothing had happened.
#[derive(Debug, Default)]
pub struct TimerController {
    base: ControllerBase,
    /// Ticks from start until the first expiry. Refreshed from the live
    /// timer when the real half stops.
    remaining: TimeStamp,
    interval: TimeStamp,
    handle: Option<TimerHandle>,
}

impl TimerController {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "Timer";

    /// Creates a timer firing `delay` ticks after it starts, then every
    /// `interval` ticks (0 for one-shot).
    #[must_use]
    pub fn new(delay: TimeStamp, interval: TimeStamp) -> Self {
        Self {
            base: ControllerBase::new(),
            remaining: delay,
            interval,
            handle: None,
        }
    }

    /// Repeat interval, 0 for one-shot.
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> TimeStamp {
        self.interval
    }

    /// Handle of the live timer, if started.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> Option<TimerHandle> {
        self.handle
    }

    fn remaining_at(&self, ctx: &ControllerContext<'_>) -> TimeStamp {
        self.handle
            .and_then(|h| ctx.timer_time(h))
            .map_or(self.remaining, |time| time.saturating_sub(ctx.now()))
    }
}

impl Controller for TimerController {
    fn base(&self) -> &ControllerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ControllerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn start_real(&mut self, ctx: &mut ControllerContext<'_>, _is_initial: bool) {
        let start = ctx.now() + self.remaining;
        self.handle = Some(ctx.add_timer(self.base.id(), start, self.interval, 0));
    }

    fn stop_real(&mut self, ctx: &mut ControllerContext<'_>, _is_final: bool) {
        self.remaining = self.remaining_at(ctx);
        if let Some(handle) = self.handle.take() {
            ctx.cancel_timer(handle);
        }
    }

    fn write_real_to_stream(&self, stream: &mut BinaryOStream, ctx: &ControllerContext<'_>) {
        stream.write_u64(self.remaining_at(ctx));
        stream.write_u64(self.interval);
    }

    fn read_real_from_stream(&mut self, stream: &mut BinaryIStream<'_>) -> StreamResult<()> {
        self.remaining = stream.read_u64()?;
        self.interval = stream.read_u64()?;
        Ok(())
    }

    fn handle_timeout(
        &mut self,
        ctx: &mut ControllerContext<'_>,
        _handle: TimerHandle,
        _user_data: UserData,
    ) {
        ctx.notify(ScriptCallback::OnTimer {
            entity: ctx.entity().id,
            controller: self.base.id(),
            user_arg: self.base.user_arg(),
        });
        if self.interval == 0 {
            ctx.cancel_self();
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
    use meridian_shared::{ControllerId, Direction, EntityId, Vec3};

    struct Fixture {
        range_list: RangeList,
        timers: TimeQueue<TimerTarget>,
        callbacks: Vec<ScriptCallback>,
        view: EntityView,
    }

    impl Fixture {
        fn new() -> Self {
            let mut range_list = RangeList::new();
            let node = range_list.add_entity(EntityId(1), 0.0, 0.0);
            Self {
                range_list,
                timers: TimeQueue::new(),
                callbacks: Vec::new(),
                view: EntityView {
                    id: EntityId(1),
                    position: Vec3::ZERO,
                    direction: Direction::default(),
                    is_real: true,
                    node,
                },
            }
        }

        fn ctx(&mut self, now: u64) -> ControllerContext<'_> {
            ControllerContext::new(
                now,
                self.view,
                &mut self.range_list,
                &mut self.timers,
                &mut self.callbacks,
            )
        }
    }

    fn started(fixture: &mut Fixture, delay: u64, interval: u64) -> TimerController {
        let mut timer = TimerController::new(delay, interval);
        timer.base_mut().attach(EntityId(1), ControllerId(4), 11);
        timer.start_real(&mut fixture.ctx(100), true);
        timer
    }

    #[test]
    fn test_start_schedules_timer() {
        let mut fixture = Fixture::new();
        let timer = started(&mut fixture, 5, 0);
        let handle = timer.handle().unwrap();
        assert_eq!(fixture.timers.time_of(handle), Some(105));
    }

    #[test]
    fn test_one_shot_fires_and_cancels_itself() {
        let mut fixture = Fixture::new();
        let mut timer = started(&mut fixture, 5, 0);
        let handle = timer.handle().unwrap();

        let mut ctx = fixture.ctx(105);
        timer.handle_timeout(&mut ctx, handle, 0);
        assert!(ctx.outcome().cancel_self);
        assert_eq!(
            fixture.callbacks,
            vec![ScriptCallback::OnTimer {
                entity: EntityId(1),
                controller: ControllerId(4),
                user_arg: 11,
            }]
        );
    }

    #[test]
    fn test_repeating_does_not_cancel() {
        let mut fixture = Fixture::new();
        let mut timer = started(&mut fixture, 5, 3);
        let handle = timer.handle().unwrap();

        let mut ctx = fixture.ctx(105);
        timer.handle_timeout(&mut ctx, handle, 0);
        assert!(!ctx.outcome().cancel_self);
    }

    #[test]
    fn test_stream_carries_remaining_ticks() {
        let mut fixture = Fixture::new();
        let timer = started(&mut fixture, 20, 7);

        let mut out = BinaryOStream::new();
        timer.write_real_to_stream(&mut out, &fixture.ctx(112));

        let mut copy = TimerController::default();
        copy.read_real_from_stream(&mut BinaryIStream::new(out.as_slice())).unwrap();
        assert_eq!(copy.remaining, 8);
        assert_eq!(copy.interval(), 7);

        copy.base_mut().attach(EntityId(1), ControllerId(4), 11);
        let mut other = Fixture::new();
        copy.start_real(&mut other.ctx(500), false);
        assert_eq!(other.timers.time_of(copy.handle().unwrap()), Some(508));
    }

    #[test]
    fn test_stop_cancels_timer() {
        let mut fixture = Fixture::new();
        let mut timer = started(&mut fixture, 5, 0);
        let handle = timer.handle().unwrap();

        timer.stop_real(&mut fixture.ctx(101), true);
        assert!(timer.handle().is_none());
        assert_eq!(fixture.timers.time_of(handle), None);
    }
}
