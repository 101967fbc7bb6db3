//! Calling into controllers and witnesses.
//!
//! Every call is made through [`CellApp::call_controller`]: it looks the
//! entity and the controller up again, skips them if either is gone or
//! the controller is no longer running, and returns what the controller
//! asked for. [`CellApp::apply_outcome`] then carries the requests out.
//!
//! Crossings are dispatched in a loop until the range list stops producing
//! them. Moves requested while the loop runs only queue more crossings.

use meridian_shared::{Address, ControllerId, Direction, EntityId, Vec3};
use tracing::{trace, warn};

use super::CellApp;
use crate::controller::{
    record_of, Controller, ControllerContext, ControllerDomain, ControllerOutcome, ControllerRecord,
    ControllerState,
};
use crate::entity::RealEntity;
use crate::message::CellMessage;
use crate::range_list::{Crossing, TriggerOwner};

impl CellApp {
    /// Runs `f` on a running controller.
    ///
    /// # Returns
    ///
    /// `None` if the entity or the controller is gone or not running.
    pub(super) fn call_controller<R>(
        &mut self,
        entity: EntityId,
        id: ControllerId,
        f: impl FnOnce(&mut (dyn Controller + 'static), &mut ControllerContext<'_>) -> R,
    ) -> Option<(R, ControllerOutcome)> {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            now,
            ..
        } = self;
        let owner = entities.get_mut(&entity)?;
        if owner.is_destroyed() {
            return None;
        }
        let view = owner.view();
        let controller = owner.controllers.get_mut(id)?;
        if !controller.base().is_attached() {
            return None;
        }
        let mut ctx = ControllerContext::new(*now, view, range_list, timers, callbacks);
        let result = f(controller, &mut ctx);
        Some((result, ctx.outcome()))
    }

    /// Carries out what a controller asked for during a call.
    pub(super) fn apply_outcome(
        &mut self,
        entity: EntityId,
        id: ControllerId,
        outcome: ControllerOutcome,
    ) {
        if let Some((position, direction)) = outcome.new_position {
            self.move_entity(entity, position, direction);
        }
        if outcome.ghost_dirty {
            if let Some((record, haunts)) = self.ghost_record(entity, id) {
                for haunt in haunts {
                    self.channels.send(
                        haunt,
                        &CellMessage::GhostControllerUpdate {
                            entity,
                            record: record.clone(),
                        },
                    );
                }
            }
        }
        if outcome.cancel_self {
            self.cancel_controller(entity, id);
        }
    }

    /// Moves any copy of an entity. A real broadcasts the move to its
    /// ghosts.
    pub(super) fn move_entity(&mut self, id: EntityId, position: Vec3, direction: Direction) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if !position.is_valid_position() {
            warn!(entity = %id, ?position, "ignoring move to invalid position");
            return;
        }
        entity.set_volatile(position, direction);
        self.range_list.move_node(entity.node(), position.x, position.z);

        if let Some(real) = entity.real() {
            let update = CellMessage::GhostPositionUpdate {
                entity: id,
                position,
                direction,
                volatile_number: entity.volatile_number(),
            };
            for haunt in real.haunts() {
                self.channels.send(*haunt, &update);
            }
        }
    }

    /// Ghost record of one controller and the haunts to send it to.
    fn ghost_record(
        &mut self,
        entity: EntityId,
        id: ControllerId,
    ) -> Option<(ControllerRecord, Vec<Address>)> {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            now,
            ..
        } = self;
        let owner = entities.get(&entity)?;
        let controller = owner.controllers().get(id)?;
        if !controller.base().domain().contains(ControllerDomain::GHOST) {
            return None;
        }
        let haunts = owner.real()?.haunts().to_vec();
        let ctx = ControllerContext::new(*now, owner.view(), range_list, timers, callbacks);
        Some((record_of(controller, ControllerDomain::GHOST, &ctx), haunts))
    }

    /// Attaches a bound controller to a real entity and starts it.
    pub(super) fn start_controller(
        &mut self,
        entity: EntityId,
        mut controller: Box<dyn Controller>,
        user_arg: i32,
    ) -> Option<ControllerId> {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            channels,
            now,
            ..
        } = self;
        let owner = entities.get_mut(&entity)?;
        let id = owner.controllers.allocate_id();
        controller.base_mut().attach(entity, id, user_arg);
        let domain = controller.base().domain();

        let mut ctx = ControllerContext::new(*now, owner.view(), range_list, timers, callbacks);
        if domain.contains(ControllerDomain::GHOST) {
            controller.start_ghost(&mut ctx);
        }
        if domain.contains(ControllerDomain::REAL) {
            controller.start_real(&mut ctx, true);
        }
        let outcome = ctx.outcome();
        let record = domain
            .contains(ControllerDomain::GHOST)
            .then(|| record_of(&*controller, ControllerDomain::GHOST, &ctx));
        trace!(%entity, controller = %id, kind = controller.type_name(), "controller started");
        owner.controllers.insert(controller);

        if let (Some(record), Some(real)) = (record, owner.real()) {
            for haunt in real.haunts() {
                channels.send(
                    *haunt,
                    &CellMessage::GhostControllerCreate {
                        entity,
                        record: record.clone(),
                    },
                );
            }
        }

        self.apply_outcome(entity, id, outcome);
        self.flush_crossings();
        Some(id)
    }

    /// Stops and removes a running controller.
    ///
    /// # Returns
    ///
    /// False if there was no running controller to cancel.
    pub(super) fn cancel_controller(&mut self, entity: EntityId, id: ControllerId) -> bool {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            channels,
            now,
            ..
        } = self;
        let Some(owner) = entities.get_mut(&entity) else {
            return false;
        };
        let view = owner.view();
        let Some(controller) = owner.controllers.get_mut(id) else {
            return false;
        };
        if controller.base().state() != ControllerState::Running {
            return false;
        }

        controller.base_mut().set_state(ControllerState::Cancelling);
        let domain = controller.base().domain();
        let mut ctx = ControllerContext::new(*now, view, range_list, timers, callbacks);
        if view.is_real && domain.contains(ControllerDomain::REAL) {
            controller.stop_real(&mut ctx, true);
        }
        if domain.contains(ControllerDomain::GHOST) {
            controller.stop_ghost(&mut ctx);
        }
        controller.base_mut().set_state(ControllerState::Detached);
        owner.controllers.remove(id);
        trace!(%entity, controller = %id, "controller cancelled");

        if domain.contains(ControllerDomain::GHOST) {
            let delete = CellMessage::GhostControllerDelete { entity, controller: id };
            for haunt in owner.real().map(RealEntity::haunts).unwrap_or_default() {
                channels.send(*haunt, &delete);
            }
        }
        true
    }

    /// Removes one copy of an entity from this cell. Its remaining
    /// controllers are stopped without being cancelled.
    pub(super) fn remove_copy(&mut self, id: EntityId) {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            now,
            ..
        } = self;
        let Some(mut entity) = entities.remove(&id) else {
            return;
        };
        entity.mark_destroyed();
        let view = entity.view();
        for controller_id in entity.controllers().ids() {
            let Some(controller) = entity.controllers.get_mut(controller_id) else {
                continue;
            };
            let domain = controller.base().domain();
            let mut ctx = ControllerContext::new(*now, view, range_list, timers, callbacks);
            if view.is_real && domain.contains(ControllerDomain::REAL) {
                controller.stop_real(&mut ctx, true);
            }
            if domain.contains(ControllerDomain::GHOST) {
                controller.stop_ghost(&mut ctx);
            }
            controller.base_mut().set_state(ControllerState::Detached);
        }
        if let Some(mut witness) = entity.real.as_mut().and_then(|r| r.witness.take()) {
            witness.detach(range_list);
        }
        range_list.remove_node(entity.node());
        self.flush_crossings();
    }

    // =========================================================================
    // CROSSINGS
    // =========================================================================

    /// Dispatches every pending crossing, including the ones the dispatch
    /// itself produces. Does nothing when called from inside a dispatch.
    pub(super) fn flush_crossings(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        loop {
            let crossings = self.range_list.take_crossings();
            if crossings.is_empty() {
                break;
            }
            self.stats.crossings += crossings.len() as u64;
            for crossing in &crossings {
                self.dispatch_crossing(crossing);
            }
        }
        self.dispatching = false;
    }

    fn dispatch_crossing(&mut self, crossing: &Crossing) {
        match crossing.owner {
            TriggerOwner::Proximity { entity, controller } => {
                let called =
                    self.call_controller(entity, controller, |c, ctx| c.on_crossing(ctx, crossing));
                if let Some(((), outcome)) = called {
                    self.apply_outcome(entity, controller, outcome);
                }
            }
            TriggerOwner::AoiEnter { entity } | TriggerOwner::AoiLeave { entity } => {
                let witness = self
                    .entities
                    .get_mut(&entity)
                    .and_then(|e| e.real.as_mut())
                    .and_then(|r| r.witness.as_mut());
                if let Some(witness) = witness {
                    witness.handle_crossing(crossing);
                }
            }
            TriggerOwner::Custom(_) => {}
        }
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    /// Fires every due timer, then hands released timers back to their
    /// controllers.
    pub(super) fn run_timers(&mut self) {
        self.timers.purge_if_needed();
        while let Some(expired) = self.timers.pop_due(self.now) {
            let target = expired.payload;
            let called = self.call_controller(target.entity, target.controller, |c, ctx| {
                c.handle_timeout(ctx, expired.handle, expired.user_data);
            });
            match called {
                Some(((), outcome)) => {
                    self.stats.timers_fired += 1;
                    self.apply_outcome(target.entity, target.controller, outcome);
                }
                None => {
                    trace!(
                        entity = %target.entity,
                        controller = %target.controller,
                        "timer without controller"
                    );
                    self.timers.cancel(expired.handle);
                }
            }
            self.timers.finish(expired.handle);
            self.flush_crossings();
        }

        for released in self.timers.take_released() {
            let target = released.payload;
            let controller = self
                .entities
                .get_mut(&target.entity)
                .and_then(|e| e.controllers.get_mut(target.controller));
            if let Some(controller) = controller {
                controller.on_timer_released(released.handle);
            }
        }
    }
}
