//! Ghosting and moving real entities between cells.
//!
//! ```text
//!   source cell                                  destination cell
//!   ───────────                                  ────────────────
//!   CreateGhost ───────────────────────────────▶ ghost created
//!   real-domain records written
//!   real halves stopped, REAL-only dropped
//!   real ──▶ ghost (real_addr = dest)
//!   Onload { real data, witness } ─────────────▶ ghost ──▶ real
//!                                                REAL-only controllers created,
//!                                                real halves read and restarted,
//!                                                witness re-attached
//!   GhostSetReal ──▶ every other haunt
//! ```
//!
//! The source keeps a ghost and is a haunt of the new real. Every message
//! for one destination travels in one bundle, so a ghost is always created
//! before anything refers to it.

use meridian_core::BinaryIStream;
use meridian_shared::{Address, ControllerId, Direction, EntityId, Vec3};
use tracing::{debug, info, warn};

use super::CellApp;
use crate::controller::{
    record_of, ControllerContext, ControllerDomain, ControllerRecord, ControllerState,
    ScriptCallback,
};
use crate::entity::{Entity, GhostData, RealData, RealEntity};
use crate::error::{CellError, CellResult};
use crate::message::CellMessage;
use crate::witness::Witness;

impl CellApp {
    // =========================================================================
    // OUTGOING
    // =========================================================================

    /// Moves a real entity to another cell, placing it at `position`.
    ///
    /// Teleporting to this cell only moves the entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or not real, or `position` is invalid.
    pub fn teleport(
        &mut self,
        id: EntityId,
        destination: Address,
        position: Vec3,
    ) -> CellResult<()> {
        self.real_entity(id)?;
        super::check_position(position)?;
        if destination.is_none() {
            return Err(CellError::InvalidArgument("teleport destination"));
        }
        if destination == self.address {
            let direction = self.real_entity(id)?.direction();
            self.set_position(id, position, direction)?;
            self.callbacks.push(ScriptCallback::OnTeleportSuccess { entity: id });
            return Ok(());
        }
        self.offload(id, destination, Some(position));
        Ok(())
    }

    /// Samples velocity, adjusts ghosts and offloads every real entity that
    /// has left this cell's rectangle.
    pub(super) fn update_reals(&mut self) {
        let reals: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_real())
            .map(Entity::id)
            .collect();
        let period = self.config.velocity_sample_ticks;

        for id in reals {
            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };
            let position = entity.position();
            let Some(real) = entity.real.as_mut() else {
                continue;
            };
            real.sample_velocity(position, self.now, period);

            let (create, delete) = self.partition.ghost_changes(
                position,
                real.haunts(),
                self.config.ghost_distance,
                self.config.ghost_hysteresis,
            );
            for address in create {
                self.create_ghost_on(id, address);
            }
            for address in delete {
                self.delete_ghost_on(id, address);
            }

            if let Some(owner) = self.partition.owner_of(position) {
                if owner != self.address {
                    self.offload(id, owner, None);
                }
            }
        }
    }

    fn ghost_data(&mut self, id: EntityId) -> Option<GhostData> {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            now,
            address,
            ..
        } = self;
        let entity = entities.get(&id)?;
        let ctx = ControllerContext::new(*now, entity.view(), range_list, timers, callbacks);
        let records = entity
            .controllers()
            .iter()
            .filter(|(_, c)| c.base().domain().contains(ControllerDomain::GHOST))
            .map(|(_, c)| record_of(c, ControllerDomain::GHOST, &ctx))
            .collect();
        Some(entity.ghost_data(*address, records))
    }

    fn create_ghost_on(&mut self, id: EntityId, address: Address) {
        let Some(data) = self.ghost_data(id) else {
            return;
        };
        self.channels.send(address, &CellMessage::CreateGhost(data));
        if let Some(real) = self.entities.get_mut(&id).and_then(|e| e.real.as_mut()) {
            real.add_haunt(address);
        }
        self.stats.ghosts_created += 1;
        debug!(entity = %id, to = %address, "ghost created");
    }

    fn delete_ghost_on(&mut self, id: EntityId, address: Address) {
        self.channels.send(address, &CellMessage::DelGhost { entity: id });
        if let Some(real) = self.entities.get_mut(&id).and_then(|e| e.real.as_mut()) {
            real.remove_haunt(address);
        }
        self.stats.ghosts_deleted += 1;
        debug!(entity = %id, to = %address, "ghost deleted");
    }

    /// Turns a real entity into a ghost and sends its real half to
    /// `destination`. With `teleport` set, the ghost data travels along
    /// with the new position.
    fn offload(&mut self, id: EntityId, destination: Address, teleport: Option<Vec3>) {
        let has_ghost = self
            .entities
            .get(&id)
            .and_then(Entity::real)
            .is_some_and(|r| r.has_haunt(destination));
        let ghost = match teleport {
            Some(position) => self.ghost_data(id).map(|mut data| {
                data.position = position;
                data
            }),
            None => {
                if !has_ghost {
                    self.create_ghost_on(id, destination);
                }
                None
            }
        };

        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            channels,
            now,
            address,
            stats,
            ..
        } = self;
        let Some(entity) = entities.get_mut(&id) else {
            return;
        };
        let view = entity.view();

        // Real-domain state is written before anything is stopped.
        let mut records = Vec::new();
        {
            let mut ctx = ControllerContext::new(*now, view, range_list, timers, callbacks);
            for (_, controller) in entity.controllers().iter() {
                if controller.base().domain().contains(ControllerDomain::REAL) {
                    records.push(record_of(controller, ControllerDomain::REAL, &ctx));
                }
            }
            for controller_id in entity.controllers().ids_in_domain(ControllerDomain::REAL) {
                if let Some(controller) = entity.controllers.get_mut(controller_id) {
                    controller.stop_real(&mut ctx, false);
                }
            }
        }
        for controller_id in entity.controllers().ids() {
            let real_only = entity
                .controllers()
                .get(controller_id)
                .is_some_and(|c| c.base().domain() == ControllerDomain::REAL);
            if real_only {
                if let Some(mut controller) = entity.controllers.remove(controller_id) {
                    controller.base_mut().set_state(ControllerState::Detached);
                }
            }
        }

        let witness = entity
            .real
            .as_mut()
            .and_then(|r| r.witness.take())
            .map(|mut w| {
                w.detach(range_list);
                w.to_data()
            });
        let last_allocated = entity.controllers().last_allocated();
        let Some(real) = entity.mark_offloaded(destination) else {
            return;
        };

        let mut haunts: Vec<Address> = real
            .haunts()
            .iter()
            .copied()
            .filter(|h| *h != destination)
            .collect();
        haunts.push(*address);
        let message = CellMessage::Onload {
            entity: id,
            ghost,
            real: RealData {
                velocity: real.velocity(),
                top_speed: real.top_speed(),
                haunts: haunts.clone(),
                last_allocated,
                controllers: records,
                witness,
            },
            is_teleport: teleport.is_some(),
        };
        channels.send(destination, &message);

        let set_real = CellMessage::GhostSetReal {
            entity: id,
            real_addr: destination,
        };
        for haunt in haunts.iter().filter(|h| **h != *address) {
            channels.send(*haunt, &set_real);
        }
        stats.offloads += 1;
        info!(entity = %id, to = %destination, teleport = teleport.is_some(), "offloaded");
    }

    // =========================================================================
    // INCOMING
    // =========================================================================

    pub(super) fn handle_message(&mut self, from: Address, message: CellMessage) {
        match message {
            CellMessage::CreateGhost(data) => self.on_create_ghost(from, &data),
            CellMessage::DelGhost { entity } => {
                if self.ghost(entity, "DelGhost").is_some() {
                    self.remove_copy(entity);
                }
            }
            CellMessage::GhostPositionUpdate {
                entity,
                position,
                direction,
                volatile_number,
            } => self.on_ghost_position(entity, position, direction, volatile_number),
            CellMessage::GhostControllerCreate { entity, record } => {
                if self.ghost(entity, "GhostControllerCreate").is_some() {
                    self.create_ghost_controller(entity, &record);
                }
            }
            CellMessage::GhostControllerUpdate { entity, record } => {
                self.on_ghost_controller_update(entity, &record);
            }
            CellMessage::GhostControllerDelete { entity, controller } => {
                self.on_ghost_controller_delete(entity, controller);
            }
            CellMessage::GhostSetReal { entity, real_addr } => {
                if let Some(ghost) = self.ghost(entity, "GhostSetReal") {
                    ghost.real_moved(real_addr);
                }
            }
            CellMessage::Onload {
                entity,
                ghost,
                real,
                is_teleport,
            } => self.on_onload(from, entity, ghost, real, is_teleport),
        }
    }

    /// The ghost copy of an entity. Unknown entities and reals are logged
    /// and skipped.
    fn ghost(&mut self, id: EntityId, what: &'static str) -> Option<&mut Entity> {
        match self.entities.get_mut(&id) {
            Some(entity) if !entity.is_real() => Some(entity),
            Some(_) => {
                warn!(entity = %id, message = what, "message for a ghost reached the real entity");
                None
            }
            None => {
                warn!(entity = %id, message = what, "message for unknown ghost");
                None
            }
        }
    }

    fn on_create_ghost(&mut self, from: Address, data: &GhostData) {
        if self.entities.contains_key(&data.id) {
            warn!(entity = %data.id, %from, "ghost already exists");
            return;
        }
        let node = self.range_list.add_entity(data.id, data.position.x, data.position.z);
        self.entities.insert(data.id, Entity::new_ghost(data, node));
        for record in &data.controllers {
            self.create_ghost_controller(data.id, record);
        }
        debug!(entity = %data.id, %from, "ghost added");
        self.flush_crossings();
    }

    fn on_ghost_position(
        &mut self,
        id: EntityId,
        position: Vec3,
        direction: Direction,
        volatile_number: u32,
    ) {
        let Some(ghost) = self.ghost(id, "GhostPositionUpdate") else {
            return;
        };
        if !ghost.apply_ghost_update(position, direction, volatile_number) {
            debug!(entity = %id, volatile_number, "stale ghost position");
            return;
        }
        let node = ghost.node();
        self.range_list.move_node(node, position.x, position.z);
        self.flush_crossings();
    }

    /// Creates the ghost half of a controller from its ghost record.
    fn create_ghost_controller(&mut self, id: EntityId, record: &ControllerRecord) {
        let mut controller = match self.registry.create(record.type_id) {
            Ok(controller) => controller,
            Err(e) => {
                warn!(entity = %id, controller = %record.id, "skipping ghost controller: {}", e);
                return;
            }
        };
        if !controller.base().domain().contains(ControllerDomain::GHOST) {
            warn!(entity = %id, controller = %record.id, "ghost record for a real-only type");
            return;
        }
        let mut stream = BinaryIStream::new(&record.data);
        if let Err(e) = controller.read_ghost_from_stream(&mut stream) {
            warn!(entity = %id, controller = %record.id, "bad ghost record: {}", e);
            return;
        }

        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            now,
            ..
        } = self;
        let Some(entity) = entities.get_mut(&id) else {
            return;
        };
        if entity.controllers().contains(record.id) {
            warn!(entity = %id, controller = %record.id, "ghost controller already exists");
            return;
        }
        controller.base_mut().attach(id, record.id, record.user_arg);
        let mut ctx = ControllerContext::new(*now, entity.view(), range_list, timers, callbacks);
        controller.start_ghost(&mut ctx);
        entity.controllers.insert(controller);
    }

    fn on_ghost_controller_update(&mut self, id: EntityId, record: &ControllerRecord) {
        let Some(ghost) = self.ghost(id, "GhostControllerUpdate") else {
            return;
        };
        let Some(controller) = ghost.controllers.get_mut(record.id) else {
            warn!(entity = %id, controller = %record.id, "update for unknown ghost controller");
            return;
        };
        let mut stream = BinaryIStream::new(&record.data);
        if let Err(e) = controller.read_ghost_from_stream(&mut stream) {
            warn!(entity = %id, controller = %record.id, "bad ghost record: {}", e);
        }
    }

    fn on_ghost_controller_delete(&mut self, id: EntityId, controller_id: ControllerId) {
        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            now,
            ..
        } = self;
        let ghost = match entities.get_mut(&id) {
            Some(entity) if !entity.is_real() => entity,
            _ => {
                warn!(entity = %id, "GhostControllerDelete for unknown ghost");
                return;
            }
        };
        let view = ghost.view();
        let Some(mut controller) = ghost.controllers.remove(controller_id) else {
            warn!(entity = %id, controller = %controller_id, "delete for unknown ghost controller");
            return;
        };
        let mut ctx = ControllerContext::new(*now, view, range_list, timers, callbacks);
        controller.base_mut().set_state(ControllerState::Cancelling);
        controller.stop_ghost(&mut ctx);
        controller.base_mut().set_state(ControllerState::Detached);
    }

    fn on_onload(
        &mut self,
        from: Address,
        id: EntityId,
        ghost: Option<GhostData>,
        real: RealData,
        is_teleport: bool,
    ) {
        if let Some(data) = ghost {
            if self.entities.contains_key(&id) {
                if let Some(entity) = self.ghost(id, "Onload") {
                    entity.set_volatile(data.position, data.direction);
                    let node = entity.node();
                    self.range_list.move_node(node, data.position.x, data.position.z);
                }
            } else {
                self.on_create_ghost(from, &data);
            }
        }
        if self.ghost(id, "Onload").is_none() {
            return;
        }

        let Self {
            entities,
            range_list,
            timers,
            callbacks,
            channels,
            registry,
            config,
            now,
            address,
            stats,
            ..
        } = self;
        let Some(entity) = entities.get_mut(&id) else {
            return;
        };

        let mut haunts: Vec<Address> = Vec::with_capacity(real.haunts.len());
        for haunt in real.haunts {
            if haunt != *address && !haunts.contains(&haunt) {
                haunts.push(haunt);
            }
        }
        let count = entity.num_times_real_offloaded().wrapping_add(1);
        let restored = RealEntity::restored(
            entity.position(),
            *now,
            real.velocity,
            real.top_speed,
            haunts,
        );
        entity.make_real(restored, *address, count);
        entity.controllers.set_last_allocated(real.last_allocated);

        // Real halves: BOTH-domain controllers already have their ghost
        // half here, REAL-only ones are created.
        let mut restarted = Vec::with_capacity(real.controllers.len());
        for record in &real.controllers {
            let mut stream = BinaryIStream::new(&record.data);
            if let Some(controller) = entity.controllers.get_mut(record.id) {
                if controller.base().type_id() != record.type_id {
                    warn!(entity = %id, controller = %record.id, "real record type mismatch");
                    continue;
                }
                if let Err(e) = controller.read_real_from_stream(&mut stream) {
                    warn!(entity = %id, controller = %record.id, "bad real record: {}", e);
                    continue;
                }
                controller.base_mut().set_user_arg(record.user_arg);
            } else {
                let mut controller = match registry.create(record.type_id) {
                    Ok(controller) => controller,
                    Err(e) => {
                        warn!(
                            entity = %id,
                            controller = %record.id,
                            "skipping real controller: {}",
                            e
                        );
                        continue;
                    }
                };
                if let Err(e) = controller.read_real_from_stream(&mut stream) {
                    warn!(entity = %id, controller = %record.id, "bad real record: {}", e);
                    continue;
                }
                controller.base_mut().attach(id, record.id, record.user_arg);
                entity.controllers.insert(controller);
            }
            restarted.push(record.id);
        }

        let mut outcomes = Vec::with_capacity(restarted.len());
        for controller_id in restarted {
            let view = entity.view();
            let Some(controller) = entity.controllers.get_mut(controller_id) else {
                continue;
            };
            let mut ctx = ControllerContext::new(*now, view, range_list, timers, callbacks);
            controller.start_real(&mut ctx, false);
            outcomes.push((controller_id, ctx.outcome()));
        }

        if let Some(data) = real.witness {
            let mut witness = Witness::from_data(id, data, config.witness.clone());
            witness.attach(range_list, entity.node());
            witness.reconcile(range_list);
            if let Some(real) = entity.real.as_mut() {
                real.witness = Some(witness);
            }
        }

        if is_teleport {
            let update = CellMessage::GhostPositionUpdate {
                entity: id,
                position: entity.position(),
                direction: entity.direction(),
                volatile_number: entity.volatile_number(),
            };
            for haunt in entity.real().map(RealEntity::haunts).unwrap_or_default() {
                channels.send(*haunt, &update);
            }
            callbacks.push(ScriptCallback::OnTeleportSuccess { entity: id });
        }
        stats.onloads += 1;
        info!(entity = %id, %from, teleport = is_teleport, "onloaded");

        for (controller_id, outcome) in outcomes {
            self.apply_outcome(id, controller_id, outcome);
        }
        self.flush_crossings();
    }
}
