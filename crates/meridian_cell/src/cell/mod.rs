//! # Cell Application
//!
//! One process serving one rectangle of a space.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────── CellApp ────────────────────────┐
//!   script ──────▶│ create / destroy / set_position / add_controller / ... │
//!                 │                                                        │
//!                 │  entities ──node──▶ RangeList ──crossings──┐           │
//!                 │     │                                      ▼           │
//!                 │     └─controllers◀── TimeQueue      Proximity, Witness │
//!                 │                                                        │
//!   peer cells ──▶│ receive(bundle)            Channels ──flush──▶ peers   │
//!                 └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick
//!
//! 1. Due timers fire, each followed by the crossings it caused.
//! 2. Every real entity samples its velocity, creates and deletes ghosts
//!    as it nears or leaves other cells, and is offloaded once its position
//!    belongs to another cell.
//! 3. Witnesses produce their client messages.
//! 4. Outgoing bundles are flushed.
//!
//! Controllers and witnesses only ever see the cell through IDs and
//! contexts. Whatever a controller asks for is applied after its call
//! returns, and only if its entity and the controller itself still exist.

mod dispatch;
mod migration;
mod tick;

use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::TimeQueue;
use meridian_shared::{Address, ControllerId, Direction, EntityId, GameTime, Vec3};
use tracing::{debug, warn};

use crate::channel::{ChannelStats, Channels, Transport};
use crate::config::{CellConfig, ConfigError};
use crate::controller::{
    Controller, ControllerRegistry, MoveToPointController, ProximityController, ScriptCallback,
    TimerController, TimerTarget,
};
use crate::entity::Entity;
use crate::error::{CellError, CellResult};
use crate::message::{decode_bundle, CellMessage, ClientMessage};
use crate::range_list::RangeList;
use crate::space::SpacePartition;
use crate::witness::{Witness, WitnessSubject};

pub use tick::{TickLoop, TickStats};

/// Counters for the simulation report.
#[derive(Clone, Copy, Debug, Default)]
pub struct CellStats {
    /// Ticks run.
    pub ticks: u64,
    /// Timer callbacks delivered to controllers.
    pub timers_fired: u64,
    /// Range list crossings dispatched.
    pub crossings: u64,
    /// Ghosts this cell created on other cells.
    pub ghosts_created: u64,
    /// Ghosts this cell deleted from other cells.
    pub ghosts_deleted: u64,
    /// Real entities sent away.
    pub offloads: u64,
    /// Real entities received.
    pub onloads: u64,
    /// Inter-cell messages handled.
    pub messages_received: u64,
    /// Bundles that failed to decode.
    pub malformed_bundles: u64,
}

/// A cell.
pub struct CellApp {
    address: Address,
    config: CellConfig,
    registry: Arc<ControllerRegistry>,
    partition: SpacePartition,
    entities: BTreeMap<EntityId, Entity>,
    range_list: RangeList,
    timers: TimeQueue<TimerTarget>,
    callbacks: Vec<ScriptCallback>,
    client_output: Vec<(EntityId, ClientMessage)>,
    channels: Channels,
    now: GameTime,
    /// Set while crossings are being dispatched.
    dispatching: bool,
    stats: CellStats,
}

fn check_position(position: Vec3) -> CellResult<()> {
    if position.is_valid_position() {
        Ok(())
    } else {
        Err(CellError::InvalidPosition {
            x: position.x,
            y: position.y,
            z: position.z,
        })
    }
}

impl CellApp {
    /// Creates a cell at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::Config`] if `config` fails validation.
    pub fn new(
        address: Address,
        config: CellConfig,
        registry: Arc<ControllerRegistry>,
    ) -> CellResult<Self> {
        config.validate().map_err(|e| match e {
            ConfigError::Invalid(what) => CellError::Config(what),
            ConfigError::Io(_) | ConfigError::Parse(_) => CellError::Config("unreadable config"),
        })?;
        let partition = SpacePartition::from_entries(address, &config.partition);
        Ok(Self {
            address,
            config,
            registry,
            partition,
            entities: BTreeMap::new(),
            range_list: RangeList::new(),
            timers: TimeQueue::new(),
            callbacks: Vec::new(),
            client_output: Vec::new(),
            channels: Channels::new(),
            now: 0,
            dispatching: false,
            stats: CellStats::default(),
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// This cell's address.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Game time of the last tick.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> GameTime {
        self.now
    }

    /// Configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &CellConfig {
        &self.config
    }

    /// Controller type registry.
    #[must_use]
    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// Space partition.
    #[inline]
    #[must_use]
    pub const fn partition(&self) -> &SpacePartition {
        &self.partition
    }

    /// Range list of every entity in the cell.
    #[inline]
    #[must_use]
    pub const fn range_list(&self) -> &RangeList {
        &self.range_list
    }

    /// Looks up an entity, real or ghost.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Every entity in the cell, in ID order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    /// Number of entities, ghosts included.
    #[must_use]
    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    /// Number of real entities.
    #[must_use]
    pub fn num_reals(&self) -> usize {
        self.entities.values().filter(|e| e.is_real()).count()
    }

    /// Pending timers.
    #[must_use]
    pub fn num_timers(&self) -> usize {
        self.timers.size()
    }

    /// Cell counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &CellStats {
        &self.stats
    }

    /// Outgoing channel counters.
    #[must_use]
    pub const fn channel_stats(&self) -> &ChannelStats {
        self.channels.stats()
    }

    /// Script callbacks raised since the last call.
    pub fn take_callbacks(&mut self) -> Vec<ScriptCallback> {
        std::mem::take(&mut self.callbacks)
    }

    /// Witness output since the last call, tagged with the witnessing
    /// entity.
    pub fn take_client_output(&mut self) -> Vec<(EntityId, ClientMessage)> {
        std::mem::take(&mut self.client_output)
    }

    fn real_entity(&self, id: EntityId) -> CellResult<&Entity> {
        let entity = self.entities.get(&id).ok_or(CellError::UnknownEntity(id))?;
        if entity.is_real() {
            Ok(entity)
        } else {
            Err(CellError::NotReal(id))
        }
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    /// Creates a real entity.
    ///
    /// # Errors
    ///
    /// Fails for a null or existing ID, or an invalid position.
    pub fn create_entity(
        &mut self,
        id: EntityId,
        entity_type: u16,
        position: Vec3,
        direction: Direction,
    ) -> CellResult<()> {
        if id.is_null() {
            return Err(CellError::InvalidArgument("entity ID must not be null"));
        }
        if self.entities.contains_key(&id) {
            return Err(CellError::EntityExists(id));
        }
        check_position(position)?;

        let node = self.range_list.add_entity(id, position.x, position.z);
        let entity = Entity::new_real(
            id,
            entity_type,
            position,
            direction,
            node,
            self.address,
            self.now,
        );
        self.entities.insert(id, entity);
        debug!(entity = %id, entity_type, "created");

        self.flush_crossings();
        Ok(())
    }

    /// Destroys a real entity, its controllers and its ghosts.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or not real here.
    pub fn destroy_entity(&mut self, id: EntityId) -> CellResult<()> {
        self.real_entity(id)?;

        let controllers = self
            .entities
            .get(&id)
            .map(|e| e.controllers().ids())
            .unwrap_or_default();
        for controller in controllers {
            self.cancel_controller(id, controller);
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            if let Some(mut witness) = entity.real.as_mut().and_then(|r| r.witness.take()) {
                witness.detach(&mut self.range_list);
            }
            for haunt in entity.real().map(|r| r.haunts().to_vec()).unwrap_or_default() {
                self.channels.send(haunt, &CellMessage::DelGhost { entity: id });
                self.stats.ghosts_deleted += 1;
            }
        }
        self.remove_copy(id);
        debug!(entity = %id, "destroyed");
        Ok(())
    }

    /// Moves a real entity.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown, not real, or `position` is invalid.
    pub fn set_position(
        &mut self,
        id: EntityId,
        position: Vec3,
        direction: Direction,
    ) -> CellResult<()> {
        self.real_entity(id)?;
        check_position(position)?;
        self.move_entity(id, position, direction);
        self.flush_crossings();
        Ok(())
    }

    /// Sets the top speed of a real entity, in units per tick.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or not real.
    pub fn set_top_speed(&mut self, id: EntityId, top_speed: f32) -> CellResult<()> {
        self.real_entity(id)?;
        if let Some(real) = self.entities.get_mut(&id).and_then(|e| e.real.as_mut()) {
            real.set_top_speed(top_speed);
        }
        Ok(())
    }

    /// Entities within `range` of an entity, by true distance.
    ///
    /// Distance is measured from `centre` when given, else from the entity
    /// itself. `entity_type` keeps only entities of that type. The entity
    /// asking is never in the result.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown, `range` is negative or `centre` is
    /// not a valid position.
    pub fn entities_in_range(
        &self,
        id: EntityId,
        range: f32,
        entity_type: Option<u16>,
        centre: Option<Vec3>,
    ) -> CellResult<Vec<EntityId>> {
        if !(range >= 0.0 && range.is_finite()) {
            return Err(CellError::InvalidArgument("range must be >= 0"));
        }
        let entity = self.entities.get(&id).ok_or(CellError::UnknownEntity(id))?;
        let origin = centre.unwrap_or_else(|| entity.position());
        check_position(origin)?;
        // The square is centred on the entity; widen it to cover `origin`.
        let offset = entity.position() - origin;
        let half = range + offset.x.abs().max(offset.z.abs());
        let mut found: Vec<EntityId> = self
            .range_list
            .entities_in_square(entity.node(), half)
            .into_iter()
            .filter(|other| {
                self.entities.get(other).is_some_and(|e| {
                    entity_type.map_or(true, |t| e.entity_type() == t)
                        && e.position().distance(origin) <= range
                })
            })
            .collect();
        found.sort_unstable();
        Ok(found)
    }

    // =========================================================================
    // CONTROLLERS
    // =========================================================================

    /// Attaches a controller to a real entity and starts it.
    ///
    /// A controller with an exclusive class replaces the running one of the
    /// same class.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or not real, or the controller type
    /// is not registered.
    pub fn add_controller(
        &mut self,
        entity: EntityId,
        mut controller: Box<dyn Controller>,
        user_arg: i32,
    ) -> CellResult<ControllerId> {
        self.real_entity(entity)?;
        self.registry.bind(&mut *controller)?;

        let existing = controller
            .exclusive_class()
            .and_then(|class| self.real_entity(entity).ok()?.controllers().find_exclusive(class));
        if let Some(existing) = existing {
            debug!(%entity, controller = %existing, "replaced by exclusive controller");
            self.cancel_controller(entity, existing);
        }

        self.start_controller(entity, controller, user_arg)
            .ok_or(CellError::UnknownEntity(entity))
    }

    /// Cancels a controller.
    ///
    /// # Returns
    ///
    /// False if the entity or the controller does not exist, which is
    /// logged when `warn_on_failure` is set.
    pub fn del_controller(
        &mut self,
        entity: EntityId,
        controller: ControllerId,
        warn_on_failure: bool,
    ) -> bool {
        let cancelled = self.cancel_controller(entity, controller);
        if cancelled {
            self.flush_crossings();
        } else if warn_on_failure {
            warn!(%entity, %controller, "del_controller: no such controller");
        }
        cancelled
    }

    /// Adds a timer firing after `delay` ticks, then every `interval`
    /// ticks unless `interval` is 0.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown or not real.
    pub fn add_timer(
        &mut self,
        entity: EntityId,
        delay: GameTime,
        interval: GameTime,
        user_arg: i32,
    ) -> CellResult<ControllerId> {
        let timer = TimerController::new(delay, interval);
        self.add_controller(entity, Box::new(timer), user_arg)
    }

    /// Cancels a timer.
    pub fn del_timer(&mut self, entity: EntityId, controller: ControllerId) -> bool {
        self.del_controller(entity, controller, true)
    }

    /// Adds a square proximity trap of half-width `range`.
    ///
    /// # Errors
    ///
    /// Fails if `range` is not positive, or the entity is unknown or not
    /// real.
    pub fn add_proximity(
        &mut self,
        entity: EntityId,
        range: f32,
        user_arg: i32,
    ) -> CellResult<ControllerId> {
        if !(range > 0.0 && range.is_finite()) {
            return Err(CellError::InvalidArgument("proximity range must be > 0"));
        }
        self.add_controller(entity, Box::new(ProximityController::new(range)), user_arg)
    }

    /// Moves an entity in a straight line at `velocity` units per second.
    ///
    /// # Errors
    ///
    /// Fails if `velocity` is not positive, `destination` is invalid, or
    /// the entity is unknown or not real.
    pub fn move_to_point(
        &mut self,
        entity: EntityId,
        destination: Vec3,
        velocity: f32,
        face_movement: bool,
        user_arg: i32,
    ) -> CellResult<ControllerId> {
        if !(velocity > 0.0 && velocity.is_finite()) {
            return Err(CellError::InvalidArgument("velocity must be > 0"));
        }
        check_position(destination)?;
        #[allow(clippy::cast_precision_loss)]
        let speed = velocity / self.config.tick_rate as f32;
        self.add_controller(
            entity,
            Box::new(MoveToPointController::new(destination, speed, face_movement)),
            user_arg,
        )
    }

    // =========================================================================
    // WITNESS
    // =========================================================================

    /// Gives a real entity an area of interest. Uses the configured default
    /// radius when `radius` is `None`.
    ///
    /// # Errors
    ///
    /// Fails if the radius is not positive, or the entity is unknown or not
    /// real.
    pub fn enable_witness(&mut self, id: EntityId, radius: Option<f32>) -> CellResult<()> {
        let radius = radius.unwrap_or(self.config.witness.default_aoi_radius);
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(CellError::InvalidArgument("AoI radius must be > 0"));
        }
        let node = self.real_entity(id)?.node();
        let Some(real) = self.entities.get_mut(&id).and_then(|e| e.real.as_mut()) else {
            return Err(CellError::NotReal(id));
        };
        if real.witness.is_some() {
            warn!(entity = %id, "witness already enabled");
            return Ok(());
        }

        let mut witness = Witness::new(
            id,
            radius,
            self.config.witness.default_hysteresis,
            self.config.witness.clone(),
        );
        witness.attach(&mut self.range_list, node);
        real.witness = Some(witness);
        debug!(entity = %id, radius, "witness enabled");

        self.flush_crossings();
        Ok(())
    }

    /// Removes an entity's witness.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown, not real, or has no witness.
    pub fn disable_witness(&mut self, id: EntityId) -> CellResult<()> {
        self.real_entity(id)?;
        let mut witness = self
            .entities
            .get_mut(&id)
            .and_then(|e| e.real.as_mut())
            .and_then(|r| r.witness.take())
            .ok_or(CellError::NoWitness(id))?;
        witness.detach(&mut self.range_list);
        debug!(entity = %id, "witness disabled");
        Ok(())
    }

    /// Changes an entity's AoI radius, keeping its hysteresis unless one
    /// is given.
    ///
    /// # Errors
    ///
    /// Fails if the radius is not positive, the hysteresis is negative, or
    /// the entity has no witness.
    pub fn set_aoi_radius(
        &mut self,
        id: EntityId,
        radius: f32,
        hysteresis: Option<f32>,
    ) -> CellResult<()> {
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(CellError::InvalidArgument("AoI radius must be > 0"));
        }
        self.real_entity(id)?;
        let witness = self
            .entities
            .get_mut(&id)
            .and_then(|e| e.real.as_mut())
            .and_then(|r| r.witness.as_mut())
            .ok_or(CellError::NoWitness(id))?;
        let hysteresis = hysteresis.unwrap_or_else(|| witness.hysteresis());
        if !(hysteresis >= 0.0 && hysteresis.is_finite()) {
            return Err(CellError::InvalidArgument("hysteresis must be >= 0"));
        }
        witness.set_radius(&mut self.range_list, radius, hysteresis);
        self.flush_crossings();
        Ok(())
    }

    /// The witness of a real entity.
    #[must_use]
    pub fn witness(&self, id: EntityId) -> Option<&Witness> {
        self.entities.get(&id)?.real()?.witness()
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Runs one game tick at time `now` and flushes outgoing bundles.
    pub fn tick(&mut self, now: GameTime, transport: &mut dyn Transport) {
        debug_assert!(now >= self.now, "game time went backwards");
        self.now = now;
        self.stats.ticks += 1;

        self.run_timers();
        self.flush_crossings();
        self.update_reals();
        self.update_witnesses();
        self.channels.flush(transport);
    }

    /// Handles a bundle from another cell.
    ///
    /// # Returns
    ///
    /// Number of messages handled.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::Malformed`] if the bundle does not decode; no
    /// message of it is handled then.
    pub fn receive(&mut self, from: Address, data: &[u8]) -> CellResult<usize> {
        let messages = decode_bundle(data).map_err(|e| {
            self.stats.malformed_bundles += 1;
            warn!(%from, "malformed bundle: {}", e);
            e
        })?;
        let count = messages.len();
        for message in messages {
            self.stats.messages_received += 1;
            self.handle_message(from, message);
        }
        Ok(count)
    }

    fn update_witnesses(&mut self) {
        let ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.real().is_some_and(|r| r.witness().is_some()))
            .map(Entity::id)
            .collect();

        for id in ids {
            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };
            let origin = entity.position();
            let Some(mut witness) = entity.real.as_mut().and_then(|r| r.witness.take()) else {
                continue;
            };

            let entities = &self.entities;
            let mut out = Vec::new();
            witness.update(
                origin,
                |other| {
                    entities.get(&other).map(|e| WitnessSubject {
                        entity_type: e.entity_type(),
                        position: e.position(),
                        direction: e.direction(),
                        volatile_number: e.volatile_number(),
                    })
                },
                &mut out,
            );
            self.client_output.extend(out.into_iter().map(|message| (id, message)));

            if let Some(real) = self.entities.get_mut(&id).and_then(|e| e.real.as_mut()) {
                real.witness = Some(witness);
            }
        }
    }
}

impl std::fmt::Debug for CellApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellApp")
            .field("address", &self.address)
            .field("now", &self.now)
            .field("entities", &self.entities.len())
            .field("timers", &self.timers.size())
            .finish_non_exhaustive()
    }
}
