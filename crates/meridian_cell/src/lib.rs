//! # MERIDIAN Cell
//!
//! The cell application: one process simulating one rectangle of a
//! shared space, cooperating with its neighbours so entities move across
//! boundaries without the scripting layer noticing.
//!
//! ## Architecture
//!
//! ```text
//!   CellApp
//!     ├── entities ─── real (authoritative) or ghost (mirror)
//!     │      └── Controllers ─ Timer / Proximity / MoveToPoint / user types
//!     ├── RangeList ── x and z sorted lists, trigger crossings
//!     ├── TimeQueue ── controller timers (meridian_core)
//!     ├── Witness ──── per-real area of interest, client update stream
//!     ├── SpacePartition ── which cell owns which rectangle
//!     └── Channels ─── one bundle per peer per tick ──▶ dyn Transport
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Single-threaded** - a cell is driven by one thread, one tick at a time
//! 2. **IDs, not pointers** - entities, controllers and triggers refer to
//!    each other by ID and are looked up again on every use
//! 3. **Deferred effects** - controllers record what they want done; the
//!    cell applies it after the call returns
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_cell::{CellApp, CellConfig, ControllerRegistry, LoopbackNetwork};
//!
//! let network = LoopbackNetwork::new();
//! let mut endpoint = network.endpoint(Address::local(4001));
//! let registry = Arc::new(ControllerRegistry::with_builtin_types());
//! let mut cell = CellApp::new(Address::local(4001), CellConfig::default(), registry)?;
//!
//! let npc = EntityId(1);
//! cell.create_entity(npc, 0, Vec3::ZERO, Direction::default())?;
//! cell.add_proximity(npc, 10.0, 0)?;
//! cell.tick(1, &mut endpoint);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cell;
pub mod channel;
pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod message;
pub mod range_list;
pub mod space;
pub mod witness;

pub use cell::{CellApp, CellStats, TickLoop, TickStats};
pub use channel::{ChannelStats, Channels, Datagram, LoopbackEndpoint, LoopbackNetwork, Transport};
pub use config::{CellConfig, ConfigError, PartitionEntry, WitnessConfig};
pub use controller::{
    Controller, ControllerContext, ControllerDomain, ControllerRegistry, MoveToPointController,
    ProximityController, ScriptCallback, TimerController,
};
pub use entity::{Entity, GhostData, RealData, RealEntity};
pub use error::{CellError, CellResult};
pub use message::{CellMessage, ClientMessage};
pub use range_list::{Crossing, RangeList, TriggerOwner};
pub use space::{CellRect, SpacePartition};
pub use witness::{Witness, WitnessData};
