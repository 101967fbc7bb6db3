//! # MERIDIAN Shared
//!
//! Common types used by every cell process and by the clients they feed.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on cell internals. Anything here is part of
//! the wire vocabulary: entity and controller identifiers, process
//! addresses, and the vector types positions are written with.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod math;

pub use constants::{
    DEFAULT_TICK_RATE, MAX_ID_ALIASES, MAX_LOD_LEVELS, MAX_POSITION_COORD,
};
pub use ids::{Address, ControllerId, EntityId, GameTime, IdAlias, SpaceId};
pub use math::{Direction, Vec3};
