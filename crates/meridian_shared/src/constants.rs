//! # Simulation Constants
//!
//! Values baked into the wire protocol and the client. Changing any of
//! these requires a client rebuild.

/// Default tick rate (game ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 10;

/// Number of one-byte aliases a witness can hand out to its client.
pub const MAX_ID_ALIASES: usize = 256;

/// Number of level-of-detail buckets a witness sorts visible entities into.
pub const MAX_LOD_LEVELS: usize = 4;

/// Largest absolute coordinate an entity may occupy on any axis.
///
/// Positions outside this bound are rejected before they reach the range
/// list, where they would defeat the float ordering.
pub const MAX_POSITION_COORD: f32 = 1_000_000_000.0;
