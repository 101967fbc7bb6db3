//! # Memory Management
//!
//! Handle-addressed storage for the node arenas the simulation is built on.
//!
//! ## Slab
//!
//! Values are stored in a growable vector of slots. Freed slots are
//! recycled through a free list, and every slot carries a generation that
//! is bumped on free, so a handle to a freed value can never alias the
//! value that later reuses its slot.

mod slab;

pub use slab::{Slab, SlabHandle};
