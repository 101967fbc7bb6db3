//! # MERIDIAN Core
//!
//! Tick-level building blocks shared by every cell process:
//!
//! - [`Slab`]: generational storage. Handles stay valid while the value
//!   lives and resolve to nothing afterwards.
//! - [`BinaryOStream`] / [`BinaryIStream`]: the ordered, untagged
//!   little-endian encoding every inter-process message uses.
//! - [`TimeQueue`]: tick-indexed timers with cancellation and repetition.
//!
//! ## Architecture Rules
//!
//! 1. **Single-threaded** - nothing in here is `Sync` on purpose
//! 2. **No raw pointers** - every cross reference is a slab handle
//! 3. **Errors are values** - stream decoding never panics on bad input

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod memory;
pub mod stream;
pub mod time_queue;

pub use error::{StreamError, StreamResult};
pub use memory::{Slab, SlabHandle};
pub use stream::{BinaryIStream, BinaryOStream};
pub use time_queue::{
    ExpiredTimer, ReleasedTimer, TimeQueue, TimeStamp, TimerHandle, TimerHandler, TimerState,
    UserData,
};
