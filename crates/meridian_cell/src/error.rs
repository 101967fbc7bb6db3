//! # Cell Errors
//!
//! Error types for the cell application.
//!
//! Only recoverable conditions are errors: bad arguments from the caller,
//! unknown IDs, malformed messages from other processes. Broken internal
//! invariants are assertions.

use meridian_core::StreamError;
use meridian_shared::{Address, ControllerId, EntityId};
use thiserror::Error;

/// Errors surfaced by [`CellApp`](crate::CellApp) operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellError {
    /// No entity with this ID lives in the cell.
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// The operation needs the real entity, but this cell holds a ghost.
    #[error("Entity {0} is not real in this cell")]
    NotReal(EntityId),

    /// An entity with this ID already exists in the cell.
    #[error("Entity {0} already exists")]
    EntityExists(EntityId),

    /// A position was not finite or out of bounds.
    #[error("Invalid position ({x}, {y}, {z})")]
    InvalidPosition {
        /// X coordinate.
        x: f32,
        /// Y coordinate.
        y: f32,
        /// Z coordinate.
        z: f32,
    },

    /// A caller-supplied argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The controller type is not registered.
    #[error("Unknown controller type: {0}")]
    UnknownControllerType(String),

    /// A controller type name was registered twice.
    #[error("Controller type registered twice: {0}")]
    DuplicateControllerType(&'static str),

    /// The entity has no controller with this ID.
    #[error("Entity {entity} has no controller {controller}")]
    UnknownController {
        /// Owning entity.
        entity: EntityId,
        /// Missing controller.
        controller: ControllerId,
    },

    /// The entity has no witness.
    #[error("Entity {0} has no witness")]
    NoWitness(EntityId),

    /// A message from another process could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(#[from] StreamError),

    /// The transport refused a bundle.
    #[error("Channel to {0} failed")]
    ChannelFailed(Address),

    /// The cell configuration failed validation.
    #[error("Invalid config: {0}")]
    Config(&'static str),
}

/// Result type for cell operations.
pub type CellResult<T> = Result<T, CellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(CellError::UnknownEntity(EntityId(4)).to_string(), "Unknown entity: 4");
        let err: CellError = StreamError::TrailingBytes(3).into();
        assert_eq!(err.to_string(), "Malformed message: 3 trailing bytes after message");
    }
}
