//! # Messages
//!
//! Wire formats between cells and from a witness to its client.
//!
//! ## Encoding
//!
//! Every message is a tag byte followed by its fields in declaration
//! order, little-endian, without per-field tags or versions:
//!
//! ```text
//!   ┌─────┬──────────────────────────────┐
//!   │ tag │ fields...                    │
//!   └─────┴──────────────────────────────┘
//!
//!   bundle: u32 count, then `count` messages back to back
//! ```
//!
//! Variable-length parts (controller streams) are u32-length blobs, so a
//! reader can always find the end of a message it cannot interpret.

use meridian_core::{BinaryIStream, BinaryOStream, StreamError, StreamResult};
use meridian_shared::{Address, ControllerId, Direction, EntityId, IdAlias, Vec3};

use crate::controller::ControllerRecord;
use crate::entity::{read_address, write_address, GhostData, RealData};
use crate::error::CellResult;

// ============================================================================
// CLIENT MESSAGES
// ============================================================================

/// Witness output for one client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// An entity entered the area of interest.
    EnterAoI {
        /// Full entity ID.
        entity: EntityId,
        /// Alias used by every later message about it.
        alias: IdAlias,
        /// Entity type.
        entity_type: u16,
        /// Position.
        position: Vec3,
        /// Direction.
        direction: Direction,
        /// Initial level of detail.
        lod: u8,
    },
    /// An entity left the area of interest. Its alias is free again.
    LeaveAoI {
        /// Full entity ID.
        entity: EntityId,
        /// The alias it had.
        alias: IdAlias,
    },
    /// Volatile state of a visible entity.
    AvatarUpdate {
        /// Entity alias.
        alias: IdAlias,
        /// Position.
        position: Vec3,
        /// Direction.
        direction: Direction,
    },
    /// Level of detail of a visible entity changed.
    DetailLevel {
        /// Entity alias.
        alias: IdAlias,
        /// New level.
        lod: u8,
    },
}

impl ClientMessage {
    const ENTER: u8 = 1;
    const LEAVE: u8 = 2;
    const AVATAR_UPDATE: u8 = 3;
    const DETAIL_LEVEL: u8 = 4;

    /// Encoded size of a [`ClientMessage::EnterAoI`].
    pub const ENTER_AOI_LEN: usize = 1 + 4 + 1 + 2 + 12 + 12 + 1;
    /// Encoded size of a [`ClientMessage::LeaveAoI`].
    pub const LEAVE_AOI_LEN: usize = 1 + 4 + 1;

    /// Encoded size in bytes. Used for bandwidth accounting.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::EnterAoI { .. } => Self::ENTER_AOI_LEN,
            Self::LeaveAoI { .. } => Self::LEAVE_AOI_LEN,
            Self::AvatarUpdate { .. } => 1 + 1 + 12 + 12,
            Self::DetailLevel { .. } => 1 + 1 + 1,
        }
    }

    /// Writes the message.
    pub fn write(&self, stream: &mut BinaryOStream) {
        match self {
            Self::EnterAoI {
                entity,
                alias,
                entity_type,
                position,
                direction,
                lod,
            } => {
                stream.write_u8(Self::ENTER);
                stream.write_u32(entity.0);
                stream.write_u8(alias.0);
                stream.write_u16(*entity_type);
                stream.write_pod(position);
                stream.write_pod(direction);
                stream.write_u8(*lod);
            }
            Self::LeaveAoI { entity, alias } => {
                stream.write_u8(Self::LEAVE);
                stream.write_u32(entity.0);
                stream.write_u8(alias.0);
            }
            Self::AvatarUpdate {
                alias,
                position,
                direction,
            } => {
                stream.write_u8(Self::AVATAR_UPDATE);
                stream.write_u8(alias.0);
                stream.write_pod(position);
                stream.write_pod(direction);
            }
            Self::DetailLevel { alias, lod } => {
                stream.write_u8(Self::DETAIL_LEVEL);
                stream.write_u8(alias.0);
                stream.write_u8(*lod);
            }
        }
    }

    /// Reads a message written by [`ClientMessage::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or the tag is unknown.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        let tag = stream.read_u8()?;
        Ok(match tag {
            Self::ENTER => Self::EnterAoI {
                entity: EntityId(stream.read_u32()?),
                alias: IdAlias(stream.read_u8()?),
                entity_type: stream.read_u16()?,
                position: stream.read_pod()?,
                direction: stream.read_pod()?,
                lod: stream.read_u8()?,
            },
            Self::LEAVE => Self::LeaveAoI {
                entity: EntityId(stream.read_u32()?),
                alias: IdAlias(stream.read_u8()?),
            },
            Self::AVATAR_UPDATE => Self::AvatarUpdate {
                alias: IdAlias(stream.read_u8()?),
                position: stream.read_pod()?,
                direction: stream.read_pod()?,
            },
            Self::DETAIL_LEVEL => Self::DetailLevel {
                alias: IdAlias(stream.read_u8()?),
                lod: stream.read_u8()?,
            },
            other => {
                return Err(StreamError::InvalidValue {
                    what: "client message tag",
                    value: u64::from(other),
                })
            }
        })
    }
}

// ============================================================================
// CELL MESSAGES
// ============================================================================

/// Message between cells.
#[derive(Clone, Debug, PartialEq)]
pub enum CellMessage {
    /// Create a ghost of a real entity living elsewhere.
    CreateGhost(GhostData),
    /// Delete a ghost.
    DelGhost {
        /// The ghosted entity.
        entity: EntityId,
    },
    /// Volatile state of a real entity changed.
    GhostPositionUpdate {
        /// The ghosted entity.
        entity: EntityId,
        /// New position.
        position: Vec3,
        /// New direction.
        direction: Direction,
        /// Update number of the real.
        volatile_number: u32,
    },
    /// A ghost-domain controller was added on the real.
    GhostControllerCreate {
        /// The ghosted entity.
        entity: EntityId,
        /// Controller with its ghost stream.
        record: ControllerRecord,
    },
    /// Ghost state of a controller changed.
    GhostControllerUpdate {
        /// The ghosted entity.
        entity: EntityId,
        /// Controller with its new ghost stream.
        record: ControllerRecord,
    },
    /// A ghost-domain controller was cancelled on the real.
    GhostControllerDelete {
        /// The ghosted entity.
        entity: EntityId,
        /// The controller.
        controller: ControllerId,
    },
    /// The real entity moved to another cell.
    GhostSetReal {
        /// The ghosted entity.
        entity: EntityId,
        /// Where the real lives now.
        real_addr: Address,
    },
    /// Become the real entity.
    Onload {
        /// The entity.
        entity: EntityId,
        /// Ghost data, present when the destination may not have a ghost
        /// (teleports).
        ghost: Option<GhostData>,
        /// Real-only state.
        real: RealData,
        /// True for a teleport rather than a boundary crossing.
        is_teleport: bool,
    },
}

impl CellMessage {
    const CREATE_GHOST: u8 = 1;
    const DEL_GHOST: u8 = 2;
    const GHOST_POSITION_UPDATE: u8 = 3;
    const GHOST_CONTROLLER_CREATE: u8 = 4;
    const GHOST_CONTROLLER_UPDATE: u8 = 5;
    const GHOST_CONTROLLER_DELETE: u8 = 6;
    const GHOST_SET_REAL: u8 = 7;
    const ONLOAD: u8 = 8;

    /// Entity the message is about.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match self {
            Self::CreateGhost(data) => data.id,
            Self::DelGhost { entity }
            | Self::GhostPositionUpdate { entity, .. }
            | Self::GhostControllerCreate { entity, .. }
            | Self::GhostControllerUpdate { entity, .. }
            | Self::GhostControllerDelete { entity, .. }
            | Self::GhostSetReal { entity, .. }
            | Self::Onload { entity, .. } => *entity,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateGhost(_) => "CreateGhost",
            Self::DelGhost { .. } => "DelGhost",
            Self::GhostPositionUpdate { .. } => "GhostPositionUpdate",
            Self::GhostControllerCreate { .. } => "GhostControllerCreate",
            Self::GhostControllerUpdate { .. } => "GhostControllerUpdate",
            Self::GhostControllerDelete { .. } => "GhostControllerDelete",
            Self::GhostSetReal { .. } => "GhostSetReal",
            Self::Onload { .. } => "Onload",
        }
    }

    /// Writes the message.
    pub fn write(&self, stream: &mut BinaryOStream) {
        match self {
            Self::CreateGhost(data) => {
                stream.write_u8(Self::CREATE_GHOST);
                data.write(stream);
            }
            Self::DelGhost { entity } => {
                stream.write_u8(Self::DEL_GHOST);
                stream.write_u32(entity.0);
            }
            Self::GhostPositionUpdate {
                entity,
                position,
                direction,
                volatile_number,
            } => {
                stream.write_u8(Self::GHOST_POSITION_UPDATE);
                stream.write_u32(entity.0);
                stream.write_pod(position);
                stream.write_pod(direction);
                stream.write_u32(*volatile_number);
            }
            Self::GhostControllerCreate { entity, record } => {
                stream.write_u8(Self::GHOST_CONTROLLER_CREATE);
                stream.write_u32(entity.0);
                record.write(stream);
            }
            Self::GhostControllerUpdate { entity, record } => {
                stream.write_u8(Self::GHOST_CONTROLLER_UPDATE);
                stream.write_u32(entity.0);
                record.write(stream);
            }
            Self::GhostControllerDelete { entity, controller } => {
                stream.write_u8(Self::GHOST_CONTROLLER_DELETE);
                stream.write_u32(entity.0);
                stream.write_u32(controller.0);
            }
            Self::GhostSetReal { entity, real_addr } => {
                stream.write_u8(Self::GHOST_SET_REAL);
                stream.write_u32(entity.0);
                write_address(stream, *real_addr);
            }
            Self::Onload {
                entity,
                ghost,
                real,
                is_teleport,
            } => {
                stream.write_u8(Self::ONLOAD);
                stream.write_u32(entity.0);
                stream.write_bool(*is_teleport);
                match ghost {
                    Some(data) => {
                        stream.write_bool(true);
                        data.write(stream);
                    }
                    None => stream.write_bool(false),
                }
                real.write(stream);
            }
        }
    }

    /// Reads a message written by [`CellMessage::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short, the tag is unknown, or a
    /// field holds an invalid value.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        let tag = stream.read_u8()?;
        Ok(match tag {
            Self::CREATE_GHOST => Self::CreateGhost(GhostData::read(stream)?),
            Self::DEL_GHOST => Self::DelGhost {
                entity: EntityId(stream.read_u32()?),
            },
            Self::GHOST_POSITION_UPDATE => Self::GhostPositionUpdate {
                entity: EntityId(stream.read_u32()?),
                position: stream.read_pod()?,
                direction: stream.read_pod()?,
                volatile_number: stream.read_u32()?,
            },
            Self::GHOST_CONTROLLER_CREATE => Self::GhostControllerCreate {
                entity: EntityId(stream.read_u32()?),
                record: ControllerRecord::read(stream)?,
            },
            Self::GHOST_CONTROLLER_UPDATE => Self::GhostControllerUpdate {
                entity: EntityId(stream.read_u32()?),
                record: ControllerRecord::read(stream)?,
            },
            Self::GHOST_CONTROLLER_DELETE => Self::GhostControllerDelete {
                entity: EntityId(stream.read_u32()?),
                controller: ControllerId(stream.read_u32()?),
            },
            Self::GHOST_SET_REAL => Self::GhostSetReal {
                entity: EntityId(stream.read_u32()?),
                real_addr: read_address(stream)?,
            },
            Self::ONLOAD => {
                let entity = EntityId(stream.read_u32()?);
                let is_teleport = stream.read_bool()?;
                let ghost = if stream.read_bool()? {
                    Some(GhostData::read(stream)?)
                } else {
                    None
                };
                Self::Onload {
                    entity,
                    ghost,
                    real: RealData::read(stream)?,
                    is_teleport,
                }
            }
            other => {
                return Err(StreamError::InvalidValue {
                    what: "cell message tag",
                    value: u64::from(other),
                })
            }
        })
    }
}

// ============================================================================
// BUNDLES
// ============================================================================

/// Messages batched for one destination.
#[derive(Debug, Default)]
pub struct Bundle {
    stream: BinaryOStream,
    count: u32,
}

impl Bundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.count
    }

    /// Returns true if nothing has been added.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends a message.
    pub fn add(&mut self, message: &CellMessage) {
        message.write(&mut self.stream);
        self.count += 1;
    }

    /// Encodes the bundle and leaves it empty.
    pub fn take(&mut self) -> Vec<u8> {
        let body = std::mem::take(&mut self.stream);
        let mut out = BinaryOStream::with_capacity(4 + body.len());
        out.write_u32(std::mem::take(&mut self.count));
        out.write_raw(body.as_slice());
        out.into_inner()
    }
}

/// Decodes a bundle produced by [`Bundle::take`].
///
/// # Errors
///
/// Returns [`CellError::Malformed`](crate::CellError::Malformed) if any
/// message fails to decode or bytes are left over.
pub fn decode_bundle(data: &[u8]) -> CellResult<Vec<CellMessage>> {
    let mut stream = BinaryIStream::new(data);
    let count = stream.read_u32()?;
    let mut messages = Vec::with_capacity((count as usize).min(data.len()));
    for _ in 0..count {
        messages.push(CellMessage::read(&mut stream)?);
    }
    stream.finish()?;
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_sizes_match_encoding() {
        let messages = [
            ClientMessage::EnterAoI {
                entity: EntityId(1),
                alias: IdAlias(0),
                entity_type: 3,
                position: Vec3::new(1.0, 2.0, 3.0),
                direction: Direction::default(),
                lod: 1,
            },
            ClientMessage::LeaveAoI {
                entity: EntityId(1),
                alias: IdAlias(0),
            },
            ClientMessage::AvatarUpdate {
                alias: IdAlias(9),
                position: Vec3::ZERO,
                direction: Direction::new(1.0, 0.0, 0.0),
            },
            ClientMessage::DetailLevel {
                alias: IdAlias(9),
                lod: 2,
            },
        ];
        for message in &messages {
            let mut out = BinaryOStream::new();
            message.write(&mut out);
            assert_eq!(out.len(), message.encoded_len());
            let decoded = ClientMessage::read(&mut BinaryIStream::new(out.as_slice())).unwrap();
            assert_eq!(&decoded, message);
        }
    }

    #[test]
    fn test_bundle() {
        let mut bundle = Bundle::new();
        assert!(bundle.is_empty());
        bundle.add(&CellMessage::DelGhost { entity: EntityId(4) });
        bundle.add(&CellMessage::GhostSetReal {
            entity: EntityId(4),
            real_addr: Address::local(4002),
        });
        assert_eq!(bundle.len(), 2);

        let data = bundle.take();
        assert!(bundle.is_empty());
        let messages = decode_bundle(&data).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].name(), "GhostSetReal");
        assert_eq!(messages[1].entity(), EntityId(4));
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let data = [1, 0, 0, 0, 99];
        assert!(decode_bundle(&data).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bundle = Bundle::new();
        bundle.add(&CellMessage::DelGhost { entity: EntityId(4) });
        let mut data = bundle.take();
        data.push(0);
        assert!(decode_bundle(&data).is_err());
    }
}
