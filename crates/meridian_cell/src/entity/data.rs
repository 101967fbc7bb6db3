//! Entity state as carried between cells.
//!
//! ```text
//!   GhostData:  id u32 │ type u16 │ real addr │ position │ direction
//!               volatile u32 │ offload count u32 │ ghost controllers
//!
//!   RealData:   velocity │ top speed f32 │ haunts │ last controller id u32
//!               real controllers │ witness?
//! ```
//!
//! Controller lists are a u32 count followed by records of
//! `type u16 │ id u32 │ user arg i32 │ blob`.

use meridian_core::{BinaryIStream, BinaryOStream, StreamError, StreamResult};
use meridian_shared::{Address, Direction, EntityId, Vec3};

use crate::controller::{read_record_list, write_record_list, ControllerRecord};
use crate::witness::WitnessData;

/// Writes an address.
pub fn write_address(stream: &mut BinaryOStream, address: Address) {
    stream.write_u32(address.ip);
    stream.write_u16(address.port);
}

/// Reads an address written by [`write_address`].
///
/// # Errors
///
/// Returns an error if the stream is short.
pub fn read_address(stream: &mut BinaryIStream<'_>) -> StreamResult<Address> {
    Ok(Address::new(stream.read_u32()?, stream.read_u16()?))
}

fn read_position(stream: &mut BinaryIStream<'_>) -> StreamResult<Vec3> {
    let position: Vec3 = stream.read_pod()?;
    if !position.is_valid_position() {
        return Err(StreamError::InvalidValue {
            what: "position",
            value: u64::from(position.x.to_bits()),
        });
    }
    Ok(position)
}

/// Everything needed to create a ghost.
#[derive(Clone, Debug, PartialEq)]
pub struct GhostData {
    /// Entity ID.
    pub id: EntityId,
    /// Entity type.
    pub entity_type: u16,
    /// Cell holding the real entity.
    pub real_addr: Address,
    /// Position.
    pub position: Vec3,
    /// Direction.
    pub direction: Direction,
    /// Update number of the real.
    pub volatile_number: u32,
    /// How many times the real has been offloaded.
    pub num_times_real_offloaded: u32,
    /// Ghost-domain controllers with their ghost streams.
    pub controllers: Vec<ControllerRecord>,
}

impl GhostData {
    /// Writes the ghost data.
    pub fn write(&self, stream: &mut BinaryOStream) {
        stream.write_u32(self.id.0);
        stream.write_u16(self.entity_type);
        write_address(stream, self.real_addr);
        stream.write_pod(&self.position);
        stream.write_pod(&self.direction);
        stream.write_u32(self.volatile_number);
        stream.write_u32(self.num_times_real_offloaded);
        write_record_list(stream, &self.controllers);
    }

    /// Reads ghost data written by [`GhostData::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or the position is invalid.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        Ok(Self {
            id: EntityId(stream.read_u32()?),
            entity_type: stream.read_u16()?,
            real_addr: read_address(stream)?,
            position: read_position(stream)?,
            direction: stream.read_pod()?,
            volatile_number: stream.read_u32()?,
            num_times_real_offloaded: stream.read_u32()?,
            controllers: read_record_list(stream)?,
        })
    }
}

/// State that only the real entity has.
#[derive(Clone, Debug, PartialEq)]
pub struct RealData {
    /// Sampled velocity, units per tick.
    pub velocity: Vec3,
    /// Top speed, units per tick.
    pub top_speed: f32,
    /// Cells holding a ghost, the sending cell included.
    pub haunts: Vec<Address>,
    /// Controller ID allocator position.
    pub last_allocated: u32,
    /// Real-domain controllers with their real streams.
    pub controllers: Vec<ControllerRecord>,
    /// Witness state, if the entity has one.
    pub witness: Option<WitnessData>,
}

impl RealData {
    /// Writes the real data.
    pub fn write(&self, stream: &mut BinaryOStream) {
        stream.write_pod(&self.velocity);
        stream.write_f32(self.top_speed);
        stream.write_u32(u32::try_from(self.haunts.len()).unwrap_or(u32::MAX));
        for haunt in &self.haunts {
            write_address(stream, *haunt);
        }
        stream.write_u32(self.last_allocated);
        write_record_list(stream, &self.controllers);
        match &self.witness {
            Some(witness) => {
                stream.write_bool(true);
                witness.write(stream);
            }
            None => stream.write_bool(false),
        }
    }

    /// Reads real data written by [`RealData::write`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is short or a field is invalid.
    pub fn read(stream: &mut BinaryIStream<'_>) -> StreamResult<Self> {
        let velocity = stream.read_pod()?;
        let top_speed = stream.read_f32()?;
        let count = stream.read_u32()?;
        let mut haunts = Vec::with_capacity((count as usize).min(stream.remaining() / 6));
        for _ in 0..count {
            haunts.push(read_address(stream)?);
        }
        let last_allocated = stream.read_u32()?;
        let controllers = read_record_list(stream)?;
        let witness = if stream.read_bool()? {
            Some(WitnessData::read(stream)?)
        } else {
            None
        };
        Ok(Self {
            velocity,
            top_speed,
            haunts,
            last_allocated,
            controllers,
            witness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerTypeId;
    use meridian_shared::ControllerId;

    fn ghost_data() -> GhostData {
        GhostData {
            id: EntityId(77),
            entity_type: 2,
            real_addr: Address::local(4001),
            position: Vec3::new(10.0, 0.0, -4.0),
            direction: Direction::new(0.5, 0.0, 0.0),
            volatile_number: 12,
            num_times_real_offloaded: 3,
            controllers: vec![ControllerRecord {
                type_id: ControllerTypeId(1),
                id: ControllerId(2),
                user_arg: 5,
                data: vec![9, 9],
            }],
        }
    }

    #[test]
    fn test_ghost_data_stream() {
        let data = ghost_data();
        let mut out = BinaryOStream::new();
        data.write(&mut out);
        let mut input = BinaryIStream::new(out.as_slice());
        assert_eq!(GhostData::read(&mut input).unwrap(), data);
        assert!(input.finish().is_ok());
    }

    #[test]
    fn test_invalid_position_rejected() {
        let mut data = ghost_data();
        data.position = Vec3::new(f32::NAN, 0.0, 0.0);
        let mut out = BinaryOStream::new();
        data.write(&mut out);
        assert!(GhostData::read(&mut BinaryIStream::new(out.as_slice())).is_err());
    }

    #[test]
    fn test_real_data_stream() {
        let data = RealData {
            velocity: Vec3::new(1.0, 0.0, 0.0),
            top_speed: 4.0,
            haunts: vec![Address::local(4001), Address::local(4003)],
            last_allocated: 6,
            controllers: Vec::new(),
            witness: Some(WitnessData {
                radius: 50.0,
                hysteresis: 5.0,
                entries: Vec::new(),
            }),
        };
        let mut out = BinaryOStream::new();
        data.write(&mut out);
        let mut input = BinaryIStream::new(out.as_slice());
        assert_eq!(RealData::read(&mut input).unwrap(), data);
        assert!(input.finish().is_ok());
    }
}
