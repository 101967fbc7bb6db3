//! Mathematical types shared between cells and clients.
//!
//! These are the canonical representations used in the wire protocol.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_POSITION_COORD;

/// 3D Vector - position, velocity
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component (height)
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Distance squared (avoids sqrt)
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    /// Returns true if every component is finite and inside
    /// [`MAX_POSITION_COORD`].
    #[must_use]
    pub fn is_valid_position(self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|c| c.is_finite() && c.abs() <= MAX_POSITION_COORD)
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Facing of an entity, in radians.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Direction {
    /// Rotation about the vertical axis.
    pub yaw: f32,
    /// Rotation about the lateral axis.
    pub pitch: f32,
    /// Rotation about the forward axis.
    pub roll: f32,
}

impl Direction {
    /// Creates a direction.
    #[must_use]
    pub const fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Direction facing along the positive Z axis of the XZ plane for a
    /// given movement vector. Pitch and roll are zero.
    #[must_use]
    pub fn facing(delta: Vec3) -> Self {
        Self::new(delta.x.atan2(delta.z), 0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 0.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f32::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_position_validity() {
        assert!(Vec3::new(1.0, -2.0, 3.0).is_valid_position());
        assert!(!Vec3::new(f32::NAN, 0.0, 0.0).is_valid_position());
        assert!(!Vec3::new(0.0, f32::INFINITY, 0.0).is_valid_position());
        assert!(!Vec3::new(0.0, 0.0, 2.0e9).is_valid_position());
    }

    #[test]
    fn test_pod_layout() {
        assert_eq!(std::mem::size_of::<Vec3>(), 12);
        assert_eq!(std::mem::size_of::<Direction>(), 12);
        let v = Vec3::new(1.0, 2.0, 3.0);
        let bytes = bytemuck::bytes_of(&v);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }
}
