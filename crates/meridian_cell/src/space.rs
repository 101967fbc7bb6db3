//! # Space Partition
//!
//! Which cell owns which part of the space.
//!
//! ```text
//!   ┌──────────┬──────────┐
//!   │  cell A  │  cell B  │     a real in A within ghost_distance of B's
//!   │      ●───┼─▶ ghost  │     rectangle keeps a ghost on B; once it is
//!   ├──────────┼──────────┤     more than ghost_distance + hysteresis
//!   │  cell C  │  cell D  │     away the ghost is deleted
//!   └──────────┴──────────┘
//! ```
//!
//! Rectangles are half-open: `min <= p < max` on both axes. Positions
//! outside every rectangle belong to nobody and stay where they are.

use meridian_shared::{Address, Vec3};

use crate::config::PartitionEntry;

/// Axis-aligned rectangle on the XZ plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellRect {
    /// Minimum X (inclusive).
    pub min_x: f32,
    /// Minimum Z (inclusive).
    pub min_z: f32,
    /// Maximum X (exclusive).
    pub max_x: f32,
    /// Maximum Z (exclusive).
    pub max_z: f32,
}

impl CellRect {
    /// Creates a rectangle.
    #[must_use]
    pub const fn new(min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> Self {
        Self {
            min_x,
            min_z,
            max_x,
            max_z,
        }
    }

    /// A rectangle covering the whole plane.
    #[must_use]
    pub const fn everything() -> Self {
        Self::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::INFINITY, f32::INFINITY)
    }

    /// Returns true if `(x, z)` lies inside.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.min_x && x < self.max_x && z >= self.min_z && z < self.max_z
    }

    /// Returns true if min is strictly below max on both axes.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min_x < self.max_x && self.min_z < self.max_z
    }

    /// Chebyshev distance from `(x, z)` to the rectangle, 0 inside. Square
    /// like the range list's triggers.
    #[must_use]
    pub fn distance(&self, x: f32, z: f32) -> f32 {
        let dx = (self.min_x - x).max(x - self.max_x).max(0.0);
        let dz = (self.min_z - z).max(z - self.max_z).max(0.0);
        dx.max(dz)
    }
}

/// The cells of a space and their rectangles.
#[derive(Clone, Debug)]
pub struct SpacePartition {
    own: Address,
    cells: Vec<(Address, CellRect)>,
}

impl SpacePartition {
    /// A space served by one cell.
    #[must_use]
    pub fn single(own: Address) -> Self {
        Self {
            own,
            cells: vec![(own, CellRect::everything())],
        }
    }

    /// Builds the partition from config entries. An empty list means a
    /// single-cell space.
    #[must_use]
    pub fn from_entries(own: Address, entries: &[PartitionEntry]) -> Self {
        if entries.is_empty() {
            return Self::single(own);
        }
        Self {
            own,
            cells: entries.iter().map(|e| (e.address, e.rect())).collect(),
        }
    }

    /// This cell's address.
    #[inline]
    #[must_use]
    pub const fn own_address(&self) -> Address {
        self.own
    }

    /// Every cell with its rectangle.
    #[must_use]
    pub fn cells(&self) -> &[(Address, CellRect)] {
        &self.cells
    }

    /// Rectangle of a cell.
    #[must_use]
    pub fn rect_of(&self, address: Address) -> Option<CellRect> {
        self.cells.iter().find(|(a, _)| *a == address).map(|(_, r)| *r)
    }

    /// Cell owning a position. The first matching rectangle wins.
    #[must_use]
    pub fn owner_of(&self, position: Vec3) -> Option<Address> {
        self.cells
            .iter()
            .find(|(_, rect)| rect.contains(position.x, position.z))
            .map(|(address, _)| *address)
    }

    /// Returns true if this cell owns `position`, or nobody does.
    #[must_use]
    pub fn is_own(&self, position: Vec3) -> bool {
        self.owner_of(position).map_or(true, |owner| owner == self.own)
    }

    /// Other cells whose rectangle is within `distance` of `position`.
    #[must_use]
    pub fn cells_within(&self, position: Vec3, distance: f32) -> Vec<Address> {
        self.cells
            .iter()
            .filter(|(address, rect)| {
                *address != self.own && rect.distance(position.x, position.z) <= distance
            })
            .map(|(address, _)| *address)
            .collect()
    }

    /// Ghost set changes for a real at `position` that currently haunts
    /// `haunts`.
    ///
    /// # Returns
    ///
    /// `(create, delete)`: cells within `ghost_distance` without a ghost,
    /// and haunts further than `ghost_distance + hysteresis`.
    #[must_use]
    pub fn ghost_changes(
        &self,
        position: Vec3,
        haunts: &[Address],
        ghost_distance: f32,
        hysteresis: f32,
    ) -> (Vec<Address>, Vec<Address>) {
        let create = self
            .cells_within(position, ghost_distance)
            .into_iter()
            .filter(|a| !haunts.contains(a))
            .collect();
        let delete = haunts
            .iter()
            .filter(|a| {
                self.rect_of(**a).map_or(true, |rect| {
                    rect.distance(position.x, position.z) > ghost_distance + hysteresis
                })
            })
            .copied()
            .collect();
        (create, delete)
    }
}
