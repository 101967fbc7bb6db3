//! # Range List Nodes
//!
//! Point-like members of the two axis lists.
//!
//! ## Ordering
//!
//! Nodes are sorted by `(coordinate, order)`. The order byte only matters
//! when two coordinates are equal:
//!
//! ```text
//!   HEAD(0) < ENTITY/MARKER(64) < LOWER(128) < UPPER(192) < TAIL(255)
//! ```
//!
//! Putting points before bounds at equal coordinates makes list position
//! and the numeric test agree: a point `p` sits between a trigger's bounds
//! exactly when `lower < p <= upper`.

use meridian_core::SlabHandle;
use meridian_shared::EntityId;

use super::trigger::TriggerId;

/// Handle to a node in a [`RangeList`](super::RangeList).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) SlabHandle);

/// One of the two sorted axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// The X list.
    X,
    /// The Z list.
    Z,
}

impl Axis {
    /// The other axis.
    #[inline]
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::X => Self::Z,
            Self::Z => Self::X,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Z => 1,
        }
    }
}

/// Node flag word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// The node generates crossings when it passes trigger bounds.
    pub const MAKES_CROSSINGS: Self = Self(0x01);
    /// Lower bound of a trigger.
    pub const LOWER_BOUND: Self = Self(0x02);
    /// Upper bound of a trigger.
    pub const UPPER_BOUND: Self = Self(0x04);
    /// Head or tail terminator.
    pub const TERMINATOR: Self = Self(0x08);

    /// Returns true if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the node is a trigger bound.
    #[inline]
    #[must_use]
    pub const fn is_bound(self) -> bool {
        self.0 & (Self::LOWER_BOUND.0 | Self::UPPER_BOUND.0) != 0
    }
}

/// What a node stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Negative-infinity terminator.
    Head,
    /// Positive-infinity terminator.
    Tail,
    /// An entity. Entities are the only nodes that make crossings.
    Entity(EntityId),
    /// A plain position marker, e.g. the centre of a static trap.
    Marker,
    /// Lower bound of a trigger.
    Lower(TriggerId),
    /// Upper bound of a trigger.
    Upper(TriggerId),
}

impl NodeKind {
    /// Tie-break order at equal coordinates.
    #[must_use]
    pub const fn order(self) -> u8 {
        match self {
            Self::Head => 0,
            Self::Entity(_) | Self::Marker => 64,
            Self::Lower(_) => 128,
            Self::Upper(_) => 192,
            Self::Tail => 255,
        }
    }

    /// Flag word for this kind.
    #[must_use]
    pub const fn flags(self) -> NodeFlags {
        match self {
            Self::Head | Self::Tail => NodeFlags::TERMINATOR,
            Self::Entity(_) => NodeFlags::MAKES_CROSSINGS,
            Self::Marker => NodeFlags(0),
            Self::Lower(_) => NodeFlags::LOWER_BOUND,
            Self::Upper(_) => NodeFlags::UPPER_BOUND,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Links {
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
}

/// A node in both axis lists.
#[derive(Clone, Debug)]
pub struct RangeListNode {
    pub(crate) coords: [f32; 2],
    pub(crate) kind: NodeKind,
    pub(crate) links: [Links; 2],
}

impl RangeListNode {
    pub(crate) fn new(kind: NodeKind, x: f32, z: f32) -> Self {
        Self {
            coords: [x, z],
            kind,
            links: [Links::default(); 2],
        }
    }

    /// X coordinate.
    #[inline]
    #[must_use]
    pub const fn x(&self) -> f32 {
        self.coords[0]
    }

    /// Z coordinate.
    #[inline]
    #[must_use]
    pub const fn z(&self) -> f32 {
        self.coords[1]
    }

    /// Coordinate on `axis`.
    #[inline]
    #[must_use]
    pub const fn coord(&self, axis: Axis) -> f32 {
        self.coords[axis.index()]
    }

    /// Node kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Flag word.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> NodeFlags {
        self.kind.flags()
    }

    /// The entity this node stands for, if any.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        match self.kind {
            NodeKind::Entity(id) => Some(id),
            _ => None,
        }
    }

    /// Previous node on `axis`.
    #[inline]
    #[must_use]
    pub const fn prev(&self, axis: Axis) -> Option<NodeId> {
        self.links[axis.index()].prev
    }

    /// Next node on `axis`.
    #[inline]
    #[must_use]
    pub const fn next(&self, axis: Axis) -> Option<NodeId> {
        self.links[axis.index()].next
    }

    /// True if `self` belongs strictly before `other` on `axis`.
    #[inline]
    #[must_use]
    pub fn sorts_before(&self, other: &Self, axis: Axis) -> bool {
        let (a, b) = (self.coord(axis), other.coord(axis));
        a < b || (a == b && self.kind.order() < other.kind.order())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_sort_before_bounds_at_equal_coordinates() {
        let point = RangeListNode::new(NodeKind::Marker, 5.0, 5.0);
        let head = RangeListNode::new(NodeKind::Head, f32::NEG_INFINITY, f32::NEG_INFINITY);
        assert!(head.sorts_before(&point, Axis::X));
        assert!(!point.sorts_before(&point, Axis::X));

        let tail = RangeListNode::new(NodeKind::Tail, f32::INFINITY, f32::INFINITY);
        assert!(point.sorts_before(&tail, Axis::Z));
    }

    #[test]
    fn test_flags() {
        assert!(NodeKind::Entity(EntityId(1)).flags().contains(NodeFlags::MAKES_CROSSINGS));
        assert!(!NodeKind::Marker.flags().contains(NodeFlags::MAKES_CROSSINGS));
        assert!(NodeKind::Head.flags().contains(NodeFlags::TERMINATOR));
        assert!(!NodeKind::Head.flags().is_bound());
    }
}
