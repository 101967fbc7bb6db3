//! # Range Triggers
//!
//! A trigger is a square centred on a subject node. Its two bound nodes
//! live in the axis lists like any other node; containment changes are
//! detected when a bound and an entity node swap places.

use meridian_core::SlabHandle;
use meridian_shared::{ControllerId, EntityId};

use super::node::{Axis, NodeId};

/// Handle to a trigger in a [`RangeList`](super::RangeList).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(pub(crate) SlabHandle);

/// Who receives a trigger's crossings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerOwner {
    /// A proximity controller.
    Proximity {
        /// Entity owning the controller.
        entity: EntityId,
        /// The controller.
        controller: ControllerId,
    },
    /// Inner (enter) trigger of a witness.
    AoiEnter {
        /// The witnessing entity.
        entity: EntityId,
    },
    /// Outer (leave) trigger of a witness.
    AoiLeave {
        /// The witnessing entity.
        entity: EntityId,
    },
    /// Anything else; the value is opaque to the range list.
    Custom(u64),
}

/// A containment transition between a trigger and an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crossing {
    /// Trigger whose containment changed.
    pub trigger: TriggerId,
    /// Owner of the trigger at the time of the crossing.
    pub owner: TriggerOwner,
    /// Entity that entered or left.
    pub who: EntityId,
    /// True for enter, false for leave.
    pub entered: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct RangeTrigger {
    pub(crate) subject: NodeId,
    pub(crate) lower: NodeId,
    pub(crate) upper: NodeId,
    pub(crate) range: f32,
    pub(crate) owner: TriggerOwner,
    /// Bound coordinates, `[axis][lower, upper]`. These are the values the
    /// bound nodes are sorted by; containment tests read them rather than
    /// recomputing `subject ± range`.
    pub(crate) bounds: [[f32; 2]; 2],
}

impl RangeTrigger {
    /// True if `value` lies inside the trigger's interval on `axis`.
    #[inline]
    pub(crate) fn contains_on(&self, axis: Axis, value: f32) -> bool {
        let [lower, upper] = self.bounds[axis.index()];
        lower < value && value <= upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger_with_bounds(bounds: [[f32; 2]; 2]) -> RangeTrigger {
        let mut slab = meridian_core::Slab::new();
        let node = NodeId(slab.insert(()));
        RangeTrigger {
            subject: node,
            lower: node,
            upper: node,
            range: 1.0,
            owner: TriggerOwner::Custom(0),
            bounds,
        }
    }

    #[test]
    fn test_interval_is_open_below_closed_above() {
        let trigger = trigger_with_bounds([[0.0, 2.0], [10.0, 12.0]]);
        assert!(!trigger.contains_on(Axis::X, 0.0));
        assert!(trigger.contains_on(Axis::X, 2.0));
        assert!(trigger.contains_on(Axis::Z, 11.0));
        assert!(!trigger.contains_on(Axis::Z, 12.5));
    }

    #[test]
    fn test_degenerate_interval_contains_nothing() {
        let trigger = trigger_with_bounds([[3.0, 3.0], [3.0, 3.0]]);
        assert!(!trigger.contains_on(Axis::X, 3.0));
        assert!(!trigger.contains_on(Axis::Z, 3.0));
    }
}
