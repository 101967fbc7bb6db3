//! # Range List
//!
//! Spatial index of points kept in two independently sorted doubly-linked
//! lists, one per horizontal axis.
//!
//! ## Architecture
//!
//! ```text
//!   X list:  HEAD ─ e1 ─ L(t) ─ e2 ─ e3 ─ U(t) ─ e4 ─ TAIL
//!   Z list:  HEAD ─ e3 ─ L(t) ─ e2 ─ U(t) ─ e1 ─ e4 ─ TAIL
//!
//!   e2 is inside trigger t: between its bounds on both lists.
//! ```
//!
//! - Nodes live in a [`Slab`] and link to each other by [`NodeId`].
//! - Moving a node walks it along each list only as far as its new
//!   coordinate requires, so small moves are O(1).
//! - When an entity node and a trigger bound swap places, the entity's
//!   containment on that axis flips. It becomes a [`Crossing`] if the
//!   entity is inside the trigger on the *other* axis too.
//! - Every move runs the whole X pass before the Z pass. During the X pass
//!   the mover's old Z is used for the other-axis test, during the Z pass
//!   its new X, so each pass is a straight axis-aligned move and the two
//!   together account for every containment change exactly once.
//! - Crossings are buffered and coalesced per operation: an enter and a
//!   leave for the same (trigger, entity) inside one operation cancel.
//!   Callers collect them with [`RangeList::take_crossings`] once the
//!   lists are consistent again, so no callback ever runs mid-shuffle.

mod node;
mod trigger;

use std::collections::HashMap;

use meridian_core::Slab;
use meridian_shared::EntityId;

pub use node::{Axis, NodeFlags, NodeId, NodeKind, RangeListNode};
pub use trigger::{Crossing, TriggerId, TriggerOwner};

use trigger::RangeTrigger;

const AXES: [Axis; 2] = [Axis::X, Axis::Z];

/// Two-axis sorted spatial index with enter/leave triggers.
pub struct RangeList {
    nodes: Slab<RangeListNode>,
    triggers: Slab<RangeTrigger>,
    /// Triggers centred on each node.
    attached: HashMap<NodeId, Vec<TriggerId>>,
    /// Entity nodes by entity ID.
    entities: HashMap<EntityId, NodeId>,
    head: NodeId,
    tail: NodeId,
    /// Largest range any trigger has had. Bounds how far a removed node
    /// has to travel to leave every trigger containing it.
    max_range: f32,
    /// Crossings of the operation in progress.
    scratch: Vec<Crossing>,
    /// Crossings of completed operations, not yet taken.
    crossings: Vec<Crossing>,
}

impl RangeList {
    /// Creates an empty list holding only the two terminators.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Slab::new();
        let head = NodeId(nodes.insert(RangeListNode::new(
            NodeKind::Head,
            f32::NEG_INFINITY,
            f32::NEG_INFINITY,
        )));
        let tail = NodeId(nodes.insert(RangeListNode::new(
            NodeKind::Tail,
            f32::INFINITY,
            f32::INFINITY,
        )));

        let mut list = Self {
            nodes,
            triggers: Slab::new(),
            attached: HashMap::new(),
            entities: HashMap::new(),
            head,
            tail,
            max_range: 0.0,
            scratch: Vec::new(),
            crossings: Vec::new(),
        };
        for axis in AXES {
            list.link_mut(head, axis).next = Some(tail);
            list.link_mut(tail, axis).prev = Some(head);
        }
        list
    }

    /// Number of nodes, terminators and trigger bounds excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 2 - 2 * self.triggers.len()
    }

    /// Returns true if the list holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of inserted triggers.
    #[must_use]
    pub fn num_triggers(&self) -> usize {
        self.triggers.len()
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&RangeListNode> {
        self.nodes.get(id.0)
    }

    // =========================================================================
    // POINTS
    // =========================================================================

    /// Inserts an entity node. Triggers already covering the position
    /// report an enter.
    ///
    /// # Panics
    ///
    /// Panics if a coordinate is not finite or the entity already has a
    /// node.
    pub fn add_entity(&mut self, entity: EntityId, x: f32, z: f32) -> NodeId {
        assert!(!self.entities.contains_key(&entity), "entity {entity} inserted twice");
        let id = self.insert_point(NodeKind::Entity(entity), x, z);
        self.entities.insert(entity, id);
        id
    }

    /// Node of an entity.
    #[must_use]
    pub fn find_entity(&self, entity: EntityId) -> Option<NodeId> {
        self.entities.get(&entity).copied()
    }

    /// Inserts a marker node. Markers never make crossings but can be
    /// trigger subjects.
    ///
    /// # Panics
    ///
    /// Panics if a coordinate is not finite.
    pub fn add_marker(&mut self, x: f32, z: f32) -> NodeId {
        self.insert_point(NodeKind::Marker, x, z)
    }

    fn insert_point(&mut self, kind: NodeKind, x: f32, z: f32) -> NodeId {
        assert!(x.is_finite() && z.is_finite(), "range list coordinates must be finite");

        let id = NodeId(self.nodes.insert(RangeListNode::new(kind, x, z)));
        for axis in AXES {
            self.link_after(axis, id, self.head);
        }
        // Enter from negative infinity: no Z containment during the X pass,
        // so only triggers that really cover (x, z) survive coalescing.
        self.shuffle(Axis::X, id, f32::NEG_INFINITY);
        self.shuffle(Axis::Z, id, x);
        self.commit();
        id
    }

    /// Moves a node, then every trigger centred on it.
    ///
    /// # Panics
    ///
    /// Panics if the node is stale, is a bound or terminator, or if a
    /// coordinate is not finite.
    pub fn move_node(&mut self, id: NodeId, x: f32, z: f32) {
        assert!(x.is_finite() && z.is_finite(), "range list coordinates must be finite");
        let node = &mut self.nodes[id.0];
        assert!(
            matches!(node.kind, NodeKind::Entity(_) | NodeKind::Marker),
            "only points can be moved directly"
        );

        let old_z = node.z();
        node.coords = [x, z];
        self.shuffle(Axis::X, id, old_z);
        self.shuffle(Axis::Z, id, x);

        let attached = self.attached.get(&id).cloned().unwrap_or_default();
        for trigger in attached {
            self.update_trigger(trigger);
        }
        self.commit();
    }

    /// Removes a point. Triggers containing it report a leave; triggers
    /// centred on it are removed without contracting.
    ///
    /// # Panics
    ///
    /// Panics if the node is stale or is not a point.
    pub fn remove_node(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        assert!(
            matches!(node.kind, NodeKind::Entity(_) | NodeKind::Marker),
            "only points can be removed directly"
        );
        let (entity, x, z) = (node.entity(), node.x(), node.z());
        if let Some(entity) = entity {
            self.entities.remove(&entity);
        }

        for trigger in self.attached.remove(&id).unwrap_or_default() {
            self.detach_trigger(trigger);
        }

        if entity.is_some() && self.max_range > 0.0 {
            // Any trigger containing the node has its upper X bound within
            // 2 * max_range to the right of it.
            let target = x + 2.0 * self.max_range + 1.0 + x.abs() * 4.0 * f32::EPSILON;
            self.nodes[id.0].coords[0] = target;
            self.shuffle(Axis::X, id, z);
            // Passing a lower bound whose upper lies beyond the target reads
            // as an enter. A leaving node enters nothing.
            self.scratch.retain(|c| !(c.entered && Some(c.who) == entity));
        }
        self.commit();

        for axis in AXES {
            self.unlink(axis, id);
        }
        self.nodes.remove(id.0);
    }

    // =========================================================================
    // TRIGGERS
    // =========================================================================

    /// Inserts a trigger centred on `subject`. Entities already inside the
    /// square report an enter.
    ///
    /// # Panics
    ///
    /// Panics if `subject` is stale or `range` is negative or not finite.
    pub fn add_trigger(&mut self, subject: NodeId, range: f32, owner: TriggerOwner) -> TriggerId {
        assert!(range >= 0.0 && range.is_finite(), "trigger range must be >= 0");
        let centre = &self.nodes[subject.0];
        let (sx, sz) = (centre.x(), centre.z());

        let lower = NodeId(self.nodes.insert(RangeListNode::new(NodeKind::Marker, sx, sz)));
        let upper = NodeId(self.nodes.insert(RangeListNode::new(NodeKind::Marker, sx, sz)));
        let id = TriggerId(self.triggers.insert(RangeTrigger {
            subject,
            lower,
            upper,
            range: 0.0,
            owner,
            bounds: [[sx, sx], [sz, sz]],
        }));
        self.nodes[lower.0].kind = NodeKind::Lower(id);
        self.nodes[upper.0].kind = NodeKind::Upper(id);

        // Zero-sized square: placement cannot produce crossings because the
        // other axis interval is empty.
        for axis in AXES {
            self.link_after(axis, lower, subject);
            self.link_after(axis, upper, lower);
            self.shuffle(axis, lower, 0.0);
            self.shuffle(axis, upper, 0.0);
        }
        self.attached.entry(subject).or_default().push(id);

        self.set_range(id, range);
        id
    }

    /// Changes a trigger's range and re-runs crossing detection.
    ///
    /// # Panics
    ///
    /// Panics if the trigger is stale or `range` is negative or not finite.
    pub fn set_range(&mut self, id: TriggerId, range: f32) {
        assert!(range >= 0.0 && range.is_finite(), "trigger range must be >= 0");
        self.triggers[id.0].range = range;
        self.max_range = self.max_range.max(range);
        self.update_trigger(id);
        self.commit();
    }

    /// Contracts a trigger to nothing, reporting a leave for every entity
    /// inside, then removes it.
    pub fn remove_trigger(&mut self, id: TriggerId) {
        if !self.triggers.contains(id.0) {
            return;
        }
        self.set_range(id, 0.0);
        self.remove_trigger_without_contracting(id);
    }

    /// Removes a trigger without reporting any leave. For callers that
    /// know every contained entity has been dealt with some other way.
    pub fn remove_trigger_without_contracting(&mut self, id: TriggerId) {
        let Some(trigger) = self.triggers.get(id.0) else {
            return;
        };
        let subject = trigger.subject;
        if let Some(list) = self.attached.get_mut(&subject) {
            list.retain(|t| *t != id);
            if list.is_empty() {
                self.attached.remove(&subject);
            }
        }
        self.detach_trigger(id);
    }

    fn detach_trigger(&mut self, id: TriggerId) {
        let Some(trigger) = self.triggers.remove(id.0) else {
            return;
        };
        self.scratch.retain(|c| c.trigger != id);
        for bound in [trigger.lower, trigger.upper] {
            for axis in AXES {
                self.unlink(axis, bound);
            }
            self.nodes.remove(bound.0);
        }
    }

    /// Current range of a trigger.
    #[must_use]
    pub fn range(&self, id: TriggerId) -> Option<f32> {
        self.triggers.get(id.0).map(|t| t.range)
    }

    /// Subject node of a trigger.
    #[must_use]
    pub fn subject(&self, id: TriggerId) -> Option<NodeId> {
        self.triggers.get(id.0).map(|t| t.subject)
    }

    /// Owner of a trigger.
    #[must_use]
    pub fn owner(&self, id: TriggerId) -> Option<TriggerOwner> {
        self.triggers.get(id.0).map(|t| t.owner)
    }

    /// Triggers centred on a node.
    #[must_use]
    pub fn triggers_of(&self, node: NodeId) -> &[TriggerId] {
        self.attached.get(&node).map_or(&[], Vec::as_slice)
    }

    /// True if the node is inside the trigger's square.
    #[must_use]
    pub fn contains(&self, id: TriggerId, node: NodeId) -> bool {
        match (self.triggers.get(id.0), self.nodes.get(node.0)) {
            (Some(t), Some(n)) => t.contains_on(Axis::X, n.x()) && t.contains_on(Axis::Z, n.z()),
            _ => false,
        }
    }

    /// True if the node is inside the trigger's Z interval.
    #[must_use]
    pub fn contains_in_z(&self, id: TriggerId, node: NodeId) -> bool {
        match (self.triggers.get(id.0), self.nodes.get(node.0)) {
            (Some(t), Some(n)) => t.contains_on(Axis::Z, n.z()),
            _ => false,
        }
    }

    /// Entities currently inside a trigger, in X order. The subject is
    /// never a member of its own trigger.
    #[must_use]
    pub fn trigger_members(&self, id: TriggerId) -> Vec<EntityId> {
        let Some(trigger) = self.triggers.get(id.0) else {
            return Vec::new();
        };
        let mut members = Vec::new();
        let mut cursor = self.nodes[trigger.lower.0].next(Axis::X);
        while let Some(current) = cursor {
            if current == trigger.upper {
                break;
            }
            let node = &self.nodes[current.0];
            if let Some(entity) = node.entity() {
                if current != trigger.subject && trigger.contains_on(Axis::Z, node.z()) {
                    members.push(entity);
                }
            }
            cursor = node.next(Axis::X);
        }
        members
    }

    /// Entities within a square of half-width `range` around `centre`,
    /// found by walking the X list outwards. `centre` itself is excluded.
    #[must_use]
    pub fn entities_in_square(&self, centre: NodeId, range: f32) -> Vec<EntityId> {
        let Some(origin) = self.nodes.get(centre.0) else {
            return Vec::new();
        };
        let (cx, cz) = (origin.x(), origin.z());
        let mut found = Vec::new();

        for forward in [false, true] {
            let step = |n: &RangeListNode| if forward { n.next(Axis::X) } else { n.prev(Axis::X) };
            let mut cursor = step(origin);
            while let Some(current) = cursor {
                let node = &self.nodes[current.0];
                if (node.x() - cx).abs() > range {
                    break;
                }
                if let Some(entity) = node.entity() {
                    if (node.z() - cz).abs() <= range {
                        found.push(entity);
                    }
                }
                cursor = step(node);
            }
        }
        found
    }

    // =========================================================================
    // CROSSINGS
    // =========================================================================

    /// Takes every crossing produced since the last call.
    pub fn take_crossings(&mut self) -> Vec<Crossing> {
        std::mem::take(&mut self.crossings)
    }

    /// Takes the pending crossings of one trigger, leaving the rest.
    pub fn take_crossings_for(&mut self, id: TriggerId) -> Vec<Crossing> {
        let (mine, rest) = std::mem::take(&mut self.crossings)
            .into_iter()
            .partition(|c| c.trigger == id);
        self.crossings = rest;
        mine
    }

    /// Returns true if crossings are waiting to be taken.
    #[must_use]
    pub fn has_crossings(&self) -> bool {
        !self.crossings.is_empty()
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Iterates the nodes of one axis list from head to tail.
    pub fn iter(&self, axis: Axis) -> impl Iterator<Item = (NodeId, &RangeListNode)> + '_ {
        std::iter::successors(Some(self.head), move |id| self.nodes[id.0].next(axis))
            .map(move |id| (id, &self.nodes[id.0]))
    }

    /// Checks ordering and link symmetry of both lists.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        AXES.iter().all(|&axis| {
            let mut prev: Option<(NodeId, &RangeListNode)> = None;
            for (id, node) in self.iter(axis) {
                if let Some((prev_id, prev_node)) = prev {
                    if node.sorts_before(prev_node, axis) || node.prev(axis) != Some(prev_id) {
                        return false;
                    }
                }
                prev = Some((id, node));
            }
            prev.map(|(id, _)| id) == Some(self.tail)
        })
    }

    // =========================================================================
    // SHUFFLING
    // =========================================================================

    /// Recomputes both bounds of a trigger from its subject, X then Z. On
    /// each axis the bound moving outwards goes first so the bounds never
    /// pass each other.
    fn update_trigger(&mut self, id: TriggerId) {
        let trigger = &self.triggers[id.0];
        let range = trigger.range;
        let subject = &self.nodes[trigger.subject.0];
        let centre = [subject.x(), subject.z()];

        for axis in AXES {
            let c = centre[axis.index()];
            let (new_lower, new_upper) = (c - range, c + range);
            let old_upper = self.triggers[id.0].bounds[axis.index()][1];
            if new_upper > old_upper {
                self.move_bound(id, axis, true, new_upper);
                self.move_bound(id, axis, false, new_lower);
            } else {
                self.move_bound(id, axis, false, new_lower);
                self.move_bound(id, axis, true, new_upper);
            }
        }
    }

    fn move_bound(&mut self, id: TriggerId, axis: Axis, upper: bool, value: f32) {
        let trigger = &mut self.triggers[id.0];
        trigger.bounds[axis.index()][usize::from(upper)] = value;
        let bound = if upper { trigger.upper } else { trigger.lower };
        self.nodes[bound.0].coords[axis.index()] = value;
        self.shuffle(axis, bound, 0.0);
    }

    /// Walks `mover` to its sorted place on `axis`. `mover_other` is the
    /// other-axis coordinate used when `mover` is an entity.
    fn shuffle(&mut self, axis: Axis, mover: NodeId, mover_other: f32) {
        while let Some(prev) = self.nodes[mover.0].prev(axis) {
            if !self.nodes[mover.0].sorts_before(&self.nodes[prev.0], axis) {
                break;
            }
            self.crossed(axis, mover, prev, false, mover_other);
            self.unlink(axis, mover);
            self.link_before(axis, mover, prev);
        }
        while let Some(next) = self.nodes[mover.0].next(axis) {
            if !self.nodes[next.0].sorts_before(&self.nodes[mover.0], axis) {
                break;
            }
            self.crossed(axis, mover, next, true, mover_other);
            self.unlink(axis, mover);
            self.link_after(axis, mover, next);
        }
    }

    /// `mover` has just passed `other` on `axis`, travelling in the
    /// positive direction if `positive`.
    fn crossed(
        &mut self,
        axis: Axis,
        mover: NodeId,
        other: NodeId,
        positive: bool,
        mover_other: f32,
    ) {
        let (entity_node, who, trigger_id, other_coord, entered) =
            match (self.nodes[mover.0].kind, self.nodes[other.0].kind) {
                (NodeKind::Entity(who), NodeKind::Lower(t)) => {
                    (mover, who, t, mover_other, positive)
                }
                (NodeKind::Entity(who), NodeKind::Upper(t)) => {
                    (mover, who, t, mover_other, !positive)
                }
                (NodeKind::Lower(t), NodeKind::Entity(who)) => {
                    (other, who, t, self.nodes[other.0].coord(axis.other()), !positive)
                }
                (NodeKind::Upper(t), NodeKind::Entity(who)) => {
                    (other, who, t, self.nodes[other.0].coord(axis.other()), positive)
                }
                _ => return,
            };

        let trigger = &self.triggers[trigger_id.0];
        if trigger.subject == entity_node || !trigger.contains_on(axis.other(), other_coord) {
            return;
        }
        let owner = trigger.owner;
        self.record(Crossing {
            trigger: trigger_id,
            owner,
            who,
            entered,
        });
    }

    fn record(&mut self, crossing: Crossing) {
        let existing = self
            .scratch
            .iter()
            .position(|c| c.trigger == crossing.trigger && c.who == crossing.who);
        match existing {
            Some(index) => {
                debug_assert_ne!(self.scratch[index].entered, crossing.entered);
                self.scratch.remove(index);
            }
            None => self.scratch.push(crossing),
        }
    }

    fn commit(&mut self) {
        self.crossings.append(&mut self.scratch);
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    fn link_mut(&mut self, id: NodeId, axis: Axis) -> &mut node::Links {
        &mut self.nodes[id.0].links[axis.index()]
    }

    fn unlink(&mut self, axis: Axis, id: NodeId) {
        let links = self.nodes[id.0].links[axis.index()];
        if let Some(prev) = links.prev {
            self.link_mut(prev, axis).next = links.next;
        }
        if let Some(next) = links.next {
            self.link_mut(next, axis).prev = links.prev;
        }
        *self.link_mut(id, axis) = node::Links::default();
    }

    fn link_after(&mut self, axis: Axis, id: NodeId, after: NodeId) {
        let next = self.nodes[after.0].next(axis);
        *self.link_mut(id, axis) = node::Links {
            prev: Some(after),
            next,
        };
        self.link_mut(after, axis).next = Some(id);
        if let Some(next) = next {
            self.link_mut(next, axis).prev = Some(id);
        }
    }

    fn link_before(&mut self, axis: Axis, id: NodeId, before: NodeId) {
        let prev = self.nodes[before.0]
            .prev(axis)
            .expect("only the head has no predecessor");
        self.link_after(axis, id, prev);
    }
}

impl Default for RangeList {
    fn default() -> Self {
        Self::new()
    }
}
