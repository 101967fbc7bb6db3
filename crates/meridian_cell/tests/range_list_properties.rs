//! Property tests for the range list.
//!
//! Invariants checked across random inserts, moves, trigger resizes and
//! removals:
//! 1. Both axis lists stay sorted and doubly linked
//! 2. Crossings alternate per (trigger, entity): no double enter, no leave
//!    without an enter
//! 3. Replaying every crossing gives exactly the trigger's real membership

use std::collections::{BTreeSet, HashMap};

use meridian_cell::range_list::{NodeId, RangeList, TriggerId, TriggerOwner};
use meridian_shared::EntityId;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Move { entity: usize, x: f32, z: f32 },
    Resize { trigger: usize, range: f32 },
    Remove { entity: usize },
}

fn coord() -> impl Strategy<Value = f32> {
    -200.0f32..200.0f32
}

fn op_strategy(entities: usize, triggers: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..entities, coord(), coord()).prop_map(|(entity, x, z)| Op::Move { entity, x, z }),
        2 => (0..triggers, 0.0f32..80.0f32)
            .prop_map(|(trigger, range)| Op::Resize { trigger, range }),
        1 => (0..entities).prop_map(|entity| Op::Remove { entity }),
    ]
}

/// Membership as told by crossings.
#[derive(Default)]
struct Observed {
    members: HashMap<TriggerId, BTreeSet<EntityId>>,
}

impl Observed {
    fn apply(&mut self, list: &mut RangeList) -> Result<(), TestCaseError> {
        for crossing in list.take_crossings() {
            let members = self.members.entry(crossing.trigger).or_default();
            if crossing.entered {
                prop_assert!(members.insert(crossing.who), "double enter of {} ", crossing.who);
            } else {
                prop_assert!(
                    members.remove(&crossing.who),
                    "leave of {} without enter",
                    crossing.who
                );
            }
        }
        Ok(())
    }
}

fn check_membership(
    list: &RangeList,
    observed: &Observed,
    triggers: &[TriggerId],
    nodes: &[Option<NodeId>],
) -> Result<(), TestCaseError> {
    prop_assert!(list.is_sorted());
    for trigger in triggers {
        let subject = list.subject(*trigger);
        let expected: BTreeSet<EntityId> = nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.map(|n| (i, n)))
            .filter(|(_, node)| Some(*node) != subject && list.contains(*trigger, *node))
            .map(|(i, _)| entity_id(i))
            .collect();
        let reported: BTreeSet<EntityId> = list.trigger_members(*trigger).into_iter().collect();
        let seen = observed.members.get(trigger).cloned().unwrap_or_default();
        prop_assert_eq!(&reported, &expected);
        prop_assert_eq!(&seen, &expected);
    }
    Ok(())
}

fn entity_id(index: usize) -> EntityId {
    EntityId(u32::try_from(index).unwrap() + 1)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_crossings_track_membership(
        positions in prop::collection::vec((coord(), coord()), 2..24),
        ranges in prop::collection::vec(1.0f32..60.0f32, 1..4),
        ops in prop::collection::vec(op_strategy(24, 4), 0..60),
    ) {
        let mut list = RangeList::new();
        let mut nodes: Vec<Option<NodeId>> = positions
            .iter()
            .enumerate()
            .map(|(i, (x, z))| Some(list.add_entity(entity_id(i), *x, *z)))
            .collect();

        // Trigger subjects are the first entities; they are never removed.
        let subjects = ranges.len().min(nodes.len());
        let triggers: Vec<TriggerId> = ranges
            .iter()
            .take(subjects)
            .enumerate()
            .map(|(i, range)| {
                let subject = nodes[i].unwrap();
                list.add_trigger(subject, *range, TriggerOwner::Custom(i as u64))
            })
            .collect();

        let mut observed = Observed::default();
        observed.apply(&mut list)?;
        check_membership(&list, &observed, &triggers, &nodes)?;

        for op in ops {
            match op {
                Op::Move { entity, x, z } => {
                    if let Some(Some(node)) = nodes.get(entity) {
                        list.move_node(*node, x, z);
                    }
                }
                Op::Resize { trigger, range } => {
                    if let Some(id) = triggers.get(trigger) {
                        list.set_range(*id, range);
                    }
                }
                Op::Remove { entity } => {
                    if entity >= subjects {
                        if let Some(slot) = nodes.get_mut(entity) {
                            if let Some(node) = slot.take() {
                                list.remove_node(node);
                            }
                        }
                    }
                }
            }
            observed.apply(&mut list)?;
            check_membership(&list, &observed, &triggers, &nodes)?;
        }
    }

    #[test]
    fn prop_entities_in_square_matches_brute_force(
        positions in prop::collection::vec((coord(), coord()), 1..40),
        range in 0.0f32..150.0f32,
    ) {
        let mut list = RangeList::new();
        let nodes: Vec<NodeId> = positions
            .iter()
            .enumerate()
            .map(|(i, (x, z))| list.add_entity(entity_id(i), *x, *z))
            .collect();

        let (cx, cz) = positions[0];
        let mut found = list.entities_in_square(nodes[0], range);
        found.sort_unstable();
        let expected: Vec<EntityId> = positions
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, (x, z))| (x - cx).abs() <= range && (z - cz).abs() <= range)
            .map(|(i, _)| entity_id(i))
            .collect();
        prop_assert_eq!(found, expected);
    }
}
