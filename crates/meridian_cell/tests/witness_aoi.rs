//! Integration tests for witnesses driven by a cell: what the client of a
//! witnessing entity is told as others move around it.

use std::sync::Arc;

use meridian_cell::{
    CellApp, CellConfig, CellError, ClientMessage, ControllerRegistry, LoopbackEndpoint,
    LoopbackNetwork, WitnessConfig,
};
use meridian_shared::{Address, Direction, EntityId, Vec3};

fn cell_with(witness: WitnessConfig) -> (CellApp, LoopbackEndpoint) {
    let network = LoopbackNetwork::new();
    let endpoint = network.endpoint(Address::local(4001));
    let config = CellConfig {
        witness,
        ..CellConfig::default()
    };
    let registry = Arc::new(ControllerRegistry::with_builtin_types());
    let cell = CellApp::new(Address::local(4001), config, registry).unwrap();
    (cell, endpoint)
}

fn cell() -> (CellApp, LoopbackEndpoint) {
    cell_with(WitnessConfig::default())
}

fn spawn(cell: &mut CellApp, id: u32, x: f32) -> EntityId {
    let id = EntityId(id);
    cell.create_entity(id, 3, Vec3::new(x, 0.0, 0.0), Direction::default()).unwrap();
    id
}

fn place(cell: &mut CellApp, id: EntityId, x: f32) {
    cell.set_position(id, Vec3::new(x, 0.0, 0.0), Direction::default()).unwrap();
}

/// Entities entered and left in this tick's output for `witness`.
fn enters_and_leaves(cell: &mut CellApp, witness: EntityId) -> (Vec<EntityId>, Vec<EntityId>) {
    let mut enters = Vec::new();
    let mut leaves = Vec::new();
    for (owner, message) in cell.take_client_output() {
        assert_eq!(owner, witness);
        match message {
            ClientMessage::EnterAoI { entity, .. } => enters.push(entity),
            ClientMessage::LeaveAoI { entity, .. } => leaves.push(entity),
            _ => {}
        }
    }
    (enters, leaves)
}

#[test]
fn test_enter_reports_entities_inside_radius() {
    let (mut cell, mut endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);
    let near = spawn(&mut cell, 2, 10.0);
    spawn(&mut cell, 3, 200.0);
    cell.enable_witness(player, Some(50.0)).unwrap();

    cell.tick(1, &mut endpoint);
    let output = cell.take_client_output();
    assert_eq!(output.len(), 1);
    match output[0].1 {
        ClientMessage::EnterAoI {
            entity,
            entity_type,
            position,
            lod,
            ..
        } => {
            assert_eq!(entity, near);
            assert_eq!(entity_type, 3);
            assert_eq!(position, Vec3::new(10.0, 0.0, 0.0));
            assert_eq!(lod, 0);
        }
        ref other => panic!("expected an enter, got {other:?}"),
    }
    assert_eq!(cell.witness(player).unwrap().visible(), vec![near]);
}

#[test]
fn test_hysteresis_delays_leave() {
    let (mut cell, mut endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);
    let other = spawn(&mut cell, 2, 10.0);
    cell.enable_witness(player, Some(50.0)).unwrap();
    cell.tick(1, &mut endpoint);
    cell.take_client_output();

    // Past the radius but inside radius + hysteresis (5): still seen.
    place(&mut cell, other, 53.0);
    cell.tick(2, &mut endpoint);
    let output = cell.take_client_output();
    assert!(output.iter().any(|(_, m)| {
        matches!(m, ClientMessage::AvatarUpdate { position, .. } if position.x == 53.0)
    }));
    assert!(!output.iter().any(|(_, m)| matches!(m, ClientMessage::LeaveAoI { .. })));

    place(&mut cell, other, 60.0);
    cell.tick(3, &mut endpoint);
    assert_eq!(enters_and_leaves(&mut cell, player), (vec![], vec![other]));
    assert!(cell.witness(player).unwrap().visible().is_empty());

    // Coming back needs to cross the radius itself.
    place(&mut cell, other, 52.0);
    cell.tick(4, &mut endpoint);
    assert_eq!(enters_and_leaves(&mut cell, player), (vec![], vec![]));

    place(&mut cell, other, 40.0);
    cell.tick(5, &mut endpoint);
    assert_eq!(enters_and_leaves(&mut cell, player), (vec![other], vec![]));
}

#[test]
fn test_stationary_entity_sends_nothing_after_enter() {
    let (mut cell, mut endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);
    spawn(&mut cell, 2, 10.0);
    cell.enable_witness(player, Some(50.0)).unwrap();
    cell.tick(1, &mut endpoint);
    assert_eq!(cell.take_client_output().len(), 1);

    cell.tick(2, &mut endpoint);
    cell.tick(3, &mut endpoint);
    assert!(cell.take_client_output().is_empty());
}

#[test]
fn test_destroyed_entity_leaves() {
    let (mut cell, mut endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);
    let other = spawn(&mut cell, 2, 10.0);
    cell.enable_witness(player, Some(50.0)).unwrap();
    cell.tick(1, &mut endpoint);
    cell.take_client_output();

    cell.destroy_entity(other).unwrap();
    cell.tick(2, &mut endpoint);
    assert_eq!(enters_and_leaves(&mut cell, player), (vec![], vec![other]));
    assert_eq!(cell.witness(player).unwrap().num_entries(), 0);
}

#[test]
fn test_budget_spreads_enters_nearest_first() {
    // One EnterAoI (33 bytes) fits per tick.
    let (mut cell, mut endpoint) = cell_with(WitnessConfig {
        bandwidth_per_tick: 40,
        ..WitnessConfig::default()
    });
    let player = spawn(&mut cell, 1, 0.0);
    let far = spawn(&mut cell, 2, 30.0);
    let near = spawn(&mut cell, 3, 10.0);
    let middle = spawn(&mut cell, 4, 20.0);
    cell.enable_witness(player, Some(50.0)).unwrap();

    let mut order = Vec::new();
    for now in 1..=3 {
        cell.tick(now, &mut endpoint);
        let (enters, leaves) = enters_and_leaves(&mut cell, player);
        assert_eq!(enters.len(), 1, "tick {now}");
        assert!(leaves.is_empty());
        order.extend(enters);
    }
    assert_eq!(order, vec![near, middle, far]);

    cell.tick(4, &mut endpoint);
    assert!(cell.take_client_output().is_empty());
}

#[test]
fn test_shrinking_radius_drops_far_entities() {
    let (mut cell, mut endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);
    let near = spawn(&mut cell, 2, 10.0);
    let far = spawn(&mut cell, 3, 40.0);
    cell.enable_witness(player, Some(50.0)).unwrap();
    cell.tick(1, &mut endpoint);
    cell.take_client_output();

    cell.set_aoi_radius(player, 20.0, Some(0.0)).unwrap();
    cell.tick(2, &mut endpoint);
    assert_eq!(enters_and_leaves(&mut cell, player), (vec![], vec![far]));
    assert_eq!(cell.witness(player).unwrap().visible(), vec![near]);
}

#[test]
fn test_disable_witness_stops_output() {
    let (mut cell, mut endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);
    let other = spawn(&mut cell, 2, 10.0);
    cell.enable_witness(player, Some(50.0)).unwrap();
    cell.disable_witness(player).unwrap();

    place(&mut cell, other, 5.0);
    cell.tick(1, &mut endpoint);
    assert!(cell.take_client_output().is_empty());
    assert!(cell.witness(player).is_none());
    assert_eq!(cell.disable_witness(player), Err(CellError::NoWitness(player)));
}

#[test]
fn test_witness_argument_errors() {
    let (mut cell, _endpoint) = cell();
    let player = spawn(&mut cell, 1, 0.0);

    assert!(matches!(
        cell.enable_witness(player, Some(0.0)),
        Err(CellError::InvalidArgument(_))
    ));
    assert_eq!(cell.set_aoi_radius(player, 10.0, None), Err(CellError::NoWitness(player)));

    cell.enable_witness(player, None).unwrap();
    assert!(matches!(
        cell.set_aoi_radius(player, 10.0, Some(-1.0)),
        Err(CellError::InvalidArgument(_))
    ));
    assert!(matches!(
        cell.enable_witness(EntityId(99), None),
        Err(CellError::UnknownEntity(_))
    ));
}
