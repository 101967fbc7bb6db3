//! # Cell Simulation
//!
//! Four cells split a 2000x2000 space into quadrants and run on one
//! thread over a loopback network. Entities wander between random points,
//! so they are ghosted near boundaries and offloaded across them all the
//! time. Some carry a witness, some a proximity trap.
//!
//! At the end every entity must still be real on exactly one cell.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use meridian_cell::{
    CellApp, CellConfig, ControllerRegistry, LoopbackEndpoint, LoopbackNetwork,
    MoveToPointController, PartitionEntry, ScriptCallback, TickLoop,
};
use meridian_shared::{Address, Direction, EntityId, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// ============================================================================
// CONSTANTS
// ============================================================================
const ENTITY_COUNT: u32 = 400;
const TICKS: u64 = 3000;
const HALF_WIDTH: f32 = 1000.0;
const WALK_SPEED: f32 = 40.0; // units per second
const WITNESS_EVERY: u32 = 10;
const TRAP_EVERY: u32 = 7;
const SEED: u64 = 0x4d45_5249;

/// One simulated cell process.
struct Node {
    cell: CellApp,
    endpoint: LoopbackEndpoint,
}

/// Script callback counts over the whole run.
#[derive(Default)]
struct Callbacks {
    enter_trap: u64,
    leave_trap: u64,
    leave_trap_id: u64,
    moves_done: u64,
    other: u64,
}

fn quadrants() -> Vec<PartitionEntry> {
    let h = HALF_WIDTH;
    [(-h, -h, 0.0, 0.0), (0.0, -h, h, 0.0), (-h, 0.0, 0.0, h), (0.0, 0.0, h, h)]
        .into_iter()
        .enumerate()
        .map(|(i, (min_x, min_z, max_x, max_z))| PartitionEntry {
            address: Address::local(4001 + u16::try_from(i).unwrap_or(0)),
            min_x,
            min_z,
            max_x,
            max_z,
        })
        .collect()
}

fn random_point(rng: &mut ChaCha8Rng) -> Vec3 {
    let margin = HALF_WIDTH - 1.0;
    Vec3::new(rng.gen_range(-margin..margin), 0.0, rng.gen_range(-margin..margin))
}

/// Sends every real entity without a movement controller somewhere new.
fn keep_walking(node: &mut Node, rng: &mut ChaCha8Rng) {
    let idle: Vec<EntityId> = node
        .cell
        .entities()
        .filter(|e| e.is_real())
        .filter(|e| {
            e.controllers()
                .find_exclusive(MoveToPointController::EXCLUSIVE_CLASS)
                .is_none()
        })
        .map(|e| e.id())
        .collect();
    for id in idle {
        let target = random_point(rng);
        if let Err(e) = node.cell.move_to_point(id, target, WALK_SPEED, true, 0) {
            println!("[WARN] move_to_point({id}) failed: {e}");
        }
    }
}

/// Hands every cell the bundles sent to it this tick.
///
/// # Returns
///
/// Number of bundles that failed to decode.
fn deliver(nodes: &mut BTreeMap<Address, Node>) -> u64 {
    let mut malformed = 0;
    for node in nodes.values_mut() {
        for datagram in node.endpoint.drain() {
            if node.cell.receive(datagram.from, &datagram.data).is_err() {
                malformed += 1;
            }
        }
    }
    malformed
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         MERIDIAN - FOUR CELL SIMULATION                          ║");
    println!("║         GHOSTS, OFFLOADS, WITNESSES                              ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let config = CellConfig {
        ghost_distance: 100.0,
        ghost_hysteresis: 20.0,
        partition: quadrants(),
        ..CellConfig::default()
    };
    let mut witness_config = config.witness.clone();
    witness_config.default_aoi_radius = 150.0;
    let config = CellConfig {
        witness: witness_config,
        ..config
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Cells:              {}", config.partition.len());
    println!("│ Entities:           {ENTITY_COUNT}");
    println!("│ Ticks:              {TICKS} at {} Hz", config.tick_rate);
    println!(
        "│ Ghost Distance:     {} (+{} hysteresis)",
        config.ghost_distance, config.ghost_hysteresis
    );
    println!("│ AoI Radius:         {}", config.witness.default_aoi_radius);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let registry = Arc::new(ControllerRegistry::with_builtin_types());
    let network = LoopbackNetwork::new();
    let mut nodes: BTreeMap<Address, Node> = BTreeMap::new();
    for entry in &config.partition {
        let cell = match CellApp::new(entry.address, config.clone(), Arc::clone(&registry)) {
            Ok(cell) => cell,
            Err(e) => {
                println!("[ERROR] cell {} rejected its config: {e}", entry.address);
                return;
            }
        };
        let endpoint = network.endpoint(entry.address);
        nodes.insert(entry.address, Node { cell, endpoint });
    }

    // Populate.
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    for i in 1..=ENTITY_COUNT {
        let id = EntityId(i);
        let position = random_point(&mut rng);
        let owner = nodes
            .values()
            .next()
            .and_then(|n| n.cell.partition().owner_of(position));
        let Some(owner) = owner else {
            continue;
        };
        let Some(node) = nodes.get_mut(&owner) else {
            continue;
        };
        let cell = &mut node.cell;
        let created = cell
            .create_entity(id, 1, position, Direction::default())
            .and_then(|()| {
                if i % WITNESS_EVERY == 0 {
                    cell.enable_witness(id, None)
                } else {
                    Ok(())
                }
            })
            .and_then(|()| {
                if i % TRAP_EVERY == 0 {
                    cell.add_proximity(id, 25.0, 0).map(drop)
                } else {
                    Ok(())
                }
            });
        if let Err(e) = created {
            println!("[ERROR] entity {id}: {e}");
        }
    }

    println!("Starting simulation...");
    let start = Instant::now();
    let mut tick_loop = TickLoop::new(config.tick_rate);
    let mut callbacks = Callbacks::default();
    let mut client_messages = 0u64;
    let mut malformed = 0u64;

    for _ in 0..TICKS {
        let tick_start = tick_loop.begin_tick();
        let now = tick_loop.game_time();
        for node in nodes.values_mut() {
            keep_walking(node, &mut rng);
            node.cell.tick(now, &mut node.endpoint);

            for callback in node.cell.take_callbacks() {
                match callback {
                    ScriptCallback::OnEnterTrap { .. } => callbacks.enter_trap += 1,
                    ScriptCallback::OnLeaveTrap { .. } => callbacks.leave_trap += 1,
                    ScriptCallback::OnLeaveTrapId { .. } => callbacks.leave_trap_id += 1,
                    ScriptCallback::OnMove { .. } => callbacks.moves_done += 1,
                    _ => callbacks.other += 1,
                }
            }
            client_messages += node.cell.take_client_output().len() as u64;
        }
        malformed += deliver(&mut nodes);
        tick_loop.end_tick(tick_start);

        if now % (TICKS / 10) == 0 {
            print!("\r[");
            for i in 0..10 {
                print!("{}", if i < now * 10 / TICKS { "█" } else { "░" });
            }
            print!("] Tick {now}/{TICKS}");
        }
    }
    println!();
    println!();

    // Let in-flight bundles land.
    for _ in 0..3 {
        let tick_start = tick_loop.begin_tick();
        let now = tick_loop.game_time();
        for node in nodes.values_mut() {
            node.cell.tick(now, &mut node.endpoint);
        }
        malformed += deliver(&mut nodes);
        tick_loop.end_tick(tick_start);
    }

    let elapsed = start.elapsed();
    let stats = *tick_loop.stats();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SIMULATION RESULTS                            ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    println!("┌─ TIMING ────────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {:.2} seconds", elapsed.as_secs_f64());
    println!("│ Total Ticks:        {}", stats.total_ticks);
    println!("│ Min Tick Time:      {} μs (all cells)", stats.min_tick_us);
    println!("│ Max Tick Time:      {} μs (all cells)", stats.max_tick_us);
    println!("│ Avg Tick Time:      {} μs (all cells)", stats.avg_tick_us);
    println!("│ Over Budget:        {}", stats.late_ticks);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ CELLS ─────────────────────────────────────────────────────────┐");
    let mut owners: BTreeMap<EntityId, u32> = BTreeMap::new();
    for (address, node) in &nodes {
        let cell = &node.cell;
        let cell_stats = cell.stats();
        println!(
            "│ {address}  reals {:>4}  ghosts {:>4}  offloads {:>5}  onloads {:>5}",
            cell.num_reals(),
            cell.num_entities() - cell.num_reals(),
            cell_stats.offloads,
            cell_stats.onloads,
        );
        println!(
            "│                  ghosts +{:<6} -{:<6} crossings {:<8} bytes out {}",
            cell_stats.ghosts_created,
            cell_stats.ghosts_deleted,
            cell_stats.crossings,
            cell.channel_stats().bytes_sent,
        );
        for entity in cell.entities().filter(|e| e.is_real()) {
            *owners.entry(entity.id()).or_default() += 1;
        }
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ SCRIPT ────────────────────────────────────────────────────────┐");
    println!("│ Moves Completed:    {}", callbacks.moves_done);
    println!("│ Trap Enters:        {}", callbacks.enter_trap);
    println!(
        "│ Trap Leaves:        {} (+{} by ID only)",
        callbacks.leave_trap, callbacks.leave_trap_id
    );
    println!("│ Other Callbacks:    {}", callbacks.other);
    println!("│ Client Messages:    {client_messages}");
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let lost = (1..=ENTITY_COUNT).filter(|i| !owners.contains_key(&EntityId(*i))).count();
    let duplicated = owners.values().filter(|count| **count > 1).count();
    let consistent = lost == 0 && duplicated == 0 && malformed == 0;

    println!("╔══════════════════════════════════════════════════════════════════╗");
    if consistent {
        println!("║  ✓ CONSISTENT                                                    ║");
        println!("║    Every entity is real on exactly one cell                      ║");
    } else {
        println!("║  ✗ INCONSISTENT                                                  ║");
        println!("║    lost {lost}, duplicated {duplicated}, malformed bundles {malformed}");
    }
    println!("╚══════════════════════════════════════════════════════════════════╝");
}
