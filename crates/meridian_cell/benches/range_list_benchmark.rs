//! # Range List Benchmark
//!
//! Measures the cost of moving entities through a populated range list,
//! with and without proximity triggers in the way.
//!
//! Run with: `cargo bench --package meridian_cell`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meridian_cell::range_list::{NodeId, RangeList, TriggerOwner};
use meridian_shared::EntityId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SIDE: f32 = 1000.0;

fn populate(count: u32, rng: &mut ChaCha8Rng) -> (RangeList, Vec<NodeId>) {
    let mut list = RangeList::new();
    let nodes = (1..=count)
        .map(|i| {
            let (x, z) = (rng.gen_range(-SIDE..SIDE), rng.gen_range(-SIDE..SIDE));
            list.add_entity(EntityId(i), x, z)
        })
        .collect();
    (list, nodes)
}

/// Benchmark: every entity takes one small step per iteration.
fn bench_small_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_list_small_steps");

    for count in [1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            let (mut list, nodes) = populate(count, &mut rng);
            b.iter(|| {
                for node in &nodes {
                    let Some(pos) = list.node(*node).map(|n| (n.x(), n.z())) else {
                        continue;
                    };
                    let x = (pos.0 + rng.gen_range(-2.0..2.0)).clamp(-SIDE, SIDE);
                    let z = (pos.1 + rng.gen_range(-2.0..2.0)).clamp(-SIDE, SIDE);
                    list.move_node(*node, x, z);
                }
                black_box(list.take_crossings().len())
            });
        });
    }

    group.finish();
}

/// Benchmark: small steps with a 25-unit trigger on every tenth entity.
fn bench_small_steps_with_triggers(c: &mut Criterion) {
    c.bench_function("range_list_triggers_10k", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let (mut list, nodes) = populate(10_000, &mut rng);
        for (i, node) in nodes.iter().enumerate().step_by(10) {
            list.add_trigger(*node, 25.0, TriggerOwner::Custom(i as u64));
        }
        list.take_crossings();
        b.iter(|| {
            for node in &nodes {
                let Some(pos) = list.node(*node).map(|n| (n.x(), n.z())) else {
                    continue;
                };
                let x = (pos.0 + rng.gen_range(-2.0..2.0)).clamp(-SIDE, SIDE);
                let z = (pos.1 + rng.gen_range(-2.0..2.0)).clamp(-SIDE, SIDE);
                list.move_node(*node, x, z);
            }
            black_box(list.take_crossings().len())
        });
    });
}

/// Benchmark: square queries around random entities.
fn bench_entities_in_square(c: &mut Criterion) {
    c.bench_function("range_list_square_query_10k", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let (list, nodes) = populate(10_000, &mut rng);
        b.iter(|| {
            let centre = nodes[rng.gen_range(0..nodes.len())];
            black_box(list.entities_in_square(centre, 50.0).len())
        });
    });
}

criterion_group!(
    benches,
    bench_small_steps,
    bench_small_steps_with_triggers,
    bench_entities_in_square
);
criterion_main!(benches);
