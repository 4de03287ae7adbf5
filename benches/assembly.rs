//! Benchmarks for frame assembly and host-side ticks.
//!
//! Run with: `cargo bench`

use std::collections::BTreeMap;

use boid_flocks::assembler::assemble_update;
use boid_flocks::gpu::{IdentityKernel, KernelKind};
use boid_flocks::prelude::*;
use boid_flocks::{Flock, Force};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn populated_world(agents: usize, backend: HostBackend) -> (World<HostBackend>, FlockId) {
    let mut world = World::new(backend).with_seed(1);
    let params = FlockParams::default().with_spawn_frequency(0.0);
    let prey = world
        .create_flock(
            FlockSettings::new("prey")
                .with_capacity(agents)
                .with_params(params.clone())
                .with_blueprint(AgentBlueprint::new("prey")),
            None,
        )
        .unwrap();
    let hawks = world
        .create_flock(
            FlockSettings::new("hawks")
                .with_capacity(agents / 10 + 1)
                .with_params(params)
                .with_blueprint(AgentBlueprint::new("hawk")),
            None,
        )
        .unwrap();
    let wind = world
        .create_force("wind", Vec2::ZERO, ForceParams::turbulence(1.0, 0.5, 1.0), None)
        .unwrap();
    world.set_interaction(prey, hawks, Drives::new(0.0, 0.0, 8.0)).unwrap();
    world.set_force_weight(prey, wind, 0.5).unwrap();
    for _ in 0..agents {
        world.spawn(prey).unwrap();
    }
    for _ in 0..agents / 10 + 1 {
        world.spawn(hawks).unwrap();
    }
    // Promote spawns and resolve the topology.
    world.advance(0.0).unwrap();
    (world, prey)
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble_update");

    for &count in &[64usize, 512, 4096] {
        let (world, prey) = populated_world(count, HostBackend::new());
        let flocks: BTreeMap<FlockId, Flock> = world.flocks().map(|f| (f.id(), f.clone())).collect();
        let forces: BTreeMap<ForceId, Force> = world.forces().map(|f| (f.id(), f.clone())).collect();
        let flock = &flocks[&prey];

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(assemble_update(flock, &flocks, &forces, |_| true).unwrap()))
        });
    }

    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for &count in &[64usize, 512] {
        group.bench_with_input(BenchmarkId::new("identity", count), &count, |b, &count| {
            let backend = HostBackend::new().with_kernel(KernelKind::FlockUpdate, IdentityKernel);
            let (mut world, _) = populated_world(count, backend);
            b.iter(|| black_box(world.advance(1.0 / 60.0).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("steering", count), &count, |b, &count| {
            let (mut world, _) = populated_world(count, HostBackend::new());
            b.iter(|| black_box(world.advance(1.0 / 60.0).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_assemble, bench_tick);
criterion_main!(benches);
