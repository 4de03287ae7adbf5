//! End-to-end ticks on the host backend.

use std::cell::RefCell;
use std::rc::Rc;

use boid_flocks::gpu::{update_slots, HostBindings, HostKernel, IdentityKernel, KernelKind};
use boid_flocks::prelude::*;
use boid_flocks::records::{AgentRecord, UpdateUniforms};
use boid_flocks::topology::{Member, RegistrationState};

/// Update kernel that leaves agents untouched and remembers what it saw.
#[derive(Clone, Default)]
struct RecordingKernel {
    seen: Rc<RefCell<Vec<Vec<AgentRecord>>>>,
}

impl HostKernel for RecordingKernel {
    fn run(&self, bindings: &HostBindings<'_>, _workgroups: u32) -> Result<(), GpuError> {
        let uniforms: UpdateUniforms = bindings.read_one(update_slots::UNIFORMS)?;
        let agents: Vec<AgentRecord> = bindings.read(update_slots::AGENTS)?;
        self.seen
            .borrow_mut()
            .push(agents.into_iter().take(uniforms.boids_count as usize).collect());
        Ok(())
    }
}

fn sparrows() -> FlockSettings {
    FlockSettings::new("sparrows").with_blueprint(AgentBlueprint::new("sparrow"))
}

fn quiet(settings: FlockSettings) -> FlockSettings {
    settings.with_params(FlockParams::default().with_spawn_frequency(0.0))
}

fn recording_world(mode: RunMode) -> (World<HostBackend>, RecordingKernel) {
    let kernel = RecordingKernel::default();
    let backend = HostBackend::new().with_kernel(KernelKind::FlockUpdate, kernel.clone());
    (World::new(backend).with_seed(5).with_mode(mode), kernel)
}

// ==== Spawning ====

#[test]
fn test_capacity_two_fills_in_two_ticks() {
    let mut world = World::new(HostBackend::new()).with_seed(1);
    let params = FlockParams::default().with_spawn_frequency(10.0).with_spawn_max_count(2);
    let flock = world
        .create_flock(sparrows().with_capacity(2).with_params(params), None)
        .unwrap();

    let first = world.advance(0.1).unwrap();
    assert_eq!(first.spawned.len(), 1);
    let second = world.advance(0.1).unwrap();
    assert_eq!(second.spawned.len(), 1);
    let third = world.advance(0.1).unwrap();
    assert!(third.spawned.is_empty());

    assert_eq!(world.population(flock).unwrap(), (2, 2));
}

#[test]
fn test_population_never_exceeds_capacity() {
    let mut world = World::new(HostBackend::new()).with_seed(9);
    let params = FlockParams::default().with_spawn_frequency(100.0).with_spawn_max_count(50);
    let flock = world
        .create_flock(sparrows().with_capacity(5).with_params(params), None)
        .unwrap();

    let mut peak = 0;
    for _ in 0..60 {
        world.advance(0.05).unwrap();
        let (count, capacity) = world.population(flock).unwrap();
        assert!(count <= capacity);
        peak = peak.max(count);
    }
    assert_eq!(peak, 5);
}

#[test]
fn test_manual_spawn_beyond_capacity_is_recoverable() {
    let mut world = World::new(HostBackend::new());
    let flock = world.create_flock(quiet(sparrows().with_capacity(1)), None).unwrap();
    world.spawn(flock).unwrap();
    match world.spawn(flock) {
        Err(SimulationError::Lifecycle(err)) => assert!(err.is_recoverable()),
        other => panic!("expected pool exhaustion, got {:?}", other),
    }
}

// ==== Tick boundaries ====

#[test]
fn test_spawns_and_kills_wait_for_tick_boundary() {
    let (mut world, kernel) = recording_world(RunMode::Interactive);
    let flock = world.create_flock(quiet(sparrows()), None).unwrap();

    let a = world.spawn(flock).unwrap();
    world.spawn(flock).unwrap();
    world.advance(0.1).unwrap();
    assert_eq!(kernel.seen.borrow().last().map(Vec::len), Some(2));

    world.spawn(flock).unwrap();
    world.kill(a).unwrap();
    world.advance(0.1).unwrap();
    let seen = kernel.seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].len(), 2);
    assert!(seen[1].iter().all(|r| r.flock_index == 0));
}

#[test]
fn test_empty_flock_does_not_dispatch() {
    let (mut world, kernel) = recording_world(RunMode::Interactive);
    world.create_flock(quiet(sparrows()), None).unwrap();
    let report = world.advance(0.1).unwrap();
    assert_eq!(report.dispatched, 0);
    assert!(kernel.seen.borrow().is_empty());
    assert_eq!(world.backend().dispatch_count(), 0);
}

#[test]
fn test_alien_agents_follow_own_agents() {
    let (mut world, kernel) = recording_world(RunMode::Interactive);
    let prey = world.create_flock(quiet(sparrows()), None).unwrap();
    let hawks = world
        .create_flock(
            quiet(FlockSettings::new("hawks").with_blueprint(AgentBlueprint::new("hawk"))),
            None,
        )
        .unwrap();
    world.set_interaction(prey, hawks, Drives::new(0.0, 0.0, 8.0)).unwrap();
    world.spawn(prey).unwrap();
    world.spawn(hawks).unwrap();
    world.spawn(hawks).unwrap();

    world.advance(0.1).unwrap();
    let seen = kernel.seen.borrow();
    assert_eq!(seen.len(), 2);
    let prey_buffer: Vec<u32> = seen[0].iter().map(|r| r.flock_index).collect();
    assert_eq!(prey_buffer, vec![0, 1, 1]);
    // Interactions are one-way.
    let hawk_buffer: Vec<u32> = seen[1].iter().map(|r| r.flock_index).collect();
    assert_eq!(hawk_buffer, vec![0, 0]);
}

#[test]
fn test_identity_kernel_preserves_agents_exactly() {
    let backend = HostBackend::new().with_kernel(KernelKind::FlockUpdate, IdentityKernel);
    let mut world = World::new(backend).with_seed(3);
    let flock = world.create_flock(quiet(sparrows()), None).unwrap();
    for _ in 0..4 {
        world.spawn(flock).unwrap();
    }
    let before: Vec<Vec2> = world.agents(flock).unwrap().iter().map(|a| a.position).collect();

    let report = world.advance(0.1).unwrap();
    assert_eq!(report.updated, 4);
    let after: Vec<Vec2> = world.agents(flock).unwrap().iter().map(|a| a.position).collect();
    assert_eq!(before, after);
}

#[test]
fn test_steering_moves_agents() {
    let mut world = World::new(HostBackend::new()).with_seed(3);
    let flock = world.create_flock(quiet(sparrows()), None).unwrap();
    let handle = world.spawn(flock).unwrap();
    let start = world.agent(handle.id).unwrap().position;
    world.advance(0.1).unwrap();
    let agent = world.agent(handle.id).unwrap();
    assert_ne!(agent.position, start);
    assert!(agent.position.distance(start) <= 0.1 * 3.0 + 1e-4);
}

#[test]
fn test_automatic_spawn_joins_next_dispatch() {
    let (mut world, kernel) = recording_world(RunMode::Interactive);
    let params = FlockParams::default().with_spawn_frequency(1.0);
    let flock = world.create_flock(sparrows().with_params(params), None).unwrap();

    let first = world.advance(0.1).unwrap();
    assert_eq!(first.dispatched, 0);
    assert!(kernel.seen.borrow().is_empty());
    assert_eq!(first.spawned.len(), 1);
    let spawned = first.spawned[0];
    let placed = world.agent(spawned.id).unwrap().position;

    // One spawn per second, so tick two adds nobody.
    let second = world.advance(0.1).unwrap();
    assert_eq!(second.dispatched, 1);
    assert!(second.spawned.is_empty());
    let seen = kernel.seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].len(), 1);
    assert_eq!(seen[0][0].position, placed);
    assert_eq!(world.population(flock).unwrap().0, 1);
}

// ==== Topology ====

#[test]
fn test_orphaned_agent_is_skipped_until_reparented() {
    let mut world = World::new(HostBackend::new()).with_seed(2);
    let flock = world.create_flock(quiet(sparrows()), None).unwrap();
    let handle = world.spawn(flock).unwrap();
    let node = world.agent(handle.id).unwrap().node().unwrap();
    let flock_node = world.flock(flock).unwrap().node();

    world.reparent(node, None).unwrap();
    let frozen = world.agent(handle.id).unwrap().position;
    let report = world.advance(0.1).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(world.agent_state(handle.id), RegistrationState::Orphaned);
    assert_eq!(world.agent(handle.id).unwrap().position, frozen);

    world.reparent(node, flock_node).unwrap();
    let report = world.advance(0.1).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(world.agent_state(handle.id), RegistrationState::Resolved);
}

#[test]
fn test_grouping_node_keeps_ownership() {
    let mut world = World::new(HostBackend::new());
    let meadow = world.create_domain("meadow").unwrap();
    let meadow_node = world.domain(meadow).unwrap().node();
    let group = world.create_node("group", Some(meadow_node)).unwrap();
    let flock = world.create_flock(quiet(sparrows()), None).unwrap();
    let flock_node = world.flock(flock).unwrap().node().unwrap();

    assert_eq!(world.domain_of(Member::Flock(flock)), None);
    world.reparent(flock_node, Some(group)).unwrap();
    assert_eq!(world.domain_of(Member::Flock(flock)), Some(meadow));
    assert_eq!(world.domain_flocks(meadow), vec![flock]);
}

#[test]
fn test_agent_moved_under_other_flock_changes_flock() {
    let mut world = World::new(HostBackend::new()).with_seed(4);
    let a = world.create_flock(quiet(sparrows()), None).unwrap();
    let b = world
        .create_flock(
            quiet(FlockSettings::new("finches").with_blueprint(AgentBlueprint::new("finch"))),
            None,
        )
        .unwrap();
    let handle = world.spawn(a).unwrap();
    world.advance(0.1).unwrap();
    let node = world.agent(handle.id).unwrap().node().unwrap();
    let b_node = world.flock(b).unwrap().node();
    let position = world.agent(handle.id).unwrap().position;

    world.reparent(node, b_node).unwrap();
    let report = world.advance(0.1).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(world.population(a).unwrap().0, 0);
    assert_eq!(world.population(b).unwrap().0, 1);
    assert!(world.agent(handle.id).is_none());
    assert_eq!(world.agent_state(handle.id), RegistrationState::Unregistered);

    let moved = world.agents(b).unwrap()[0].clone();
    assert_eq!(moved.flock(), Some(b));
    assert_eq!(moved.node(), Some(node));
    assert_eq!(moved.position, position);
    assert_eq!(world.agent_state(moved.id()), RegistrationState::Resolved);

    let report = world.advance(0.1).unwrap();
    assert_eq!(report.updated, 1);
    assert_ne!(world.agent(moved.id()).unwrap().position, position);
}

#[test]
fn test_orphaned_agent_is_not_culled() {
    let mut world = World::new(HostBackend::new()).with_seed(6);
    let flock = world.create_flock(quiet(sparrows()), None).unwrap();
    let handle = world.spawn(flock).unwrap();
    let node = world.agent(handle.id).unwrap().node().unwrap();
    let flock_node = world.flock(flock).unwrap().node();

    world.reparent(node, None).unwrap();
    world.set_flock_origin(flock, Vec2::new(1000.0, 0.0)).unwrap();
    assert!(world.is_stray(handle).unwrap());
    for _ in 0..3 {
        let report = world.advance(0.1).unwrap();
        assert!(report.killed.is_empty());
    }
    assert_eq!(world.population(flock).unwrap().0, 1);

    world.reparent(node, flock_node).unwrap();
    let report = world.advance(0.1).unwrap();
    assert_eq!(report.killed, vec![handle]);
    assert_eq!(world.population(flock).unwrap().0, 0);
}

// ==== Run modes ====

#[test]
fn test_interactive_mode_skips_broken_flock() {
    let (mut world, _) = recording_world(RunMode::Interactive);
    let prey = world.create_flock(quiet(sparrows()), None).unwrap();
    let hawks = world.create_flock(quiet(FlockSettings::new("hawks")), None).unwrap();
    world.set_interaction(prey, hawks, Drives::default()).unwrap();
    world.destroy_flock(hawks).unwrap();

    let report = world.advance(0.1).unwrap();
    assert_eq!(report.skipped, vec![prey]);

    world.flock_mut(prey).unwrap().remove_interaction(hawks);
    let report = world.advance(0.1).unwrap();
    assert!(report.skipped.is_empty());
}

#[test]
fn test_simulation_mode_propagates_config_errors() {
    let (mut world, _) = recording_world(RunMode::Simulation);
    let prey = world.create_flock(quiet(sparrows()), None).unwrap();
    let hawks = world.create_flock(quiet(FlockSettings::new("hawks")), None).unwrap();
    world.set_interaction(prey, hawks, Drives::default()).unwrap();
    world.destroy_flock(hawks).unwrap();

    assert!(matches!(
        world.advance(0.1),
        Err(SimulationError::Config(ConfigError::UnknownFlock(_)))
    ));
}

#[test]
fn test_missing_blueprint_follows_run_mode() {
    let mut lenient = World::new(HostBackend::new());
    let empty = lenient.create_flock(FlockSettings::new("empty"), None).unwrap();
    assert!(lenient.advance(0.1).unwrap().spawned.is_empty());
    // The failed attempt does not use up the spawn interval.
    lenient
        .flock_mut(empty)
        .unwrap()
        .set_blueprint(Some(AgentBlueprint::new("sparrow")));
    assert_eq!(lenient.advance(0.01).unwrap().spawned.len(), 1);

    let mut strict = World::new(HostBackend::new()).with_mode(RunMode::Simulation);
    strict.create_flock(FlockSettings::new("empty"), None).unwrap();
    assert!(matches!(
        strict.advance(0.1),
        Err(SimulationError::Config(ConfigError::MissingBlueprint(_)))
    ));
}

// ==== Scenes ====

const SCENE: &str = r#"{
    "seed": 4,
    "domains": ["meadow"],
    "forces": [{ "name": "wind", "domain": "meadow", "params": { "kind": "Turbulence" } }],
    "flocks": [
        {
            "name": "sparrows",
            "domain": "meadow",
            "blueprint": { "name": "sparrow" },
            "interactions": [{ "flock": "hawks", "drives": { "separation": 9.0 } }],
            "forces": [{ "force": "wind", "weight": 0.5 }]
        },
        { "name": "hawks", "capacity": 3, "blueprint": { "name": "hawk" } }
    ]
}"#;

#[test]
fn test_scene_builds_world() {
    let scene = SceneConfig::from_json_str(SCENE).unwrap();
    let mut world = World::from_scene(HostBackend::new(), scene).unwrap();

    let sparrows = world.flock_by_name("sparrows").unwrap();
    let hawks = world.flock_by_name("hawks").unwrap();
    let flock = world.flock(sparrows).unwrap();
    assert_eq!(flock.interactions().len(), 1);
    assert_eq!(flock.interactions()[0].flock, hawks);
    assert_eq!(flock.forces()[0].weight, 0.5);
    assert_eq!(world.population(hawks).unwrap(), (0, 3));

    let meadow = DomainId(0);
    assert_eq!(world.domain_flocks(meadow), vec![sparrows]);
    assert_eq!(world.domain_forces(meadow).len(), 1);

    for _ in 0..10 {
        world.advance(0.1).unwrap();
    }
    let text = world.describe_domain(meadow).unwrap();
    assert!(text.starts_with("domain 'meadow'\n  flock 'sparrows' ("));
    assert!(text.contains("force 'wind' (Turbulence"));
}

#[test]
fn test_scene_with_unknown_reference_fails() {
    let json = r#"{ "flocks": [{ "name": "a", "interactions": [{ "flock": "ghost" }] }] }"#;
    let scene = SceneConfig::from_json_str(json).unwrap();
    assert!(matches!(
        World::from_scene(HostBackend::new(), scene),
        Err(ConfigError::UnknownFlock(name)) if name == "ghost"
    ));

    let json = r#"{ "flocks": [{ "name": "a", "domain": "nowhere" }] }"#;
    let scene = SceneConfig::from_json_str(json).unwrap();
    assert!(matches!(
        World::from_scene(HostBackend::new(), scene),
        Err(ConfigError::UnknownDomain(_))
    ));
}

// ==== Orbit previews ====

#[test]
fn test_flock_orbits_shape() {
    let mut world = World::new(HostBackend::new());
    let flock = world.create_flock(sparrows(), None).unwrap();
    let settings = OrbitSettings {
        density: 3,
        orbit_length: 6,
        ..OrbitSettings::default()
    };
    let rect = Rect::around(Vec2::ZERO, 10.0);

    assert!(world.request_flock_orbits(flock, rect, &settings).unwrap());
    assert!(!world.request_flock_orbits(flock, rect, &settings).unwrap());

    let orbits = world.fetch_flock_orbits().unwrap().unwrap();
    assert_eq!(orbits.len(), 9);
    assert!(orbits.iter().all(|o| o.len() == 6));
    assert!(world.fetch_flock_orbits().unwrap().is_none());
    assert!(world.request_flock_orbits(flock, rect, &settings).unwrap());
}

#[test]
fn test_force_orbits_minimum_length() {
    let mut world = World::new(HostBackend::new());
    let wind = world
        .create_force("wind", Vec2::ZERO, ForceParams::radial(2.0, 1.0), None)
        .unwrap();
    let settings = OrbitSettings {
        density: 2,
        orbit_length: 0,
        ..OrbitSettings::default()
    };

    assert!(world
        .request_force_orbits(wind, Rect::around(Vec2::ZERO, 4.0), &settings)
        .unwrap());
    let orbits = world.fetch_force_orbits().unwrap().unwrap();
    assert_eq!(orbits.len(), 4);
    assert!(orbits.iter().all(|o| o.len() == 1));
}

#[test]
fn test_orbits_for_unknown_flock_fail() {
    let mut world = World::new(HostBackend::new());
    let rect = Rect::around(Vec2::ZERO, 1.0);
    assert!(matches!(
        world.request_flock_orbits(FlockId(7), rect, &OrbitSettings::default()),
        Err(SimulationError::Config(ConfigError::UnknownFlock(_)))
    ));
}
