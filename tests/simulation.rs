use bevy_flock_index::ffi::{STATUS_INDIVIDUAL, STATUS_MERGED};
use bevy_flock_index::lod::{LodState, ViewRect};
use bevy_flock_index::spawn::boids_from_bytes;
use bevy_flock_index::{
    Boid, BoidRecord, ExecutionMode, FlockConfig, IndexBackend, Obstacle, RecordLayout, Simulation,
};
use glam::Vec2;

fn sim(n: usize, backend: IndexBackend, mode: ExecutionMode) -> Simulation {
    Simulation::new(FlockConfig {
        entity_count: n,
        seed: Some(99),
        backend,
        mode,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn zero_dt_moves_nothing() {
    for backend in [IndexBackend::Grid, IndexBackend::Quadtree] {
        let mut sim = sim(500, backend, ExecutionMode::Parallel);
        let before: Vec<Vec2> = sim.boids().iter().map(|b| b.pos).collect();
        sim.step(0.0);
        sim.step(0.0);
        let after: Vec<Vec2> = sim.boids().iter().map(|b| b.pos).collect();
        assert_eq!(before, after, "{backend:?}");
    }
}

#[test]
fn speeds_stay_clamped_every_frame() {
    for backend in [IndexBackend::Grid, IndexBackend::Quadtree] {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let mut sim = sim(1_000, backend, mode);
            let (lo, hi) = (sim.config().forces.min_speed, sim.config().forces.max_speed);
            for frame in 0..10 {
                sim.step(1.0 / 30.0);
                for b in sim.boids() {
                    let speed = b.vel.length();
                    assert!(
                        speed >= lo - 1e-3 && speed <= hi + 1e-3,
                        "{backend:?}/{mode:?} frame {frame}: speed {speed}"
                    );
                }
            }
        }
    }
}

#[test]
fn boids_outside_bounds_are_steered_back() {
    let mut cfg = FlockConfig::default();
    cfg.world.bounds = Vec2::new(100.0, 100.0);
    let boids = vec![Boid::new(Vec2::new(150.0, 0.0), Vec2::new(100.0, 0.0), 0)];
    let mut sim = Simulation::with_boids(cfg, boids).unwrap();
    sim.step(0.1);
    assert!(sim.boids()[0].vel.x < 100.0);
}

#[test]
fn obstacles_deflect_boids() {
    let cfg = FlockConfig::default();
    let boids = vec![Boid::new(Vec2::new(-5.0, 0.0), Vec2::new(50.0, 0.0), 0)];
    let mut sim = Simulation::with_boids(cfg, boids).unwrap();
    sim.set_obstacles(&[Obstacle {
        position: Vec2::ZERO,
        radius: 30.0,
        strength: 1.0,
    }]);
    sim.step(0.1);
    assert!(sim.boids()[0].vel.x < 50.0);
}

#[test]
fn off_view_boids_merge_into_meta_boids() {
    let mut cfg = FlockConfig {
        entity_count: 3_000,
        seed: Some(5),
        ..Default::default()
    };
    cfg.lod.enabled = true;
    cfg.lod.margin = 100.0;
    let mut sim = Simulation::new(cfg).unwrap();
    let view = ViewRect::from_center(Vec2::ZERO, Vec2::splat(200.0));
    sim.set_view(Some(view));
    let grown = view.inflate(100.0);
    let expected = sim.boids().iter().filter(|b| !grown.contains(b.pos)).count();

    sim.step(1.0 / 60.0);

    let lod = sim.lod();
    assert_eq!(lod.merged_count(), expected);
    assert!(expected > 0);
    let total: u32 = sim.meta_boids().iter().map(|m| m.count).sum();
    assert_eq!(total as usize, expected);
    for m in sim.meta_boids() {
        assert!(m.count > 0);
        assert!(m.team < sim.config().teams.teams);
    }

    let records = sim.records();
    for (i, r) in records.iter().enumerate() {
        let status = match lod.state(i) {
            LodState::Merged => STATUS_MERGED,
            LodState::Individual => STATUS_INDIVIDUAL,
        };
        assert_eq!(r.status, status);
    }

    // clearing the view splits everything back
    sim.set_view(None);
    sim.step(1.0 / 60.0);
    assert_eq!(sim.lod().merged_count(), 0);
    assert!(sim.meta_boids().is_empty());
}

#[test]
fn mode_switch_keeps_stepping() {
    let mut sim = sim(800, IndexBackend::Quadtree, ExecutionMode::Parallel);
    sim.step(0.02);
    sim.set_mode(ExecutionMode::Sequential).unwrap();
    sim.step(0.02);
    sim.set_backend(IndexBackend::Grid);
    sim.step(0.02);
    assert_eq!(sim.frame(), 3);
    assert_eq!(*sim.grid_offsets().last().unwrap() as usize, sim.len());
}

#[test]
fn records_round_trip_through_a_foreign_buffer() {
    let sim = sim(64, IndexBackend::Grid, ExecutionMode::Sequential);
    let records = sim.records();
    let bytes: &[u8] = bytemuck::cast_slice(&records);
    let boids = boids_from_bytes(bytes, &RecordLayout::default()).unwrap();
    assert_eq!(boids.as_slice(), sim.boids());

    let again = Simulation::with_boids(sim.config().clone(), boids).unwrap();
    assert_eq!(again.len(), 64);
    let first: BoidRecord = again.records()[0];
    assert_eq!(first.status, STATUS_INDIVIDUAL);
}

#[test]
fn partial_json_config_fills_in_defaults() {
    let cfg: FlockConfig = serde_json::from_str(
        r#"{
            "entity_count": 500,
            "backend": "Quadtree",
            "world": { "bounds": [800.0, 400.0] },
            "forces": { "visual_range": 30.0, "min_distance": 10.0 },
            "quadtree": { "rebuild_interval": 6 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.entity_count, 500);
    assert_eq!(cfg.backend, IndexBackend::Quadtree);
    assert_eq!(cfg.world.bounds, Vec2::new(800.0, 400.0));
    assert_eq!(cfg.forces.visual_range, 30.0);
    assert_eq!(cfg.forces.max_speed, FlockConfig::default().forces.max_speed);
    assert_eq!(cfg.quadtree.rebuild_interval(500), 6);
    assert_eq!(cfg.validate(), Ok(()));

    let sim = Simulation::new(cfg).unwrap();
    assert_eq!(sim.len(), 500);
}
