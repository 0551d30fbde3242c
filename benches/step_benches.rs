use bevy_flock_index::grid::{GridDims, SortScratch, UniformGrid};
use bevy_flock_index::quadtree::{QuadScratch, Quadtree};
use bevy_flock_index::spawn::random_boids;
use bevy_flock_index::{ExecutionMode, FlockConfig, IndexBackend, Simulation};
use criterion::{Criterion, criterion_group, criterion_main};

fn config(n: usize, backend: IndexBackend) -> FlockConfig {
    FlockConfig {
        entity_count: n,
        seed: Some(17),
        backend,
        ..Default::default()
    }
}

fn bench_step(c: &mut Criterion) {
    let dt = 1.0 / 60.0;

    let mut grid = Simulation::new(config(20_000, IndexBackend::Grid)).unwrap();
    c.bench_function("step_grid_20k", |b| b.iter(|| grid.step(dt)));

    let mut tree = Simulation::new(config(20_000, IndexBackend::Quadtree)).unwrap();
    c.bench_function("step_quadtree_20k", |b| b.iter(|| tree.step(dt)));
}

fn bench_index(c: &mut Criterion) {
    let cfg = config(100_000, IndexBackend::Grid);
    let boids = random_boids(&cfg);

    let mut grid = UniformGrid::new(GridDims::new(cfg.world.bounds, cfg.forces.visual_range));
    let mut sort = SortScratch::default();
    c.bench_function("grid_rebuild_100k", |b| {
        b.iter(|| grid.rebuild(&boids, &mut sort, ExecutionMode::Parallel))
    });

    let mut tree = Quadtree::new(&cfg.quadtree, boids.len());
    let mut scratch = QuadScratch::default();
    c.bench_function("quadtree_rebuild_100k", |b| {
        b.iter(|| tree.rebuild(&boids, &mut scratch, ExecutionMode::Parallel))
    });
}

criterion_group!(benches, bench_step, bench_index);
criterion_main!(benches);
