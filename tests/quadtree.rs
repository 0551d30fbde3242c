use bevy_flock_index::config::QuadtreeConfig;
use bevy_flock_index::neighbors::{BruteForce, NeighborIndex, NeighborQuery};
use bevy_flock_index::quadtree::{Maintenance, QuadScratch, Quadtree};
use bevy_flock_index::spawn::random_boids;
use bevy_flock_index::{Boid, ExecutionMode, FlockConfig};
use glam::Vec2;

fn population(n: usize, seed: u64) -> Vec<Boid> {
    let mut cfg = FlockConfig {
        entity_count: n,
        seed: Some(seed),
        ..Default::default()
    };
    cfg.world.bounds = Vec2::new(300.0, 200.0);
    let mut boids = random_boids(&cfg);
    // a dense knot so the tree has to go deep somewhere
    for (k, b) in boids.iter_mut().take(n / 4).enumerate() {
        let a = k as f32 * 0.61;
        b.pos = Vec2::new(120.0, -80.0) + Vec2::from_angle(a) * (k % 23) as f32 * 0.4;
    }
    boids
}

fn build(boids: &[Boid], config: &QuadtreeConfig, mode: ExecutionMode) -> (Quadtree, QuadScratch) {
    let mut tree = Quadtree::new(config, boids.len());
    let mut scratch = QuadScratch::default();
    tree.rebuild(boids, &mut scratch, mode);
    (tree, scratch)
}

fn assert_matches_brute_force(tree: &Quadtree, boids: &[Boid], radius: f32) {
    let brute = BruteForce(boids);
    for (i, b) in boids.iter().enumerate() {
        let query = NeighborQuery {
            index: i as u32,
            point: b.pos,
            radius,
        };
        assert_eq!(
            tree.neighbor_indices(query),
            brute.neighbor_indices(query),
            "boid {i}"
        );
    }
}

#[test]
fn parallel_build_holds_the_invariants() {
    let boids = population(4_000, 21);
    let (tree, _) = build(&boids, &QuadtreeConfig::default(), ExecutionMode::Parallel);
    tree.validate(&boids).unwrap();

    let stats = tree.stats();
    assert!(stats.leaves > 4);
    assert!(stats.max_depth >= 3);
    assert_eq!(tree.root().count as usize, boids.len());
}

#[test]
fn both_modes_find_the_same_neighbors() {
    let boids = population(1_200, 8);
    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let (tree, _) = build(&boids, &QuadtreeConfig::default(), mode);
        tree.validate(&boids).unwrap();
        assert_matches_brute_force(&tree, &boids, 40.0);
    }
}

#[test]
fn exhausted_pool_leaves_an_over_full_leaf() {
    let boids: Vec<Boid> = (0..100)
        .map(|i| Boid::new(Vec2::new(10.0 + i as f32 * 0.01, 10.0), Vec2::X, 0))
        .collect();
    let config = QuadtreeConfig {
        node_pool_capacity: Some(5),
        ..Default::default()
    };
    let (tree, _) = build(&boids, &config, ExecutionMode::Parallel);
    tree.validate(&boids).unwrap();

    let stats = tree.stats();
    assert_eq!(stats.pool_used, 5);
    assert_eq!(stats.over_full_leaves, 1);
    assert_eq!(stats.max_leaf_count, 100);
    assert_matches_brute_force(&tree, &boids, 5.0);
}

#[test]
fn root_grows_to_cover_far_boids() {
    let mut boids = population(200, 2);
    boids[7].pos = Vec2::new(3_000.0, -2_500.0);
    let (tree, _) = build(&boids, &QuadtreeConfig::default(), ExecutionMode::Sequential);
    assert!(tree.root().half_size >= 3_000.0);
    tree.validate(&boids).unwrap();
}

#[test]
fn maintenance_tracks_motion_like_a_fresh_build() {
    let mut boids = population(1_500, 34);
    let config = QuadtreeConfig::default();
    let (mut tree, mut scratch) = build(&boids, &config, ExecutionMode::Parallel);

    for frame in 0..6 {
        for b in boids.iter_mut() {
            b.pos += b.vel * 0.25;
        }
        let outcome = tree.maintain(&boids, &mut scratch, ExecutionMode::Parallel);
        assert!(
            matches!(outcome, Maintenance::Updated { .. }),
            "frame {frame}: {outcome:?}"
        );
        tree.validate(&boids).unwrap();
    }

    let (fresh, _) = build(&boids, &config, ExecutionMode::Sequential);
    for (i, b) in boids.iter().enumerate() {
        let query = NeighborQuery {
            index: i as u32,
            point: b.pos,
            radius: 40.0,
        };
        assert_eq!(tree.neighbor_indices(query), fresh.neighbor_indices(query));
    }
}

#[test]
fn collapse_waits_until_the_lower_threshold() {
    // 40 boids split the root; dropping to 20 in that quadrant keeps it split
    let config = QuadtreeConfig::default();
    let mut boids: Vec<Boid> = (0..40)
        .map(|i| Boid::new(Vec2::new(500.0 + i as f32, 500.0), Vec2::X, 0))
        .collect();
    let (mut tree, mut scratch) = build(&boids, &config, ExecutionMode::Sequential);
    let quadrant = tree.root().child(3);
    assert!(!tree.pool().node(quadrant).is_leaf());

    for b in boids.iter_mut().skip(20) {
        b.pos.x = -b.pos.x;
    }
    let outcome = tree.maintain(&boids, &mut scratch, ExecutionMode::Sequential);
    assert!(matches!(outcome, Maintenance::Updated { collapses: 0, .. }));
    assert!(!tree.pool().node(quadrant).is_leaf());
    assert_eq!(tree.pool().node(quadrant).count, 20);
    tree.validate(&boids).unwrap();
}
