use bevy_flock_index::config::{ForceConfig, TeamConfig};
use bevy_flock_index::forces::{FlockRules, accumulate, impulses, steer_into_bounds, update_boid};
use bevy_flock_index::neighbors::BruteForce;
use bevy_flock_index::{Boid, Payload};
use glam::Vec2;

fn rules<'a>(forces: &'a ForceConfig, teams: &'a TeamConfig) -> FlockRules<'a> {
    FlockRules {
        forces,
        teams,
        bounds: Vec2::splat(1_000.0),
        obstacles: &[],
    }
}

#[test]
fn unit_square_converges_on_its_centroid() {
    let forces = ForceConfig {
        cohesion_factor: 1.0,
        separation_factor: 0.0,
        alignment_factor: 0.0,
        visual_range: 10.0,
        min_distance: 0.5,
        ..Default::default()
    };
    let teams = TeamConfig::default();
    let rules = rules(&forces, &teams);
    let boids: Vec<Boid> = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
        .into_iter()
        .map(|(x, y)| Boid::new(Vec2::new(x, y), Vec2::ZERO, 0))
        .collect();

    let centroid = Vec2::splat(0.5);
    let index = BruteForce(&boids);
    for (i, b) in boids.iter().enumerate() {
        let next = update_boid(&index, i as u32, b, &rules, 0.1, None);
        let toward = (centroid - b.pos).normalize();
        let heading = next.vel.normalize();
        assert!(heading.dot(toward) > 0.9999, "boid {i}: {heading}");
    }
}

#[test]
fn rival_repulsion_is_exactly_the_multiplier() {
    let forces = ForceConfig::default();
    let teams = TeamConfig {
        inter_team_repulsion_multiplier: 2.0,
        ..Default::default()
    };
    let rules = rules(&forces, &teams);
    let gap = Vec2::new(forces.min_distance / 2.0, 0.0);

    let separation = |other_team: u32| {
        let pair = [
            Boid::new(Vec2::ZERO, Vec2::X * 50.0, 0),
            Boid::new(gap, Vec2::X * 50.0, other_team),
        ];
        let acc = accumulate(&BruteForce(&pair), 0, &pair[0], &rules);
        impulses(&acc, 0, &pair[0], &rules, 0.1).separation
    };
    let friend = separation(0);
    let rival = separation(1);
    assert!(friend.x < 0.0);
    assert_eq!(rival, friend * 2.0);
}

#[test]
fn rivals_count_but_do_not_attract() {
    let forces = ForceConfig::default();
    let teams = TeamConfig::default();
    let rules = rules(&forces, &teams);
    let boids = [
        Boid::new(Vec2::ZERO, Vec2::X * 50.0, 0),
        Boid::new(Vec2::new(20.0, 0.0), Vec2::Y * 50.0, 1),
    ];
    let acc = accumulate(&BruteForce(&boids), 0, &boids[0], &rules);
    assert_eq!(acc.neighbors, 0);
    assert_eq!(acc.rivals, 1);
    let out = impulses(&acc, 0, &boids[0], &rules, 0.1);
    assert_eq!(out.cohesion, Vec2::ZERO);
    assert_eq!(out.alignment, Vec2::ZERO);
}

#[test]
fn coincident_boids_are_pushed_apart() {
    let forces = ForceConfig::default();
    let teams = TeamConfig::default();
    let rules = rules(&forces, &teams);
    let boids = [
        Boid::new(Vec2::splat(3.0), Vec2::X * 50.0, 0),
        Boid::new(Vec2::splat(3.0), Vec2::X * 50.0, 0),
    ];
    let index = BruteForce(&boids);
    let a = accumulate(&index, 0, &boids[0], &rules).close;
    let b = accumulate(&index, 1, &boids[1], &rules).close;
    assert!(a.is_finite() && a.length() > 0.0);
    assert!((a + b).length() < 1e-6);
}

#[test]
fn boundary_steer_turns_boids_back() {
    let bounds = Vec2::new(100.0, 50.0);
    let vel = Vec2::new(60.0, 0.0);
    let steered = steer_into_bounds(Vec2::new(100.001, 0.0), vel, bounds, 240.0, 0.1);
    assert!(steered.x < vel.x);
    assert_eq!(steered.y, 0.0);

    let steered = steer_into_bounds(Vec2::new(0.0, -60.0), Vec2::ZERO, bounds, 240.0, 0.1);
    assert!(steered.y > 0.0);

    let inside = steer_into_bounds(Vec2::new(99.0, 49.0), vel, bounds, 240.0, 0.1);
    assert_eq!(inside, vel);
}

fn fly_alone(start: Boid, bounds: Vec2, steps: usize) -> Vec<Boid> {
    let forces = ForceConfig::default();
    let teams = TeamConfig::default();
    let rules = FlockRules {
        bounds,
        ..rules(&forces, &teams)
    };
    let mut boid = start;
    let mut path = Vec::with_capacity(steps);
    for _ in 0..steps {
        boid = update_boid(&BruteForce(&[boid]), 0, &boid, &rules, 1.0 / 60.0, None);
        path.push(boid);
    }
    path
}

#[test]
fn boid_with_sideways_motion_returns_inside() {
    let min_speed = ForceConfig::default().min_speed;
    let start = Boid::new(Vec2::new(150.0, 0.0), Vec2::new(min_speed, 4.0), 0);
    let path = fly_alone(start, Vec2::splat(100.0), 600);
    assert!(path.iter().any(|b| b.vel.x < 0.0));
    assert!(path.iter().any(|b| b.pos.x < 100.0));
}

#[test]
fn boid_heading_straight_out_at_min_speed_keeps_going() {
    // steer takes speed off the x axis and the min-speed clamp puts it back
    let min_speed = ForceConfig::default().min_speed;
    let start = Boid::new(Vec2::new(150.0, 0.0), Vec2::new(min_speed, 0.0), 0);
    let path = fly_alone(start, Vec2::splat(100.0), 600);
    let last = path.last().unwrap();
    assert_eq!(last.vel.y, 0.0);
    assert!((last.vel.x - min_speed).abs() < 1e-3);
    assert!(last.pos.x > 500.0);
}

#[test]
fn zero_dt_keeps_position() {
    let forces = ForceConfig::default();
    let teams = TeamConfig::default();
    let rules = rules(&forces, &teams);
    let boids = [
        Boid::new(Vec2::new(1.0, 2.0), Vec2::new(500.0, 0.0), 0),
        Boid::new(Vec2::new(4.0, 2.0), Vec2::ZERO, 0),
    ];
    let index = BruteForce(&boids);
    for (i, b) in boids.iter().enumerate() {
        let next = update_boid(&index, i as u32, b, &rules, 0.0, None);
        assert_eq!(next.pos, b.pos);
        let speed = next.vel.length();
        assert!(speed >= forces.min_speed - 1e-3 && speed <= forces.max_speed + 1e-3);
    }
}

#[test]
fn payload_target_pulls_when_weighted() {
    let forces = ForceConfig {
        target_seek_weight: 10.0,
        ..Default::default()
    };
    let teams = TeamConfig::default();
    let rules = rules(&forces, &teams);
    let boid = Boid::new(Vec2::ZERO, Vec2::X * 50.0, 0).with_payload(Payload {
        target: Vec2::new(0.0, 100.0),
        group: 3,
    });
    let acc = accumulate(&BruteForce(&[boid]), 0, &boid, &rules);
    let seek = impulses(&acc, 0, &boid, &rules, 0.5).seek;
    assert!((seek - Vec2::new(0.0, 5.0)).length() < 1e-5);
}

#[test]
fn merged_boids_follow_the_advected_velocity() {
    let forces = ForceConfig::default();
    let teams = TeamConfig::default();
    let rules = rules(&forces, &teams);
    let boids = [
        Boid::new(Vec2::ZERO, Vec2::X * 50.0, 0),
        Boid::new(Vec2::new(5.0, 0.0), Vec2::Y * 50.0, 0),
    ];
    let advect = Vec2::new(0.0, -80.0);
    let next = update_boid(&BruteForce(&boids), 0, &boids[0], &rules, 0.1, Some(advect));
    assert_eq!(next.vel, advect);
    assert!((next.pos - Vec2::new(0.0, -8.0)).length() < 1e-5);
}
