// entity source helpers: seeded random populations and record imports

use std::f32::consts::TAU;

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ConfigError, FlockConfig};
use crate::ffi::RecordLayout;
use crate::store::Boid;

/// Team for the `i`-th of `n` boids: the first `ratio` share goes to team 0,
/// the rest round-robins over the remaining teams.
pub fn team_for(i: usize, n: usize, teams: u32, ratio: f32) -> u32 {
    if teams <= 1 {
        return 0;
    }
    let first = (n as f32 * ratio).round() as usize;
    if i < first {
        0
    } else {
        1 + ((i - first) % (teams as usize - 1)) as u32
    }
}

/// Uniform positions inside the bounds, headings uniform on the circle,
/// speeds in `[min_speed, max_speed]`.
pub fn random_boids(config: &FlockConfig) -> Vec<Boid> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(rand::thread_rng()).unwrap_or_else(|_| StdRng::seed_from_u64(0)),
    };

    let n = config.entity_count;
    let bounds = config.world.bounds;
    let forces = &config.forces;

    (0..n)
        .map(|i| {
            let pos = Vec2::new(
                rng.gen_range(-bounds.x..=bounds.x),
                rng.gen_range(-bounds.y..=bounds.y),
            );
            let heading = rng.gen_range(0.0..TAU);
            let speed = rng.gen_range(forces.min_speed..=forces.max_speed);
            let team = team_for(i, n, config.teams.teams, config.teams.team_ratio);
            Boid::new(pos, Vec2::from_angle(heading) * speed, team)
        })
        .collect()
}

/// Decodes a foreign entity buffer. Teams are taken as-is.
pub fn boids_from_bytes(bytes: &[u8], layout: &RecordLayout) -> Result<Vec<Boid>, ConfigError> {
    Ok(layout.read(bytes)?.iter().map(Boid::from).collect())
}
