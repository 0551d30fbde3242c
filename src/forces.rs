//! Flocking forces, obstacle avoidance and integration.
//!
//! The pass reads the front buffer through a [`NeighborIndex`] and writes
//! each boid's next state into the back buffer at the same slot.

use std::f32::consts::PI;

use glam::Vec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ForceConfig, TeamConfig};
use crate::lod::LodAggregator;
use crate::neighbors::{NeighborIndex, NeighborQuery};
use crate::store::Boid;
use crate::ExecutionMode;

/// Obstacles beyond this many are ignored.
pub const MAX_OBSTACLES: usize = 32;

const GOLDEN_ANGLE: f32 = PI * (3.0 - 2.236_068);

/// Static circular obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub position: Vec2,
    pub radius: f32,
    pub strength: f32,
}

/// Everything the per-boid update reads besides the index.
#[derive(Debug, Clone, Copy)]
pub struct FlockRules<'a> {
    pub forces: &'a ForceConfig,
    pub teams: &'a TeamConfig,
    pub bounds: Vec2,
    pub obstacles: &'a [Obstacle],
}

/// Neighbor sums gathered for one boid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    /// separation sum, rival terms already scaled
    pub close: Vec2,
    pub pos_sum: Vec2,
    pub vel_sum: Vec2,
    /// same-team neighbors
    pub neighbors: u32,
    /// other-team neighbors
    pub rivals: u32,
}

/// Velocity changes for one step, kept apart so callers can inspect them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Impulses {
    pub cohesion: Vec2,
    pub alignment: Vec2,
    pub separation: Vec2,
    pub avoidance: Vec2,
    pub seek: Vec2,
}

impl Impulses {
    pub fn total(&self) -> Vec2 {
        self.cohesion + self.alignment + self.separation + self.avoidance + self.seek
    }
}

/// Unit direction pushing boid `i` away from a coincident boid `j`.
/// Antisymmetric, so the pair separates instead of drifting together.
#[inline]
pub fn tie_break(i: u32, j: u32) -> Vec2 {
    let lo = i.min(j);
    let dir = Vec2::from_angle(lo as f32 * GOLDEN_ANGLE + j.max(i) as f32);
    if i < j { dir } else { -dir }
}

/// Heading used when a boid's velocity has collapsed to zero.
#[inline]
pub fn default_heading(i: u32) -> Vec2 {
    Vec2::from_angle(i as f32 * GOLDEN_ANGLE)
}

pub fn accumulate<I: NeighborIndex + ?Sized>(
    index: &I,
    i: u32,
    me: &Boid,
    rules: &FlockRules,
) -> Accumulator {
    let forces = rules.forces;
    let min_sq = forces.min_distance * forces.min_distance;
    let rival_scale = rules.teams.inter_team_repulsion_multiplier;
    let mut acc = Accumulator::default();

    let query = NeighborQuery {
        index: i,
        point: me.pos,
        radius: forces.visual_range,
    };
    index.for_each_neighbor(query, &mut |j, other, d2| {
        if j == i {
            return;
        }
        let same = other.team == me.team;
        if d2 < min_sq {
            let push = if d2 > 0.0 {
                (me.pos - other.pos) / d2
            } else {
                tie_break(i, j) / forces.min_distance.max(f32::EPSILON)
            };
            acc.close += if same { push } else { push * rival_scale };
        }
        if same {
            acc.pos_sum += other.pos;
            acc.vel_sum += other.vel;
            acc.neighbors += 1;
        } else {
            acc.rivals += 1;
        }
    });
    acc
}

pub fn impulses(acc: &Accumulator, i: u32, me: &Boid, rules: &FlockRules, dt: f32) -> Impulses {
    let f = rules.forces;
    let mut out = Impulses {
        separation: acc.close * f.separation_factor * dt,
        ..Default::default()
    };

    if acc.neighbors > 0 {
        let n = acc.neighbors as f32;
        out.cohesion = (acc.pos_sum / n - me.pos)
            * f.cohesion_factor
            * rules.teams.intra_team_cohesion_multiplier
            * dt;
        out.alignment = (acc.vel_sum / n - me.vel) * f.alignment_factor * dt;
    }

    let mut away = Vec2::ZERO;
    for obstacle in rules.obstacles {
        let offset = me.pos - obstacle.position;
        let d = offset.length();
        if d >= obstacle.radius {
            continue;
        }
        let outward = if d > 0.0 { offset / d } else { default_heading(i) };
        away += outward * (1.0 - d / obstacle.radius) * obstacle.strength;
    }
    out.avoidance = away * f.obstacle_avoidance_weight * dt;

    if let Some(payload) = me.payload {
        out.seek = (payload.target - me.pos).normalize_or_zero() * f.target_seek_weight * dt;
    }
    out
}

/// Pushes velocity back toward the bounds on each axis the boid is outside of.
#[inline]
pub fn steer_into_bounds(pos: Vec2, mut vel: Vec2, bounds: Vec2, turn_speed: f32, dt: f32) -> Vec2 {
    let turn = turn_speed * dt;
    if pos.x > bounds.x {
        vel.x -= turn;
    } else if pos.x < -bounds.x {
        vel.x += turn;
    }
    if pos.y > bounds.y {
        vel.y -= turn;
    } else if pos.y < -bounds.y {
        vel.y += turn;
    }
    vel
}

#[inline]
pub fn clamp_speed(vel: Vec2, min_speed: f32, max_speed: f32, i: u32) -> Vec2 {
    let speed = vel.length();
    if !(speed > 0.0) || !speed.is_finite() {
        return default_heading(i) * min_speed;
    }
    if speed < min_speed {
        vel * (min_speed / speed)
    } else if speed > max_speed {
        vel * (max_speed / speed)
    } else {
        vel
    }
}

/// Next state of boid `i`. `advect` replaces flocking with a fixed velocity
/// (merged boids follow their meta-boid).
pub fn update_boid<I: NeighborIndex + ?Sized>(
    index: &I,
    i: u32,
    me: &Boid,
    rules: &FlockRules,
    dt: f32,
    advect: Option<Vec2>,
) -> Boid {
    let f = rules.forces;
    let vel = match advect {
        Some(v) => v,
        None => {
            let acc = accumulate(index, i, me, rules);
            me.vel + impulses(&acc, i, me, rules, dt).total()
        }
    };
    // the clamp can restore speed the steer took away; only a boid with some
    // sideways velocity rotates back, one heading straight out keeps going
    let vel = steer_into_bounds(me.pos, vel, rules.bounds, f.turn_speed, dt);
    let vel = clamp_speed(vel, f.min_speed, f.max_speed, i);
    Boid {
        pos: me.pos + vel * dt,
        vel,
        ..*me
    }
}

/// Runs the force and integration stage over every boid.
pub fn flock_pass<I: NeighborIndex + Sync + ?Sized>(
    index: &I,
    front: &[Boid],
    back: &mut [Boid],
    rules: &FlockRules,
    lod: Option<&LodAggregator>,
    dt: f32,
    mode: ExecutionMode,
) {
    debug_assert_eq!(front.len(), back.len());
    let update = |(i, out): (usize, &mut Boid)| {
        let advect = lod.and_then(|l| l.advection(i));
        *out = update_boid(index, i as u32, &front[i], rules, dt, advect);
    };
    match mode {
        ExecutionMode::Parallel => back.par_iter_mut().enumerate().for_each(update),
        ExecutionMode::Sequential => back.iter_mut().enumerate().for_each(update),
    }
}
