//! Initialization-time configuration for a flock run.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::GridDims;
use crate::{ExecutionMode, IndexBackend};

/// Errors raised while validating configuration or importing entity buffers.
///
/// These are the only failures that surface to the caller; everything in the
/// per-frame path degrades instead of erroring.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("{requested} entities exceeds the {mode:?} maximum of {max}")]
    TooManyEntities {
        requested: usize,
        max: usize,
        mode: ExecutionMode,
    },
    #[error("record buffer of {len} bytes is not a multiple of stride {stride}")]
    RecordStride { len: usize, stride: usize },
    #[error("record field at offset {offset} (+{size} bytes) does not fit stride {stride}")]
    RecordField {
        offset: usize,
        size: usize,
        stride: usize,
    },
}

/// World extents, centered on the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// half-width / half-height of the region boids are steered back into
    pub bounds: Vec2,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            bounds: Vec2::new(1000.0, 600.0),
        }
    }
}

/// Flocking and integration coefficients. Factors are per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    /// neighbor radius; also the uniform grid cell edge
    pub visual_range: f32,
    /// separation kicks in below this distance
    pub min_distance: f32,
    pub cohesion_factor: f32,
    pub alignment_factor: f32,
    pub separation_factor: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// velocity change per second applied while outside the bounds
    pub turn_speed: f32,
    pub obstacle_avoidance_weight: f32,
    /// pull toward a payload target, 0 disables it
    pub target_seek_weight: f32,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            visual_range: 40.0,
            min_distance: 12.0,
            cohesion_factor: 0.8,
            alignment_factor: 1.5,
            separation_factor: 1500.0,
            min_speed: 40.0,
            max_speed: 120.0,
            turn_speed: 240.0,
            obstacle_avoidance_weight: 300.0,
            target_seek_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    pub teams: u32,
    /// fraction of boids placed in team 0; the rest is split evenly
    pub team_ratio: f32,
    pub intra_team_cohesion_multiplier: f32,
    /// must be > 1 so rival teams push harder than friends
    pub inter_team_repulsion_multiplier: f32,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            teams: 2,
            team_ratio: 0.5,
            intra_team_cohesion_multiplier: 1.0,
            inter_team_repulsion_multiplier: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeConfig {
    pub max_depth: u32,
    /// a leaf holding more boids than this subdivides
    pub split_threshold: u32,
    /// a parent of leaves holding fewer boids than this collapses
    pub collapse_threshold: u32,
    pub initial_half_size: f32,
    /// children smaller than this are never created
    pub min_half_size: f32,
    /// node slots, root included; `None` sizes the pool from N
    pub node_pool_capacity: Option<usize>,
    /// frames between forced full rebuilds; `None` picks from N
    pub rebuild_interval: Option<u32>,
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            split_threshold: 32,
            collapse_threshold: 8,
            initial_half_size: 1024.0,
            min_half_size: 1.0,
            node_pool_capacity: None,
            rebuild_interval: None,
        }
    }
}

impl QuadtreeConfig {
    /// Pool size actually allocated for `n` boids. Always `1 + 4k`.
    pub fn pool_capacity(&self, n: usize) -> usize {
        match self.node_pool_capacity {
            Some(cap) => 1 + 4 * (cap.saturating_sub(1) / 4),
            None => {
                let leaves = n / self.split_threshold.max(1) as usize + 1;
                1 + 4 * (2 * leaves).max(64)
            }
        }
    }

    /// Full rebuild cadence; small populations rebuild more often.
    pub fn rebuild_interval(&self, n: usize) -> u32 {
        if let Some(interval) = self.rebuild_interval {
            return interval.max(1);
        }
        match n {
            0..=10_000 => 4,
            10_001..=100_000 => 8,
            _ => 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    pub enabled: bool,
    /// distance outside the view before a boid merges
    pub margin: f32,
    /// coarse cell edge as a multiple of `visual_range`
    pub cell_scale: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            margin: 200.0,
            cell_scale: 4.0,
        }
    }
}

/// Everything a [`crate::Simulation`] needs at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockConfig {
    pub entity_count: usize,
    pub seed: Option<u64>,
    pub mode: ExecutionMode,
    pub backend: IndexBackend,
    /// upper bound on the step the plugin feeds from frame time
    pub max_dt: f32,
    pub world: WorldConfig,
    pub forces: ForceConfig,
    pub teams: TeamConfig,
    pub quadtree: QuadtreeConfig,
    pub lod: LodConfig,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            entity_count: 2_000,
            seed: None,
            mode: ExecutionMode::default(),
            backend: IndexBackend::default(),
            max_dt: 1.0 / 30.0,
            world: WorldConfig::default(),
            forces: ForceConfig::default(),
            teams: TeamConfig::default(),
            quadtree: QuadtreeConfig::default(),
            lod: LodConfig::default(),
        }
    }
}

impl FlockConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.mode.max_entities();
        if self.entity_count > max {
            return Err(ConfigError::TooManyEntities {
                requested: self.entity_count,
                max,
                mode: self.mode,
            });
        }
        if !(self.world.bounds.x > 0.0 && self.world.bounds.y > 0.0) {
            return Err(ConfigError::Invalid("world bounds must be positive"));
        }
        let f = &self.forces;
        if !(f.visual_range > 0.0) {
            return Err(ConfigError::Invalid("visual_range must be positive"));
        }
        if f.min_distance < 0.0 || f.min_distance > f.visual_range {
            return Err(ConfigError::Invalid(
                "min_distance must lie within [0, visual_range]",
            ));
        }
        if !(f.min_speed > 0.0) || f.min_speed > f.max_speed {
            return Err(ConfigError::Invalid(
                "speeds must satisfy 0 < min_speed <= max_speed",
            ));
        }
        if self.max_dt < 0.0 {
            return Err(ConfigError::Invalid("max_dt must not be negative"));
        }
        let t = &self.teams;
        if t.teams == 0 || t.teams > u16::MAX as u32 {
            return Err(ConfigError::Invalid("teams must be in 1..=65535"));
        }
        if !(0.0..=1.0).contains(&t.team_ratio) {
            return Err(ConfigError::Invalid("team_ratio must be within [0, 1]"));
        }
        if t.inter_team_repulsion_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "inter_team_repulsion_multiplier must be at least 1",
            ));
        }
        let q = &self.quadtree;
        if q.split_threshold == 0 {
            return Err(ConfigError::Invalid("split_threshold must be non-zero"));
        }
        if q.collapse_threshold >= q.split_threshold {
            return Err(ConfigError::Invalid(
                "collapse_threshold must be strictly below split_threshold",
            ));
        }
        if !(q.initial_half_size > 0.0) || !(q.min_half_size > 0.0) {
            return Err(ConfigError::Invalid("quadtree half sizes must be positive"));
        }
        if q.max_depth > 24 {
            return Err(ConfigError::Invalid("max_depth must be at most 24"));
        }
        if q.pool_capacity(self.entity_count) < 5 {
            return Err(ConfigError::Invalid(
                "node_pool_capacity must hold the root and one child block",
            ));
        }
        if self.lod.enabled && !(self.lod.margin > 0.0 && self.lod.cell_scale >= 1.0) {
            return Err(ConfigError::Invalid(
                "lod margin must be positive and cell_scale at least 1",
            ));
        }
        // the LOD table is allocated even while LOD is off
        let bounds = self.world.bounds;
        if GridDims::checked_total_cells(bounds, f.visual_range).is_none()
            || GridDims::checked_total_cells(bounds, f.visual_range * self.lod.cell_scale).is_none()
        {
            return Err(ConfigError::Invalid("grid too fine for world bounds"));
        }
        Ok(())
    }
}
