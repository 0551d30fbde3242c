//! Per-frame pipeline: index build, force pass, buffer swap.

use bevy::prelude::Resource;
use bytemuck::Zeroable;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, FlockConfig};
use crate::ffi::BoidRecord;
use crate::forces::{FlockRules, MAX_OBSTACLES, Obstacle, flock_pass};
use crate::grid::{GridDims, SortScratch, UniformGrid};
use crate::lod::{LodAggregator, MetaBoid, ViewRect};
use crate::quadtree::{Maintenance, OccupancyStats, QuadNode, QuadScratch, Quadtree};
use crate::spawn::random_boids;
use crate::store::{Boid, EntityStore};
use crate::{ExecutionMode, IndexBackend};

/// One pipeline stage. The table is resolved whenever the backend or the
/// LOD switch changes, never looked up by name per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// regroup off-view boids into meta-boids
    Aggregate,
    GridIndex,
    /// full rebuild or incremental maintenance, per the cadence
    QuadtreeIndex,
    /// forces and integration, front -> back
    Integrate,
    Swap,
}

impl Stage {
    pub fn plan(backend: IndexBackend, lod: bool) -> Vec<Stage> {
        let mut stages = Vec::with_capacity(4);
        if lod {
            stages.push(Stage::Aggregate);
        }
        stages.push(match backend {
            IndexBackend::Grid => Stage::GridIndex,
            IndexBackend::Quadtree => Stage::QuadtreeIndex,
        });
        stages.push(Stage::Integrate);
        stages.push(Stage::Swap);
        stages
    }
}

#[derive(Resource)]
pub struct Simulation {
    config: FlockConfig,
    store: EntityStore,
    obstacles: Vec<Obstacle>,
    view: Option<ViewRect>,
    stages: Vec<Stage>,
    grid: UniformGrid,
    quadtree: Quadtree,
    lod: LodAggregator,
    sort: SortScratch,
    /// coarse-grid buckets for LOD
    lod_sort: SortScratch,
    quad_scratch: QuadScratch,
    frame: u64,
    frames_since_rebuild: u32,
    force_rebuild: bool,
    last_maintenance: Option<Maintenance>,
}

impl Simulation {
    /// Random population of `config.entity_count` boids.
    pub fn new(config: FlockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let boids = random_boids(&config);
        Self::with_boids(config, boids)
    }

    /// Supplied population; `config.entity_count` is taken from `boids`.
    pub fn with_boids(mut config: FlockConfig, boids: Vec<Boid>) -> Result<Self, ConfigError> {
        config.entity_count = boids.len();
        config.validate()?;
        let n = boids.len();
        let forces = &config.forces;

        let grid_dims = GridDims::new(config.world.bounds, forces.visual_range);
        let sim = Self {
            stages: Stage::plan(config.backend, config.lod.enabled),
            grid: UniformGrid::new(grid_dims),
            quadtree: Quadtree::new(&config.quadtree, n),
            lod: LodAggregator::new(&config.lod, config.world.bounds, forces.visual_range, n),
            sort: SortScratch::with_capacity(n, grid_dims.total_cells()),
            lod_sort: SortScratch::default(),
            quad_scratch: QuadScratch::with_capacity(config.quadtree.pool_capacity(n), n),
            store: EntityStore::new(boids),
            obstacles: Vec::new(),
            view: None,
            frame: 0,
            frames_since_rebuild: 0,
            force_rebuild: true,
            last_maintenance: None,
            config,
        };
        info!(
            boids = n,
            mode = ?sim.config.mode,
            backend = ?sim.config.backend,
            grid = ?grid_dims.dim,
            "flock simulation initialized"
        );
        Ok(sim)
    }

    /// Tears everything down and starts over with `n` fresh boids.
    /// Obstacles and the view carry over.
    pub fn restart(&mut self, n: usize) -> Result<(), ConfigError> {
        let config = FlockConfig {
            entity_count: n,
            ..self.config.clone()
        };
        let mut fresh = Self::new(config)?;
        fresh.obstacles = std::mem::take(&mut self.obstacles);
        fresh.view = self.view;
        *self = fresh;
        info!(boids = n, "flock simulation restarted");
        Ok(())
    }

    /// Advances one frame. Negative or NaN `dt` counts as zero.
    pub fn step(&mut self, dt: f32) {
        let dt = dt.max(0.0);
        if !self.store.is_empty() {
            for k in 0..self.stages.len() {
                self.run_stage(self.stages[k], dt);
            }
        }
        self.frame += 1;
    }

    fn run_stage(&mut self, stage: Stage, dt: f32) {
        let mode = self.config.mode;
        match stage {
            Stage::Aggregate => match self.view {
                Some(view) => self.lod.update(self.store.front(), &view, &mut self.lod_sort, mode),
                None => self.lod.clear(),
            },
            Stage::GridIndex => self.grid.rebuild(self.store.front(), &mut self.sort, mode),
            Stage::QuadtreeIndex => self.refresh_quadtree(),
            Stage::Integrate => {
                let rules = FlockRules {
                    forces: &self.config.forces,
                    teams: &self.config.teams,
                    bounds: self.config.world.bounds,
                    obstacles: &self.obstacles,
                };
                let lod = self.config.lod.enabled.then_some(&self.lod);
                let (front, back) = self.store.split();
                match self.config.backend {
                    IndexBackend::Grid => flock_pass(&self.grid, front, back, &rules, lod, dt, mode),
                    IndexBackend::Quadtree => {
                        flock_pass(&self.quadtree, front, back, &rules, lod, dt, mode)
                    }
                }
            }
            Stage::Swap => self.store.swap(),
        }
    }

    fn refresh_quadtree(&mut self) {
        let mode = self.config.mode;
        let front = self.store.front();
        let interval = self.config.quadtree.rebuild_interval(front.len());
        let due = self.force_rebuild
            || !self.quadtree.is_built()
            || self.frames_since_rebuild + 1 >= interval;

        if !due {
            let outcome = self.quadtree.maintain(front, &mut self.quad_scratch, mode);
            self.last_maintenance = Some(outcome);
            match outcome {
                Maintenance::Updated { .. } => {
                    self.frames_since_rebuild += 1;
                    return;
                }
                Maintenance::NeedsRebuild(reason) => {
                    debug!(reason, frame = self.frame, "falling back to a full quadtree rebuild");
                }
            }
        }

        self.quadtree.rebuild(front, &mut self.quad_scratch, mode);
        self.frames_since_rebuild = 0;
        self.force_rebuild = false;
    }

    /// Switches between the sequential and parallel paths. Incremental
    /// state is dropped; the next quadtree frame rebuilds.
    pub fn set_mode(&mut self, mode: ExecutionMode) -> Result<(), ConfigError> {
        if mode == self.config.mode {
            return Ok(());
        }
        let max = mode.max_entities();
        if self.store.len() > max {
            return Err(ConfigError::TooManyEntities {
                requested: self.store.len(),
                max,
                mode,
            });
        }
        info!(from = ?self.config.mode, to = ?mode, "execution mode switched");
        self.config.mode = mode;
        self.force_rebuild = true;
        Ok(())
    }

    pub fn set_backend(&mut self, backend: IndexBackend) {
        if backend == self.config.backend {
            return;
        }
        debug!(?backend, "neighbor index backend switched");
        self.config.backend = backend;
        self.stages = Stage::plan(backend, self.config.lod.enabled);
        self.force_rebuild = true;
    }

    /// Enables or disables LOD aggregation. Disabling returns every boid to
    /// individual flocking.
    pub fn set_lod_enabled(&mut self, enabled: bool) {
        if enabled == self.config.lod.enabled {
            return;
        }
        self.config.lod.enabled = enabled;
        self.stages = Stage::plan(self.config.backend, enabled);
        if !enabled {
            self.lod.clear();
        }
    }

    /// Replaces the obstacle set; anything past [`MAX_OBSTACLES`] is dropped.
    pub fn set_obstacles(&mut self, obstacles: &[Obstacle]) {
        if obstacles.len() > MAX_OBSTACLES {
            warn!(
                given = obstacles.len(),
                kept = MAX_OBSTACLES,
                "too many obstacles; extras ignored"
            );
        }
        self.obstacles.clear();
        self.obstacles
            .extend_from_slice(&obstacles[..obstacles.len().min(MAX_OBSTACLES)]);
    }

    /// View used by LOD aggregation; `None` keeps every boid individual.
    pub fn set_view(&mut self, view: Option<ViewRect>) {
        self.view = view;
    }

    pub fn boids(&self) -> &[Boid] {
        self.store.front()
    }

    /// Fills `out` with the front buffer, LOD status included. Extra slots
    /// on either side are left alone.
    pub fn write_records(&self, out: &mut [BoidRecord]) {
        for (i, (dst, boid)) in out.iter_mut().zip(self.store.front()).enumerate() {
            *dst = boid.to_record(self.lod.status(i));
        }
    }

    pub fn records(&self) -> Vec<BoidRecord> {
        let mut out = vec![BoidRecord::zeroed(); self.store.len()];
        self.write_records(&mut out);
        out
    }

    pub fn meta_boids(&self) -> &[MetaBoid] {
        self.lod.meta_boids()
    }

    pub fn lod(&self) -> &LodAggregator {
        &self.lod
    }

    pub fn quadtree(&self) -> &Quadtree {
        &self.quadtree
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    /// Node array copy from the last quadtree pass.
    pub fn quadtree_snapshot(&self) -> Vec<QuadNode> {
        self.quadtree.snapshot()
    }

    pub fn occupancy_stats(&self) -> OccupancyStats {
        self.quadtree.stats()
    }

    /// Offset table of the last grid build; empty cells only until the grid
    /// backend has run once.
    pub fn grid_offsets(&self) -> &[u32] {
        self.grid.offsets()
    }

    pub fn last_maintenance(&self) -> Option<Maintenance> {
        self.last_maintenance
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
