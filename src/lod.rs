//! Level of detail: boids well outside the view are merged into meta-boids,
//! one per (coarse cell, team), built with the same counting sort as the grid.

use glam::Vec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::LodConfig;
use crate::ffi::{STATUS_INDIVIDUAL, STATUS_MERGED};
use crate::grid::{GridDims, SortScratch, bucket_sort};
use crate::store::Boid;
use crate::ExecutionMode;

const NO_GROUP: u32 = u32::MAX;

/// Axis-aligned view rectangle in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl ViewRect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    #[inline]
    pub fn inflate(&self, by: f32) -> Self {
        Self {
            min: self.min - Vec2::splat(by),
            max: self.max + Vec2::splat(by),
        }
    }

    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LodState {
    #[default]
    Individual,
    Merged,
}

impl LodState {
    /// Hysteresis: merge outside `view + margin`, split back inside
    /// `view + margin / 2`.
    #[inline]
    pub fn next(self, pos: Vec2, view: &ViewRect, margin: f32) -> Self {
        match self {
            LodState::Individual if !view.inflate(margin).contains(pos) => LodState::Merged,
            LodState::Merged if view.inflate(margin * 0.5).contains(pos) => LodState::Individual,
            state => state,
        }
    }
}

/// Aggregate standing in for the merged boids of one team in one coarse cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaBoid {
    pub position: Vec2,
    pub velocity: Vec2,
    pub team: u32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct LodAggregator {
    dims: GridDims,
    margin: f32,
    states: Vec<LodState>,
    keys: Vec<u32>,
    offsets: Vec<u32>,
    order: Vec<u32>,
    group_of: Vec<u32>,
    metas: Vec<MetaBoid>,
}

impl LodAggregator {
    pub fn new(config: &LodConfig, bounds: Vec2, visual_range: f32, entity_count: usize) -> Self {
        Self {
            dims: GridDims::new(bounds, visual_range * config.cell_scale),
            margin: config.margin,
            states: vec![LodState::Individual; entity_count],
            keys: Vec::with_capacity(entity_count),
            offsets: Vec::new(),
            order: Vec::with_capacity(entity_count),
            group_of: vec![NO_GROUP; entity_count],
            metas: Vec::new(),
        }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn state(&self, i: usize) -> LodState {
        self.states[i]
    }

    pub fn status(&self, i: usize) -> u32 {
        match self.states[i] {
            LodState::Individual => STATUS_INDIVIDUAL,
            LodState::Merged => STATUS_MERGED,
        }
    }

    pub fn merged_count(&self) -> usize {
        self.states.iter().filter(|s| **s == LodState::Merged).count()
    }

    pub fn meta_boids(&self) -> &[MetaBoid] {
        &self.metas
    }

    /// Meta-boid a merged boid currently belongs to.
    pub fn group_of(&self, i: usize) -> Option<u32> {
        Some(self.group_of[i]).filter(|g| *g != NO_GROUP)
    }

    /// Velocity a merged boid follows instead of flocking.
    #[inline]
    pub fn advection(&self, i: usize) -> Option<Vec2> {
        self.group_of(i).map(|g| self.metas[g as usize].velocity)
    }

    /// Every boid back to individual, no meta-boids.
    pub fn clear(&mut self) {
        self.states.fill(LodState::Individual);
        self.group_of.fill(NO_GROUP);
        self.metas.clear();
    }

    /// Advances merge state against `view` and regroups merged boids.
    pub fn update(
        &mut self,
        boids: &[Boid],
        view: &ViewRect,
        sort: &mut SortScratch,
        mode: ExecutionMode,
    ) {
        let n = boids.len();
        self.states.resize(n, LodState::Individual);
        self.group_of.clear();
        self.group_of.resize(n, NO_GROUP);
        self.metas.clear();

        let margin = self.margin;
        let dims = self.dims;
        // individual boids go to a sentinel bucket past the last cell
        let sentinel = dims.total_cells() as u32;
        let advance = |(state, b): (&mut LodState, &Boid)| {
            *state = state.next(b.pos, view, margin);
        };
        let key = |(state, b): (&LodState, &Boid)| match state {
            LodState::Merged => dims.cell_id(b.pos),
            LodState::Individual => sentinel,
        };
        match mode {
            ExecutionMode::Parallel => {
                self.states.par_iter_mut().zip(boids.par_iter()).for_each(advance);
                self.states
                    .par_iter()
                    .zip(boids.par_iter())
                    .map(key)
                    .collect_into_vec(&mut self.keys);
            }
            ExecutionMode::Sequential => {
                self.states.iter_mut().zip(boids).for_each(advance);
                self.keys.clear();
                self.keys.extend(self.states.iter().zip(boids).map(key));
            }
        }

        bucket_sort(
            &self.keys,
            sentinel as usize + 1,
            sort,
            &mut self.offsets,
            &mut self.order,
            mode,
        );

        // a coarse cell holds few teams, so a linear scan per cell is enough
        let mut local: Vec<(u32, Vec2, Vec2, u32)> = Vec::new();
        for cell in 0..sentinel as usize {
            let (start, end) = (self.offsets[cell] as usize, self.offsets[cell + 1] as usize);
            if start == end {
                continue;
            }
            local.clear();
            for &i in &self.order[start..end] {
                let b = &boids[i as usize];
                let slot = match local.iter().position(|g| g.0 == b.team) {
                    Some(slot) => slot,
                    None => {
                        local.push((b.team, Vec2::ZERO, Vec2::ZERO, 0));
                        local.len() - 1
                    }
                };
                let g = &mut local[slot];
                g.1 += b.pos;
                g.2 += b.vel;
                g.3 += 1;
                self.group_of[i as usize] = (self.metas.len() + slot) as u32;
            }
            self.metas.extend(local.iter().map(|&(team, pos, vel, count)| MetaBoid {
                position: pos / count as f32,
                velocity: vel / count as f32,
                team,
                count,
            }));
        }
    }
}
