use glam::{DVec2, IVec2, Vec2};
use rayon::prelude::*;

use crate::grid::build::{SortScratch, bucket_sort};
use crate::neighbors::{NeighborIndex, NeighborQuery};
use crate::store::Boid;
use crate::ExecutionMode;

/// Cells added on every side of the bounds.
pub const PADDING_CELLS: i32 = 2;

/// Largest cell table a configuration may ask for.
pub const MAX_GRID_CELLS: usize = 1 << 22;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridDims {
    pub cell_size: f32,
    /// cells per axis, always even so `dim / 2` is the origin cell
    pub dim: IVec2,
}

impl GridDims {
    pub fn new(bounds: Vec2, cell_size: f32) -> Self {
        let half_cells = (bounds / cell_size).ceil().as_ivec2().max(IVec2::ONE);
        Self {
            cell_size,
            dim: (half_cells + IVec2::splat(PADDING_CELLS)) * 2,
        }
    }

    /// Cell count [`GridDims::new`] would produce, or `None` when the cell
    /// size is not positive or the table would exceed [`MAX_GRID_CELLS`].
    pub fn checked_total_cells(bounds: Vec2, cell_size: f32) -> Option<usize> {
        if !(cell_size > 0.0) {
            return None;
        }
        let half = (bounds.as_dvec2() / cell_size as f64).ceil().max(DVec2::ONE);
        if !half.is_finite() {
            return None;
        }
        let dim = (half + DVec2::splat(PADDING_CELLS as f64)) * 2.0;
        let total = dim.x * dim.y;
        (total <= MAX_GRID_CELLS as f64).then_some(total as usize)
    }

    #[inline]
    pub fn total_cells(&self) -> usize {
        (self.dim.x * self.dim.y) as usize
    }

    /// Cell coordinates of `pos`, clamped into `[1, dim - 2]` so the 3x3
    /// stencil around any cell stays inside the table.
    #[inline]
    pub fn cell_coords(&self, pos: Vec2) -> IVec2 {
        // float -> int casts saturate and map NaN to 0, so the clamp covers
        // transient extreme velocities as well
        let raw = (pos / self.cell_size + (self.dim / 2).as_vec2()).floor();
        raw.as_ivec2().clamp(IVec2::ONE, self.dim - IVec2::splat(2))
    }

    #[inline]
    pub fn cell_id(&self, pos: Vec2) -> u32 {
        let c = self.cell_coords(pos);
        (c.y * self.dim.x + c.x) as u32
    }
}

/// Uniform grid over the front buffer: offsets + boids copied in cell order.
#[derive(Debug, Clone)]
pub struct UniformGrid {
    dims: GridDims,
    keys: Vec<u32>,
    offsets: Vec<u32>,
    order: Vec<u32>,
    sorted: Vec<Boid>,
}

impl UniformGrid {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            keys: Vec::new(),
            offsets: vec![0; dims.total_cells() + 1],
            order: Vec::new(),
            sorted: Vec::new(),
        }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn rebuild(&mut self, boids: &[Boid], scratch: &mut SortScratch, mode: ExecutionMode) {
        let dims = self.dims;
        match mode {
            ExecutionMode::Parallel => boids
                .par_iter()
                .map(|b| dims.cell_id(b.pos))
                .collect_into_vec(&mut self.keys),
            ExecutionMode::Sequential => {
                self.keys.clear();
                self.keys.extend(boids.iter().map(|b| dims.cell_id(b.pos)));
            }
        }

        bucket_sort(
            &self.keys,
            dims.total_cells(),
            scratch,
            &mut self.offsets,
            &mut self.order,
            mode,
        );

        match mode {
            ExecutionMode::Parallel => self
                .order
                .par_iter()
                .map(|&i| boids[i as usize])
                .collect_into_vec(&mut self.sorted),
            ExecutionMode::Sequential => {
                self.sorted.clear();
                self.sorted.extend(self.order.iter().map(|&i| boids[i as usize]));
            }
        }
    }

    /// Exclusive prefix sum, `total_cells + 1` long.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Original boid indices in cell order.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn cell_count(&self, cell: usize) -> u32 {
        self.offsets[cell + 1] - self.offsets[cell]
    }

    /// Boids of one cell as `(original index, boid)`.
    pub fn cell_members(&self, cell: usize) -> impl Iterator<Item = (u32, &Boid)> + '_ {
        let range = self.offsets[cell] as usize..self.offsets[cell + 1] as usize;
        self.order[range.clone()].iter().copied().zip(&self.sorted[range])
    }
}

impl NeighborIndex for UniformGrid {
    fn for_each_neighbor(&self, query: NeighborQuery, visit: &mut dyn FnMut(u32, &Boid, f32)) {
        debug_assert!(query.radius <= self.dims.cell_size * 1.0001);
        let radius_sq = query.radius * query.radius;
        let cell = self.dims.cell_id(query.point) as usize;
        let dim_x = self.dims.dim.x as usize;

        // three adjacent cells of a row are one contiguous range
        for row in [cell - dim_x, cell, cell + dim_x] {
            let start = self.offsets[row - 1] as usize;
            let end = self.offsets[row + 2] as usize;
            for k in start..end {
                let other = &self.sorted[k];
                let d2 = query.point.distance_squared(other.pos);
                if d2 <= radius_sq {
                    visit(self.order[k], other, d2);
                }
            }
        }
    }
}
