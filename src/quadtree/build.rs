// unified single-pass quadtree build
//
// every boid walks down from the root, fetch_adding occupancy as it goes.
// the first boid to push a leaf past the split threshold wins a CAS on the
// node state and takes a 4-slot block from the bump counter. boids that
// stopped at a node before it split are orphans and get re-descended by
// fix-up passes (each pass moves them at least one level down, so at most
// max_depth + 1 passes). afterwards the node records are written from the
// atomics and boids are counting-sorted into leaf order.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec2;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::grid::build::{SortScratch, bucket_sort};
use crate::quadtree::node::{
    FLAG_ACTIVE, FLAG_LEAF, NO_PARENT, QuadNode, Quadtree, child_center, quadrant,
};
use crate::store::Boid;
use crate::ExecutionMode;

// node states during a build
const OPEN: u32 = 0;
const SPLITTING: u32 = 1;
const SPLIT: u32 = 2;
// pool ran dry; stays an over-full leaf
const SEALED: u32 = 3;

/// Pass-scoped buffers for quadtree builds and maintenance, owned by the
/// driver and cleared by each pass that uses them.
#[derive(Debug, Default)]
pub struct QuadScratch {
    pub(crate) occupancy: Vec<AtomicU32>,
    pub(crate) state: Vec<AtomicU32>,
    pub(crate) child_base: Vec<AtomicU32>,
    pub(crate) next_slot: AtomicU32,
    pub(crate) terminal: Vec<AtomicU32>,
    /// nodes split in the current maintenance round
    pub(crate) marks: Vec<bool>,
    /// active node list for maintenance
    pub(crate) active: Vec<u32>,
    pub(crate) sort: SortScratch,
}

impl QuadScratch {
    pub fn with_capacity(nodes: usize, boids: usize) -> Self {
        let mut scratch = Self::default();
        scratch.reserve(nodes, boids);
        scratch
    }

    pub(crate) fn reserve(&mut self, nodes: usize, boids: usize) {
        if self.occupancy.len() != nodes {
            self.occupancy = (0..nodes).map(|_| AtomicU32::new(0)).collect();
            self.state = (0..nodes).map(|_| AtomicU32::new(OPEN)).collect();
            self.child_base = (0..nodes).map(|_| AtomicU32::new(0)).collect();
            self.marks = vec![false; nodes];
        }
        if self.terminal.len() != boids {
            self.terminal = (0..boids).map(|_| AtomicU32::new(0)).collect();
        }
    }
}

pub(crate) fn for_each_index(mode: ExecutionMode, n: usize, f: impl Fn(usize) + Sync + Send) {
    match mode {
        ExecutionMode::Parallel => (0..n).into_par_iter().for_each(f),
        ExecutionMode::Sequential => (0..n).for_each(f),
    }
}

fn count_where(mode: ExecutionMode, n: usize, f: impl Fn(usize) -> bool + Sync + Send) -> usize {
    match mode {
        ExecutionMode::Parallel => (0..n).into_par_iter().filter(|&i| f(i)).count(),
        ExecutionMode::Sequential => (0..n).filter(|&i| f(i)).count(),
    }
}

/// Read-only view of the atomics one insertion pass works against.
struct Inserter<'a> {
    occupancy: &'a [AtomicU32],
    state: &'a [AtomicU32],
    child_base: &'a [AtomicU32],
    next_slot: &'a AtomicU32,
    capacity: u32,
    split_threshold: u32,
    max_depth: u32,
    min_half_size: f32,
    root_half: f32,
}

impl Inserter<'_> {
    #[inline]
    fn can_split(&self, depth: u32, half: f32) -> bool {
        depth < self.max_depth && half * 0.5 >= self.min_half_size
    }

    fn try_split(&self, node: usize) {
        if self.state[node]
            .compare_exchange(OPEN, SPLITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let capacity = self.capacity;
        let block = self
            .next_slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slot| {
                (slot + 4 <= capacity).then_some(slot + 4)
            });
        match block {
            Ok(base) => {
                self.child_base[node].store(base, Ordering::Relaxed);
                self.state[node].store(SPLIT, Ordering::Release);
            }
            Err(_) => self.state[node].store(SEALED, Ordering::Release),
        }
    }

    /// Walks `pos` down from the root and returns the node it stops at.
    ///
    /// With `resume = Some(t)` the nodes down to `t` were already counted by
    /// an earlier pass, so counting starts below `t`.
    fn descend(&self, pos: Vec2, resume: Option<u32>) -> u32 {
        let mut node = 0usize;
        let mut center = Vec2::ZERO;
        let mut half = self.root_half;
        let mut depth = 0u32;
        let mut counting = resume.is_none();

        loop {
            if counting {
                let occupancy = self.occupancy[node].fetch_add(1, Ordering::AcqRel) + 1;
                if occupancy > self.split_threshold && self.can_split(depth, half) {
                    self.try_split(node);
                }
            } else if resume == Some(node as u32) {
                counting = true;
            }

            if self.state[node].load(Ordering::Acquire) != SPLIT {
                return node as u32;
            }
            let q = quadrant(pos, center);
            node = (self.child_base[node].load(Ordering::Relaxed) + q) as usize;
            center = child_center(center, half, q);
            half *= 0.5;
            depth += 1;
        }
    }
}

impl Quadtree {
    /// Root half-size: the configured one, doubled until every finite
    /// position fits.
    fn fit_root(&self, boids: &[Boid], mode: ExecutionMode) -> f32 {
        let extent = |b: &Boid| {
            let e = b.pos.abs().max_element();
            if e.is_finite() { e } else { 0.0 }
        };
        let furthest = match mode {
            ExecutionMode::Parallel => boids.par_iter().map(extent).reduce(|| 0.0, f32::max),
            ExecutionMode::Sequential => boids.iter().map(extent).fold(0.0, f32::max),
        };
        let mut half = self.config.initial_half_size;
        while furthest > half && half < f32::MAX / 4.0 {
            half *= 2.0;
        }
        half
    }

    /// Full rebuild from `boids`; resets the pool and the boid history.
    pub fn rebuild(&mut self, boids: &[Boid], scratch: &mut QuadScratch, mode: ExecutionMode) {
        let n = boids.len();
        let capacity = self.pool.capacity();
        scratch.reserve(capacity, n);

        let root_half = self.fit_root(boids, mode);
        if root_half > self.config.initial_half_size {
            debug!(root_half, "quadtree root grown to cover all boids");
        }

        // clear
        match mode {
            ExecutionMode::Parallel => {
                scratch.occupancy.par_iter().for_each(|a| a.store(0, Ordering::Relaxed));
                scratch.state.par_iter().for_each(|a| a.store(OPEN, Ordering::Relaxed));
            }
            ExecutionMode::Sequential => {
                scratch.occupancy.iter_mut().for_each(|a| *a.get_mut() = 0);
                scratch.state.iter_mut().for_each(|a| *a.get_mut() = OPEN);
            }
        }
        *scratch.next_slot.get_mut() = 1;

        let inserter = Inserter {
            occupancy: &scratch.occupancy,
            state: &scratch.state,
            child_base: &scratch.child_base,
            next_slot: &scratch.next_slot,
            capacity: capacity as u32,
            split_threshold: self.config.split_threshold,
            max_depth: self.config.max_depth,
            min_half_size: self.config.min_half_size,
            root_half,
        };
        let terminal = &scratch.terminal;

        // insert
        for_each_index(mode, n, |i| {
            let leaf = inserter.descend(boids[i].pos, None);
            terminal[i].store(leaf, Ordering::Relaxed);
        });

        // fix-up: boids parked on a node that split after they passed
        let mut passes = 0;
        for _ in 0..=self.config.max_depth + 1 {
            let orphans = count_where(mode, n, |i| {
                let t = terminal[i].load(Ordering::Relaxed);
                inserter.state[t as usize].load(Ordering::Acquire) == SPLIT
            });
            if orphans == 0 {
                break;
            }
            passes += 1;
            for_each_index(mode, n, |i| {
                let t = terminal[i].load(Ordering::Relaxed);
                if inserter.state[t as usize].load(Ordering::Acquire) == SPLIT {
                    let leaf = inserter.descend(boids[i].pos, Some(t));
                    terminal[i].store(leaf, Ordering::Relaxed);
                }
            });
        }

        let allocated = scratch.next_slot.load(Ordering::Acquire);
        let sealed = self.finalize(scratch, root_half, allocated);
        if sealed > 0 {
            warn!(
                sealed,
                capacity, "quadtree node pool exhausted; leaving over-full leaves"
            );
        }

        self.leaf_of.clear();
        self.leaf_of
            .extend(scratch.terminal.iter_mut().map(|t| *t.get_mut()));
        self.built = true;
        self.reorder(boids, &mut scratch.sort, mode);
        self.prev_pos.clear();
        self.prev_pos.extend(boids.iter().map(|b| b.pos));

        debug!(
            boids = n,
            nodes = allocated,
            fixup_passes = passes,
            "quadtree rebuilt"
        );
    }

    // writes node records from the build atomics; returns the sealed count
    fn finalize(&mut self, scratch: &mut QuadScratch, root_half: f32, allocated: u32) -> usize {
        self.pool.reset(QuadNode::leaf(Vec2::ZERO, root_half, NO_PARENT, 0));
        self.pool.set_allocated(allocated);

        let mut sealed = 0;
        let mut stack = vec![0u32];
        while let Some(i) = stack.pop() {
            let state = *scratch.state[i as usize].get_mut();
            let count = *scratch.occupancy[i as usize].get_mut();
            let node = self.pool.node_mut(i);
            node.count = count;
            match state {
                SPLIT => {
                    let base = *scratch.child_base[i as usize].get_mut();
                    node.child_index = base;
                    node.flags = FLAG_ACTIVE;
                    let (center, half, depth) = (node.center, node.half_size, node.depth);
                    for q in 0..4 {
                        *self.pool.node_mut(base + q) =
                            QuadNode::leaf(child_center(center, half, q), half * 0.5, i, depth + 1);
                        stack.push(base + q);
                    }
                }
                SEALED => {
                    node.flags = FLAG_LEAF | FLAG_ACTIVE;
                    sealed += 1;
                }
                _ => node.flags = FLAG_LEAF | FLAG_ACTIVE,
            }
        }
        sealed
    }

    /// Counting-sorts boids by owning leaf and refreshes leaf ranges.
    pub(crate) fn reorder(&mut self, boids: &[Boid], sort: &mut SortScratch, mode: ExecutionMode) {
        let capacity = self.pool.capacity();
        bucket_sort(
            &self.leaf_of,
            capacity,
            sort,
            &mut self.offsets,
            &mut self.order,
            mode,
        );

        for i in 0..self.pool.allocated() {
            let start = self.offsets[i];
            let len = self.offsets[i + 1] - start;
            let node = self.pool.node_mut(i as u32);
            if node.is_active() && node.is_leaf() {
                debug_assert_eq!(node.count, len, "leaf {i} occupancy drifted");
                node.start_index = start;
                node.count = len;
            } else {
                node.start_index = 0;
            }
        }

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
}
