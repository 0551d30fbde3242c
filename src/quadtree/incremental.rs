// incremental quadtree maintenance between full rebuilds
//
// 1. detect: a boid moved only if the leaf its position implies differs
//    from the leaf it is stored under
// 2. move: occupancy is decremented up the old leaf's parent chain and
//    incremented up the new one (atomics, parallel over the moved list)
// 3. collapse: parents of leaves whose count fell below collapse_threshold
//    fold their children back in, cascading upward
// 4. split: leaves over split_threshold subdivide and redistribute,
//    cascading downward through the active node list
// 5. reorder into leaf-contiguous order

use std::sync::atomic::Ordering;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::quadtree::build::{QuadScratch, for_each_index};
use crate::quadtree::node::{
    FLAG_ACTIVE, FLAG_LEAF, NO_PARENT, QuadNode, Quadtree, child_center, quadrant,
};
use crate::store::Boid;
use crate::ExecutionMode;

/// Outcome of [`Quadtree::maintain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maintenance {
    Updated {
        moved: usize,
        splits: usize,
        collapses: usize,
    },
    /// the tree cannot be repaired in place; the caller should rebuild
    NeedsRebuild(&'static str),
}

impl Quadtree {
    /// Repairs the tree for boids that changed leaf since the last pass.
    pub fn maintain(
        &mut self,
        boids: &[Boid],
        scratch: &mut QuadScratch,
        mode: ExecutionMode,
    ) -> Maintenance {
        if !self.built {
            return Maintenance::NeedsRebuild("tree not built");
        }
        if boids.len() != self.leaf_of.len() {
            return Maintenance::NeedsRebuild("entity count changed");
        }
        scratch.reserve(self.pool.capacity(), boids.len());

        let moved = match self.detect_moves(boids, mode) {
            Some(moved) => moved,
            None => return Maintenance::NeedsRebuild("boid left the root bounds"),
        };

        self.apply_moves(&moved, scratch, mode);

        let collapses = self.collapse(&moved, scratch, mode);
        let splits = self.split(boids, &moved, scratch, mode);

        self.reorder(boids, &mut scratch.sort, mode);
        self.prev_pos.clear();
        self.prev_pos.extend(boids.iter().map(|b| b.pos));

        debug!(
            moved = moved.len(),
            splits, collapses, "quadtree maintained incrementally"
        );
        Maintenance::Updated {
            moved: moved.len(),
            splits,
            collapses,
        }
    }

    // (boid, old leaf, new leaf); None if any boid escaped the root
    fn detect_moves(&self, boids: &[Boid], mode: ExecutionMode) -> Option<Vec<(u32, u32, u32)>> {
        let root = *self.root();
        let probe = |(i, b): (usize, &Boid)| -> Option<Result<(u32, u32, u32), ()>> {
            if b.pos == self.prev_pos[i] {
                return None;
            }
            if !root.contains(b.pos) {
                return Some(Err(()));
            }
            let old = self.leaf_of[i];
            let new = self.locate(b.pos);
            (new != old).then_some(Ok((i as u32, old, new)))
        };

        let moved: Result<Vec<_>, ()> = match mode {
            ExecutionMode::Parallel => boids.par_iter().enumerate().filter_map(probe).collect(),
            ExecutionMode::Sequential => boids.iter().enumerate().filter_map(probe).collect(),
        };
        moved.ok()
    }

    fn apply_moves(&mut self, moved: &[(u32, u32, u32)], scratch: &mut QuadScratch, mode: ExecutionMode) {
        if moved.is_empty() {
            return;
        }
        let allocated = self.pool.allocated();
        let occupancy = &scratch.occupancy[..allocated];
        for (slot, node) in occupancy.iter().zip(self.pool.nodes()) {
            slot.store(node.count, Ordering::Relaxed);
        }

        let pool = &self.pool;
        let walk = |mut node: u32, arrive: bool| {
            while node != NO_PARENT {
                let slot = &occupancy[node as usize];
                if arrive {
                    slot.fetch_add(1, Ordering::Relaxed);
                } else {
                    slot.fetch_sub(1, Ordering::Relaxed);
                }
                node = pool.node(node).parent;
            }
        };
        for_each_index(mode, moved.len(), |k| {
            let (_, old, new) = moved[k];
            walk(old, false);
            walk(new, true);
        });

        for (i, slot) in occupancy.iter().enumerate() {
            self.pool.node_mut(i as u32).count = slot.load(Ordering::Relaxed);
        }
        for &(boid, _, new) in moved {
            self.leaf_of[boid as usize] = new;
        }
    }

    fn collapse(&mut self, moved: &[(u32, u32, u32)], scratch: &mut QuadScratch, mode: ExecutionMode) -> usize {
        let threshold = self.config.collapse_threshold;
        let active = &mut scratch.active;
        active.clear();
        active.extend(moved.iter().map(|&(_, old, _)| self.pool.node(old).parent));
        active.sort_unstable();
        active.dedup();

        let mut collapses = 0;
        while let Some(p) = active.pop() {
            if p == NO_PARENT {
                continue;
            }
            let node = *self.pool.node(p);
            if !node.is_active() || node.is_leaf() || node.count >= threshold {
                continue;
            }
            let all_leaves = (0..4).all(|q| self.pool.node(node.child(q)).is_leaf());
            if !all_leaves {
                continue;
            }

            self.pool.release_block(node.child_index);
            let parent = self.pool.node_mut(p);
            parent.flags |= FLAG_LEAF;
            parent.child_index = 0;
            collapses += 1;
            active.push(node.parent);
        }

        if collapses > 0 {
            // boids under a released block climb to the nearest live ancestor
            let pool = &self.pool;
            let lift = |leaf: &mut u32| {
                while !pool.node(*leaf).is_active() {
                    *leaf = pool.node(*leaf).parent;
                }
            };
            match mode {
                ExecutionMode::Parallel => self.leaf_of.par_iter_mut().for_each(lift),
                ExecutionMode::Sequential => self.leaf_of.iter_mut().for_each(lift),
            }
        }
        collapses
    }

    fn split(
        &mut self,
        boids: &[Boid],
        moved: &[(u32, u32, u32)],
        scratch: &mut QuadScratch,
        mode: ExecutionMode,
    ) -> usize {
        let threshold = self.config.split_threshold;
        scratch.active.clear();
        scratch.active.extend(moved.iter().map(|&(_, _, new)| new));
        scratch.active.sort_unstable();
        scratch.active.dedup();

        let mut splits = 0;
        let mut exhausted = false;
        let mut split_now = Vec::new();
        while !scratch.active.is_empty() {
            split_now.clear();
            for &leaf in &scratch.active {
                let node = *self.pool.node(leaf);
                let splittable = node.depth < self.config.max_depth
                    && node.half_size * 0.5 >= self.config.min_half_size;
                if !(node.is_active() && node.is_leaf() && node.count > threshold && splittable) {
                    continue;
                }
                let Some(base) = self.pool.alloc_block() else {
                    exhausted = true;
                    continue;
                };
                for q in 0..4 {
                    *self.pool.node_mut(base + q) = QuadNode::leaf(
                        child_center(node.center, node.half_size, q),
                        node.half_size * 0.5,
                        leaf,
                        node.depth + 1,
                    );
                    scratch.occupancy[(base + q) as usize].store(0, Ordering::Relaxed);
                }
                let n = self.pool.node_mut(leaf);
                n.child_index = base;
                n.flags = FLAG_ACTIVE;
                scratch.marks[leaf as usize] = true;
                split_now.push(leaf);
            }
            if split_now.is_empty() {
                break;
            }
            splits += split_now.len();

            // redistribute boids of the nodes just split
            {
                let pool = &self.pool;
                let marks = &scratch.marks;
                let occupancy = &scratch.occupancy;
                let redistribute = |(leaf, b): (&mut u32, &Boid)| {
                    if marks[*leaf as usize] {
                        let node = pool.node(*leaf);
                        let child = node.child(quadrant(b.pos, node.center));
                        occupancy[child as usize].fetch_add(1, Ordering::Relaxed);
                        *leaf = child;
                    }
                };
                match mode {
                    ExecutionMode::Parallel => self
                        .leaf_of
                        .par_iter_mut()
                        .zip(boids.par_iter())
                        .for_each(redistribute),
                    ExecutionMode::Sequential => {
                        self.leaf_of.iter_mut().zip(boids).for_each(redistribute)
                    }
                }
            }

            scratch.active.clear();
            for &parent in &split_now {
                scratch.marks[parent as usize] = false;
                let base = self.pool.node(parent).child_index;
                for q in 0..4 {
                    let child = base + q;
                    self.pool.node_mut(child).count =
                        scratch.occupancy[child as usize].load(Ordering::Relaxed);
                    scratch.active.push(child);
                }
            }
        }

        if exhausted {
            warn!(
                capacity = self.pool.capacity(),
                "quadtree node pool exhausted during maintenance; leaving over-full leaves"
            );
        }
        splits
    }
}
