//! Quadtree node pool and the tree state shared by build, maintenance and
//! queries.

use std::f32::consts::SQRT_2;

use glam::Vec2;
use thiserror::Error;

use crate::config::QuadtreeConfig;
use crate::store::Boid;

pub const FLAG_LEAF: u32 = 1;
pub const FLAG_ACTIVE: u32 = 2;

/// Parent of the root.
pub const NO_PARENT: u32 = u32::MAX;

/// One pool slot. Children of a non-leaf live at `child_index..child_index + 4`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuadNode {
    pub center: Vec2,
    pub half_size: f32,
    pub child_index: u32,
    pub parent: u32,
    /// first slot of this leaf's boids in the sorted order
    pub start_index: u32,
    /// boids in this subtree
    pub count: u32,
    pub depth: u32,
    pub flags: u32,
}

impl QuadNode {
    pub fn leaf(center: Vec2, half_size: f32, parent: u32, depth: u32) -> Self {
        Self {
            center,
            half_size,
            child_index: 0,
            parent,
            start_index: 0,
            count: 0,
            depth,
            flags: FLAG_LEAF | FLAG_ACTIVE,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.flags & FLAG_LEAF != 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags & FLAG_ACTIVE != 0
    }

    /// Closed bounds test.
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        let d = (p - self.center).abs();
        d.x <= self.half_size && d.y <= self.half_size
    }

    #[inline]
    pub fn child(&self, quadrant: u32) -> u32 {
        self.child_index + quadrant
    }

    /// Squared distance from the center beyond which no point of this node
    /// can be within `radius`. Never tighter than `radius² + (2·half)²`.
    #[inline]
    pub fn reach_sq(&self, radius: f32) -> f32 {
        let loose = radius * radius + 4.0 * self.half_size * self.half_size;
        let corner = radius + SQRT_2 * self.half_size;
        loose.max(corner * corner)
    }
}

/// bit 0: east of center, bit 1: north of center
#[inline]
pub fn quadrant(p: Vec2, center: Vec2) -> u32 {
    (p.x >= center.x) as u32 + 2 * (p.y >= center.y) as u32
}

#[inline]
pub fn child_center(center: Vec2, half_size: f32, quadrant: u32) -> Vec2 {
    let q = half_size * 0.5;
    let dx = if quadrant & 1 != 0 { q } else { -q };
    let dy = if quadrant & 2 != 0 { q } else { -q };
    center + Vec2::new(dx, dy)
}

/// Fixed-capacity flat node array. Slot 0 is the root; blocks of four
/// children are bump allocated after it.
#[derive(Debug, Clone)]
pub struct NodePool {
    nodes: Vec<QuadNode>,
    next_free: u32,
    free_blocks: Vec<u32>,
}

impl NodePool {
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert_eq!((capacity - 1) % 4, 0);
        Self {
            nodes: vec![QuadNode::default(); capacity],
            next_free: 1,
            free_blocks: Vec::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// High-water mark of the bump allocator.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.next_free as usize
    }

    pub fn reset(&mut self, root: QuadNode) {
        self.nodes.fill(QuadNode::default());
        self.nodes[0] = root;
        self.next_free = 1;
        self.free_blocks.clear();
    }

    /// After a parallel build: the first `allocated` slots are in use.
    pub(crate) fn set_allocated(&mut self, allocated: u32) {
        self.next_free = allocated;
        self.free_blocks.clear();
    }

    /// Next free block of four slots; recycled blocks first. `None` once the
    /// pool is exhausted.
    pub fn alloc_block(&mut self) -> Option<u32> {
        if let Some(base) = self.free_blocks.pop() {
            return Some(base);
        }
        if self.next_free as usize + 4 > self.nodes.len() {
            return None;
        }
        let base = self.next_free;
        self.next_free += 4;
        Some(base)
    }

    pub fn release_block(&mut self, base: u32) {
        for slot in &mut self.nodes[base as usize..base as usize + 4] {
            slot.flags = 0;
            slot.count = 0;
        }
        self.free_blocks.push(base);
    }

    #[inline]
    pub fn node(&self, i: u32) -> &QuadNode {
        &self.nodes[i as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, i: u32) -> &mut QuadNode {
        &mut self.nodes[i as usize]
    }

    pub fn nodes(&self) -> &[QuadNode] {
        &self.nodes
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum QuadtreeError {
    #[error("node {node} counts {count} boids but its children hold {children}")]
    CountMismatch { node: u32, count: u32, children: u32 },
    #[error("boid {boid} is owned by node {node}, which is not an active leaf")]
    NotALeaf { boid: u32, node: u32 },
    #[error("boid {boid} at {pos} lies outside leaf {node}")]
    OutsideLeaf { boid: u32, node: u32, pos: Vec2 },
    #[error("boid {boid} is claimed {claims} times")]
    Ownership { boid: u32, claims: u32 },
    #[error("leaf {node} range does not match its count")]
    RangeMismatch { node: u32 },
    #[error("tree has not been built for {expected} boids")]
    NotBuilt { expected: usize },
}

/// Read-only occupancy summary for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OccupancyStats {
    pub active_nodes: usize,
    pub leaves: usize,
    pub max_leaf_count: u32,
    pub mean_leaf_count: f32,
    pub max_depth: u32,
    pub pool_used: usize,
    pub pool_capacity: usize,
    /// leaves holding more than the split threshold
    pub over_full_leaves: usize,
}

/// Adaptive quadtree over the front buffer.
#[derive(Debug, Clone)]
pub struct Quadtree {
    pub(crate) config: QuadtreeConfig,
    pub(crate) pool: NodePool,
    /// owning leaf per boid
    pub(crate) leaf_of: Vec<u32>,
    /// positions at the last build or maintenance pass
    pub(crate) prev_pos: Vec<Vec2>,
    /// counting-sort output keyed by leaf id
    pub(crate) offsets: Vec<u32>,
    pub(crate) order: Vec<u32>,
    pub(crate) sorted: Vec<Boid>,
    pub(crate) built: bool,
}

impl Quadtree {
    pub fn new(config: &QuadtreeConfig, entity_count: usize) -> Self {
        let capacity = config.pool_capacity(entity_count);
        Self {
            config: config.clone(),
            pool: NodePool::with_capacity(capacity),
            leaf_of: Vec::with_capacity(entity_count),
            prev_pos: Vec::with_capacity(entity_count),
            offsets: vec![0; capacity + 1],
            order: Vec::with_capacity(entity_count),
            sorted: Vec::with_capacity(entity_count),
            built: false,
        }
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn root(&self) -> &QuadNode {
        self.pool.node(0)
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Leaf currently owning boid `i`.
    pub fn leaf_of(&self, i: usize) -> u32 {
        self.leaf_of[i]
    }

    /// Original indices of the boids a leaf owns.
    pub fn leaf_members(&self, leaf: u32) -> &[u32] {
        let node = self.pool.node(leaf);
        let start = node.start_index as usize;
        &self.order[start..start + node.count as usize]
    }

    /// Walks the current structure down to the leaf containing `p`.
    pub fn locate(&self, p: Vec2) -> u32 {
        let mut i = 0;
        loop {
            let node = self.pool.node(i);
            if node.is_leaf() {
                return i;
            }
            i = node.child(quadrant(p, node.center));
        }
    }

    /// Copy of the node array for an external diagnostics collaborator.
    pub fn snapshot(&self) -> Vec<QuadNode> {
        self.pool.nodes()[..self.pool.allocated()].to_vec()
    }

    pub fn stats(&self) -> OccupancyStats {
        let mut stats = OccupancyStats {
            pool_used: self.pool.allocated(),
            pool_capacity: self.pool.capacity(),
            ..Default::default()
        };
        let mut leaf_total = 0u64;
        for node in self.pool.nodes()[..self.pool.allocated()].iter().filter(|n| n.is_active()) {
            stats.active_nodes += 1;
            stats.max_depth = stats.max_depth.max(node.depth);
            if node.is_leaf() {
                stats.leaves += 1;
                leaf_total += node.count as u64;
                stats.max_leaf_count = stats.max_leaf_count.max(node.count);
                if node.count > self.config.split_threshold {
                    stats.over_full_leaves += 1;
                }
            }
        }
        if stats.leaves > 0 {
            stats.mean_leaf_count = leaf_total as f32 / stats.leaves as f32;
        }
        stats
    }

    /// Checks the structural invariants against `boids`:
    /// non-leaf counts equal their children's sum, every boid sits inside
    /// its leaf, and every boid is claimed by exactly one leaf range.
    pub fn validate(&self, boids: &[Boid]) -> Result<(), QuadtreeError> {
        if !self.built || self.leaf_of.len() != boids.len() {
            return Err(QuadtreeError::NotBuilt { expected: boids.len() });
        }

        let nodes = &self.pool.nodes()[..self.pool.allocated()];
        for (i, node) in nodes.iter().enumerate().filter(|(_, n)| n.is_active()) {
            if node.is_leaf() {
                continue;
            }
            let children: u32 = (0..4).map(|q| self.pool.node(node.child(q)).count).sum();
            if children != node.count {
                return Err(QuadtreeError::CountMismatch {
                    node: i as u32,
                    count: node.count,
                    children,
                });
            }
        }

        let mut claims = vec![0u32; boids.len()];
        for (i, node) in nodes.iter().enumerate() {
            if !(node.is_active() && node.is_leaf()) {
                continue;
            }
            let start = node.start_index as usize;
            let end = start + node.count as usize;
            if end > self.order.len() || self.offsets[i + 1] - self.offsets[i] != node.count {
                return Err(QuadtreeError::RangeMismatch { node: i as u32 });
            }
            for &b in &self.order[start..end] {
                claims[b as usize] += 1;
                if self.leaf_of[b as usize] != i as u32 {
                    return Err(QuadtreeError::RangeMismatch { node: i as u32 });
                }
            }
        }
        if let Some((boid, &c)) = claims.iter().enumerate().find(|(_, c)| **c != 1) {
            return Err(QuadtreeError::Ownership {
                boid: boid as u32,
                claims: c,
            });
        }

        for (i, boid) in boids.iter().enumerate() {
            let leaf = self.leaf_of[i];
            let node = self.pool.node(leaf);
            if !(node.is_active() && node.is_leaf()) {
                return Err(QuadtreeError::NotALeaf { boid: i as u32, node: leaf });
            }
            let slack = node.half_size * 1.0e-5;
            let d = (boid.pos - node.center).abs();
            if d.x > node.half_size + slack || d.y > node.half_size + slack {
                return Err(QuadtreeError::OutsideLeaf {
                    boid: i as u32,
                    node: leaf,
                    pos: boid.pos,
                });
            }
        }
        Ok(())
    }
}
