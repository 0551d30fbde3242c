use crate::neighbors::{NeighborIndex, NeighborQuery};
use crate::quadtree::node::{QuadNode, Quadtree};
use crate::store::Boid;

// depth is capped well below this, and each level pushes at most 4 nodes
const STACK_LEN: usize = 128;

impl Quadtree {
    fn scan_leaf(
        &self,
        node: &QuadNode,
        query: &NeighborQuery,
        radius_sq: f32,
        visit: &mut dyn FnMut(u32, &Boid, f32),
    ) {
        let start = node.start_index as usize;
        let end = start + node.count as usize;
        for k in start..end {
            let other = &self.sorted[k];
            let d2 = query.point.distance_squared(other.pos);
            if d2 <= radius_sq {
                visit(self.order[k], other, d2);
            }
        }
    }
}

impl NeighborIndex for Quadtree {
    fn for_each_neighbor(&self, query: NeighborQuery, visit: &mut dyn FnMut(u32, &Boid, f32)) {
        if !self.built {
            return;
        }
        let radius_sq = query.radius * query.radius;

        // own leaf first: most neighbors live there
        let hint = self
            .leaf_of
            .get(query.index as usize)
            .copied()
            .filter(|&leaf| {
                let node = self.pool.node(leaf);
                node.is_active() && node.is_leaf()
            });
        if let Some(leaf) = hint {
            self.scan_leaf(self.pool.node(leaf), &query, radius_sq, visit);
        }

        let mut stack = [0u32; STACK_LEN];
        let mut top = 1;
        while top > 0 {
            top -= 1;
            let i = stack[top];
            if Some(i) == hint {
                continue;
            }
            let node = self.pool.node(i);
            if query.point.distance_squared(node.center) > node.reach_sq(query.radius) {
                continue;
            }
            if node.is_leaf() {
                self.scan_leaf(node, &query, radius_sq, visit);
            } else {
                for q in 0..4 {
                    stack[top] = node.child(q);
                    top += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::config::QuadtreeConfig;
    use crate::neighbors::BruteForce;
    use crate::quadtree::build::QuadScratch;
    use crate::ExecutionMode;

    #[test]
    fn matches_brute_force_on_a_dense_cluster() {
        let boids: Vec<Boid> = (0..300)
            .map(|i| {
                let a = i as f32 * 0.37;
                let r = (i % 17) as f32 * 3.0;
                Boid::new(Vec2::new(a.cos() * r, a.sin() * r), Vec2::X, 0)
            })
            .collect();
        let cfg = QuadtreeConfig {
            split_threshold: 8,
            collapse_threshold: 2,
            ..Default::default()
        };
        let mut tree = Quadtree::new(&cfg, boids.len());
        tree.rebuild(&boids, &mut QuadScratch::default(), ExecutionMode::Sequential);
        tree.validate(&boids).unwrap();

        for (i, b) in boids.iter().enumerate() {
            let query = NeighborQuery {
                index: i as u32,
                point: b.pos,
                radius: 10.0,
            };
            assert_eq!(
                tree.neighbor_indices(query),
                BruteForce(&boids).neighbor_indices(query),
                "boid {i}"
            );
        }
    }

    #[test]
    fn unbuilt_tree_yields_nothing() {
        let tree = Quadtree::new(&QuadtreeConfig::default(), 4);
        let query = NeighborQuery {
            index: 0,
            point: Vec2::ZERO,
            radius: 5.0,
        };
        assert!(tree.neighbor_indices(query).is_empty());
    }
}
