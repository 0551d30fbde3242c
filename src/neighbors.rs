//! Neighborhood queries shared by the grid and quadtree backends.

use glam::Vec2;

use crate::store::Boid;

#[derive(Debug, Clone, Copy)]
pub struct NeighborQuery {
    /// index of the querying boid; backends may use it as a lookup hint
    pub index: u32,
    pub point: Vec2,
    pub radius: f32,
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborIndex {
    /// Visit every indexed boid within `query.radius` of `query.point`
    /// (inclusive), the querying boid itself included. The visitor gets the
    /// original boid index, its indexed state and the squared distance.
    fn for_each_neighbor(&self, query: NeighborQuery, visit: &mut dyn FnMut(u32, &Boid, f32));

    /// Indices of boids within the radius, excluding the query boid; sorted.
    fn neighbor_indices(&self, query: NeighborQuery) -> Vec<u32> {
        let mut out = Vec::new();
        self.for_each_neighbor(query, &mut |i, _, _| {
            if i != query.index {
                out.push(i);
            }
        });
        out.sort_unstable();
        out
    }
}

/// O(n) scan over a boid slice; the reference the indexed backends are
/// checked against.
#[derive(Debug, Clone, Copy)]
pub struct BruteForce<'a>(pub &'a [Boid]);

impl NeighborIndex for BruteForce<'_> {
    fn for_each_neighbor(&self, query: NeighborQuery, visit: &mut dyn FnMut(u32, &Boid, f32)) {
        let radius_sq = query.radius * query.radius;
        for (i, other) in self.0.iter().enumerate() {
            let d2 = query.point.distance_squared(other.pos);
            if d2 <= radius_sq {
                visit(i as u32, other, d2);
            }
        }
    }
}
