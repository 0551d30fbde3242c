use serde::{Deserialize, Serialize};

pub mod config;
pub mod ffi;
pub mod store;
pub mod spawn;
pub mod neighbors;
pub mod forces;
pub mod lod;
pub mod driver;
pub mod plugin;

pub mod grid {
    pub mod build;
    mod index;

    pub use build::{SortScratch, bucket_sort};
    pub use index::{GridDims, UniformGrid, MAX_GRID_CELLS, PADDING_CELLS};
}

pub mod quadtree {
    pub mod node;
    pub mod build;
    pub mod incremental;
    pub mod query;

    pub use build::QuadScratch;
    pub use incremental::Maintenance;
    pub use node::{NodePool, OccupancyStats, QuadNode, Quadtree, QuadtreeError};
}

pub use config::{ConfigError, FlockConfig};
pub use driver::Simulation;
pub use ffi::{BoidRecord, RecordLayout};
pub use forces::Obstacle;
pub use lod::{MetaBoid, ViewRect};
pub use neighbors::NeighborIndex;
pub use plugin::{FlockObstacles, FlockPlugin, FlockView};
pub use store::{Boid, EntityStore, Payload};

/// Which code path runs the per-frame stages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// single threaded, deterministic; used as the oracle
    Sequential,
    /// rayon data-parallel stages with atomics inside a stage
    #[default]
    Parallel,
}

impl ExecutionMode {
    /// Largest population a mode accepts at initialization.
    pub const fn max_entities(self) -> usize {
        match self {
            ExecutionMode::Sequential => 1 << 18,
            ExecutionMode::Parallel => 1 << 24,
        }
    }

    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, ExecutionMode::Parallel)
    }
}

/// Spatial index the force pass reads from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexBackend {
    #[default]
    Grid,
    Quadtree,
}
