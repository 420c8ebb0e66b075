// engine/mod.rs - Narrow interface to the voxelization / tile compiler
//
// The pipeline only talks to the engine through `GeometryEngine`. It reads
// and writes span area flags directly on the `HeightField`, but region,
// contour and polygon data stay inside the engine.

mod voxel;

pub use voxel::{CompiledSpan, CompiledTile, VoxelEngine};

use crate::config::VoxelConfig;
use crate::geometry::{GeometryBatch, TileCoord};
use crate::heightfield::{HeightField, HeightFieldSpec};

/// Generic span filters, run in `SpanFilter::ORDER`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanFilter {
    /// Lets agents step onto small obstacles next to walkable spans
    LowHangingObstacles,
    /// Removes spans at drops higher than the climb height
    Ledges,
    /// Removes spans with too little head room
    LowClearance,
}

impl SpanFilter {
    pub const ORDER: [SpanFilter; 3] = [
        SpanFilter::LowHangingObstacles,
        SpanFilter::Ledges,
        SpanFilter::LowClearance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpanFilter::LowHangingObstacles => "low-hanging obstacles",
            SpanFilter::Ledges => "ledges",
            SpanFilter::LowClearance => "low clearance",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("could not create height field: {0}")]
    HeightField(String),

    #[error("could not rasterize batch '{batch}': {reason}")]
    Rasterize { batch: String, reason: String },

    #[error("no walkable regions in tile {0}")]
    NoRegions(TileCoord),

    #[error("could not serialize compiled tile: {0}")]
    Serialize(#[from] std::io::Error),
}

/// Voxelization and tile compilation
pub trait GeometryEngine: Send + Sync {
    fn create_height_field(&self, spec: &HeightFieldSpec) -> Result<HeightField, EngineError>;

    /// Rasterize a world-space batch. With `filter_slope`, triangles steeper
    /// than `slope_degrees` are rasterized as non-walkable.
    fn rasterize(
        &self,
        field: &mut HeightField,
        batch: &GeometryBatch,
        filter_slope: bool,
        slope_degrees: f32,
    ) -> Result<(), EngineError>;

    fn apply_filter(&self, filter: SpanFilter, field: &mut HeightField, config: &VoxelConfig);

    /// Compile the filtered height-field into an opaque tile blob
    fn build_compiled_tile(
        &self,
        field: &HeightField,
        coord: TileCoord,
        config: &VoxelConfig,
    ) -> Result<Vec<u8>, EngineError>;
}
