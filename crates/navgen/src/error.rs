// error.rs - Failure taxonomy for tile builds

use std::fmt;
use std::path::PathBuf;

use crate::engine::EngineError;
use crate::geometry::TileCoord;

/// Something a build needed but could not resolve
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dependency {
    CenterTile(TileCoord),
    Building(u32),
    Object(u32),
    GlobalStructure,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::CenterTile(coord) => write!(f, "terrain tile {}", coord),
            Dependency::Building(id) => write!(f, "building #{}", id),
            Dependency::Object(id) => write!(f, "object #{}", id),
            Dependency::GlobalStructure => f.write_str("global structure"),
        }
    }
}

/// Why a single build target failed
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing dependency: {0}")]
    MissingDependency(Dependency),

    #[error("geometry engine failure: {0}")]
    GeometryEngine(#[from] EngineError),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Short tag for run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::MissingDependency(_) => "MissingDependency",
            BuildError::GeometryEngine(_) => "GeometryEngineFailure",
            BuildError::Io { .. } => "IOFailure",
        }
    }
}
