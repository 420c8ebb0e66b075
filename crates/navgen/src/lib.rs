// navgen - Navigation tile build pipeline
//
// Turns world geometry (terrain tiles, buildings, objects) into compiled
// navigation tiles, one per terrain tile of the 64x64 world grid.

pub mod area;
pub mod assembler;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod heightfield;
pub mod output;
pub mod tile_cache;
pub mod world;
pub mod world_json;

pub use area::AreaFlags;
pub use builder::{BuildOptions, BuildTarget, RunReport, TileBuilder, TileOutcome};
pub use error::{BuildError, Dependency};
pub use geometry::TileCoord;
