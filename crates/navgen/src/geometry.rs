// geometry.rs - Meshes, bounds, tile coordinates and the engine axis convention

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::area::AreaFlags;

// ============================================================================
// World grid constants
// ============================================================================

/// Edge length of one terrain tile in world units
pub const TILE_SIZE: f32 = 533.0 + (1.0 / 3.0);

/// Terrain tiles per world axis
pub const WORLD_GRID_SIZE: i32 = 64;

/// Terrain chunks per tile axis
pub const CHUNKS_PER_TILE: usize = 16;

/// Tile index of the world origin
const GRID_CENTER: i32 = WORLD_GRID_SIZE / 2;

// ============================================================================
// TileCoord
// ============================================================================

/// Grid coordinate of a terrain tile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn in_grid(self) -> bool {
        (0..WORLD_GRID_SIZE).contains(&self.x) && (0..WORLD_GRID_SIZE).contains(&self.y)
    }

    /// Flat index into a 64x64 row-major table, if in the grid
    pub fn grid_index(self) -> Option<usize> {
        self.in_grid()
            .then(|| (self.y * WORLD_GRID_SIZE + self.x) as usize)
    }

    /// The 3x3 block around this tile, row-major, north-west first
    pub fn neighborhood(self) -> [TileCoord; 9] {
        std::array::from_fn(|i| {
            let dx = (i % 3) as i32 - 1;
            let dy = (i / 3) as i32 - 1;
            TileCoord::new(self.x + dx, self.y + dy)
        })
    }

    /// World-space XY extent of this tile (z left at zero)
    pub fn world_footprint(self) -> Bounds {
        let max_x = (GRID_CENTER - self.y) as f32 * TILE_SIZE;
        let max_y = (GRID_CENTER - self.x) as f32 * TILE_SIZE;
        Bounds {
            min: [max_x - TILE_SIZE, max_y - TILE_SIZE, 0.0],
            max: [max_x, max_y, 0.0],
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:02},{:02}]", self.x, self.y)
    }
}

// ============================================================================
// Bounds and axis conversion
// ============================================================================

/// Convert a world-space point to engine space.
/// Engine X = -world Y, engine Y = world Z, engine Z = -world X.
pub fn world_to_engine(v: [f32; 3]) -> [f32; 3] {
    [-v[1], v[2], -v[0]]
}

/// Axis-aligned box
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    /// Inverted box that any point extends
    pub const EMPTY: Bounds = Bounds {
        min: [f32::MAX; 3],
        max: [f32::MIN; 3],
    };

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn extend_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        let mut out = *self;
        if !other.is_empty() {
            out.extend_point(other.min);
            out.extend_point(other.max);
        }
        out
    }

    /// Grow only the vertical range to cover `other`
    pub fn extend_z(&mut self, other: &Bounds) {
        if other.is_empty() {
            return;
        }
        self.min[2] = self.min[2].min(other.min[2]);
        self.max[2] = self.max[2].max(other.max[2]);
    }

    /// Engine-space (bmin, bmax) of this world-space box
    pub fn to_engine(&self) -> ([f32; 3], [f32; 3]) {
        (
            [-self.max[1], self.min[2], -self.max[0]],
            [-self.min[1], self.max[2], -self.min[0]],
        )
    }
}

// ============================================================================
// Mesh / GeometryBatch
// ============================================================================

/// Indexed triangle soup in world space. Walkable faces wind
/// counter-clockwise seen from above (+Z).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    #[serde(default)]
    pub vertices: Vec<[f32; 3]>,
    #[serde(default)]
    pub indices: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(vertices: Vec<[f32; 3]>, indices: Vec<[u32; 3]>) -> Self {
        Self { vertices, indices }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::EMPTY;
        for v in &self.vertices {
            bounds.extend_point(*v);
        }
        bounds
    }
}

/// A named, tagged set of triangles ready for rasterization
#[derive(Clone, Debug)]
pub struct GeometryBatch {
    pub name: String,
    pub mesh: Arc<Mesh>,
    pub area: AreaFlags,
    /// Whether steep triangles are cleared before rasterization
    pub filter_walkable: bool,
}

impl GeometryBatch {
    pub fn new(name: String, mesh: Arc<Mesh>, area: AreaFlags, filter_walkable: bool) -> Self {
        Self {
            name,
            mesh,
            area,
            filter_walkable,
        }
    }
}
