// world.rs - World data model and the data-source seam
//
// Chunk decoding lives behind `WorldSource`; the pipeline only sees decoded
// terrain tiles, building geometry and object geometry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use parking_lot::Mutex;

use crate::geometry::{Bounds, Mesh, TileCoord, CHUNKS_PER_TILE};

// ============================================================================
// Terrain
// ============================================================================

/// One of the 16x16 chunks of a terrain tile
#[derive(Clone, Debug, Default)]
pub struct TerrainChunk {
    pub terrain: Arc<Mesh>,
    pub liquid: Arc<Mesh>,
    /// Building IDs placed on this chunk
    pub buildings: Vec<u32>,
    /// Free-standing object IDs placed on this chunk
    pub objects: Vec<u32>,
}

/// Decoded world data for one grid cell
#[derive(Clone, Debug)]
pub struct TerrainTile {
    coord: TileCoord,
    chunks: Vec<TerrainChunk>,
}

impl TerrainTile {
    /// A tile with 16x16 empty chunks
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            chunks: vec![TerrainChunk::default(); CHUNKS_PER_TILE * CHUNKS_PER_TILE],
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn chunk(&self, cx: usize, cy: usize) -> &TerrainChunk {
        &self.chunks[cy * CHUNKS_PER_TILE + cx]
    }

    pub fn chunk_mut(&mut self, cx: usize, cy: usize) -> &mut TerrainChunk {
        &mut self.chunks[cy * CHUNKS_PER_TILE + cx]
    }

    /// Chunks in row-major order with their chunk coordinates
    pub fn chunks(&self) -> impl Iterator<Item = (usize, usize, &TerrainChunk)> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i % CHUNKS_PER_TILE, i / CHUNKS_PER_TILE, c))
    }

    /// Grid footprint in XY, terrain and liquid height range in Z
    pub fn bounds(&self) -> Bounds {
        let mut heights = Bounds::EMPTY;
        for chunk in &self.chunks {
            heights = heights.union(&chunk.terrain.bounds());
            heights = heights.union(&chunk.liquid.bounds());
        }

        let mut bounds = self.coord.world_footprint();
        if !heights.is_empty() {
            bounds.min[2] = heights.min[2];
            bounds.max[2] = heights.max[2];
        }
        bounds
    }
}

// ============================================================================
// Buildings / objects
// ============================================================================

/// Static building ("WMO") geometry, already placed in world space
#[derive(Clone, Debug, Default)]
pub struct BuildingGeometry {
    pub id: u32,
    pub structure: Arc<Mesh>,
    pub liquid: Arc<Mesh>,
    /// Decorative objects that belong to the building
    pub objects: Arc<Mesh>,
}

impl BuildingGeometry {
    pub fn bounds(&self) -> Bounds {
        self.structure
            .bounds()
            .union(&self.liquid.bounds())
            .union(&self.objects.bounds())
    }
}

/// Free-standing decorative object geometry, placed in world space
#[derive(Clone, Debug, Default)]
pub struct ObjectGeometry {
    pub id: u32,
    pub mesh: Arc<Mesh>,
}

// ============================================================================
// WorldSource
// ============================================================================

/// Query interface over decoded world data
pub trait WorldSource: Send + Sync {
    fn world_name(&self) -> &str;

    /// Whether the world grid has a terrain tile at `coord`
    fn tile_exists(&self, coord: TileCoord) -> bool;

    /// Load the tile at `coord`. Only called for coordinates that exist.
    fn load_terrain_tile(&self, coord: TileCoord) -> anyhow::Result<TerrainTile>;

    fn resolve_building(&self, id: u32) -> Option<Arc<BuildingGeometry>>;

    fn resolve_object(&self, id: u32) -> Option<Arc<ObjectGeometry>>;

    /// The enclosing building of a world without a terrain grid
    fn load_global_structure(&self) -> Option<Arc<BuildingGeometry>>;
}

// ============================================================================
// MemoryWorld
// ============================================================================

/// World held entirely in memory
#[derive(Default)]
pub struct MemoryWorld {
    name: String,
    tiles: HashMap<TileCoord, TerrainTile>,
    buildings: HashMap<u32, Arc<BuildingGeometry>>,
    objects: HashMap<u32, Arc<ObjectGeometry>>,
    global_structure: Option<Arc<BuildingGeometry>>,
    loads: Mutex<HashMap<TileCoord, usize>>,
}

impl MemoryWorld {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn insert_tile(&mut self, tile: TerrainTile) {
        self.tiles.insert(tile.coord(), tile);
    }

    pub fn insert_building(&mut self, building: BuildingGeometry) {
        self.buildings.insert(building.id, Arc::new(building));
    }

    pub fn insert_object(&mut self, object: ObjectGeometry) {
        self.objects.insert(object.id, Arc::new(object));
    }

    pub fn set_global_structure(&mut self, building: BuildingGeometry) {
        self.global_structure = Some(Arc::new(building));
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// How many times `coord` has been loaded
    pub fn load_count(&self, coord: TileCoord) -> usize {
        self.loads.lock().get(&coord).copied().unwrap_or(0)
    }
}

impl WorldSource for MemoryWorld {
    fn world_name(&self) -> &str {
        &self.name
    }

    fn tile_exists(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    fn load_terrain_tile(&self, coord: TileCoord) -> anyhow::Result<TerrainTile> {
        let Some(tile) = self.tiles.get(&coord) else {
            bail!("{} has no terrain tile {}", self.name, coord);
        };
        *self.loads.lock().entry(coord).or_insert(0) += 1;
        Ok(tile.clone())
    }

    fn resolve_building(&self, id: u32) -> Option<Arc<BuildingGeometry>> {
        self.buildings.get(&id).cloned()
    }

    fn resolve_object(&self, id: u32) -> Option<Arc<ObjectGeometry>> {
        self.objects.get(&id).cloned()
    }

    fn load_global_structure(&self) -> Option<Arc<BuildingGeometry>> {
        self.global_structure.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_bounds_use_chunk_heights() {
        let coord = TileCoord::new(32, 32);
        let mut tile = TerrainTile::new(coord);
        tile.chunk_mut(3, 4).terrain = Arc::new(Mesh::new(
            vec![[-10.0, -10.0, 5.0], [-20.0, -10.0, 7.5], [-10.0, -20.0, 6.0]],
            vec![[0, 1, 2]],
        ));

        let bounds = tile.bounds();
        let footprint = coord.world_footprint();
        assert_eq!(bounds.min[0], footprint.min[0]);
        assert_eq!(bounds.max[1], footprint.max[1]);
        assert_eq!(bounds.min[2], 5.0);
        assert_eq!(bounds.max[2], 7.5);
    }

    #[test]
    fn test_chunks_row_major() {
        let tile = TerrainTile::new(TileCoord::new(1, 1));
        let coords: Vec<(usize, usize)> = tile.chunks().map(|(x, y, _)| (x, y)).take(17).collect();
        assert_eq!(coords[0], (0, 0));
        assert_eq!(coords[1], (1, 0));
        assert_eq!(coords[16], (0, 1));
        assert_eq!(tile.chunks().count(), 256);
    }

    #[test]
    fn test_memory_world_counts_loads() {
        let coord = TileCoord::new(5, 6);
        let mut world = MemoryWorld::new("Test");
        world.insert_tile(TerrainTile::new(coord));

        assert!(world.tile_exists(coord));
        assert!(!world.tile_exists(TileCoord::new(6, 5)));
        assert_eq!(world.load_count(coord), 0);
        world.load_terrain_tile(coord).unwrap();
        world.load_terrain_tile(coord).unwrap();
        assert_eq!(world.load_count(coord), 2);
        assert!(world.load_terrain_tile(TileCoord::new(0, 0)).is_err());
    }
}
