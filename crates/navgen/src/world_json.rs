// world_json.rs - World description stored as JSON
//
// {
//   "name": "Azeroth",
//   "tiles": [{ "x": 32, "y": 48, "chunks": [{ "x": 0, "y": 0,
//       "terrain": { "vertices": [[x, y, z], ...], "indices": [[0, 1, 2], ...] },
//       "liquid": {...}, "buildings": [7], "objects": [12] }] }],
//   "buildings": [{ "id": 7, "structure": {...}, "liquid": {...}, "objects": {...} }],
//   "objects": [{ "id": 12, "mesh": {...} }],
//   "globalStructure": { "id": 1, "structure": {...} }
// }

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::geometry::{CHUNKS_PER_TILE, Mesh, TileCoord};
use crate::world::{BuildingGeometry, MemoryWorld, ObjectGeometry, TerrainTile};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonWorld {
    pub name: String,
    #[serde(default)]
    pub tiles: Vec<JsonTile>,
    #[serde(default)]
    pub buildings: Vec<JsonBuilding>,
    #[serde(default)]
    pub objects: Vec<JsonObject>,
    #[serde(default)]
    pub global_structure: Option<JsonBuilding>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JsonTile {
    pub x: i32,
    pub y: i32,
    /// Only chunks with content need to be listed
    #[serde(default)]
    pub chunks: Vec<JsonChunk>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JsonChunk {
    pub x: usize,
    pub y: usize,
    #[serde(default)]
    pub terrain: Mesh,
    #[serde(default)]
    pub liquid: Mesh,
    #[serde(default)]
    pub buildings: Vec<u32>,
    #[serde(default)]
    pub objects: Vec<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JsonBuilding {
    pub id: u32,
    #[serde(default)]
    pub structure: Mesh,
    #[serde(default)]
    pub liquid: Mesh,
    #[serde(default)]
    pub objects: Mesh,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JsonObject {
    pub id: u32,
    pub mesh: Mesh,
}

impl JsonWorld {
    pub fn load(path: &Path) -> anyhow::Result<MemoryWorld> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read world file {}", path.display()))?;
        let world = Self::parse(&text)
            .with_context(|| format!("Invalid world file {}", path.display()))?;
        info!(
            "Loaded world '{}' from {}: {} tiles",
            world.name,
            path.display(),
            world.tiles.len()
        );
        world.into_memory_world()
    }

    pub fn parse(text: &str) -> anyhow::Result<JsonWorld> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_memory_world(self) -> anyhow::Result<MemoryWorld> {
        let mut world = MemoryWorld::new(&self.name);

        for json_tile in self.tiles {
            let coord = TileCoord::new(json_tile.x, json_tile.y);
            if !coord.in_grid() {
                bail!("Tile {} is outside the world grid", coord);
            }

            let mut tile = TerrainTile::new(coord);
            for chunk in json_tile.chunks {
                if chunk.x >= CHUNKS_PER_TILE || chunk.y >= CHUNKS_PER_TILE {
                    bail!("Tile {} has chunk {},{} outside the 16x16 grid", coord, chunk.x, chunk.y);
                }
                let label = format!("tile {} chunk {},{}", coord, chunk.x, chunk.y);
                let target = tile.chunk_mut(chunk.x, chunk.y);
                target.terrain = checked_mesh(chunk.terrain, &label)?;
                target.liquid = checked_mesh(chunk.liquid, &label)?;
                target.buildings = chunk.buildings;
                target.objects = chunk.objects;
            }
            world.insert_tile(tile);
        }

        for building in self.buildings {
            world.insert_building(building.into_geometry()?);
        }
        for object in self.objects {
            let mesh = checked_mesh(object.mesh, &format!("object #{}", object.id))?;
            world.insert_object(ObjectGeometry { id: object.id, mesh });
        }
        if let Some(global) = self.global_structure {
            world.set_global_structure(global.into_geometry()?);
        }

        Ok(world)
    }
}

impl JsonBuilding {
    fn into_geometry(self) -> anyhow::Result<BuildingGeometry> {
        let label = format!("building #{}", self.id);
        Ok(BuildingGeometry {
            id: self.id,
            structure: checked_mesh(self.structure, &label)?,
            liquid: checked_mesh(self.liquid, &label)?,
            objects: checked_mesh(self.objects, &label)?,
        })
    }
}

fn checked_mesh(mesh: Mesh, label: &str) -> anyhow::Result<Arc<Mesh>> {
    let count = mesh.vertices.len();
    if let Some(bad) = mesh.indices.iter().flatten().find(|&&i| i as usize >= count) {
        bail!("{}: index {} out of range for {} vertices", label, bad, count);
    }
    Ok(Arc::new(mesh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldSource;

    const SAMPLE: &str = r#"{
        "name": "Azeroth",
        "tiles": [
            { "x": 32, "y": 48, "chunks": [
                { "x": 0, "y": 0,
                  "terrain": { "vertices": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "indices": [[0, 1, 2]] },
                  "buildings": [7], "objects": [12] }
            ] },
            { "x": 33, "y": 48 }
        ],
        "buildings": [
            { "id": 7, "structure": { "vertices": [[0, 0, 5], [1, 0, 5], [0, 1, 5]], "indices": [[0, 1, 2]] } }
        ],
        "objects": [
            { "id": 12, "mesh": { "vertices": [[0, 0, 1], [1, 0, 1], [0, 1, 1]], "indices": [[0, 1, 2]] } }
        ]
    }"#;

    #[test]
    fn test_load_sample_world() {
        let world = JsonWorld::parse(SAMPLE).unwrap().into_memory_world().unwrap();
        assert_eq!(world.world_name(), "Azeroth");
        assert_eq!(world.tile_count(), 2);
        assert!(world.tile_exists(TileCoord::new(33, 48)));
        assert!(world.load_global_structure().is_none());

        let tile = world.load_terrain_tile(TileCoord::new(32, 48)).unwrap();
        assert_eq!(tile.chunk(0, 0).terrain.triangle_count(), 1);
        assert_eq!(tile.chunk(0, 0).buildings, vec![7]);
        assert!(tile.chunk(1, 0).terrain.is_empty());

        let building = world.resolve_building(7).unwrap();
        assert!(building.liquid.is_empty());
        assert_eq!(world.resolve_object(12).unwrap().mesh.vertices.len(), 3);
    }

    #[test]
    fn test_rejects_bad_data() {
        let out_of_grid = r#"{ "name": "W", "tiles": [{ "x": 64, "y": 0 }] }"#;
        assert!(JsonWorld::parse(out_of_grid).unwrap().into_memory_world().is_err());

        let bad_chunk = r#"{ "name": "W", "tiles": [{ "x": 1, "y": 1, "chunks": [{ "x": 16, "y": 0 }] }] }"#;
        assert!(JsonWorld::parse(bad_chunk).unwrap().into_memory_world().is_err());

        let bad_index = r#"{ "name": "W", "objects": [{ "id": 1,
            "mesh": { "vertices": [[0, 0, 0]], "indices": [[0, 1, 2]] } }] }"#;
        assert!(JsonWorld::parse(bad_index).unwrap().into_memory_world().is_err());

        assert!(JsonWorld::parse("{").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.json");
        fs::write(&path, r#"{ "name": "Deadmines", "globalStructure": { "id": 3 } }"#).unwrap();
        let world = JsonWorld::load(&path).unwrap();
        assert_eq!(world.tile_count(), 0);
        assert_eq!(world.load_global_structure().unwrap().id, 3);
    }
}
