// assembler.rs - Collect tagged geometry for one build tile

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::area::AreaFlags;
use crate::error::{BuildError, Dependency};
use crate::geometry::{GeometryBatch, Mesh};
use crate::tile_cache::Neighborhood;
use crate::world::{BuildingGeometry, TerrainTile, WorldSource};

/// Batch counts of one assembly
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub terrain_batches: usize,
    pub liquid_batches: usize,
    pub building_batches: usize,
    pub object_batches: usize,
    pub unique_buildings: usize,
    pub unique_objects: usize,
}

impl AssemblyStats {
    pub fn total_batches(&self) -> usize {
        self.terrain_batches + self.liquid_batches + self.building_batches + self.object_batches
    }
}

/// Per-build assembler. Building and object IDs are emitted at most once
/// for the lifetime of one assembler.
pub struct GeometryAssembler<'a> {
    source: &'a dyn WorldSource,
    visited_buildings: HashSet<u32>,
    visited_objects: HashSet<u32>,
    batches: Vec<GeometryBatch>,
    stats: AssemblyStats,
}

impl<'a> GeometryAssembler<'a> {
    pub fn new(source: &'a dyn WorldSource) -> Self {
        Self {
            source,
            visited_buildings: HashSet::new(),
            visited_objects: HashSet::new(),
            batches: Vec::new(),
            stats: AssemblyStats::default(),
        }
    }

    /// Batches for every present tile of `neighborhood`
    pub fn assemble(self, neighborhood: &Neighborhood<'_>) -> Result<(Vec<GeometryBatch>, AssemblyStats), BuildError> {
        let center = neighborhood.center_coord();
        let (batches, stats) = self.assemble_tiles(neighborhood.tiles().map(|handle| &**handle))?;
        debug!(
            "{} assembled {} batches: terrain {}, liquid {}, building {} ({} unique), object {} ({} unique)",
            center,
            batches.len(),
            stats.terrain_batches,
            stats.liquid_batches,
            stats.building_batches,
            stats.unique_buildings,
            stats.object_batches,
            stats.unique_objects
        );
        Ok((batches, stats))
    }

    /// Batches for `tiles` in order, chunks row-major within each tile
    pub fn assemble_tiles<'t>(
        mut self,
        tiles: impl IntoIterator<Item = &'t TerrainTile>,
    ) -> Result<(Vec<GeometryBatch>, AssemblyStats), BuildError> {
        for tile in tiles {
            self.add_tile(tile)?;
        }
        Ok((self.batches, self.stats))
    }

    fn add_tile(&mut self, tile: &TerrainTile) -> Result<(), BuildError> {
        let coord = tile.coord();
        for (cx, cy, chunk) in tile.chunks() {
            if self.push(
                || format!("{} chunk {},{} terrain", coord, cx, cy),
                &chunk.terrain,
                AreaFlags::TERRAIN,
                false,
            ) {
                self.stats.terrain_batches += 1;
            }
            if self.push(
                || format!("{} chunk {},{} liquid", coord, cx, cy),
                &chunk.liquid,
                AreaFlags::LIQUID,
                false,
            ) {
                self.stats.liquid_batches += 1;
            }

            for &id in &chunk.buildings {
                if !self.visited_buildings.insert(id) {
                    continue;
                }
                let building = self
                    .source
                    .resolve_building(id)
                    .ok_or(BuildError::MissingDependency(Dependency::Building(id)))?;
                self.stats.unique_buildings += 1;
                self.add_building(&building);
            }

            for &id in &chunk.objects {
                if !self.visited_objects.insert(id) {
                    continue;
                }
                let object = self
                    .source
                    .resolve_object(id)
                    .ok_or(BuildError::MissingDependency(Dependency::Object(id)))?;
                self.stats.unique_objects += 1;
                if self.push(|| format!("object #{}", id), &object.mesh, AreaFlags::OBJECT, true) {
                    self.stats.object_batches += 1;
                }
            }
        }
        Ok(())
    }

    fn add_building(&mut self, building: &BuildingGeometry) {
        let id = building.id;
        for (part, mesh, area, filter) in building_parts(building) {
            if self.push(|| format!("building #{} {}", id, part), mesh, area, filter) {
                self.stats.building_batches += 1;
            }
        }
    }

    /// Queue a batch unless the mesh is empty
    fn push(&mut self, name: impl FnOnce() -> String, mesh: &Arc<Mesh>, area: AreaFlags, filter: bool) -> bool {
        if mesh.is_empty() {
            return false;
        }
        self.batches
            .push(GeometryBatch::new(name(), mesh.clone(), area, filter));
        true
    }
}

/// Batches for a world made of one enclosing building
pub fn global_structure_batches(building: &BuildingGeometry) -> Vec<GeometryBatch> {
    building_parts(building)
        .into_iter()
        .filter(|(_, mesh, _, _)| !mesh.is_empty())
        .map(|(part, mesh, area, filter)| {
            GeometryBatch::new(format!("global #{} {}", building.id, part), mesh.clone(), area, filter)
        })
        .collect()
}

/// Structure and attached objects are slope-filtered, interior liquid is not
fn building_parts(building: &BuildingGeometry) -> [(&'static str, &Arc<Mesh>, AreaFlags, bool); 3] {
    [
        ("structure", &building.structure, AreaFlags::BUILDING, true),
        ("liquid", &building.liquid, AreaFlags::BUILDING_LIQUID, false),
        ("objects", &building.objects, AreaFlags::BUILDING_OBJECT, true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TileCoord;
    use crate::world::{MemoryWorld, ObjectGeometry};

    fn tri(z: f32) -> Arc<Mesh> {
        Arc::new(Mesh::new(
            vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]],
            vec![[0, 1, 2]],
        ))
    }

    fn world() -> MemoryWorld {
        let mut world = MemoryWorld::new("Test");
        world.insert_building(BuildingGeometry {
            id: 7,
            structure: tri(1.0),
            liquid: tri(2.0),
            objects: tri(3.0),
        });
        world.insert_building(BuildingGeometry {
            id: 8,
            structure: tri(1.0),
            ..Default::default()
        });
        world.insert_object(ObjectGeometry { id: 40, mesh: tri(0.5) });
        world
    }

    #[test]
    fn test_shared_building_emitted_once() {
        let world = world();

        let mut center = TerrainTile::new(TileCoord::new(10, 10));
        center.chunk_mut(15, 3).terrain = tri(0.0);
        center.chunk_mut(15, 3).buildings = vec![7];
        center.chunk_mut(15, 4).buildings = vec![7, 8];
        let mut east = TerrainTile::new(TileCoord::new(11, 10));
        east.chunk_mut(0, 3).buildings = vec![7];
        east.chunk_mut(0, 3).objects = vec![40, 40];

        let (batches, stats) = GeometryAssembler::new(&world)
            .assemble_tiles([&center, &east])
            .unwrap();

        let building_seven = batches.iter().filter(|b| b.name.starts_with("building #7")).count();
        assert_eq!(building_seven, 3);
        assert_eq!(stats.unique_buildings, 2);
        assert_eq!(stats.building_batches, 4);
        assert_eq!(stats.object_batches, 1);
        assert_eq!(stats.terrain_batches, 1);
        assert_eq!(stats.liquid_batches, 0);
        assert_eq!(stats.total_batches(), batches.len());
    }

    #[test]
    fn test_batch_tags_follow_origin() {
        let world = world();
        let mut tile = TerrainTile::new(TileCoord::new(2, 2));
        tile.chunk_mut(0, 0).terrain = tri(0.0);
        tile.chunk_mut(0, 0).liquid = tri(0.2);
        tile.chunk_mut(0, 0).buildings = vec![7];
        tile.chunk_mut(0, 0).objects = vec![40];

        let (batches, _) = GeometryAssembler::new(&world).assemble_tiles([&tile]).unwrap();
        let tags: Vec<(AreaFlags, bool)> = batches.iter().map(|b| (b.area, b.filter_walkable)).collect();
        assert_eq!(
            tags,
            vec![
                (AreaFlags::TERRAIN, false),
                (AreaFlags::LIQUID, false),
                (AreaFlags::BUILDING, true),
                (AreaFlags::BUILDING_LIQUID, false),
                (AreaFlags::BUILDING_OBJECT, true),
                (AreaFlags::OBJECT, true),
            ]
        );
    }

    #[test]
    fn test_unknown_building_is_missing_dependency() {
        let world = world();
        let mut tile = TerrainTile::new(TileCoord::new(2, 2));
        tile.chunk_mut(1, 1).buildings = vec![99];

        let err = GeometryAssembler::new(&world).assemble_tiles([&tile]).unwrap_err();
        assert!(matches!(err, BuildError::MissingDependency(Dependency::Building(99))));

        let mut tile = TerrainTile::new(TileCoord::new(2, 2));
        tile.chunk_mut(1, 1).objects = vec![41];
        let err = GeometryAssembler::new(&world).assemble_tiles([&tile]).unwrap_err();
        assert!(matches!(err, BuildError::MissingDependency(Dependency::Object(41))));
    }

    #[test]
    fn test_global_structure_batches_skip_empty_parts() {
        let building = BuildingGeometry {
            id: 3,
            structure: tri(0.0),
            liquid: Arc::new(Mesh::default()),
            objects: tri(1.0),
        };
        let batches = global_structure_batches(&building);
        let areas: Vec<AreaFlags> = batches.iter().map(|b| b.area).collect();
        assert_eq!(areas, vec![AreaFlags::BUILDING, AreaFlags::BUILDING_OBJECT]);
    }
}
