// builder.rs - Tile build orchestration
//
// One build per terrain tile: acquire the 3x3 neighborhood, assemble the
// tagged batches, rasterize, filter, compile and write. Builds for
// different tiles share only the tile cache.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::assembler::{GeometryAssembler, global_structure_batches};
use crate::config::VoxelConfig;
use crate::engine::GeometryEngine;
use crate::error::{BuildError, Dependency};
use crate::filter::AreaFilterStage;
use crate::geometry::{Bounds, GeometryBatch, TileCoord, WORLD_GRID_SIZE};
use crate::heightfield::{HeightField, HeightFieldSpec};
use crate::output::{self, TileWriter};
use crate::tile_cache::WorldTileCache;
use crate::world::WorldSource;

/// Tile coordinate handed to the engine for a global structure build
const GLOBAL_STRUCTURE_COORD: TileCoord = TileCoord::new(0, 0);

/// What a build produces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildTarget {
    Global,
    Tile(TileCoord),
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildTarget::Global => f.write_str("global structure"),
            BuildTarget::Tile(coord) => write!(f, "tile {}", coord),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileOutcome {
    Built { path: PathBuf, bytes: usize },
    /// Output already present and current
    Skipped,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOptions {
    /// Rebuild tiles whose output is already current
    pub force: bool,
    /// Write the assembled geometry of each build as OBJ
    pub debug_obj: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub failures: Vec<(BuildTarget, BuildError)>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, target: BuildTarget, result: Result<TileOutcome, BuildError>) {
        match result {
            Ok(TileOutcome::Built { .. }) => self.succeeded += 1,
            Ok(TileOutcome::Skipped) => self.skipped += 1,
            Err(e) => self.failures.push((target, e)),
        }
    }

    fn log_summary(&mut self, world_name: &str) {
        self.failures.sort_by_key(|(target, _)| match target {
            BuildTarget::Global => (-1, -1),
            BuildTarget::Tile(c) => (c.y, c.x),
        });

        info!(
            "[{}] Done: {} built, {} skipped, {} failed, {} cancelled",
            world_name,
            self.succeeded,
            self.skipped,
            self.failed(),
            self.cancelled
        );
        for (target, e) in &self.failures {
            error!("[{}] {} failed ({}): {}", world_name, target, e.kind(), e);
        }
    }
}

pub struct TileBuilder<E: GeometryEngine> {
    cache: WorldTileCache,
    engine: E,
    config: VoxelConfig,
    writer: TileWriter,
    options: BuildOptions,
}

impl<E: GeometryEngine> TileBuilder<E> {
    pub fn new(
        source: Arc<dyn WorldSource>,
        engine: E,
        config: VoxelConfig,
        writer: TileWriter,
        options: BuildOptions,
    ) -> Self {
        Self {
            cache: WorldTileCache::new(source),
            engine,
            config,
            writer,
            options,
        }
    }

    pub fn cache(&self) -> &WorldTileCache {
        &self.cache
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn writer(&self) -> &TileWriter {
        &self.writer
    }

    pub fn world_name(&self) -> &str {
        self.cache.source().world_name()
    }

    /// Every tile of the world grid, row-major
    pub fn build_work_list(&self) -> Vec<TileCoord> {
        (0..WORLD_GRID_SIZE)
            .flat_map(|y| (0..WORLD_GRID_SIZE).map(move |x| TileCoord::new(x, y)))
            .filter(|&coord| self.cache.has_tile(coord))
            .collect()
    }

    /// A world with no terrain grid but an enclosing building
    pub fn is_global_structure(&self) -> bool {
        self.build_work_list().is_empty() && self.cache.source().load_global_structure().is_some()
    }

    pub fn build_global_structure(&self) -> Result<TileOutcome, BuildError> {
        let path = self.writer.global_path();
        if !self.options.force && output::is_current(&path) {
            info!("[{}] {} is up to date, skipping", self.world_name(), path.display());
            return Ok(TileOutcome::Skipped);
        }

        let building = self
            .cache
            .source()
            .load_global_structure()
            .ok_or(BuildError::MissingDependency(Dependency::GlobalStructure))?;
        let batches = global_structure_batches(&building);
        if batches.is_empty() {
            return Err(BuildError::MissingDependency(Dependency::GlobalStructure));
        }

        if self.options.debug_obj {
            output::write_obj(&self.writer.debug_obj_path(None), &batches)?;
        }

        let compiled = self.compile(&building.bounds(), &batches, GLOBAL_STRUCTURE_COORD, |stage, field| {
            stage.apply_global_structure(field)
        })?;
        let path = self.writer.write_global(&compiled)?;
        Ok(TileOutcome::Built {
            path,
            bytes: compiled.len(),
        })
    }

    pub fn build_tile(&self, coord: TileCoord) -> Result<TileOutcome, BuildError> {
        if !self.cache.has_tile(coord) {
            return Err(BuildError::MissingDependency(Dependency::CenterTile(coord)));
        }

        let path = self.writer.tile_path(coord);
        if !self.options.force && output::is_current(&path) {
            info!("[{}] {} is up to date, skipping", self.world_name(), path.display());
            return Ok(TileOutcome::Skipped);
        }

        // Released on every return path when dropped
        let neighborhood = self.cache.acquire_neighborhood(coord);
        let center = neighborhood
            .center()
            .ok_or(BuildError::MissingDependency(Dependency::CenterTile(coord)))?;
        let mut bounds = center.bounds();

        let (batches, _) = GeometryAssembler::new(self.cache.source().as_ref()).assemble(&neighborhood)?;
        for batch in &batches {
            bounds.extend_z(&batch.mesh.bounds());
        }

        if self.options.debug_obj {
            output::write_obj(&self.writer.debug_obj_path(Some(coord)), &batches)?;
        }

        let compiled = self.compile(&bounds, &batches, coord, |stage, field| {
            stage.apply_terrain_tile(field)
        })?;
        let path = self.writer.write_tile(coord, &compiled)?;
        Ok(TileOutcome::Built {
            path,
            bytes: compiled.len(),
        })
    }

    fn compile(
        &self,
        bounds: &Bounds,
        batches: &[GeometryBatch],
        coord: TileCoord,
        filter: impl FnOnce(&AreaFilterStage<'_, E>, &mut HeightField),
    ) -> Result<Vec<u8>, BuildError> {
        let config = &self.config;
        let (bmin, bmax) = bounds.to_engine();
        let spec = HeightFieldSpec::from_bounds(bmin, bmax, config.cs, config.ch, config.border_size);

        let mut field = self.engine.create_height_field(&spec)?;
        for batch in batches {
            self.engine
                .rasterize(&mut field, batch, batch.filter_walkable, config.walkable_slope_angle)?;
        }

        filter(&AreaFilterStage::new(&self.engine, config), &mut field);

        Ok(self.engine.build_compiled_tile(&field, coord, config)?)
    }

    /// Build the whole world: the global structure, or every grid tile
    pub fn run(&self, threads: usize, cancel: &AtomicBool) -> RunReport {
        if self.is_global_structure() {
            info!("[{}] Building global structure", self.world_name());
            let mut report = RunReport::default();
            if cancel.load(Ordering::Relaxed) {
                report.cancelled += 1;
            } else {
                report.record(BuildTarget::Global, self.build_global_structure());
            }
            report.log_summary(self.world_name());
            return report;
        }

        let tiles = self.build_work_list();
        self.run_tiles(&tiles, threads, cancel)
    }

    /// Build `tiles` on a pool of `threads` workers (0 picks the CPU count)
    pub fn run_tiles(&self, tiles: &[TileCoord], threads: usize, cancel: &AtomicBool) -> RunReport {
        let world = self.world_name();
        let total = tiles.len();
        let report = Mutex::new(RunReport::default());
        info!("[{}] We have {} tiles.", world, total);

        let build_one = |index: usize, coord: TileCoord| {
            if cancel.load(Ordering::Relaxed) {
                report.lock().cancelled += 1;
                return;
            }

            info!("[{}] Building tile {} ({:02} / {:02})", world, coord, index + 1, total);
            let result = self.build_tile(coord);
            match &result {
                Ok(TileOutcome::Built { path, bytes }) => {
                    info!("[{}] Tile {} written: {} ({} bytes)", world, coord, path.display(), bytes)
                }
                Ok(TileOutcome::Skipped) => {}
                Err(e) => error!("[{}] Tile {} failed: {}", world, coord, e),
            }
            report.lock().record(BuildTarget::Tile(coord), result);
        };

        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build();
        match pool {
            Ok(pool) => {
                pool.scope(|s| {
                    for (index, &coord) in tiles.iter().enumerate() {
                        let build_one = &build_one;
                        s.spawn(move |_| build_one(index, coord));
                    }
                });
            }
            Err(e) => {
                warn!("Failed to create thread pool: {}, using single-threaded", e);
                for (index, &coord) in tiles.iter().enumerate() {
                    build_one(index, coord);
                }
            }
        }

        let mut report = report.into_inner();
        report.log_summary(world);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaFlags;
    use crate::config::BuildConfig;
    use crate::engine::{CompiledTile, EngineError, SpanFilter, VoxelEngine};
    use crate::geometry::Mesh;
    use crate::world::{BuildingGeometry, MemoryWorld, ObjectGeometry, TerrainTile};
    use std::collections::{HashMap, HashSet};
    use std::path::Path;

    const CENTER: TileCoord = TileCoord::new(10, 10);

    /// Flat quad, counter-clockwise seen from above
    fn quad(min_x: f32, min_y: f32, max_x: f32, max_y: f32, z: f32) -> Arc<Mesh> {
        Arc::new(Mesh::new(
            vec![[min_x, min_y, z], [max_x, min_y, z], [max_x, max_y, z], [min_x, max_y, z]],
            vec![[0, 1, 2], [0, 2, 3]],
        ))
    }

    fn flat_tile(coord: TileCoord) -> TerrainTile {
        let fp = coord.world_footprint();
        let mut tile = TerrainTile::new(coord);
        tile.chunk_mut(0, 0).terrain = quad(fp.min[0], fp.min[1], fp.max[0], fp.max[1], 0.0);
        tile
    }

    fn test_config() -> VoxelConfig {
        BuildConfig {
            tile_voxel_size: 32,
            ..Default::default()
        }
        .to_voxel_config()
    }

    /// 3x3 tiles around CENTER with a shared building, an object and a
    /// free liquid patch on the center tile
    fn neighborhood_world() -> MemoryWorld {
        let mut world = MemoryWorld::new("Azeroth");
        for y in 9..=11 {
            for x in 9..=11 {
                let mut tile = flat_tile(TileCoord::new(x, y));
                if (x, y) == (10, 10) {
                    tile.chunk_mut(7, 7).buildings = vec![100];
                    tile.chunk_mut(8, 7).buildings = vec![100];
                    tile.chunk_mut(3, 3).objects = vec![200];
                    tile.chunk_mut(5, 5).liquid = quad(11550.0, 11550.0, 11650.0, 11650.0, 0.8);
                }
                if (x, y) == (11, 10) {
                    tile.chunk_mut(0, 7).buildings = vec![100];
                }
                world.insert_tile(tile);
            }
        }
        world.insert_building(BuildingGeometry {
            id: 100,
            structure: quad(11300.0, 11300.0, 11500.0, 11500.0, 10.0),
            ..Default::default()
        });
        world.insert_object(ObjectGeometry {
            id: 200,
            mesh: quad(11600.0, 11250.0, 11650.0, 11300.0, 5.0),
        });
        world
    }

    fn builder<E: GeometryEngine>(world: Arc<MemoryWorld>, engine: E, dir: &Path, options: BuildOptions) -> TileBuilder<E> {
        TileBuilder::new(
            world.clone(),
            engine,
            test_config(),
            TileWriter::new(dir, world.world_name()),
            options,
        )
    }

    /// Counts rasterizations per (height-field origin, batch name)
    struct CountingEngine {
        inner: VoxelEngine,
        rasterized: Mutex<HashMap<(u32, u32, String), usize>>,
    }

    impl CountingEngine {
        fn new() -> Self {
            Self {
                inner: VoxelEngine::new(&test_config()),
                rasterized: Mutex::new(HashMap::new()),
            }
        }
    }

    impl GeometryEngine for CountingEngine {
        fn create_height_field(&self, spec: &HeightFieldSpec) -> Result<HeightField, EngineError> {
            self.inner.create_height_field(spec)
        }

        fn rasterize(
            &self,
            field: &mut HeightField,
            batch: &GeometryBatch,
            filter_slope: bool,
            slope_degrees: f32,
        ) -> Result<(), EngineError> {
            let key = (field.bmin[0].to_bits(), field.bmin[2].to_bits(), batch.name.clone());
            *self.rasterized.lock().entry(key).or_insert(0) += 1;
            self.inner.rasterize(field, batch, filter_slope, slope_degrees)
        }

        fn apply_filter(&self, filter: SpanFilter, field: &mut HeightField, config: &VoxelConfig) {
            self.inner.apply_filter(filter, field, config)
        }

        fn build_compiled_tile(
            &self,
            field: &HeightField,
            coord: TileCoord,
            config: &VoxelConfig,
        ) -> Result<Vec<u8>, EngineError> {
            self.inner.build_compiled_tile(field, coord, config)
        }
    }

    fn assert_no_references(builder: &TileBuilder<impl GeometryEngine>) {
        for y in 0..WORLD_GRID_SIZE {
            for x in 0..WORLD_GRID_SIZE {
                assert_eq!(builder.cache().ref_count(TileCoord::new(x, y)), 0);
            }
        }
        assert_eq!(builder.cache().resident_tiles(), 0);
    }

    #[test]
    fn test_work_list_is_row_major() {
        let mut world = MemoryWorld::new("Test");
        for (x, y) in [(5, 2), (1, 0), (3, 2), (63, 63), (0, 1)] {
            world.insert_tile(TerrainTile::new(TileCoord::new(x, y)));
        }
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(Arc::new(world), VoxelEngine::default(), dir.path(), BuildOptions::default());

        assert_eq!(
            builder.build_work_list(),
            vec![
                TileCoord::new(1, 0),
                TileCoord::new(0, 1),
                TileCoord::new(3, 2),
                TileCoord::new(5, 2),
                TileCoord::new(63, 63),
            ]
        );
        assert!(!builder.is_global_structure());
    }

    #[test]
    fn test_missing_center_tile() {
        let dir = tempfile::tempdir().unwrap();
        let world = Arc::new(neighborhood_world());
        let builder = builder(world.clone(), VoxelEngine::default(), dir.path(), BuildOptions::default());

        for coord in [TileCoord::new(12, 10), TileCoord::new(40, 40), TileCoord::new(-1, 3)] {
            let err = builder.build_tile(coord).unwrap_err();
            assert!(matches!(err, BuildError::MissingDependency(Dependency::CenterTile(c)) if c == coord));
        }
        assert_no_references(&builder);
        assert_eq!(world.load_count(TileCoord::new(11, 10)), 0);
    }

    #[test]
    fn test_end_to_end_neighborhood() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(
            Arc::new(neighborhood_world()),
            CountingEngine::new(),
            dir.path(),
            BuildOptions::default(),
        );

        let report = builder.run(4, &AtomicBool::new(false));
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.succeeded, 9);
        for coord in builder.build_work_list() {
            assert!(output::is_current(&builder.writer().tile_path(coord)));
        }
        assert_no_references(&builder);

        let counts = builder.engine().rasterized.lock();
        assert!(counts.values().all(|&n| n == 1));
        let building_builds = counts
            .keys()
            .filter(|(_, _, name)| name == "building #100 structure")
            .count();
        assert_eq!(building_builds, 9);
        drop(counts);

        let payload = output::read_tile_payload(&builder.writer().tile_path(CENTER)).unwrap();
        let tile = CompiledTile::decode(&payload).unwrap();
        assert_eq!(tile.coord, CENTER);
        assert!(tile.spans.iter().any(|s| s.area == AreaFlags::BUILDING));

        let liquid_columns: HashSet<(u16, u16)> = tile
            .spans
            .iter()
            .filter(|s| s.area.is_liquid())
            .map(|s| (s.x, s.z))
            .collect();
        assert!(!liquid_columns.is_empty());
        for span in &tile.spans {
            if liquid_columns.contains(&(span.x, span.z)) {
                assert!(!span.area.is_terrain(), "terrain under liquid at {},{}", span.x, span.z);
            }
        }
    }

    #[test]
    fn test_failed_tile_does_not_stop_others() {
        let mut world = MemoryWorld::new("Test");
        let mut broken = flat_tile(TileCoord::new(5, 5));
        broken.chunk_mut(2, 2).buildings = vec![999];
        world.insert_tile(broken);
        world.insert_tile(flat_tile(TileCoord::new(20, 20)));
        world.insert_tile(TerrainTile::new(TileCoord::new(40, 40)));

        let dir = tempfile::tempdir().unwrap();
        let builder = builder(Arc::new(world), VoxelEngine::new(&test_config()), dir.path(), BuildOptions::default());
        let report = builder.run(2, &AtomicBool::new(false));

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed(), 2);
        let kinds: Vec<(BuildTarget, &str)> = report.failures.iter().map(|(t, e)| (*t, e.kind())).collect();
        assert_eq!(
            kinds,
            vec![
                (BuildTarget::Tile(TileCoord::new(5, 5)), "MissingDependency"),
                (BuildTarget::Tile(TileCoord::new(40, 40)), "GeometryEngineFailure"),
            ]
        );
        assert!(!builder.writer().tile_path(TileCoord::new(5, 5)).exists());
        assert!(!builder.writer().tile_path(TileCoord::new(40, 40)).exists());
        assert_no_references(&builder);
    }

    #[test]
    fn test_skip_current_tiles_unless_forced() {
        let mut world = MemoryWorld::new("Test");
        world.insert_tile(flat_tile(TileCoord::new(30, 30)));
        let world = Arc::new(world);
        let dir = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(false);

        let first = builder(world.clone(), VoxelEngine::default(), dir.path(), BuildOptions::default());
        assert_eq!(first.run(1, &cancel).succeeded, 1);
        let again = first.run(1, &cancel);
        assert_eq!((again.succeeded, again.skipped), (0, 1));

        let forced = builder(
            world,
            VoxelEngine::default(),
            dir.path(),
            BuildOptions {
                force: true,
                ..Default::default()
            },
        );
        assert_eq!(forced.run(1, &cancel).succeeded, 1);
    }

    #[test]
    fn test_cancelled_run_builds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(
            Arc::new(neighborhood_world()),
            VoxelEngine::default(),
            dir.path(),
            BuildOptions::default(),
        );
        let report = builder.run(2, &AtomicBool::new(true));
        assert_eq!(report.cancelled, 9);
        assert_eq!(report.succeeded, 0);
        assert!(!builder.writer().tile_path(CENTER).exists());
    }

    #[test]
    fn test_global_structure() {
        let mut world = MemoryWorld::new("Deadmines");
        world.set_global_structure(BuildingGeometry {
            id: 1,
            structure: quad(-100.0, -100.0, 100.0, 100.0, 0.0),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(
            Arc::new(world),
            VoxelEngine::default(),
            dir.path(),
            BuildOptions {
                debug_obj: true,
                ..Default::default()
            },
        );

        assert!(builder.is_global_structure());
        let report = builder.run(2, &AtomicBool::new(false));
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.succeeded, 1);

        let path = builder.writer().global_path();
        let tile = CompiledTile::decode(&output::read_tile_payload(&path).unwrap()).unwrap();
        assert!(tile.region_count >= 1);
        assert!(tile.spans.iter().all(|s| s.area == AreaFlags::BUILDING));
        assert!(builder.writer().debug_obj_path(None).exists());
    }

    #[test]
    fn test_global_structure_liquid_clears_floor_beneath() {
        let mut world = MemoryWorld::new("Deadmines");
        world.set_global_structure(BuildingGeometry {
            id: 1,
            structure: quad(-100.0, -100.0, 100.0, 100.0, 0.0),
            liquid: quad(-100.0, -100.0, 100.0, 100.0, 3.0),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(Arc::new(world), VoxelEngine::default(), dir.path(), BuildOptions::default());

        builder.build_global_structure().unwrap();
        let path = builder.writer().global_path();
        let tile = CompiledTile::decode(&output::read_tile_payload(&path).unwrap()).unwrap();
        assert!(!tile.spans.is_empty());
        assert!(tile.spans.iter().all(|s| s.area == AreaFlags::BUILDING_LIQUID));
    }

    #[test]
    fn test_building_above_height_limit_does_not_fail_tile() {
        let mut world = MemoryWorld::new("Test");
        let mut tile = flat_tile(CENTER);
        tile.chunk_mut(1, 1).buildings = vec![300];
        world.insert_tile(tile);
        world.insert_building(BuildingGeometry {
            id: 300,
            structure: quad(11300.0, 11300.0, 11500.0, 11500.0, 27000.0),
            ..Default::default()
        });

        let dir = tempfile::tempdir().unwrap();
        let builder = builder(Arc::new(world), VoxelEngine::new(&test_config()), dir.path(), BuildOptions::default());
        assert!(matches!(builder.build_tile(CENTER), Ok(TileOutcome::Built { .. })));
        assert_no_references(&builder);
    }

    #[test]
    fn test_missing_global_structure() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(
            Arc::new(MemoryWorld::new("Empty")),
            VoxelEngine::default(),
            dir.path(),
            BuildOptions::default(),
        );
        assert!(!builder.is_global_structure());
        assert!(matches!(
            builder.build_global_structure(),
            Err(BuildError::MissingDependency(Dependency::GlobalStructure))
        ));
        let report = builder.run(1, &AtomicBool::new(false));
        assert_eq!((report.succeeded, report.failed()), (0, 0));
    }

    #[test]
    fn test_debug_obj_per_tile() {
        let mut world = MemoryWorld::new("Test");
        world.insert_tile(flat_tile(TileCoord::new(8, 8)));
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(
            Arc::new(world),
            VoxelEngine::default(),
            dir.path(),
            BuildOptions {
                debug_obj: true,
                ..Default::default()
            },
        );
        builder.build_tile(TileCoord::new(8, 8)).unwrap();
        assert!(builder.writer().debug_obj_path(Some(TileCoord::new(8, 8))).exists());
    }
}
