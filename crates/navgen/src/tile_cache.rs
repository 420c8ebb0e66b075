// tile_cache.rs - Reference-counted terrain tile residency
//
// One mutex guards the reference grid and the slot map. A slot's
// `OnceCell` serializes the first load of a coordinate without holding
// the grid lock, and the slot is dropped under the lock when its count
// returns to zero.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::geometry::{TileCoord, WORLD_GRID_SIZE};
use crate::world::{TerrainTile, WorldSource};

type TileSlot = Arc<OnceCell<Option<Arc<TerrainTile>>>>;

const GRID_CELLS: usize = (WORLD_GRID_SIZE * WORLD_GRID_SIZE) as usize;

struct CacheState {
    refs: Vec<i32>,
    slots: HashMap<TileCoord, TileSlot>,
    unloads: usize,
}

pub struct WorldTileCache {
    source: Arc<dyn WorldSource>,
    exists: Vec<bool>,
    state: Mutex<CacheState>,
}

impl WorldTileCache {
    pub fn new(source: Arc<dyn WorldSource>) -> Self {
        let mut exists = vec![false; GRID_CELLS];
        for y in 0..WORLD_GRID_SIZE {
            for x in 0..WORLD_GRID_SIZE {
                exists[(y * WORLD_GRID_SIZE + x) as usize] = source.tile_exists(TileCoord::new(x, y));
            }
        }

        Self {
            source,
            exists,
            state: Mutex::new(CacheState {
                refs: vec![0; GRID_CELLS],
                slots: HashMap::new(),
                unloads: 0,
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn WorldSource> {
        &self.source
    }

    /// Whether the world grid has a tile at `coord`. Does not touch counts.
    pub fn has_tile(&self, coord: TileCoord) -> bool {
        coord.grid_index().is_some_and(|i| self.exists[i])
    }

    /// Reference the tile at `coord`, loading it on first use.
    /// Returns `None` without touching counts when there is no such tile.
    pub fn acquire(&self, coord: TileCoord) -> Option<TileHandle<'_>> {
        if !self.has_tile(coord) {
            return None;
        }
        let index = coord.grid_index()?;

        let slot = {
            let mut state = self.state.lock();
            state.refs[index] += 1;
            state.slots.entry(coord).or_default().clone()
        };

        let loaded = slot.get_or_init(|| match self.source.load_terrain_tile(coord) {
            Ok(tile) => {
                debug!("Loaded terrain tile {}", coord);
                Some(Arc::new(tile))
            }
            Err(e) => {
                warn!("Failed to load terrain tile {}: {:#}", coord, e);
                None
            }
        });

        match loaded {
            Some(tile) => Some(TileHandle {
                cache: self,
                coord,
                tile: Some(tile.clone()),
            }),
            None => {
                self.release(coord);
                None
            }
        }
    }

    /// Drop one reference to `coord`; the last one unloads the tile.
    /// `TileHandle` does this on drop, so only call it for references
    /// that were taken without a handle.
    pub fn release(&self, coord: TileCoord) {
        let Some(index) = coord.grid_index() else {
            return;
        };

        let mut state = self.state.lock();
        if state.refs[index] <= 0 {
            warn!("Release of unreferenced terrain tile {}", coord);
            return;
        }

        state.refs[index] -= 1;
        if state.refs[index] == 0 {
            if let Some(slot) = state.slots.remove(&coord) {
                if matches!(slot.get(), Some(Some(_))) {
                    state.unloads += 1;
                    debug!("Unloaded terrain tile {}", coord);
                }
            }
        }
    }

    /// Acquire the 3x3 block around `center`. Absent neighbors are `None`.
    pub fn acquire_neighborhood(&self, center: TileCoord) -> Neighborhood<'_> {
        Neighborhood {
            center,
            tiles: center.neighborhood().map(|coord| self.acquire(coord)),
        }
    }

    pub fn ref_count(&self, coord: TileCoord) -> i32 {
        coord
            .grid_index()
            .map_or(0, |i| self.state.lock().refs[i])
    }

    /// Tiles currently loaded
    pub fn resident_tiles(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot.get(), Some(Some(_))))
            .count()
    }

    pub fn unload_count(&self) -> usize {
        self.state.lock().unloads
    }
}

/// A counted reference to a resident terrain tile
pub struct TileHandle<'a> {
    cache: &'a WorldTileCache,
    coord: TileCoord,
    /// Emptied on drop before the reference is released, so the slot
    /// holds the last reference when it is removed under the lock.
    tile: Option<Arc<TerrainTile>>,
}

impl TileHandle<'_> {
    pub fn coord(&self) -> TileCoord {
        self.coord
    }
}

impl Deref for TileHandle<'_> {
    type Target = TerrainTile;

    fn deref(&self) -> &TerrainTile {
        match &self.tile {
            Some(tile) => tile,
            None => unreachable!("terrain tile handle used after release"),
        }
    }
}

impl Drop for TileHandle<'_> {
    fn drop(&mut self) {
        self.tile = None;
        self.cache.release(self.coord);
    }
}

/// The 3x3 tiles a build depends on, released together on drop
pub struct Neighborhood<'a> {
    center: TileCoord,
    tiles: [Option<TileHandle<'a>>; 9],
}

impl<'a> Neighborhood<'a> {
    pub fn center_coord(&self) -> TileCoord {
        self.center
    }

    pub fn center(&self) -> Option<&TileHandle<'a>> {
        self.tiles[4].as_ref()
    }

    /// Present tiles in neighborhood order
    pub fn tiles(&self) -> impl Iterator<Item = &TileHandle<'a>> {
        self.tiles.iter().flatten()
    }

    pub fn present_count(&self) -> usize {
        self.tiles().count()
    }
}
