// filter.rs - Area filtering between rasterization and tile compilation
//
// Terrain area is authoritative: the generic engine filters may clear it,
// so every terrain tile build brackets each filter pass with a snapshot of
// the terrain-tagged spans and restores the tag afterwards.

use tracing::trace;

use crate::area::AreaFlags;
use crate::config::VoxelConfig;
use crate::engine::{GeometryEngine, SpanFilter};
use crate::heightfield::{HeightField, SpanId};

/// Clear spans hidden under liquid, column by column, lowest span first.
///
/// Free liquid clears every span collected below it. Building liquid only
/// clears collected building spans. The collection restarts after each
/// liquid span of either kind.
pub fn filter_ground_beneath_liquid(field: &mut HeightField) {
    let mut pending: Vec<SpanId> = Vec::new();
    for column in 0..field.column_count() {
        pending.clear();

        let mut cursor = field.column_spans_at(column).next();
        while let Some(id) = cursor {
            let span = field.span(id);
            let area = span.area;
            cursor = span.next;
            if area.is_free_liquid() {
                for covered in pending.drain(..) {
                    field.span_mut(covered).area.clear();
                }
            } else if area.is_building_liquid() {
                for covered in pending.drain(..) {
                    let span = field.span_mut(covered);
                    if span.area.is_building() {
                        span.area.clear();
                    }
                }
            } else {
                pending.push(id);
            }
        }
    }
}

/// Spans currently tagged terrain
pub fn snapshot_terrain_spans(field: &HeightField) -> Vec<SpanId> {
    field
        .all_spans()
        .filter(|&id| field.span(id).area.is_terrain())
        .collect()
}

/// Re-tag the snapshotted spans as terrain
pub fn restore_terrain_spans(field: &mut HeightField, snapshot: &[SpanId]) {
    for &id in snapshot {
        field.span_mut(id).area.insert(AreaFlags::TERRAIN);
    }
}

pub struct AreaFilterStage<'a, E: GeometryEngine + ?Sized> {
    engine: &'a E,
    config: &'a VoxelConfig,
}

impl<'a, E: GeometryEngine + ?Sized> AreaFilterStage<'a, E> {
    pub fn new(engine: &'a E, config: &'a VoxelConfig) -> Self {
        Self { engine, config }
    }

    /// Liquid occlusion, then each generic filter with terrain restoration
    pub fn apply_terrain_tile(&self, field: &mut HeightField) {
        filter_ground_beneath_liquid(field);

        for filter in SpanFilter::ORDER {
            let terrain = snapshot_terrain_spans(field);
            self.engine.apply_filter(filter, field, self.config);
            restore_terrain_spans(field, &terrain);
            trace!("Filtered {}, restored {} terrain spans", filter.name(), terrain.len());
        }
    }

    /// Liquid occlusion and the generic filters, without restoration
    pub fn apply_global_structure(&self, field: &mut HeightField) {
        filter_ground_beneath_liquid(field);

        for filter in SpanFilter::ORDER {
            self.engine.apply_filter(filter, field, self.config);
        }
    }
}
