// engine/voxel.rs - Span-based reference engine
//
// Rasterizes triangles with the same clipping scheme Recast uses, runs the
// generic span filters, and compiles the surviving walkable spans into a
// region-labelled span tile.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::{EngineError, GeometryEngine, SpanFilter};
use crate::area::AreaFlags;
use crate::config::VoxelConfig;
use crate::geometry::{GeometryBatch, TileCoord, world_to_engine};
use crate::heightfield::{HeightField, HeightFieldSpec, MAX_SPAN_HEIGHT, SpanId};

const COMPILED_TILE_MAGIC: u32 = u32::from_le_bytes(*b"VXTL");
const COMPILED_TILE_VERSION: u32 = 1;

/// Largest height-field the engine will allocate, in columns
const MAX_COLUMNS: i64 = 1 << 24;

const MAX_HEIGHT: i32 = MAX_SPAN_HEIGHT as i32;

const DIRECTIONS: [(i32, i32); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

/// Region id of cells that were visited but belong to a dropped region
const DROPPED_REGION: u32 = u32::MAX;

pub struct VoxelEngine {
    merge_threshold: i32,
}

impl VoxelEngine {
    pub fn new(config: &VoxelConfig) -> Self {
        Self {
            merge_threshold: config.walkable_climb,
        }
    }
}

impl Default for VoxelEngine {
    fn default() -> Self {
        Self { merge_threshold: 1 }
    }
}

impl GeometryEngine for VoxelEngine {
    fn create_height_field(&self, spec: &HeightFieldSpec) -> Result<HeightField, EngineError> {
        if spec.width <= 0 || spec.height <= 0 {
            return Err(EngineError::HeightField(format!(
                "empty grid {}x{}",
                spec.width, spec.height
            )));
        }
        if spec.width as i64 * spec.height as i64 > MAX_COLUMNS {
            return Err(EngineError::HeightField(format!(
                "grid {}x{} is too large",
                spec.width, spec.height
            )));
        }
        if !(spec.cs > 0.0 && spec.ch > 0.0) {
            return Err(EngineError::HeightField(format!(
                "invalid cell size {} / height {}",
                spec.cs, spec.ch
            )));
        }
        if spec.bmin.iter().chain(spec.bmax.iter()).any(|v| !v.is_finite()) {
            return Err(EngineError::HeightField("bounds are not finite".to_string()));
        }
        Ok(HeightField::new(spec))
    }

    fn rasterize(
        &self,
        field: &mut HeightField,
        batch: &GeometryBatch,
        filter_slope: bool,
        slope_degrees: f32,
    ) -> Result<(), EngineError> {
        let mesh = &batch.mesh;
        let vertices: Vec<[f32; 3]> = mesh.vertices.iter().map(|v| world_to_engine(*v)).collect();
        let walkable_threshold = slope_degrees.to_radians().cos();

        for (i, triangle) in mesh.indices.iter().enumerate() {
            let mut corners = [[0.0f32; 3]; 3];
            for (corner, &index) in corners.iter_mut().zip(triangle.iter()) {
                *corner = *vertices.get(index as usize).ok_or_else(|| EngineError::Rasterize {
                    batch: batch.name.clone(),
                    reason: format!(
                        "triangle {} references vertex {} of {}",
                        i,
                        index,
                        vertices.len()
                    ),
                })?;
            }

            let area = if filter_slope && !is_walkable_slope(&corners, walkable_threshold) {
                AreaFlags::NONE
            } else {
                batch.area
            };
            rasterize_triangle(field, &corners, area, self.merge_threshold);
        }

        Ok(())
    }

    fn apply_filter(&self, filter: SpanFilter, field: &mut HeightField, config: &VoxelConfig) {
        match filter {
            SpanFilter::LowHangingObstacles => {
                filter_low_hanging_obstacles(field, config.walkable_climb)
            }
            SpanFilter::Ledges => {
                filter_ledge_spans(field, config.walkable_height, config.walkable_climb)
            }
            SpanFilter::LowClearance => filter_low_clearance(field, config.walkable_height),
        }
    }

    fn build_compiled_tile(
        &self,
        field: &HeightField,
        coord: TileCoord,
        config: &VoxelConfig,
    ) -> Result<Vec<u8>, EngineError> {
        let tile = compile_tile(field, coord, config);
        debug!(
            "{} compiled {} spans in {} regions",
            coord,
            tile.spans.len(),
            tile.region_count
        );
        if tile.spans.is_empty() {
            return Err(EngineError::NoRegions(coord));
        }
        Ok(tile.encode()?)
    }
}

// ============================================================================
// Rasterization
// ============================================================================

fn is_walkable_slope(corners: &[[f32; 3]; 3], walkable_threshold: f32) -> bool {
    let e0 = sub(corners[1], corners[0]);
    let e1 = sub(corners[2], corners[0]);
    let normal = [
        e0[1] * e1[2] - e0[2] * e1[1],
        e0[2] * e1[0] - e0[0] * e1[2],
        e0[0] * e1[1] - e0[1] * e1[0],
    ];
    let len = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
    len > 0.0 && normal[1] / len > walkable_threshold
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Split `poly` at `offset` along `axis` into (at-or-below, at-or-above)
fn divide_poly(poly: &[[f32; 3]], offset: f32, axis: usize) -> (Vec<[f32; 3]>, Vec<[f32; 3]>) {
    let mut below = Vec::with_capacity(poly.len() + 2);
    let mut above = Vec::with_capacity(poly.len() + 2);
    let dist: Vec<f32> = poly.iter().map(|p| offset - p[axis]).collect();

    let mut j = poly.len().wrapping_sub(1);
    for i in 0..poly.len() {
        let in_a = dist[j] >= 0.0;
        let in_b = dist[i] >= 0.0;
        if in_a != in_b {
            let s = dist[j] / (dist[j] - dist[i]);
            let p = [
                poly[j][0] + (poly[i][0] - poly[j][0]) * s,
                poly[j][1] + (poly[i][1] - poly[j][1]) * s,
                poly[j][2] + (poly[i][2] - poly[j][2]) * s,
            ];
            below.push(p);
            above.push(p);
            if dist[i] > 0.0 {
                below.push(poly[i]);
            } else if dist[i] < 0.0 {
                above.push(poly[i]);
            }
        } else {
            if dist[i] >= 0.0 {
                below.push(poly[i]);
                if dist[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(poly[i]);
        }
        j = i;
    }

    (below, above)
}

fn rasterize_triangle(field: &mut HeightField, corners: &[[f32; 3]; 3], area: AreaFlags, merge_threshold: i32) {
    let bmin = field.bmin;
    let bmax = field.bmax;
    let ics = 1.0 / field.cs;
    let ich = 1.0 / field.ch;
    let by = bmax[1] - bmin[1];

    let mut tmin = corners[0];
    let mut tmax = corners[0];
    for c in &corners[1..] {
        for k in 0..3 {
            tmin[k] = tmin[k].min(c[k]);
            tmax[k] = tmax[k].max(c[k]);
        }
    }
    if (0..3).any(|k| tmin[k] > bmax[k] || tmax[k] < bmin[k]) {
        return;
    }

    let z0 = (((tmin[2] - bmin[2]) * ics) as i32).clamp(0, field.height - 1);
    let z1 = (((tmax[2] - bmin[2]) * ics) as i32).clamp(0, field.height - 1);

    let mut rest: Vec<[f32; 3]> = corners.to_vec();
    for z in z0..=z1 {
        let cz = bmin[2] + z as f32 * field.cs;
        let (row, remaining) = divide_poly(&rest, cz + field.cs, 2);
        rest = remaining;
        if row.len() < 3 {
            continue;
        }

        let min_x = row.iter().map(|p| p[0]).fold(f32::MAX, f32::min);
        let max_x = row.iter().map(|p| p[0]).fold(f32::MIN, f32::max);
        let x0 = (((min_x - bmin[0]) * ics) as i32).clamp(0, field.width - 1);
        let x1 = (((max_x - bmin[0]) * ics) as i32).clamp(0, field.width - 1);

        let mut row_rest = row;
        for x in x0..=x1 {
            let cx = bmin[0] + x as f32 * field.cs;
            let (cell, remaining) = divide_poly(&row_rest, cx + field.cs, 0);
            row_rest = remaining;
            if cell.len() < 3 {
                continue;
            }

            let mut smin = cell.iter().map(|p| p[1]).fold(f32::MAX, f32::min) - bmin[1];
            let mut smax = cell.iter().map(|p| p[1]).fold(f32::MIN, f32::max) - bmin[1];
            if smax < 0.0 || smin > by {
                continue;
            }
            smin = smin.max(0.0);
            smax = smax.min(by);

            let ismin = ((smin * ich).floor() as i32).clamp(0, MAX_HEIGHT - 1);
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, MAX_HEIGHT);
            field.add_span(x, z, ismin as u16, ismax as u16, area, merge_threshold);
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

fn ceiling_of(field: &HeightField, id: SpanId) -> i32 {
    field
        .span(id)
        .next
        .map_or(MAX_HEIGHT, |next| field.span(next).smin as i32)
}

fn filter_low_hanging_obstacles(field: &mut HeightField, walkable_climb: i32) {
    for column in 0..field.column_count() {
        let mut previous_walkable = false;
        let mut previous_area = AreaFlags::NONE;
        let mut previous_smax = 0i32;

        let mut cursor = field.column_spans_at(column).next();
        while let Some(id) = cursor {
            let span = field.span_mut(id);
            cursor = span.next;
            let walkable = span.area.is_walkable();
            if !walkable
                && previous_walkable
                && (span.smax as i32 - previous_smax).abs() <= walkable_climb
            {
                span.area = previous_area;
            }
            previous_walkable = walkable;
            previous_area = span.area;
            previous_smax = span.smax as i32;
        }
    }
}

fn filter_ledge_spans(field: &mut HeightField, walkable_height: i32, walkable_climb: i32) {
    let mut ledges = Vec::new();
    for z in 0..field.height {
        for x in 0..field.width {
            for id in field.column_spans(x, z) {
                if !field.span(id).area.is_walkable() {
                    continue;
                }
                let floor = field.span(id).smax as i32;
                let ceiling = ceiling_of(field, id);
                if is_ledge(field, x, z, floor, ceiling, walkable_height, walkable_climb) {
                    ledges.push(id);
                }
            }
        }
    }

    for id in ledges {
        field.span_mut(id).area.clear();
    }
}

fn is_ledge(
    field: &HeightField,
    x: i32,
    z: i32,
    floor: i32,
    ceiling: i32,
    walkable_height: i32,
    walkable_climb: i32,
) -> bool {
    let mut lowest_floor_difference = MAX_HEIGHT;
    let mut lowest_traversable = floor;
    let mut highest_traversable = floor;

    for (dx, dz) in DIRECTIONS {
        let nx = x + dx;
        let nz = z + dz;
        if nx < 0 || nz < 0 || nx >= field.width || nz >= field.height {
            return true;
        }

        let neighbor_ceiling = field
            .first_span(nx, nz)
            .map_or(MAX_HEIGHT, |first| field.span(first).smin as i32);
        // Drop into the empty space below the neighbor's lowest span
        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
            return true;
        }

        for neighbor in field.column_spans(nx, nz) {
            let neighbor_floor = field.span(neighbor).smax as i32;
            let neighbor_ceiling = ceiling_of(field, neighbor);
            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor) < walkable_height {
                continue;
            }

            let difference = neighbor_floor - floor;
            lowest_floor_difference = lowest_floor_difference.min(difference);
            if difference.abs() <= walkable_climb {
                lowest_traversable = lowest_traversable.min(neighbor_floor);
                highest_traversable = highest_traversable.max(neighbor_floor);
            } else if difference < -walkable_climb {
                break;
            }
        }
    }

    lowest_floor_difference < -walkable_climb
        || highest_traversable - lowest_traversable > walkable_climb
}

fn filter_low_clearance(field: &mut HeightField, walkable_height: i32) {
    let cramped: Vec<SpanId> = field
        .all_spans()
        .filter(|&id| ceiling_of(field, id) - (field.span(id).smax as i32) < walkable_height)
        .collect();
    for id in cramped {
        field.span_mut(id).area.clear();
    }
}

// ============================================================================
// Compiled tile
// ============================================================================

/// One walkable surface cell of a compiled tile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompiledSpan {
    pub x: u16,
    pub z: u16,
    pub floor: u16,
    pub clearance: u16,
    pub area: AreaFlags,
    pub region: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledTile {
    pub coord: TileCoord,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub agent_height: f32,
    pub agent_radius: f32,
    pub agent_climb: f32,
    pub region_count: u32,
    pub spans: Vec<CompiledSpan>,
}

impl CompiledTile {
    pub fn column(&self, x: u16, z: u16) -> impl Iterator<Item = &CompiledSpan> {
        self.spans.iter().filter(move |s| s.x == x && s.z == z)
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(96 + self.spans.len() * 15);
        out.write_u32::<LittleEndian>(COMPILED_TILE_MAGIC)?;
        out.write_u32::<LittleEndian>(COMPILED_TILE_VERSION)?;
        out.write_i32::<LittleEndian>(self.coord.x)?;
        out.write_i32::<LittleEndian>(self.coord.y)?;
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            out.write_f32::<LittleEndian>(*v)?;
        }
        out.write_f32::<LittleEndian>(self.cs)?;
        out.write_f32::<LittleEndian>(self.ch)?;
        out.write_i32::<LittleEndian>(self.width)?;
        out.write_i32::<LittleEndian>(self.height)?;
        out.write_i32::<LittleEndian>(self.border_size)?;
        out.write_f32::<LittleEndian>(self.agent_height)?;
        out.write_f32::<LittleEndian>(self.agent_radius)?;
        out.write_f32::<LittleEndian>(self.agent_climb)?;
        out.write_u32::<LittleEndian>(self.region_count)?;
        out.write_u32::<LittleEndian>(self.spans.len() as u32)?;
        for span in &self.spans {
            out.write_u16::<LittleEndian>(span.x)?;
            out.write_u16::<LittleEndian>(span.z)?;
            out.write_u16::<LittleEndian>(span.floor)?;
            out.write_u16::<LittleEndian>(span.clearance)?;
            out.write_u8(span.area.bits())?;
            out.write_u32::<LittleEndian>(span.region)?;
        }
        out.flush()?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> io::Result<CompiledTile> {
        let mut r = Cursor::new(bytes);
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != COMPILED_TILE_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a compiled tile"));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != COMPILED_TILE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported compiled tile version {}", version),
            ));
        }

        let coord = TileCoord::new(r.read_i32::<LittleEndian>()?, r.read_i32::<LittleEndian>()?);
        let mut bounds = [0.0f32; 6];
        r.read_f32_into::<LittleEndian>(&mut bounds)?;
        let cs = r.read_f32::<LittleEndian>()?;
        let ch = r.read_f32::<LittleEndian>()?;
        let width = r.read_i32::<LittleEndian>()?;
        let height = r.read_i32::<LittleEndian>()?;
        let border_size = r.read_i32::<LittleEndian>()?;
        let agent_height = r.read_f32::<LittleEndian>()?;
        let agent_radius = r.read_f32::<LittleEndian>()?;
        let agent_climb = r.read_f32::<LittleEndian>()?;
        let region_count = r.read_u32::<LittleEndian>()?;
        let span_count = r.read_u32::<LittleEndian>()? as usize;

        let mut spans = Vec::with_capacity(span_count.min(bytes.len() / 15));
        for _ in 0..span_count {
            spans.push(CompiledSpan {
                x: r.read_u16::<LittleEndian>()?,
                z: r.read_u16::<LittleEndian>()?,
                floor: r.read_u16::<LittleEndian>()?,
                clearance: r.read_u16::<LittleEndian>()?,
                area: AreaFlags::from_bits(r.read_u8()?),
                region: r.read_u32::<LittleEndian>()?,
            });
        }

        let mut trailing = [0u8; 1];
        if r.read(&mut trailing)? != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "trailing bytes after compiled tile"));
        }

        Ok(CompiledTile {
            coord,
            bmin: [bounds[0], bounds[1], bounds[2]],
            bmax: [bounds[3], bounds[4], bounds[5]],
            cs,
            ch,
            width,
            height,
            border_size,
            agent_height,
            agent_radius,
            agent_climb,
            region_count,
            spans,
        })
    }
}

/// Walkable span with enough head room, candidate for a region
struct Cell {
    x: i32,
    z: i32,
    floor: i32,
    ceiling: i32,
    area: AreaFlags,
}

fn compile_tile(field: &HeightField, coord: TileCoord, config: &VoxelConfig) -> CompiledTile {
    let border = config.border_size.max(0);
    let mut cells: Vec<Cell> = Vec::new();
    // Cells are pushed in column order, so column c owns
    // cells[column_start[c]..column_start[c + 1]].
    let mut column_start = vec![0u32; field.column_count() + 1];

    for z in border..field.height - border {
        for x in border..field.width - border {
            for id in field.column_spans(x, z) {
                let span = field.span(id);
                if !span.area.is_walkable() {
                    continue;
                }
                let floor = span.smax as i32;
                let ceiling = ceiling_of(field, id);
                if ceiling - floor < config.walkable_height {
                    continue;
                }
                column_start[(x + z * field.width) as usize + 1] += 1;
                cells.push(Cell {
                    x,
                    z,
                    floor,
                    ceiling,
                    area: span.area,
                });
            }
        }
    }

    for i in 1..column_start.len() {
        column_start[i] += column_start[i - 1];
    }

    let min_area = config.min_region_area.max(0) as usize;
    let mut regions = vec![0u32; cells.len()];
    let mut region_count = 0u32;
    let mut queue = VecDeque::new();

    for start in 0..cells.len() {
        if regions[start] != 0 {
            continue;
        }

        let mut members = vec![start];
        regions[start] = DROPPED_REGION;
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            let cell = &cells[current];
            for (dx, dz) in DIRECTIONS {
                let nx = cell.x + dx;
                let nz = cell.z + dz;
                if nx < border || nz < border || nx >= field.width - border || nz >= field.height - border {
                    continue;
                }
                let neighbor_column = (nx + nz * field.width) as usize;
                let first = column_start[neighbor_column] as usize;
                let last = column_start[neighbor_column + 1] as usize;
                for neighbor in first..last {
                    if regions[neighbor] != 0 {
                        continue;
                    }
                    let other = &cells[neighbor];
                    let connected = (other.floor - cell.floor).abs() <= config.walkable_climb
                        && cell.ceiling.min(other.ceiling) - cell.floor.max(other.floor)
                            >= config.walkable_height;
                    if connected {
                        regions[neighbor] = DROPPED_REGION;
                        members.push(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if members.len() >= min_area {
            region_count += 1;
            for member in members {
                regions[member] = region_count;
            }
        }
    }

    let spans = cells
        .iter()
        .zip(regions.iter())
        .filter(|&(_, &region)| region != DROPPED_REGION)
        .map(|(cell, &region)| CompiledSpan {
            x: cell.x as u16,
            z: cell.z as u16,
            floor: cell.floor as u16,
            clearance: (cell.ceiling - cell.floor).min(MAX_HEIGHT) as u16,
            area: cell.area,
            region,
        })
        .collect();

    CompiledTile {
        coord,
        bmin: field.bmin,
        bmax: field.bmax,
        cs: field.cs,
        ch: field.ch,
        width: field.width,
        height: field.height,
        border_size: border,
        agent_height: config.agent_height,
        agent_radius: config.agent_radius,
        agent_climb: config.agent_climb,
        region_count,
        spans,
    }
}
