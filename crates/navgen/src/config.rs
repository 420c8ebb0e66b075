// config.rs - Build parameters for the voxel pipeline
//
// `BuildConfig` is what users write (world units, JSON, per-world
// overrides); `VoxelConfig` is the derived engine-unit view.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::geometry::TILE_SIZE;

/// Key of the fallback entry in a config file
const DEFAULT_CONFIG_KEY: &str = "default";

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Height-field cells per tile axis
    #[serde(default = "default_tile_voxel_size")]
    pub tile_voxel_size: i32,
    #[serde(default = "default_cell_height")]
    pub cell_height: f32,
    /// Maximum walkable slope in degrees
    #[serde(default = "default_walkable_slope")]
    pub walkable_slope: f32,
    /// Agent height in world units
    #[serde(default = "default_walkable_height")]
    pub walkable_height: f32,
    /// Agent radius in world units
    #[serde(default = "default_walkable_radius")]
    pub walkable_radius: f32,
    /// Maximum step height in world units
    #[serde(default = "default_walkable_climb")]
    pub walkable_climb: f32,
    /// Multiplier applied to the voxel radius to get the max edge length
    #[serde(default = "default_edge_length_factor")]
    pub edge_length_factor: i32,
    #[serde(default = "default_max_simplification_error")]
    pub max_simplification_error: f32,
    #[serde(default = "default_min_region_area")]
    pub min_region_area: i32,
    #[serde(default = "default_merge_region_area")]
    pub merge_region_area: i32,
    #[serde(default = "default_max_verts_per_poly")]
    pub max_verts_per_poly: i32,
    #[serde(default = "default_detail_sample_dist")]
    pub detail_sample_dist: f32,
    #[serde(default = "default_detail_sample_max_error")]
    pub detail_sample_max_error: f32,
}

fn default_tile_voxel_size() -> i32 { 1800 }
fn default_cell_height() -> f32 { 0.4 }
fn default_walkable_slope() -> f32 { 50.0 }
fn default_walkable_height() -> f32 { 1.6 }
fn default_walkable_radius() -> f32 { 0.3 }
fn default_walkable_climb() -> f32 { 1.0 }
fn default_edge_length_factor() -> i32 { 8 }
fn default_max_simplification_error() -> f32 { 1.3 }
fn default_min_region_area() -> i32 { 20 }
fn default_merge_region_area() -> i32 { 40 }
fn default_max_verts_per_poly() -> i32 { 6 }
fn default_detail_sample_dist() -> f32 { 3.0 }
fn default_detail_sample_max_error() -> f32 { 1.25 }

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            tile_voxel_size: default_tile_voxel_size(),
            cell_height: default_cell_height(),
            walkable_slope: default_walkable_slope(),
            walkable_height: default_walkable_height(),
            walkable_radius: default_walkable_radius(),
            walkable_climb: default_walkable_climb(),
            edge_length_factor: default_edge_length_factor(),
            max_simplification_error: default_max_simplification_error(),
            min_region_area: default_min_region_area(),
            merge_region_area: default_merge_region_area(),
            max_verts_per_poly: default_max_verts_per_poly(),
            detail_sample_dist: default_detail_sample_dist(),
            detail_sample_max_error: default_detail_sample_max_error(),
        }
    }
}

impl BuildConfig {
    /// Read the entry for `world_name` (or `default`) from a JSON object
    /// keyed by world name. Missing fields keep their defaults.
    pub fn load(path: &Path, world_name: &str) -> anyhow::Result<BuildConfig> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        Self::from_json(&json, world_name)
    }

    pub fn from_json(json: &serde_json::Value, world_name: &str) -> anyhow::Result<BuildConfig> {
        let entry = json
            .get(world_name)
            .or_else(|| json.get(DEFAULT_CONFIG_KEY));

        match entry {
            Some(value) => serde_json::from_value(value.clone())
                .with_context(|| format!("Invalid build config for '{}'", world_name)),
            None => Ok(BuildConfig::default()),
        }
    }

    pub fn cell_size(&self) -> f32 {
        TILE_SIZE / self.tile_voxel_size as f32
    }

    pub fn to_voxel_config(&self) -> VoxelConfig {
        let cs = self.cell_size();
        let ch = self.cell_height;
        let walkable_radius = (self.walkable_radius / cs).round() as i32;
        VoxelConfig {
            cs,
            ch,
            tile_size: self.tile_voxel_size,
            border_size: walkable_radius + 3,
            walkable_slope_angle: self.walkable_slope,
            walkable_height: (self.walkable_height / ch).round() as i32,
            walkable_climb: (self.walkable_climb / ch).round() as i32,
            walkable_radius,
            max_edge_len: walkable_radius * self.edge_length_factor,
            max_simplification_error: self.max_simplification_error,
            min_region_area: self.min_region_area,
            merge_region_area: self.merge_region_area,
            max_verts_per_poly: self.max_verts_per_poly,
            detail_sample_dist: self.detail_sample_dist,
            detail_sample_max_error: self.detail_sample_max_error,
            agent_height: self.walkable_height,
            agent_radius: self.walkable_radius,
            agent_climb: self.walkable_climb,
        }
    }
}

/// Engine-unit build parameters (distances in cells unless noted)
///
/// `VoxelEngine` reads the cell sizes, border, slope, walkable limits and
/// `min_region_area`. The contour, polygon and detail parameters
/// (`max_edge_len`, `max_simplification_error`, `merge_region_area`,
/// `max_verts_per_poly`, `detail_sample_*`) are passed through untouched
/// for polygon-mesh engines.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VoxelConfig {
    pub cs: f32,
    pub ch: f32,
    pub tile_size: i32,
    pub border_size: i32,
    /// Degrees
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    pub min_region_area: i32,
    pub merge_region_area: i32,
    pub max_verts_per_poly: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
    /// World units, carried into the compiled tile
    pub agent_height: f32,
    pub agent_radius: f32,
    pub agent_climb: f32,
}
