use crate::error::{TerrainError, TerrainResult};
use anyhow::Result;
use bevy::math::{DVec2, UVec2};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};

/// The number of cells per axis each tile is partitioned into when it gets refined.
pub const PARTITION: u32 = 3;

fn default_refine_interval_ms() -> u64 {
    40
}

fn default_skip_border_normals() -> bool {
    true
}

/// Configures a [`TerrainRenderer`](crate::renderer::TerrainRenderer).
///
/// The configuration is fixed for the lifetime of the renderer.
/// It can be written by hand or loaded from a `.ron` file.
#[derive(Clone, Debug, Deserialize)]
pub struct TerrainConfig {
    /// The number of low resolution vertices in x direction.
    pub grid_width: u32,
    /// The number of low resolution vertices in y direction.
    pub grid_height: u32,
    /// The extent of the terrain in world units along x.
    pub world_width: f64,
    /// The extent of the terrain in world units along y.
    pub world_height: f64,
    /// Multiplier applied to the normalized heights of the height source.
    pub height_scale: f64,
    pub texture_scale_x: f64,
    pub texture_scale_y: f64,
    /// The maximum refinement depth below the root tile.
    /// A depth of zero disables refinement entirely.
    pub depth: u32,
    /// The height image the terrain is sampled from.
    #[serde(default)]
    pub height_source: PathBuf,
    /// The pause between two refinement passes of the background thread.
    #[serde(default = "default_refine_interval_ms")]
    pub refine_interval_ms: u64,
    /// Use one-sided differences for the two outermost vertex rows when computing normals.
    #[serde(default = "default_skip_border_normals")]
    pub skip_border_normals: bool,
}

impl TerrainConfig {
    pub fn new(grid_size: UVec2, world_size: DVec2, height_scale: f64, depth: u32) -> Self {
        Self {
            grid_width: grid_size.x,
            grid_height: grid_size.y,
            world_width: world_size.x,
            world_height: world_size.y,
            height_scale,
            texture_scale_x: 1.0,
            texture_scale_y: 1.0,
            depth,
            height_source: PathBuf::new(),
            refine_interval_ms: default_refine_interval_ms(),
            skip_border_normals: default_skip_border_normals(),
        }
    }

    pub fn with_height_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.height_source = path.into();
        self
    }

    pub fn with_texture_scale(mut self, scale: DVec2) -> Self {
        self.texture_scale_x = scale.x;
        self.texture_scale_y = scale.y;
        self
    }

    pub fn from_ron_str(source: &str) -> Result<Self> {
        Ok(ron::from_str(source)?)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_ron_str(&source)
    }

    /// Checks that the tile partition lines up with the low resolution grid.
    pub fn validate(&self) -> TerrainResult<()> {
        let cells = self.cell_count();

        if cells.x == 0 || cells.y == 0 {
            return Err(TerrainError::InvalidConfig(format!(
                "the grid needs at least two vertices per axis, got {}x{}",
                self.grid_width, self.grid_height
            )));
        }
        if cells.x % PARTITION != 0 || cells.y % PARTITION != 0 {
            return Err(TerrainError::InvalidConfig(format!(
                "the cell counts {}x{} must be multiples of {PARTITION}",
                cells.x, cells.y
            )));
        }
        if !(self.world_width > 0.0 && self.world_height > 0.0) {
            return Err(TerrainError::InvalidConfig(format!(
                "the world size {}x{} must be positive",
                self.world_width, self.world_height
            )));
        }
        if !self.height_scale.is_finite() {
            return Err(TerrainError::InvalidConfig(
                "the height scale must be finite".into(),
            ));
        }
        if self.depth > 8 {
            return Err(TerrainError::InvalidConfig(format!(
                "a depth of {} would reserve {} sub tiles",
                self.depth,
                Self::sub_tile_count(self.depth)
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn grid_size(&self) -> UVec2 {
        UVec2::new(self.grid_width, self.grid_height)
    }

    /// The number of low resolution cells per axis.
    #[inline]
    pub fn cell_count(&self) -> UVec2 {
        self.grid_size().saturating_sub(UVec2::ONE)
    }

    #[inline]
    pub fn world_size(&self) -> DVec2 {
        DVec2::new(self.world_width, self.world_height)
    }

    #[inline]
    pub fn texture_scale(&self) -> DVec2 {
        DVec2::new(self.texture_scale_x, self.texture_scale_y)
    }

    #[inline]
    pub fn refine_interval(&self) -> Duration {
        Duration::from_millis(self.refine_interval_ms)
    }

    /// Every tile shares the resolution of the root tile.
    #[inline]
    pub fn vertices_per_tile(&self) -> usize {
        (self.grid_width * self.grid_height) as usize
    }

    #[inline]
    pub fn indices_per_tile(&self) -> usize {
        let cells = self.cell_count();
        (cells.x * cells.y * 6) as usize
    }

    /// The upper bound of simultaneously active sub tiles.
    #[inline]
    pub fn max_sub_tile_count(&self) -> usize {
        Self::sub_tile_count(self.depth)
    }

    /// Sums `4^level` for every level in `1..=depth`.
    fn sub_tile_count(depth: u32) -> usize {
        (1..=depth).map(|level| 4usize.pow(level)).sum()
    }
}
