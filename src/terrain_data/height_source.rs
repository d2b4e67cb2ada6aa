use crate::{
    config::TerrainConfig,
    error::{TerrainError, TerrainResult},
    formats,
    util::{bilinear, grid_cell},
};
use bevy::{log::info, math::DVec2};
use ndarray::Array2;
use std::path::Path;

/// An immutable grid of normalized height samples, indexed `[row, column]`.
#[derive(Clone, Debug)]
pub struct HeightGrid {
    samples: Array2<f32>,
}

impl HeightGrid {
    pub fn from_array(samples: Array2<f32>) -> Self {
        debug_assert!(!samples.is_empty(), "A height grid needs at least one sample.");
        Self { samples }
    }

    /// Builds a grid of `width`x`height` samples by evaluating `f(column, row)`.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self::from_array(Array2::from_shape_fn((height, width), |(y, x)| f(x, y)))
    }

    /// Loads a grayscale height image. Raw values are normalized by `2^bit_depth`.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        formats::load_height_image(path.as_ref()).map(Self::from_array)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.samples.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.samples.nrows()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.samples[[y, x]]
    }

    /// Samples the grid at a continuous grid coordinate using bilinear interpolation.
    /// The coordinate is clamped to the extent of the grid.
    pub fn sample(&self, position: DVec2) -> f64 {
        let ([x, y], [x2, y2], d) =
            grid_cell(position, [self.width() - 1, self.height() - 1]);

        bilinear(
            [
                self.get(x, y) as f64,
                self.get(x, y2) as f64,
                self.get(x2, y) as f64,
                self.get(x2, y2) as f64,
            ],
            d,
        )
    }
}

/// Continuous world space height query over a [`HeightGrid`].
///
/// The grid is stretched over the world extent of the terrain, so that grid column `i`
/// is located at `x = i * world_width / grid_width`, and scaled by the configured height scale.
#[derive(Clone, Debug)]
pub struct HeightSource {
    grid: HeightGrid,
    world_size: DVec2,
    height_scale: f64,
}

impl HeightSource {
    pub fn new(grid: HeightGrid, world_size: DVec2, height_scale: f64) -> Self {
        Self {
            grid,
            world_size,
            height_scale,
        }
    }

    pub fn from_config(grid: HeightGrid, config: &TerrainConfig) -> Self {
        Self::new(grid, config.world_size(), config.height_scale)
    }

    /// Loads the height image referenced by the config.
    pub fn load(config: &TerrainConfig) -> TerrainResult<Self> {
        let path = &config.height_source;

        let grid = HeightGrid::load(path).map_err(|source| TerrainError::HeightSource {
            path: path.clone(),
            source,
        })?;

        info!(
            "Loaded height source {} with {}x{} samples.",
            path.display(),
            grid.width(),
            grid.height()
        );

        Ok(Self::from_config(grid, config))
    }

    pub fn grid(&self) -> &HeightGrid {
        &self.grid
    }

    /// The world space distance between two neighbouring grid samples.
    pub fn sample_spacing(&self) -> DVec2 {
        self.world_size / DVec2::new(self.grid.width() as f64, self.grid.height() as f64)
    }

    /// Returns the terrain height at the world position.
    pub fn get_height(&self, x: f64, y: f64) -> f64 {
        let grid_position = DVec2::new(x, y) / self.sample_spacing();
        self.grid.sample(grid_position) * self.height_scale
    }
}
