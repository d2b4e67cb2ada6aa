use bevy::math::DVec2;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("invalid terrain config: {0}")]
    InvalidConfig(String),
    #[error("failed to load height source `{path}`")]
    HeightSource {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("tile arena is full ({capacity} sub tiles)")]
    ArenaFull { capacity: usize },
    #[error("camera position {position} lies outside of the terrain")]
    CameraOutOfBounds { position: DVec2 },
    #[error("geometry block {offset}..{end} exceeds the buffer capacity of {capacity}")]
    BufferOverrun {
        offset: usize,
        end: usize,
        capacity: usize,
    },
    #[error("grid coordinate ({x}, {y}) is outside of the {width}x{height} height grid")]
    GridOutOfRange {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    #[error("gpu buffer allocation failed: {0}")]
    GpuAllocation(String),
    #[error("failed to spawn the refiner thread")]
    Spawn(#[from] std::io::Error),
}

pub type TerrainResult<T> = Result<T, TerrainError>;
