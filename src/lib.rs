//! This crate renders height-field terrains with a resolution that adapts to the camera.
//!
//! # Background
//! There are two questions each terrain renderer has to answer:
//!
//! ## How to spend vertices where they matter?
//! A uniform grid either wastes vertices far away from the viewer or lacks detail close to it.
//! Therefore the terrain is organized as a hierarchy of [`Tile`](terrain_data::tile::Tile)s.
//! A low resolution root tile covers the whole terrain. Every tile is partitioned into 3x3
//! cells, and the cells close to the camera are covered by sub tiles of the same vertex count,
//! which triples the detail with every level.
//! Sub tiles sample their borders from the continuous height of their parent, so that
//! neighbouring resolution levels meet without cracks.
//! See the [`terrain_data`] module for more information.
//!
//! ## How to keep the render thread responsive?
//! Restructuring the hierarchy and sampling new tiles is too expensive to do every frame.
//! The [`TerrainRenderer`](renderer::TerrainRenderer) thus keeps refining the tree on a
//! background thread, which publishes complete snapshots of the geometry. The render thread
//! only uploads a snapshot once it is complete and never waits for the refiner.
//! See the [`refiner`] and [`render`] modules for more information.
//!
//! The crate does not depend on a specific graphics API. Buffers are created, filled and drawn
//! through the [`GpuBackend`](render::GpuBackend) trait.

pub mod config;
pub mod error;
pub mod formats;
pub mod math;
pub mod refiner;
pub mod render;
pub mod renderer;
pub mod terrain_data;
pub(crate) mod util;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::TerrainConfig,
        error::{TerrainError, TerrainResult},
        refiner::TerrainDiagnostic,
        render::{headless::HeadlessBackend, BufferUsage, DrawMode, GpuBackend, PolygonMode},
        renderer::TerrainRenderer,
        terrain_data::{
            height_source::{HeightGrid, HeightSource},
            tile_tree::{RefineOutcome, TerrainStats, TileTree},
        },
    };
}
