//! This module contains the data structures that describe the terrain surface:
//! the [`HeightSource`](height_source::HeightSource) and the [`TileTree`](tile_tree::TileTree).
//!
//! # Explanation
//! The height source turns a discrete grid of height samples into a continuous height
//! function over the world extent of the terrain.
//!
//! The tile tree samples this function into a hierarchy of [`Tile`](tile::Tile)s.
//! The root tile covers the whole terrain at a low resolution. Around the camera it is
//! refined by sub tiles, each covering one cell of the 3x3 partition of its parent.
//! The geometry of all sub tiles lives in the fixed capacity [`TileStore`](tile_store::TileStore),
//! which keeps it densely packed, so that it can be uploaded and drawn with a single call.

pub mod height_source;
pub mod tile;
pub mod tile_store;
pub mod tile_tree;
