//! This module contains everything the terrain needs to get its geometry onto the GPU.
//!
//! The terrain does not talk to a graphics API directly. Instead the renderer driver
//! injects a [`GpuBackend`], which creates buffers, receives uploads and issues indexed
//! draw calls. Geometry is exchanged as plain [`TerrainVertex`] and `u32` index slices.
//!
//! The geometry of the tiles is produced by the [`TileGeometryBuilder`](geometry::TileGeometryBuilder)
//! on the background thread and handed over to the render thread through a
//! [`SnapshotMailbox`](mailbox::SnapshotMailbox).

use crate::error::TerrainResult;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

pub mod geometry;
pub mod headless;
pub mod mailbox;

/// The vertex layout shared by all tiles.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub tex_coord: [f32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
}

bitflags::bitflags! {
    /// Selects how the low resolution root and the high resolution sub tiles are drawn.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DrawMode: u32 {
        const SOLID          = 1 << 0;
        const WIREFRAME      = 1 << 1;
        const HIGH_SOLID     = 1 << 2;
        const HIGH_WIREFRAME = 1 << 3;
    }
}

impl Default for DrawMode {
    fn default() -> Self {
        DrawMode::SOLID | DrawMode::HIGH_SOLID
    }
}

impl DrawMode {
    /// The polygon modes to draw one resolution level with.
    pub(crate) fn polygon_modes(self, high_resolution: bool) -> impl Iterator<Item = PolygonMode> {
        let (solid, wireframe) = if high_resolution {
            (DrawMode::HIGH_SOLID, DrawMode::HIGH_WIREFRAME)
        } else {
            (DrawMode::SOLID, DrawMode::WIREFRAME)
        };

        [
            self.contains(solid).then_some(PolygonMode::Fill),
            self.contains(wireframe).then_some(PolygonMode::Line),
        ]
        .into_iter()
        .flatten()
    }
}

/// The GPU buffer abstraction the terrain renders through.
///
/// All methods are only ever called from the render thread.
pub trait GpuBackend {
    type Buffer;

    /// Creates a buffer of `size` bytes.
    /// Failing allocations are retried by the renderer on the next frame.
    fn create_buffer(
        &mut self,
        label: &'static str,
        usage: BufferUsage,
        size: u64,
    ) -> TerrainResult<Self::Buffer>;

    /// Copies `data` into the buffer starting at the byte `offset`.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn draw_indexed(
        &mut self,
        vertices: &Self::Buffer,
        indices: &Self::Buffer,
        index_count: u32,
        mode: PolygonMode,
    );
}

/// A vertex and an index buffer living on the GPU.
pub(crate) struct GpuMesh<T> {
    pub(crate) vertices: T,
    pub(crate) indices: T,
}

impl<T> GpuMesh<T> {
    pub(crate) fn create<B: GpuBackend<Buffer = T>>(
        backend: &mut B,
        label: &'static str,
        vertex_count: usize,
        index_count: usize,
    ) -> TerrainResult<Self> {
        let vertex_size = (vertex_count * size_of::<TerrainVertex>()) as u64;
        let index_size = (index_count * size_of::<u32>()) as u64;

        Ok(Self {
            vertices: backend.create_buffer(label, BufferUsage::Vertex, vertex_size)?,
            indices: backend.create_buffer(label, BufferUsage::Index, index_size)?,
        })
    }

    pub(crate) fn draw<B: GpuBackend<Buffer = T>>(
        &self,
        backend: &mut B,
        index_count: usize,
        modes: impl Iterator<Item = PolygonMode>,
    ) {
        for mode in modes {
            backend.draw_indexed(&self.vertices, &self.indices, index_count as u32, mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn vertex_layout() {
        assert_eq!(size_of::<TerrainVertex>(), 12 * 4);
    }

    #[test]
    fn polygon_modes() {
        let mode = DrawMode::SOLID | DrawMode::WIREFRAME | DrawMode::HIGH_WIREFRAME;

        assert_eq!(
            mode.polygon_modes(false).collect_vec(),
            vec![PolygonMode::Fill, PolygonMode::Line]
        );
        assert_eq!(
            mode.polygon_modes(true).collect_vec(),
            vec![PolygonMode::Line]
        );
        assert_eq!(DrawMode::empty().polygon_modes(true).count(), 0);
    }
}
