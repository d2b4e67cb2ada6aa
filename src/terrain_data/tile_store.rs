use crate::{
    config::TerrainConfig,
    error::{TerrainError, TerrainResult},
    render::TerrainVertex,
    terrain_data::tile::{GeometrySlot, Tile, TileId},
};
use slab::Slab;
use std::ops::Range;

fn block_range(offset: usize, len: usize, capacity: usize) -> TerrainResult<Range<usize>> {
    let end = offset + len;

    if end > capacity {
        return Err(TerrainError::BufferOverrun {
            offset,
            end,
            capacity,
        });
    }

    Ok(offset..end)
}

/// Fixed capacity vertex and index arrays with bounds checked block access.
#[derive(Clone, Debug)]
pub struct GeometryBuffers {
    vertices: Vec<TerrainVertex>,
    indices: Vec<u32>,
}

impl GeometryBuffers {
    pub fn new(vertex_capacity: usize, index_capacity: usize) -> Self {
        Self {
            vertices: vec![TerrainVertex::default(); vertex_capacity],
            indices: vec![0; index_capacity],
        }
    }

    pub fn vertices(&self) -> &[TerrainVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_block(&self, offset: usize, len: usize) -> TerrainResult<&[TerrainVertex]> {
        let range = block_range(offset, len, self.vertices.len())?;
        Ok(&self.vertices[range])
    }

    pub fn vertex_block_mut(
        &mut self,
        offset: usize,
        len: usize,
    ) -> TerrainResult<&mut [TerrainVertex]> {
        let range = block_range(offset, len, self.vertices.len())?;
        Ok(&mut self.vertices[range])
    }

    pub fn index_block(&self, offset: usize, len: usize) -> TerrainResult<&[u32]> {
        let range = block_range(offset, len, self.indices.len())?;
        Ok(&self.indices[range])
    }

    pub fn index_block_mut(&mut self, offset: usize, len: usize) -> TerrainResult<&mut [u32]> {
        let range = block_range(offset, len, self.indices.len())?;
        Ok(&mut self.indices[range])
    }

    /// Moves the geometry of the slot `from` into the slot `to`, which must lie before it.
    ///
    /// Indices are shifted by the distance between the two vertex blocks. Zeroed indices
    /// mark the holes cut for sub tiles and stay zero.
    fn relocate(
        &mut self,
        from: GeometrySlot,
        to: GeometrySlot,
        vertices_per_tile: usize,
        indices_per_tile: usize,
    ) -> TerrainResult<()> {
        debug_assert!(to.vertex_offset < from.vertex_offset);

        let source = block_range(from.vertex_offset, vertices_per_tile, self.vertices.len())?;
        block_range(to.vertex_offset, vertices_per_tile, self.vertices.len())?;
        self.vertices.copy_within(source, to.vertex_offset);

        let source = block_range(from.index_offset, indices_per_tile, self.indices.len())?;
        let target = block_range(to.index_offset, indices_per_tile, self.indices.len())?;
        let delta = (from.vertex_offset - to.vertex_offset) as u32;

        for (source, target) in source.zip(target) {
            let index = self.indices[source];
            self.indices[target] = if index == 0 { 0 } else { index - delta };
        }

        Ok(())
    }
}

/// The arena of geometry slots of all active sub tiles.
///
/// Slot `p` owns the vertex block starting at `p * vertices_per_tile` and the index block
/// starting at `p * indices_per_tile`. The active tiles are kept in a dense list, so that
/// the used part of the buffers is always a prefix. Freeing a slot moves the last tile
/// into the gap.
pub struct TileStore {
    buffers: GeometryBuffers,
    list: Vec<TileId>,
    capacity: usize,
    vertices_per_tile: usize,
    indices_per_tile: usize,
}

impl TileStore {
    pub fn new(config: &TerrainConfig) -> Self {
        Self::with_capacity(
            config.max_sub_tile_count(),
            config.vertices_per_tile(),
            config.indices_per_tile(),
        )
    }

    pub fn with_capacity(
        capacity: usize,
        vertices_per_tile: usize,
        indices_per_tile: usize,
    ) -> Self {
        Self {
            buffers: GeometryBuffers::new(
                capacity * vertices_per_tile,
                capacity * indices_per_tile,
            ),
            list: Vec::with_capacity(capacity),
            capacity,
            vertices_per_tile,
            indices_per_tile,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The active tiles, ordered by their slot.
    pub fn tiles(&self) -> &[TileId] {
        &self.list
    }

    pub fn buffers(&self) -> &GeometryBuffers {
        &self.buffers
    }

    pub fn vertices_per_tile(&self) -> usize {
        self.vertices_per_tile
    }

    pub fn indices_per_tile(&self) -> usize {
        self.indices_per_tile
    }

    /// The vertices of all active tiles.
    pub fn used_vertices(&self) -> &[TerrainVertex] {
        &self.buffers.vertices[..self.len() * self.vertices_per_tile]
    }

    /// The indices of all active tiles.
    pub fn used_indices(&self) -> &[u32] {
        &self.buffers.indices[..self.len() * self.indices_per_tile]
    }

    fn slot_at(&self, list_pos: usize) -> GeometrySlot {
        GeometrySlot {
            vertex_offset: list_pos * self.vertices_per_tile,
            index_offset: list_pos * self.indices_per_tile,
            list_pos,
        }
    }

    /// Reserves the next free slot for the tile.
    pub fn allocate(&mut self, id: TileId) -> TerrainResult<GeometrySlot> {
        if self.list.len() == self.capacity {
            return Err(TerrainError::ArenaFull {
                capacity: self.capacity,
            });
        }

        let slot = self.slot_at(self.list.len());
        self.list.push(id);

        Ok(slot)
    }

    /// Releases the slot of the tile.
    ///
    /// If the tile was not the last one, the last tile is moved into its slot and returned.
    pub fn free(&mut self, tiles: &mut Slab<Tile>, id: TileId) -> TerrainResult<Option<TileId>> {
        let Some(slot) = tiles[id.0].slot.take() else {
            return Ok(None);
        };

        debug_assert_eq!(self.list.get(slot.list_pos), Some(&id));

        let last_pos = self.list.len() - 1;

        let moved = if slot.list_pos != last_pos {
            let moved_id = self.list[last_pos];
            let moved_slot = self.slot_at(last_pos);

            debug_assert_eq!(tiles[moved_id.0].slot, Some(moved_slot));

            self.buffers.relocate(
                moved_slot,
                slot,
                self.vertices_per_tile,
                self.indices_per_tile,
            )?;

            self.list[slot.list_pos] = moved_id;
            tiles[moved_id.0].slot = Some(slot);

            Some(moved_id)
        } else {
            None
        };

        self.list.pop();

        Ok(moved)
    }

    pub fn vertex_block_mut(&mut self, slot: GeometrySlot) -> TerrainResult<&mut [TerrainVertex]> {
        self.buffers
            .vertex_block_mut(slot.vertex_offset, self.vertices_per_tile)
    }

    pub fn index_block(&self, slot: GeometrySlot) -> TerrainResult<&[u32]> {
        self.buffers.index_block(slot.index_offset, self.indices_per_tile)
    }

    pub fn index_block_mut(&mut self, slot: GeometrySlot) -> TerrainResult<&mut [u32]> {
        self.buffers
            .index_block_mut(slot.index_offset, self.indices_per_tile)
    }
}
