use crate::{
    config::{TerrainConfig, PARTITION},
    math::surface_frame,
    render::TerrainVertex,
    terrain_data::tile::Tile,
};
use bevy::math::{DVec2, DVec3, UVec2};
use itertools::iproduct;

/// The number of indices of the two triangles of a cell.
pub const INDICES_PER_CELL: usize = 6;

/// Produces the vertices and the index topology of tiles.
///
/// Vertices are laid out row major, `(cols + 1)` per row. Each cell is split into two
/// triangles. Cells covered by an active sub tile are cut out of the index block by
/// zeroing their six indices, which turns them into degenerate triangles.
#[derive(Clone, Copy, Debug)]
pub struct TileGeometryBuilder {
    texture_scale: DVec2,
    skip_border: bool,
}

impl TileGeometryBuilder {
    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            texture_scale: config.texture_scale(),
            skip_border: config.skip_border_normals,
        }
    }

    /// Writes the vertices of the tile into its block.
    pub fn fill_vertices(&self, block: &mut [TerrainVertex], tile: &Tile) {
        let cells = tile.cell_count();
        let columns = cells.x as usize + 1;

        debug_assert_eq!(block.len(), columns * (cells.y as usize + 1));

        for (y, x) in iproduct!(0..=cells.y as usize, 0..columns) {
            let position = tile.vertex_position(x, y);
            let position = DVec3::new(position.x, position.y, tile.heights[[y, x]]);
            let frame = surface_frame(&tile.heights, x, y, tile.step(), self.skip_border);

            block[y * columns + x] = TerrainVertex {
                position: position.as_vec3().to_array(),
                normal: frame.normal.to_array(),
                tangent: frame.tangent.to_array(),
                tex_coord: (position.truncate() * self.texture_scale)
                    .as_vec2()
                    .to_array(),
            };
        }
    }

    /// Writes the complete triangulation of a tile into its index block.
    pub fn fill_indices(block: &mut [u32], cells: UVec2, vertex_offset: usize) {
        debug_assert_eq!(block.len(), (cells.x * cells.y) as usize * INDICES_PER_CELL);

        for (y, x) in iproduct!(0..cells.y, 0..cells.x) {
            Self::write_cell(block, cells, UVec2::new(x, y), vertex_offset);
        }
    }

    /// Zeroes the indices of all cells covered by the `cell` of the 3x3 partition.
    pub fn cut_hole(block: &mut [u32], cells: UVec2, partition_cell: UVec2) {
        for cell in Self::footprint(cells, partition_cell) {
            let start = Self::cell_start(cells, cell);
            block[start..start + INDICES_PER_CELL].fill(0);
        }
    }

    /// Restores the triangulation of all cells covered by the `cell` of the 3x3 partition.
    pub fn patch_hole(block: &mut [u32], cells: UVec2, partition_cell: UVec2, vertex_offset: usize) {
        for cell in Self::footprint(cells, partition_cell) {
            Self::write_cell(block, cells, cell, vertex_offset);
        }
    }

    fn footprint(cells: UVec2, partition_cell: UVec2) -> impl Iterator<Item = UVec2> {
        let extent = cells / PARTITION;
        let start = partition_cell * extent;

        iproduct!(start.y..start.y + extent.y, start.x..start.x + extent.x)
            .map(|(y, x)| UVec2::new(x, y))
    }

    #[inline]
    fn cell_start(cells: UVec2, cell: UVec2) -> usize {
        (cell.y * cells.x + cell.x) as usize * INDICES_PER_CELL
    }

    fn write_cell(block: &mut [u32], cells: UVec2, cell: UVec2, vertex_offset: usize) {
        let columns = cells.x as usize + 1;
        let (x, y) = (cell.x as usize, cell.y as usize);

        let top_left = y * columns + x + vertex_offset;
        let bottom_left = top_left + columns;

        let start = Self::cell_start(cells, cell);
        let indices = [
            bottom_left,
            top_left,
            bottom_left + 1,
            bottom_left + 1,
            top_left,
            top_left + 1,
        ];

        for (entry, index) in block[start..start + INDICES_PER_CELL]
            .iter_mut()
            .zip(indices)
        {
            *entry = index as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_data::height_source::{HeightGrid, HeightSource};
    use approx::assert_relative_eq;

    fn config() -> TerrainConfig {
        TerrainConfig::new(UVec2::new(7, 4), DVec2::new(6.0, 3.0), 2.0, 1)
            .with_texture_scale(DVec2::new(0.5, 0.25))
    }

    #[test]
    fn cell_topology() {
        let cells = UVec2::new(6, 3);
        let mut block = vec![0; 6 * 3 * INDICES_PER_CELL];

        TileGeometryBuilder::fill_indices(&mut block, cells, 100);

        // first cell, seven vertices per row
        assert_eq!(&block[..6], &[107, 100, 108, 108, 100, 101]);
        // cell (5, 2)
        let start = (2 * 6 + 5) * INDICES_PER_CELL;
        assert_eq!(&block[start..start + 6], &[126, 119, 127, 127, 119, 120]);
    }

    #[test]
    fn cut_and_patch_restore_block() {
        let cells = UVec2::new(6, 3);
        let mut block = vec![0; 6 * 3 * INDICES_PER_CELL];
        TileGeometryBuilder::fill_indices(&mut block, cells, 28);
        let original = block.clone();

        TileGeometryBuilder::cut_hole(&mut block, cells, UVec2::new(2, 1));

        let zeroed = block.iter().filter(|&&index| index == 0).count();
        assert_eq!(zeroed, 2 * INDICES_PER_CELL);
        // cells (4, 1) and (5, 1)
        assert!(block[10 * 6..12 * 6].iter().all(|&index| index == 0));

        TileGeometryBuilder::patch_hole(&mut block, cells, UVec2::new(2, 1), 28);
        assert_eq!(block, original);
    }

    #[test]
    fn vertices_follow_tile() {
        let config = config();
        let source = HeightSource::from_config(
            HeightGrid::from_fn(7, 4, |x, y| (x + y) as f32 * 0.1),
            &config,
        );
        let tile = Tile::root(&config, &source);
        let builder = TileGeometryBuilder::new(&config);

        let mut block = vec![TerrainVertex::default(); config.vertices_per_tile()];
        builder.fill_vertices(&mut block, &tile);

        let vertex = block[7 + 3];
        assert_eq!(vertex.position[0], 3.0);
        assert_eq!(vertex.position[1], 1.0);
        assert_relative_eq!(vertex.position[2] as f64, tile.heights[[1, 3]], epsilon = 1e-6);
        assert_eq!(vertex.tex_coord, [1.5, 0.25]);

        for vertex in block {
            let normal = bevy::math::Vec3::from_array(vertex.normal);
            assert_relative_eq!(normal.length(), 1.0, epsilon = 1e-5);
            assert_eq!(vertex.tangent[3], 0.0);
        }
    }
}
