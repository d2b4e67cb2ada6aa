use crate::{
    config::{TerrainConfig, PARTITION},
    terrain_data::height_source::HeightSource,
    util::{bilinear, grid_cell},
};
use bevy::math::{DVec2, IVec2, UVec2};
use derive_more::derive::{Display, From};
use itertools::{iproduct, Itertools};
use ndarray::Array2;

/// The handle of a tile inside the tile arena of a [`TileTree`](super::tile_tree::TileTree).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, From)]
#[display("tile {_0}")]
pub struct TileId(pub(crate) usize);

/// The range of the high resolution geometry buffers a sub tile is rendered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometrySlot {
    /// The first vertex of the tile.
    pub vertex_offset: usize,
    /// The first index of the tile.
    pub index_offset: usize,
    /// The position of the tile in the flat list of active sub tiles.
    pub list_pos: usize,
}

/// A rectangular patch of the terrain with its own height cache.
///
/// Every tile has the resolution of the root tile. Sub tiles cover one cell of the
/// 3x3 partition of their parent and are therefore three times as detailed.
#[derive(Clone, Debug)]
pub struct Tile {
    /// The cell of the parent partition this tile covers, zero for the root.
    pub(crate) cell: UVec2,
    /// The world position of the first vertex.
    pub(crate) origin: DVec2,
    pub(crate) size: DVec2,
    /// The number of cells per axis.
    pub(crate) cells: UVec2,
    /// The heights of all vertices, indexed `[row, column]`.
    pub(crate) heights: Array2<f64>,
    /// The geometry slot of the tile. The root is rendered from its own buffers.
    pub(crate) slot: Option<GeometrySlot>,
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Vec<TileId>,
    /// The refinement level, zero for the root.
    pub(crate) level: u32,
}

impl Tile {
    /// Creates the root tile, sampling every vertex from the height source.
    pub fn root(config: &TerrainConfig, source: &HeightSource) -> Self {
        let mut tile = Self {
            cell: UVec2::ZERO,
            origin: DVec2::ZERO,
            size: config.world_size(),
            cells: config.cell_count(),
            heights: Array2::zeros((config.grid_height as usize, config.grid_width as usize)),
            slot: None,
            parent: None,
            children: Vec::new(),
            level: 0,
        };

        tile.heights = tile.sample_heights(|position| source.get_height(position.x, position.y));
        tile
    }

    /// Creates the sub tile covering `cell` of the parent's partition.
    /// Its heights are left at zero until the tile is filled.
    pub(crate) fn sub_tile(parent: &Tile, parent_id: TileId, cell: UVec2) -> Self {
        let size = parent.cell_size();

        Self {
            cell,
            origin: parent.origin + cell.as_dvec2() * size,
            size,
            cells: parent.cells,
            heights: Array2::zeros(parent.heights.dim()),
            slot: None,
            parent: Some(parent_id),
            children: Vec::with_capacity(4),
            level: parent.level + 1,
        }
    }

    pub fn origin(&self) -> DVec2 {
        self.origin
    }

    pub fn size(&self) -> DVec2 {
        self.size
    }

    pub fn cell(&self) -> UVec2 {
        self.cell
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn parent(&self) -> Option<TileId> {
        self.parent
    }

    pub fn children(&self) -> &[TileId] {
        &self.children
    }

    pub fn slot(&self) -> Option<GeometrySlot> {
        self.slot
    }

    pub fn heights(&self) -> &Array2<f64> {
        &self.heights
    }

    #[inline]
    pub fn cell_count(&self) -> UVec2 {
        self.cells
    }

    /// The distance between two neighbouring vertices.
    #[inline]
    pub fn step(&self) -> DVec2 {
        self.size / self.cells.as_dvec2()
    }

    /// The size of one cell of the 3x3 partition.
    #[inline]
    pub fn cell_size(&self) -> DVec2 {
        self.size / PARTITION as f64
    }

    #[inline]
    pub fn vertex_position(&self, x: usize, y: usize) -> DVec2 {
        self.origin + DVec2::new(x as f64, y as f64) * self.step()
    }

    #[inline]
    pub fn is_border(&self, x: usize, y: usize) -> bool {
        x == 0 || y == 0 || x == self.cells.x as usize || y == self.cells.y as usize
    }

    /// Evaluates `height` at the world position of every vertex.
    pub(crate) fn sample_heights(&self, mut height: impl FnMut(DVec2) -> f64) -> Array2<f64> {
        Array2::from_shape_fn(self.heights.dim(), |(y, x)| height(self.vertex_position(x, y)))
    }

    /// Returns the continuous height of the tile at the world position.
    ///
    /// The height cache is interpolated bilinearly. Positions within a tenth of a cell of
    /// a grid line snap onto it, so that sub tile borders reproduce the parent's vertices exactly.
    pub fn get_height(&self, x: f64, y: f64) -> f64 {
        let grid_position = (DVec2::new(x, y) - self.origin) / self.size * self.cells.as_dvec2();

        let ([x, y], [x2, y2], d) = grid_cell(
            grid_position,
            [self.cells.x as usize, self.cells.y as usize],
        );

        let snap = |d: f64| {
            if d < 0.1 {
                0.0
            } else if d > 0.9 {
                1.0
            } else {
                d
            }
        };

        bilinear(
            [
                self.heights[[y, x]],
                self.heights[[y2, x]],
                self.heights[[y, x2]],
                self.heights[[y2, x2]],
            ],
            DVec2::new(snap(d.x), snap(d.y)),
        )
    }

    /// Whether the camera is close enough to the tile to refine any of its cells.
    /// The tile extent is widened by half a partition cell on every side.
    pub fn covers(&self, camera: DVec2) -> bool {
        let margin = 0.5 * self.cell_size();
        let local = camera - self.origin;

        local.cmpge(-margin).all() && (local - margin).cmple(self.size).all()
    }

    /// Returns the (at most four) cells of the partition that should be refined for the camera.
    ///
    /// A window of one cell centered at the camera is intersected with the partition.
    /// The lower corner of the window selects the cell it lies in, the upper corner the
    /// cell it lies in when cell borders are treated as exclusive, so a camera in the exact
    /// center of a cell refines only that cell.
    pub fn candidate_cells(&self, camera: DVec2) -> Vec<UVec2> {
        if !self.covers(camera) {
            return Vec::new();
        }

        let cell_size = self.cell_size();
        let local = camera - self.origin;
        let max = PARTITION as i32 - 1;

        let lower = ((local - 0.5 * cell_size) / cell_size).floor().as_ivec2();
        let upper = ((local + 0.5 * cell_size) / cell_size).ceil().as_ivec2() - IVec2::ONE;

        let from_lower = |value: i32| (value >= 0).then(|| value.min(max) as u32);
        let from_upper = |value: i32| (value <= max).then(|| value.max(0) as u32);

        let xs = [from_lower(lower.x), from_upper(upper.x)];
        let ys = [from_lower(lower.y), from_upper(upper.y)];

        iproduct!(ys, xs)
            .filter_map(|(y, x)| Some(UVec2::new(x?, y?)))
            .unique()
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_data::height_source::HeightGrid;
    use approx::assert_relative_eq;

    fn root() -> Tile {
        let config = TerrainConfig::new(UVec2::splat(10), DVec2::splat(9.0), 1.0, 2);
        let source = HeightSource::from_config(
            HeightGrid::from_fn(10, 10, |x, y| (x + 2 * y) as f32 / 32.0),
            &config,
        );
        Tile::root(&config, &source)
    }

    #[test]
    fn center_selects_single_cell() {
        let tile = root();

        assert_eq!(tile.candidate_cells(DVec2::splat(4.5)), vec![UVec2::ONE]);
        assert_eq!(tile.candidate_cells(DVec2::splat(7.5)), vec![UVec2::splat(2)]);
    }

    #[test]
    fn straddling_selects_neighbours() {
        let tile = root();

        // on the corner shared by the cells (1, 1), (2, 1), (1, 2) and (2, 2)
        let cells = tile.candidate_cells(DVec2::splat(6.2));
        assert_eq!(
            cells,
            vec![
                UVec2::new(1, 1),
                UVec2::new(2, 1),
                UVec2::new(1, 2),
                UVec2::new(2, 2)
            ]
        );

        let cells = tile.candidate_cells(DVec2::new(6.2, 4.5));
        assert_eq!(cells, vec![UVec2::new(1, 1), UVec2::new(2, 1)]);
    }

    #[test]
    fn clamps_to_partition() {
        let tile = root();

        assert_eq!(tile.candidate_cells(DVec2::ZERO), vec![UVec2::ZERO]);
        assert_eq!(tile.candidate_cells(DVec2::splat(-1.0)), vec![UVec2::ZERO]);
        assert_eq!(tile.candidate_cells(DVec2::splat(9.5)), vec![UVec2::splat(2)]);
    }

    #[test]
    fn far_outside_selects_nothing() {
        let tile = root();

        assert!(!tile.covers(DVec2::new(-2.0, 4.5)));
        assert!(tile.candidate_cells(DVec2::new(-2.0, 4.5)).is_empty());
        assert!(tile.candidate_cells(DVec2::new(4.5, 11.0)).is_empty());
    }

    #[test]
    fn continuous_height_hits_vertices() {
        let tile = root();

        for (x, y) in iproduct!(0..10, 0..10) {
            let position = tile.vertex_position(x, y);
            assert_relative_eq!(
                tile.get_height(position.x, position.y),
                tile.heights[[y, x]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn sub_tile_layout() {
        let tile = root();
        let sub_tile = Tile::sub_tile(&tile, TileId(0), UVec2::new(2, 1));

        assert_eq!(sub_tile.origin, DVec2::new(6.0, 3.0));
        assert_eq!(sub_tile.size, DVec2::splat(3.0));
        assert_eq!(sub_tile.step(), DVec2::splat(1.0 / 3.0));
        assert_eq!(sub_tile.level, 1);
    }
}
