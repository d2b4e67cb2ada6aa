use crate::{
    config::TerrainConfig,
    error::{TerrainError, TerrainResult},
    render::{geometry::TileGeometryBuilder, mailbox::GeometrySnapshot},
    terrain_data::{
        height_source::HeightSource,
        tile::{Tile, TileId},
        tile_store::TileStore,
    },
};
use bevy::math::{DVec2, UVec2};
use itertools::Itertools;
use ndarray::Array2;
use slab::Slab;

/// What a single refinement pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefineOutcome {
    pub created: usize,
    pub freed: usize,
    /// Candidates that were skipped, because the tile store was full.
    pub allocation_failures: usize,
}

impl RefineOutcome {
    /// Whether the geometry has to be published again.
    pub fn changed(&self) -> bool {
        self.created > 0 || self.freed > 0
    }
}

/// Running counters of the refinement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerrainStats {
    pub passes: u64,
    pub tiles_created: u64,
    pub tiles_freed: u64,
    pub allocation_failures: u64,
    pub out_of_bounds_passes: u64,
    pub publishes: u64,
}

/// The hierarchy of terrain tiles.
///
/// # Explanation
/// The root tile covers the whole terrain and persists for the lifetime of the tree.
/// Each tile is partitioned into 3x3 cells. When the camera gets close to a cell, a sub tile
/// covering exactly that cell is created. It has the same number of vertices as its parent
/// and therefore three times its detail. The parent geometry below the sub tile is cut out
/// by zeroing the indices of the covered cells, and patched back in once the sub tile is freed.
///
/// The tree is refined top down, one level per pass. A pass only descends into children that
/// already existed before the pass, so a camera that jumps to a new location gains its full
/// detail over `depth` consecutive passes.
///
/// The root is rendered from its own index block ([`TileTree::root_indices`]), all sub tiles
/// share the buffers of the [`TileStore`].
pub struct TileTree {
    depth: u32,
    source: HeightSource,
    builder: TileGeometryBuilder,
    tiles: Slab<Tile>,
    root: TileId,
    root_indices: Vec<u32>,
    store: TileStore,
    stats: TerrainStats,
}

impl TileTree {
    pub fn new(config: &TerrainConfig, source: HeightSource) -> TerrainResult<Self> {
        Self::with_capacity(config, source, config.max_sub_tile_count())
    }

    /// Creates a tree whose store holds at most `capacity` sub tiles.
    pub fn with_capacity(
        config: &TerrainConfig,
        source: HeightSource,
        capacity: usize,
    ) -> TerrainResult<Self> {
        config.validate()?;

        let root = Tile::root(config, &source);
        let cells = root.cell_count();

        let mut root_indices = vec![0; config.indices_per_tile()];
        TileGeometryBuilder::fill_indices(&mut root_indices, cells, 0);

        let mut tiles = Slab::with_capacity(capacity + 1);
        let root = TileId(tiles.insert(root));

        Ok(Self {
            depth: config.depth,
            source,
            builder: TileGeometryBuilder::new(config),
            tiles,
            root,
            root_indices,
            store: TileStore::with_capacity(
                capacity,
                config.vertices_per_tile(),
                config.indices_per_tile(),
            ),
            stats: TerrainStats::default(),
        })
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn root_id(&self) -> TileId {
        self.root
    }

    #[inline]
    pub fn root(&self) -> &Tile {
        &self.tiles[self.root.0]
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.0)
    }

    /// Iterates over all active sub tiles, in slot order.
    pub fn sub_tiles(&self) -> impl Iterator<Item = (TileId, &Tile)> + '_ {
        self.store
            .tiles()
            .iter()
            .map(|&id| (id, &self.tiles[id.0]))
    }

    /// The number of active sub tiles.
    #[inline]
    pub fn active_tile_count(&self) -> usize {
        self.store.len()
    }

    /// The index block of the root tile, including the holes of its active children.
    pub fn root_indices(&self) -> &[u32] {
        &self.root_indices
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn height_source(&self) -> &HeightSource {
        &self.source
    }

    pub fn stats(&self) -> TerrainStats {
        self.stats
    }

    pub(crate) fn record_publish(&mut self) {
        self.stats.publishes += 1;
    }

    /// Overwrites a vertex height of the root tile.
    ///
    /// Active sub tiles keep their geometry; tiles created afterwards sample the new height
    /// along their borders.
    pub fn set_root_height(&mut self, x: u32, y: u32, height: f64) -> TerrainResult<()> {
        let root = &mut self.tiles[self.root.0];
        let (rows, columns) = root.heights.dim();

        let cell = root
            .heights
            .get_mut([y as usize, x as usize])
            .ok_or(TerrainError::GridOutOfRange {
                x,
                y,
                width: columns as u32,
                height: rows as u32,
            })?;

        *cell = height;
        Ok(())
    }

    /// Runs one refinement pass against the camera position.
    ///
    /// Fails with [`TerrainError::CameraOutOfBounds`] and leaves the tree untouched if
    /// the camera is more than half a partition cell outside of the root tile.
    pub fn refine(&mut self, camera: DVec2) -> TerrainResult<RefineOutcome> {
        self.stats.passes += 1;

        if !self.root().covers(camera) {
            self.stats.out_of_bounds_passes += 1;
            return Err(TerrainError::CameraOutOfBounds { position: camera });
        }

        let mut outcome = RefineOutcome::default();
        let result = self.refine_levels(camera, &mut outcome);

        self.stats.tiles_created += outcome.created as u64;
        self.stats.tiles_freed += outcome.freed as u64;
        self.stats.allocation_failures += outcome.allocation_failures as u64;

        result.map(|()| outcome)
    }

    fn refine_levels(&mut self, camera: DVec2, outcome: &mut RefineOutcome) -> TerrainResult<()> {
        let mut frontier = vec![self.root];

        for _ in 0..self.depth {
            if frontier.is_empty() {
                break;
            }

            let mut next = Vec::new();

            for id in frontier {
                next.extend(self.handle_camera(id, camera, outcome)?);
            }

            frontier = next;
        }

        Ok(())
    }

    /// Updates the children of the tile and returns those that existed before.
    fn handle_camera(
        &mut self,
        id: TileId,
        camera: DVec2,
        outcome: &mut RefineOutcome,
    ) -> TerrainResult<Vec<TileId>> {
        let cells = self.tiles[id.0].candidate_cells(camera);
        let children = self.tiles[id.0].children.clone();

        let (kept, stale): (Vec<_>, Vec<_>) = children
            .into_iter()
            .partition(|child| cells.contains(&self.tiles[child.0].cell));

        for child in stale {
            let cell = self.tiles[child.0].cell;
            self.patch_hole(id, cell)?;
            self.clear_tile(child, outcome)?;
        }

        self.tiles[id.0].children.clone_from(&kept);

        let missing = cells
            .into_iter()
            .filter(|&cell| kept.iter().all(|child| self.tiles[child.0].cell != cell))
            .collect_vec();

        for cell in missing {
            if let Some(child) = self.create_sub_tile(id, cell, outcome)? {
                self.tiles[id.0].children.push(child);
            }
        }

        Ok(kept)
    }

    /// Creates and fills the sub tile covering `cell` of the parent.
    ///
    /// Returns `None` if the tile store is full. The parent is left unchanged in that case.
    fn create_sub_tile(
        &mut self,
        parent: TileId,
        cell: UVec2,
        outcome: &mut RefineOutcome,
    ) -> TerrainResult<Option<TileId>> {
        let tile = Tile::sub_tile(&self.tiles[parent.0], parent, cell);
        let id = TileId(self.tiles.insert(tile));

        let slot = match self.store.allocate(id) {
            Ok(slot) => slot,
            Err(TerrainError::ArenaFull { .. }) => {
                self.tiles.remove(id.0);
                outcome.allocation_failures += 1;
                return Ok(None);
            }
            Err(error) => {
                self.tiles.remove(id.0);
                return Err(error);
            }
        };

        self.tiles[id.0].slot = Some(slot);

        if let Err(error) = self.cut_hole(parent, cell) {
            self.release_tile(id)?;
            return Err(error);
        }

        if let Err(error) = self.fill_tile(id) {
            self.discard_sub_tile(parent, cell, id)?;
            return Err(error);
        }

        outcome.created += 1;
        Ok(Some(id))
    }

    /// Samples the heights of a sub tile and writes its geometry.
    ///
    /// Border vertices follow the continuous height of the parent, so that the sub tile
    /// meets the surrounding parent geometry without cracks. Interior vertices are
    /// sampled from the height source.
    fn fill_tile(&mut self, id: TileId) -> TerrainResult<()> {
        let tile = &self.tiles[id.0];
        let parent = &self.tiles[tile.parent.unwrap_or(self.root).0];

        let heights = Array2::from_shape_fn(tile.heights.dim(), |(y, x)| {
            let position = tile.vertex_position(x, y);

            if tile.is_border(x, y) {
                parent.get_height(position.x, position.y)
            } else {
                self.source.get_height(position.x, position.y)
            }
        });

        self.tiles[id.0].heights = heights;

        let tile = &self.tiles[id.0];
        let Some(slot) = tile.slot else {
            return Ok(());
        };

        self.builder
            .fill_vertices(self.store.vertex_block_mut(slot)?, tile);
        TileGeometryBuilder::fill_indices(
            self.store.index_block_mut(slot)?,
            tile.cells,
            slot.vertex_offset,
        );

        Ok(())
    }

    /// Frees the tile and all of its descendants.
    fn clear_tile(&mut self, id: TileId, outcome: &mut RefineOutcome) -> TerrainResult<()> {
        let children = std::mem::take(&mut self.tiles[id.0].children);

        for child in children {
            self.clear_tile(child, outcome)?;
        }

        self.release_tile(id)?;
        outcome.freed += 1;

        Ok(())
    }

    /// Drops a sub tile that was never attached to its parent and closes the hole cut for it.
    fn discard_sub_tile(&mut self, parent: TileId, cell: UVec2, id: TileId) -> TerrainResult<()> {
        self.patch_hole(parent, cell)?;
        self.release_tile(id)
    }

    fn release_tile(&mut self, id: TileId) -> TerrainResult<()> {
        self.store.free(&mut self.tiles, id)?;
        self.tiles.remove(id.0);

        Ok(())
    }

    /// The index block of a tile and the vertex offset its indices are relative to.
    fn index_block_mut(&mut self, id: TileId) -> TerrainResult<(&mut [u32], usize)> {
        match self.tiles[id.0].slot {
            None => Ok((self.root_indices.as_mut_slice(), 0)),
            Some(slot) => Ok((self.store.index_block_mut(slot)?, slot.vertex_offset)),
        }
    }

    fn cut_hole(&mut self, parent: TileId, cell: UVec2) -> TerrainResult<()> {
        let cells = self.tiles[parent.0].cells;
        let (block, _) = self.index_block_mut(parent)?;

        TileGeometryBuilder::cut_hole(block, cells, cell);
        Ok(())
    }

    fn patch_hole(&mut self, parent: TileId, cell: UVec2) -> TerrainResult<()> {
        let cells = self.tiles[parent.0].cells;
        let (block, vertex_offset) = self.index_block_mut(parent)?;

        TileGeometryBuilder::patch_hole(block, cells, cell, vertex_offset);
        Ok(())
    }

    /// Copies the current geometry into the snapshot, reusing its allocations.
    pub fn write_snapshot(&self, snapshot: &mut GeometrySnapshot) {
        snapshot.root_indices.clone_from(&self.root_indices);

        snapshot.vertices.clear();
        snapshot
            .vertices
            .extend_from_slice(self.store.used_vertices());

        snapshot.indices.clear();
        snapshot.indices.extend_from_slice(self.store.used_indices());

        snapshot.tile_count = self.store.len();
        snapshot.stats = self.stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_data::height_source::HeightGrid;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn source(config: &TerrainConfig) -> HeightSource {
        HeightSource::from_config(
            HeightGrid::from_fn(10, 10, |x, y| ((x * 7 + y * 3) % 11) as f32 / 11.0),
            config,
        )
    }

    fn tree(depth: u32) -> TileTree {
        let config = TerrainConfig::new(UVec2::splat(10), DVec2::splat(9.0), 4.0, depth);
        TileTree::new(&config, source(&config)).unwrap()
    }

    /// The index block a tile should have, given its active children.
    fn expected_indices(tree: &TileTree, id: TileId) -> Vec<u32> {
        let tile = tree.tile(id).unwrap();
        let vertex_offset = tile.slot.map_or(0, |slot| slot.vertex_offset);

        let mut block = vec![0; tree.store.indices_per_tile()];
        TileGeometryBuilder::fill_indices(&mut block, tile.cells, vertex_offset);

        for child in &tile.children {
            TileGeometryBuilder::cut_hole(&mut block, tile.cells, tree.tile(*child).unwrap().cell);
        }

        block
    }

    fn index_block(tree: &TileTree, id: TileId) -> &[u32] {
        match tree.tile(id).unwrap().slot {
            None => tree.root_indices(),
            Some(slot) => tree.store.index_block(slot).unwrap(),
        }
    }

    fn assert_invariants(tree: &TileTree) {
        assert_eq!(tree.tiles.len(), tree.active_tile_count() + 1);
        assert!(tree.active_tile_count() <= tree.store.capacity());
        assert_eq!(index_block(tree, tree.root), &expected_indices(tree, tree.root)[..]);

        for (list_pos, (id, tile)) in tree.sub_tiles().enumerate() {
            let slot = tile.slot.unwrap();
            assert_eq!(slot.list_pos, list_pos);
            assert!(tile.level >= 1 && tile.level <= tree.depth);

            let parent = tree.tile(tile.parent.unwrap()).unwrap();
            assert_eq!(parent.children.iter().filter(|&&child| child == id).count(), 1);
            assert_eq!(parent.level + 1, tile.level);

            assert_eq!(index_block(tree, id), &expected_indices(tree, id)[..]);
        }
    }

    #[test]
    fn no_refinement_without_depth() {
        let mut tree = tree(0);

        let outcome = tree.refine(DVec2::splat(4.5)).unwrap();

        assert!(!outcome.changed());
        assert_eq!(tree.active_tile_count(), 0);
        assert_eq!(tree.store().capacity(), 0);
        assert_invariants(&tree);
    }

    #[test]
    fn centered_camera_refines_center() {
        let mut tree = tree(2);
        let camera = DVec2::splat(4.5);

        let outcome = tree.refine(camera).unwrap();
        assert_eq!(outcome.created, 1);

        let (first, tile) = tree.sub_tiles().next().unwrap();
        assert_eq!(tile.cell, UVec2::ONE);
        assert_eq!(tile.level, 1);
        assert_eq!(tile.origin, DVec2::splat(3.0));
        assert_eq!(tree.root().children, vec![first]);

        // the hole covers the cells 3..6 on both axes
        let hole = tree
            .root_indices()
            .chunks(6)
            .positions(|cell| cell.iter().all(|&index| index == 0))
            .collect_vec();
        let expected = (3..6)
            .flat_map(|y| (3..6).map(move |x| y * 9 + x))
            .collect_vec();
        assert_eq!(hole, expected);

        let outcome = tree.refine(camera).unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(tree.active_tile_count(), 2);

        let second = tree.tile(first).unwrap().children[0];
        let tile = tree.tile(second).unwrap();
        assert_eq!(tile.cell, UVec2::ONE);
        assert_eq!(tile.level, 2);
        assert_eq!(tile.origin, DVec2::splat(4.0));

        assert!(!tree.refine(camera).unwrap().changed());
        assert_invariants(&tree);
    }

    #[test]
    fn moving_camera_replaces_tile() {
        let mut tree = tree(1);

        tree.refine(DVec2::splat(4.5)).unwrap();
        let outcome = tree.refine(DVec2::splat(7.5)).unwrap();

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.freed, 1);
        assert_eq!(tree.active_tile_count(), 1);

        let (_, tile) = tree.sub_tiles().next().unwrap();
        assert_eq!(tile.cell, UVec2::splat(2));
        assert_invariants(&tree);

        let stats = tree.stats();
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.tiles_created, 2);
        assert_eq!(stats.tiles_freed, 1);
    }

    #[test]
    fn receding_camera_frees_subtree() {
        let mut tree = tree(3);
        let camera = DVec2::splat(4.5);

        for _ in 0..3 {
            tree.refine(camera).unwrap();
        }
        let active = tree.active_tile_count();
        assert!(active >= 3);

        // far corner of the terrain, the whole center subtree goes away
        let outcome = tree.refine(DVec2::splat(8.9)).unwrap();
        assert_eq!(outcome.freed, active);
        assert_eq!(outcome.created, 1);
        assert_eq!(tree.active_tile_count(), 1);
        assert_invariants(&tree);
    }

    #[test]
    fn sub_tile_borders_follow_parent() {
        let mut tree = tree(2);
        let camera = DVec2::new(4.2, 5.1);

        tree.refine(camera).unwrap();
        tree.refine(camera).unwrap();

        for (_, tile) in tree.sub_tiles() {
            let parent = tree.tile(tile.parent.unwrap()).unwrap();
            let cells = tile.cell_count();

            for ((y, x), &height) in tile.heights.indexed_iter() {
                let position = tile.vertex_position(x, y);

                let expected = if x == 0 || y == 0 || x == cells.x as usize || y == cells.y as usize
                {
                    parent.get_height(position.x, position.y)
                } else {
                    tree.height_source().get_height(position.x, position.y)
                };

                assert_relative_eq!(height, expected, epsilon = 1e-12);
            }

            // the first vertex coincides with a parent vertex
            let vertex = ((tile.origin - parent.origin) / parent.step()).round();
            assert_relative_eq!(
                tile.heights[[0, 0]],
                parent.heights[[vertex.y as usize, vertex.x as usize]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn full_store_skips_candidates() {
        let config = TerrainConfig::new(UVec2::splat(10), DVec2::splat(9.0), 1.0, 1);
        let mut tree = TileTree::with_capacity(&config, source(&config), 1).unwrap();

        // on the corner of four cells
        let outcome = tree.refine(DVec2::splat(6.0)).unwrap();

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.allocation_failures, 3);
        assert_eq!(tree.root().children.len(), 1);
        assert_eq!(tree.stats().allocation_failures, 3);
        assert_invariants(&tree);
    }

    #[test]
    fn camera_out_of_bounds() {
        let mut tree = tree(2);
        tree.refine(DVec2::splat(4.5)).unwrap();

        let result = tree.refine(DVec2::new(-5.0, 4.5));

        assert!(matches!(result, Err(TerrainError::CameraOutOfBounds { .. })));
        assert_eq!(tree.active_tile_count(), 1);
        assert_eq!(tree.stats().out_of_bounds_passes, 1);
        assert_invariants(&tree);
    }

    #[test]
    fn random_walk_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tree = tree(3);

        for _ in 0..200 {
            let camera = DVec2::new(rng.random_range(-2.0..11.0), rng.random_range(-2.0..11.0));

            match tree.refine(camera) {
                Ok(_) | Err(TerrainError::CameraOutOfBounds { .. }) => {}
                Err(error) => panic!("refinement failed: {error}"),
            }

            assert_invariants(&tree);
        }
    }

    #[test]
    fn snapshot_copies_used_prefix() {
        let mut tree = tree(2);
        let mut snapshot = GeometrySnapshot::default();

        tree.refine(DVec2::splat(4.5)).unwrap();
        tree.refine(DVec2::splat(4.5)).unwrap();
        tree.write_snapshot(&mut snapshot);

        assert_eq!(snapshot.tile_count, 2);
        assert_eq!(snapshot.vertices.len(), 2 * 100);
        assert_eq!(snapshot.indices.len(), 2 * 9 * 9 * 6);
        assert_eq!(snapshot.root_indices, tree.root_indices());
        assert_eq!(snapshot.stats, tree.stats());
    }

    #[test]
    fn discarded_sub_tile_patches_parent() {
        let mut tree = tree(2);

        tree.refine(DVec2::splat(4.5)).unwrap();
        tree.refine(DVec2::splat(4.5)).unwrap();
        assert_eq!(tree.active_tile_count(), 2);

        let parent = tree.root().children[0];
        let child = tree.tiles[parent.0].children.pop().unwrap();
        assert_ne!(index_block(&tree, parent), &expected_indices(&tree, parent)[..]);

        tree.discard_sub_tile(parent, UVec2::ONE, child).unwrap();

        assert_eq!(tree.active_tile_count(), 1);
        assert!(tree.tile(child).is_none());
        assert_invariants(&tree);
    }

    #[test]
    fn root_height_edit() {
        let mut tree = tree(1);

        tree.set_root_height(9, 0, 2.5).unwrap();
        assert_eq!(tree.root().heights[[0, 9]], 2.5);

        assert!(matches!(
            tree.set_root_height(10, 0, 1.0),
            Err(TerrainError::GridOutOfRange { width: 10, .. })
        ));
    }
}
