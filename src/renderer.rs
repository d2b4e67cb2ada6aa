use crate::{
    config::TerrainConfig,
    error::{TerrainError, TerrainResult},
    refiner::{BackgroundRefiner, HeightEdit, SharedTerrain, TerrainDiagnostic},
    render::{
        geometry::TileGeometryBuilder, mailbox::GeometrySnapshot, DrawMode, GpuBackend, GpuMesh,
        TerrainVertex,
    },
    terrain_data::{
        height_source::HeightSource,
        tile::Tile,
        tile_tree::{RefineOutcome, TerrainStats, TileTree},
    },
};
use async_channel::{Receiver, Sender};
use bevy::{
    log::{error, info, warn},
    math::{DVec2, UVec2},
};
use bytemuck::cast_slice;
use std::sync::Arc;

/// The number of undelivered diagnostics kept before new ones are dropped.
const DIAGNOSTIC_CAPACITY: usize = 64;

/// Renders a multi resolution height field terrain through a [`GpuBackend`].
///
/// The low resolution root tile is owned by the render thread and drawn every frame.
/// The high resolution sub tiles are maintained by a [`BackgroundRefiner`] thread, which is
/// started once the high resolution buffers could be allocated. Their geometry is picked up
/// by [`render`](Self::render) whenever the refiner published a new snapshot.
pub struct TerrainRenderer<B: GpuBackend> {
    config: TerrainConfig,
    backend: B,
    builder: TileGeometryBuilder,
    shared: Arc<SharedTerrain>,
    refiner: Option<BackgroundRefiner>,
    /// The render thread's copy of the root tile, which receives the height edits.
    root: Tile,
    root_vertices: Vec<TerrainVertex>,
    root_dirty: bool,
    height_range: (f64, f64),
    published: Box<GeometrySnapshot>,
    root_mesh: Option<GpuMesh<B::Buffer>>,
    high_mesh: Option<GpuMesh<B::Buffer>>,
    draw_mode: DrawMode,
    edits: Sender<HeightEdit>,
    diagnostics: Receiver<TerrainDiagnostic>,
}

impl<B: GpuBackend> TerrainRenderer<B> {
    /// Creates the terrain from the height image referenced by the config.
    pub fn new(config: TerrainConfig, backend: B) -> TerrainResult<Self> {
        let source = HeightSource::load(&config).inspect_err(|error| {
            error!("Failed to create the terrain: {error}");
        })?;

        Self::with_height_source(config, source, backend)
    }

    pub fn with_height_source(
        config: TerrainConfig,
        source: HeightSource,
        backend: B,
    ) -> TerrainResult<Self> {
        let tree = TileTree::new(&config, source).inspect_err(|error| {
            error!("Failed to create the terrain: {error}");
        })?;

        let root = tree.root().clone();
        let mut published = Box::<GeometrySnapshot>::default();
        tree.write_snapshot(&mut published);

        let (edits, edit_receiver) = async_channel::unbounded();
        let (diagnostic_sender, diagnostics) = async_channel::bounded(DIAGNOSTIC_CAPACITY);

        info!(
            "Created a terrain with {}x{} vertices, a depth of {} and room for {} sub tiles.",
            config.grid_width,
            config.grid_height,
            config.depth,
            config.max_sub_tile_count()
        );

        Ok(Self {
            builder: TileGeometryBuilder::new(&config),
            shared: Arc::new(SharedTerrain::new(tree, edit_receiver, diagnostic_sender)),
            refiner: None,
            root_vertices: vec![TerrainVertex::default(); config.vertices_per_tile()],
            root_dirty: true,
            height_range: height_range(&root),
            root,
            published,
            root_mesh: None,
            high_mesh: None,
            draw_mode: DrawMode::default(),
            edits,
            diagnostics,
            config,
            backend,
        })
    }

    /// Uploads pending geometry and draws the terrain.
    ///
    /// Never waits for the refiner. Errors only abort the current frame.
    pub fn render(&mut self) {
        if let Err(error) = self.try_render() {
            warn!("Skipped a terrain frame: {error}");
        }
    }

    fn try_render(&mut self) -> TerrainResult<()> {
        if self.root_mesh.is_none() {
            let mesh = GpuMesh::create(
                &mut self.backend,
                "terrain_root",
                self.config.vertices_per_tile(),
                self.config.indices_per_tile(),
            )
            .inspect_err(|error| self.report_allocation_failure(error))?;

            info!("Allocated the low resolution terrain buffers.");

            self.backend
                .write_buffer(&mesh.indices, 0, cast_slice(&self.published.root_indices));
            self.root_mesh = Some(mesh);
            self.root_dirty = true;
        }

        if self.root_dirty {
            self.update_root_vertices();
        }

        if self.config.depth > 0 && self.refiner.is_none() {
            self.start_refinement()?;
        }

        if self.shared.mailbox().try_take(&mut self.published) {
            self.upload_published();
        }

        if let Some(mesh) = &self.root_mesh {
            mesh.draw(
                &mut self.backend,
                self.published.root_indices.len(),
                self.draw_mode.polygon_modes(false),
            );
        }

        if self.published.tile_count > 0 {
            if let Some(mesh) = &self.high_mesh {
                mesh.draw(
                    &mut self.backend,
                    self.published.indices.len(),
                    self.draw_mode.polygon_modes(true),
                );
            }
        }

        Ok(())
    }

    fn report_allocation_failure(&self, error: &TerrainError) {
        self.shared.report(TerrainDiagnostic::GpuAllocationFailed {
            message: error.to_string(),
        });
    }

    fn update_root_vertices(&mut self) {
        let Some(mesh) = &self.root_mesh else {
            return;
        };

        self.builder.fill_vertices(&mut self.root_vertices, &self.root);
        self.backend
            .write_buffer(&mesh.vertices, 0, cast_slice(&self.root_vertices));
        self.root_dirty = false;
    }

    /// Allocates the high resolution buffers and starts the refiner thread.
    /// A failed allocation is retried on the next frame.
    fn start_refinement(&mut self) -> TerrainResult<()> {
        if self.high_mesh.is_none() {
            let capacity = self.config.max_sub_tile_count();

            match GpuMesh::create(
                &mut self.backend,
                "terrain_high_resolution",
                capacity * self.config.vertices_per_tile(),
                capacity * self.config.indices_per_tile(),
            ) {
                Ok(mesh) => {
                    info!("Allocated the high resolution terrain buffers for {capacity} sub tiles.");
                    self.high_mesh = Some(mesh);
                    self.upload_published();
                }
                Err(error) => {
                    warn!("Refinement stays disabled until the next frame: {error}");
                    self.report_allocation_failure(&error);
                    return Ok(());
                }
            }
        }

        self.refiner = Some(BackgroundRefiner::spawn(
            self.shared.clone(),
            self.config.refine_interval(),
        )?);

        Ok(())
    }

    fn upload_published(&mut self) {
        let snapshot = &self.published;

        if let Some(mesh) = &self.root_mesh {
            self.backend
                .write_buffer(&mesh.indices, 0, cast_slice(&snapshot.root_indices));
        }

        if let Some(mesh) = &self.high_mesh {
            self.backend
                .write_buffer(&mesh.vertices, 0, cast_slice(&snapshot.vertices));
            self.backend
                .write_buffer(&mesh.indices, 0, cast_slice(&snapshot.indices));
        }
    }

    /// Moves the point of interest the terrain is refined around.
    pub fn set_camera_position(&self, x: f64, y: f64) {
        self.shared.set_camera(DVec2::new(x, y));
    }

    pub fn camera_position(&self) -> DVec2 {
        self.shared.camera()
    }

    /// Overwrites the height of a low resolution grid vertex.
    ///
    /// The root geometry is rebuilt on the next frame. Sub tiles created afterwards follow
    /// the new height along their borders.
    pub fn set_height(&mut self, x: u32, y: u32, height: f64) -> TerrainResult<()> {
        let grid = self.config.grid_size();
        let in_range = x < grid.x && y < grid.y;

        debug_assert!(
            in_range,
            "grid coordinate ({x}, {y}) is outside of the {}x{} grid",
            grid.x, grid.y
        );

        if !in_range {
            return Err(TerrainError::GridOutOfRange {
                x,
                y,
                width: grid.x,
                height: grid.y,
            });
        }

        self.root.heights[[y as usize, x as usize]] = height;
        self.root_dirty = true;
        self.height_range = (
            self.height_range.0.min(height),
            self.height_range.1.max(height),
        );

        // the receiver lives as long as the renderer
        let _ = self.edits.try_send(HeightEdit { x, y, height });

        Ok(())
    }

    /// The height of the low resolution terrain at the world position.
    pub fn height_at(&self, x: f64, y: f64) -> f64 {
        self.root.get_height(x, y)
    }

    /// The lowest and the highest height of the low resolution grid.
    pub fn height_range(&self) -> (f64, f64) {
        self.height_range
    }

    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode
    }

    pub fn set_draw_mode(&mut self, draw_mode: DrawMode) {
        self.draw_mode = draw_mode;
    }

    /// Toggles the filled drawing of both resolution levels.
    pub fn set_draw_solid(&mut self, enabled: bool) {
        self.draw_mode
            .set(DrawMode::SOLID | DrawMode::HIGH_SOLID, enabled);
    }

    /// Toggles the wireframe drawing of both resolution levels.
    pub fn set_draw_wireframe(&mut self, enabled: bool) {
        self.draw_mode
            .set(DrawMode::WIREFRAME | DrawMode::HIGH_WIREFRAME, enabled);
    }

    /// Runs a refinement pass on the calling thread.
    /// Blocks while the refiner thread is in the middle of a pass.
    pub fn refine_now(&self) -> Option<RefineOutcome> {
        self.shared.refine_once()
    }

    /// Grants access to the tile tree. Blocks while the refiner thread is in the middle of a pass.
    pub fn with_tile_tree<T>(&self, f: impl FnOnce(&TileTree) -> T) -> T {
        f(&*self.shared.lock_tree())
    }

    /// The number of sub tiles of the geometry that is currently drawn.
    pub fn drawn_tile_count(&self) -> usize {
        self.published.tile_count
    }

    /// The refinement counters of the geometry that is currently drawn.
    pub fn stats(&self) -> TerrainStats {
        self.published.stats
    }

    /// A receiver of the diagnostics reported by the renderer and the refiner.
    pub fn diagnostics(&self) -> Receiver<TerrainDiagnostic> {
        self.diagnostics.clone()
    }

    /// The number of vertices of the low resolution grid.
    pub fn low_res_vertex_count(&self) -> UVec2 {
        self.config.grid_size()
    }

    /// The number of cells of the low resolution grid.
    pub fn low_res_cell_count(&self) -> UVec2 {
        self.config.cell_count()
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Whether the low resolution buffers have been allocated.
    pub fn is_initialized(&self) -> bool {
        self.root_mesh.is_some()
    }

    /// Whether the refiner thread is running.
    pub fn is_refining(&self) -> bool {
        self.refiner
            .as_ref()
            .is_some_and(BackgroundRefiner::is_running)
    }
}

impl<B: GpuBackend> Drop for TerrainRenderer<B> {
    fn drop(&mut self) {
        if let Some(mut refiner) = self.refiner.take() {
            refiner.stop();
        }
    }
}

fn height_range(tile: &Tile) -> (f64, f64) {
    tile.heights()
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &height| {
            (min.min(height), max.max(height))
        })
}
