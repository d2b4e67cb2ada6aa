//! The background refinement of the tile tree.
//!
//! The [`TileTree`] and its geometry are shared between the render thread and a single
//! refiner thread through [`SharedTerrain`]. The refiner periodically refines the tree
//! against the latest camera position and publishes a complete copy of the geometry
//! whenever the tree changed.
//!
//! Locks are always taken in the order tree, mailbox. The render thread only ever
//! tries to lock the mailbox, so it never waits for a refinement pass to finish.

use crate::{
    error::{TerrainError, TerrainResult},
    render::mailbox::{GeometrySnapshot, SnapshotMailbox},
    terrain_data::tile_tree::{RefineOutcome, TileTree},
};
use async_channel::{Receiver, Sender};
use bevy::{
    log::{debug, error, info, warn},
    math::DVec2,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// A change of a root vertex height, forwarded from the render thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightEdit {
    pub x: u32,
    pub y: u32,
    pub height: f64,
}

/// Noteworthy events of the terrain, reported to the diagnostic sink.
#[derive(Clone, Debug, PartialEq)]
pub enum TerrainDiagnostic {
    /// Sub tiles were skipped, because the tile store was full.
    ArenaExhausted { skipped: usize, capacity: usize },
    CameraOutOfBounds { position: DVec2 },
    GpuAllocationFailed { message: String },
    RefineFailed { message: String },
}

/// The state shared by the render thread and the refiner thread.
pub struct SharedTerrain {
    tree: Mutex<TileTree>,
    mailbox: SnapshotMailbox<GeometrySnapshot>,
    camera: Mutex<DVec2>,
    edits: Receiver<HeightEdit>,
    diagnostics: Sender<TerrainDiagnostic>,
    out_of_bounds: AtomicBool,
    arena_exhausted: AtomicBool,
}

impl SharedTerrain {
    pub fn new(
        tree: TileTree,
        edits: Receiver<HeightEdit>,
        diagnostics: Sender<TerrainDiagnostic>,
    ) -> Self {
        let mut snapshot = GeometrySnapshot::default();
        tree.write_snapshot(&mut snapshot);

        Self {
            tree: Mutex::new(tree),
            mailbox: SnapshotMailbox::new(snapshot),
            camera: Mutex::new(DVec2::ZERO),
            edits,
            diagnostics,
            out_of_bounds: AtomicBool::new(false),
            arena_exhausted: AtomicBool::new(false),
        }
    }

    pub fn set_camera(&self, position: DVec2) {
        *self.camera.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn camera(&self) -> DVec2 {
        *self.camera.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mailbox(&self) -> &SnapshotMailbox<GeometrySnapshot> {
        &self.mailbox
    }

    /// Locks the tile tree. Blocks while a refinement pass is running.
    pub fn lock_tree(&self) -> MutexGuard<'_, TileTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn report(&self, diagnostic: TerrainDiagnostic) {
        // a full or closed sink drops the diagnostic
        let _ = self.diagnostics.try_send(diagnostic);
    }

    fn apply_edits(&self, tree: &mut TileTree) {
        while let Ok(edit) = self.edits.try_recv() {
            if let Err(error) = tree.set_root_height(edit.x, edit.y, edit.height) {
                warn!("Dropped height edit: {error}");
            }
        }
    }

    /// Runs a single refinement pass and publishes the geometry if it changed.
    ///
    /// Returns the outcome of the pass, or `None` if the pass was aborted.
    pub fn refine_once(&self) -> Option<RefineOutcome> {
        let camera = self.camera();
        let mut tree = self.lock_tree();

        self.apply_edits(&mut tree);

        match tree.refine(camera) {
            Ok(outcome) => {
                if self.out_of_bounds.swap(false, Ordering::Relaxed) {
                    debug!("The camera at {camera} is back above the terrain.");
                }

                if outcome.allocation_failures > 0 {
                    let capacity = tree.store().capacity();

                    if !self.arena_exhausted.swap(true, Ordering::Relaxed) {
                        warn!(
                            "The tile store is full ({capacity} sub tiles), skipped {} sub tiles.",
                            outcome.allocation_failures
                        );
                    }

                    self.report(TerrainDiagnostic::ArenaExhausted {
                        skipped: outcome.allocation_failures,
                        capacity,
                    });
                } else {
                    self.arena_exhausted.store(false, Ordering::Relaxed);
                }

                if outcome.changed() {
                    tree.record_publish();
                    self.mailbox
                        .publish_with(|snapshot| tree.write_snapshot(snapshot));
                }

                Some(outcome)
            }
            Err(TerrainError::CameraOutOfBounds { position }) => {
                if !self.out_of_bounds.swap(true, Ordering::Relaxed) {
                    debug!("The camera at {position} is outside of the terrain, refinement paused.");
                }

                self.report(TerrainDiagnostic::CameraOutOfBounds { position });
                None
            }
            Err(error) => {
                error!("Terrain refinement failed: {error}");
                self.report(TerrainDiagnostic::RefineFailed {
                    message: error.to_string(),
                });
                None
            }
        }
    }
}

/// The worker thread that keeps refining the shared tile tree.
///
/// The thread is stopped and joined when the refiner is dropped.
pub struct BackgroundRefiner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundRefiner {
    pub fn spawn(shared: Arc<SharedTerrain>, interval: Duration) -> TerrainResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = stop.clone();

            thread::Builder::new()
                .name("terrain-refiner".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        shared.refine_once();
                        thread::park_timeout(interval);
                    }
                })?
        };

        info!("Started the terrain refiner with an interval of {interval:?}.");

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the thread to stop and waits for the current pass to finish.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();

        if handle.join().is_err() {
            error!("The terrain refiner panicked.");
        } else {
            info!("Stopped the terrain refiner.");
        }
    }
}

impl Drop for BackgroundRefiner {
    fn drop(&mut self) {
        self.stop();
    }
}
