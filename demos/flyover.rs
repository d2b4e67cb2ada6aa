use bevy::{app::ScheduleRunnerPlugin, log::LogPlugin, math::DVec2, prelude::*, utils::Duration};
use bevy_multires_terrain::prelude::*;
use std::f64::consts::TAU;

const GRID_SIZE: u32 = 64;
const WORLD_SIZE: f64 = 630.0;
const HEIGHT: f64 = 40.0;
const DEPTH: u32 = 3;
const FRAME_COUNT: u32 = 600;

#[derive(Resource)]
struct Terrain(TerrainRenderer<HeadlessBackend>);

fn main() {
    App::new()
        .add_plugins((
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
                1.0 / 60.0,
            ))),
            LogPlugin::default(),
        ))
        .add_systems(Startup, setup)
        .add_systems(Update, (fly, report).chain())
        .run();
}

fn setup(mut commands: Commands) {
    let config = TerrainConfig::new(
        UVec2::splat(GRID_SIZE),
        DVec2::splat(WORLD_SIZE),
        HEIGHT,
        DEPTH,
    )
    .with_texture_scale(DVec2::splat(1.0 / 64.0));

    // rolling hills
    let heights = HeightGrid::from_fn(256, 256, |x, y| {
        let (x, y) = (x as f32 / 32.0, y as f32 / 32.0);
        0.5 + 0.25 * x.sin() * y.cos() + 0.1 * (3.0 * x + y).sin()
    });
    let source = HeightSource::from_config(heights, &config);

    match TerrainRenderer::with_height_source(config, source, HeadlessBackend::new()) {
        Ok(renderer) => commands.insert_resource(Terrain(renderer)),
        Err(error) => error!("Could not create the terrain: {error}"),
    }
}

fn fly(time: Res<Time>, terrain: Option<ResMut<Terrain>>) {
    let Some(mut terrain) = terrain else {
        return;
    };

    let angle = time.elapsed_secs_f64() * TAU / 10.0;
    let center = WORLD_SIZE / 2.0;
    let radius = WORLD_SIZE / 3.0;

    terrain
        .0
        .set_camera_position(center + radius * angle.cos(), center + radius * angle.sin());
    terrain.0.render();
}

fn report(
    mut frames: Local<u32>,
    terrain: Option<ResMut<Terrain>>,
    mut exit: EventWriter<AppExit>,
) {
    *frames += 1;

    let Some(mut terrain) = terrain else {
        exit.send(AppExit::error());
        return;
    };

    let draws = terrain.0.backend_mut().take_draws();

    let diagnostics = terrain.0.diagnostics();
    while let Ok(diagnostic) = diagnostics.try_recv() {
        warn!("{diagnostic:?}");
    }

    if *frames % 60 == 0 {
        let camera = terrain.0.camera_position();
        let stats = terrain.0.stats();

        info!(
            "camera ({:.1}, {:.1}) at height {:.2}: {} sub tiles drawn with {} draw calls, {:?}",
            camera.x,
            camera.y,
            terrain.0.height_at(camera.x, camera.y),
            terrain.0.drawn_tile_count(),
            draws.len(),
            stats
        );
    }

    if *frames == FRAME_COUNT {
        exit.send(AppExit::Success);
    }
}
