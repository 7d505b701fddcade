use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use skarn_server::config::ServerConfig;
use skarn_server::generate::{FlatGenerator, NoopPopulator};
use skarn_server::runtime::TerrainRuntime;
use skarn_server::terrain::{PlayerView, ServerTerrain};
use skarn_shared::block::register_default_blocks;
use skarn_shared::coords::ChunkPos;
use skarn_shared::delayed::UpdateKindTable;

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let mut config_path = PathBuf::from("server.toml");
    let mut world_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(value) = args.next() else {
                    eprintln!("--config expects a path argument");
                    std::process::exit(2);
                };
                config_path = PathBuf::from(value);
            }
            "--world" => {
                let Some(value) = args.next() else {
                    eprintln!("--world expects a path argument");
                    std::process::exit(2);
                };
                world_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!("Usage: skarn_server [--config <path>] [--world <path>]");
                return;
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }

    let mut config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {}: {err}", config_path.display());
            std::process::exit(1);
        }
    };
    if let Some(world_path) = world_path {
        config.world_path = world_path;
    }

    let terrain = Arc::new(
        ServerTerrain::new(
            register_default_blocks(),
            Box::new(FlatGenerator::new(64)),
            Arc::new(NoopPopulator),
            UpdateKindTable::new(),
        )
        .with_persistence(&config.world_path),
    );

    let runtime = match TerrainRuntime::spawn(terrain.clone(), config.populate_threads) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start terrain runtime: {err}");
            std::process::exit(1);
        }
    };

    let stop = runtime.stop_signal();
    let handler_stop = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received, saving world...");
        handler_stop.stop();
    }) {
        eprintln!("failed to set Ctrl+C handler: {err}");
        std::process::exit(1);
    }

    // Standalone world host: one stationary observer keeps terrain around
    // the origin resident until a network front end attaches players.
    terrain.set_player(
        0,
        PlayerView {
            column: ChunkPos::new(0, 0),
            loading_radius: config.loading_radius,
        },
    );

    info!(
        "serving world at {} (radius {})",
        config.world_path.display(),
        config.loading_radius
    );

    let tick = Duration::from_secs(1) / config.tick_rate;
    let mut last = Instant::now();
    while !stop.is_stopped() {
        std::thread::sleep(tick);
        let now = Instant::now();
        terrain.tick_delayed(now.duration_since(last).as_secs_f32());
        last = now;
    }

    runtime.shutdown();
    info!("world saved, bye");
}
