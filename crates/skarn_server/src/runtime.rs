use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};

use skarn_core::events::EventSender;
use skarn_core::jobs::JobSystem;
use skarn_core::signal::StopSignal;

use crate::loader::ChunkLoader;
use crate::terrain::ServerTerrain;
use crate::updater::{ChunkUpdater, TerrainMutation, UnloadQueue};

/// Owns the loader and updater threads for one world. Gameplay keeps the
/// terrain handle for reads and the mutation sender for writes; dropping
/// everything through `shutdown` saves the world before the process ends.
pub struct TerrainRuntime {
    pub terrain: Arc<ServerTerrain>,
    pub mutations: EventSender<TerrainMutation>,
    pub unloads: Arc<UnloadQueue>,
    stop: StopSignal,
    loader: JoinHandle<()>,
    updater: JoinHandle<()>,
}

impl TerrainRuntime {
    pub fn spawn(terrain: Arc<ServerTerrain>, populate_threads: usize) -> io::Result<Self> {
        let stop = StopSignal::new();
        let unloads = Arc::new(UnloadQueue::new());
        let jobs = JobSystem::named("populate", populate_threads)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("populate pool: {e}")))?;

        let loader = ChunkLoader::new(terrain.clone(), unloads.clone(), jobs);
        let loader_stop = stop.clone();
        let loader = std::thread::Builder::new()
            .name("chunk-loader".to_string())
            .spawn(move || loader.run(loader_stop))?;

        let (updater, mutations) = ChunkUpdater::new(terrain.clone(), unloads.clone());
        let updater_stop = stop.clone();
        let updater = std::thread::Builder::new()
            .name("chunk-updater".to_string())
            .spawn(move || updater.run(updater_stop))?;

        Ok(Self {
            terrain,
            mutations,
            unloads,
            stop,
            loader,
            updater,
        })
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Stops both threads, then writes every still-resident chunk out.
    /// The updater drains its queues once more before exiting, so unloads
    /// in flight are not lost.
    pub fn shutdown(self) {
        info!("shutting down terrain runtime");
        self.stop.stop();
        if self.loader.join().is_err() {
            error!("chunk loader thread panicked");
        }
        if self.updater.join().is_err() {
            error!("chunk updater thread panicked");
        }
        self.terrain.save_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::TerrainRuntime;
    use crate::generate::{FlatGenerator, NoopPopulator};
    use crate::lifecycle::ChunkState;
    use crate::terrain::{PlayerView, ServerTerrain};
    use skarn_shared::block::register_default_blocks;
    use skarn_shared::coords::ChunkPos;
    use skarn_shared::delayed::UpdateKindTable;

    #[test]
    fn runtime_loads_around_a_player_and_shuts_down() {
        let terrain = Arc::new(ServerTerrain::new(
            register_default_blocks(),
            Box::new(FlatGenerator::new(4)),
            Arc::new(NoopPopulator),
            UpdateKindTable::new(),
        ));
        let runtime = TerrainRuntime::spawn(terrain.clone(), 2).expect("spawn runtime");

        terrain.set_player(
            1,
            PlayerView {
                column: ChunkPos::new(0, 0),
                loading_radius: 1,
            },
        );

        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let ready = terrain
                .store
                .get(ChunkPos::new(0, 0))
                .is_some_and(|chunk| chunk.state() == ChunkState::Sendable);
            if ready {
                break;
            }
            assert!(Instant::now() < deadline, "player column never sendable");
            std::thread::sleep(Duration::from_millis(10));
        }

        runtime.shutdown();
    }
}
