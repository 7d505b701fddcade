use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tracing::{debug, info};

use skarn_core::events::{channel, EventReceiver, EventSender};
use skarn_core::jobs::JobSystem;
use skarn_core::signal::StopSignal;
use skarn_shared::coords::ChunkPos;

use crate::lifecycle::{update_adjacent, ChunkState};
use crate::terrain::ServerTerrain;
use crate::updater::UnloadQueue;

/// Chunks brought into the store per pass.
pub const LOAD_CAP_PER_PASS: usize = 32;
/// Population jobs dispatched per pass.
pub const POPULATE_CAP_PER_PASS: usize = 32;
/// Below this many missing chunks the load order is not worth sorting.
pub const SORT_THRESHOLD: usize = 64;
/// Chunks past a player's loading radius that must still be resident.
/// Sendable needs the neighborhood Loaded, which needs the neighborhood
/// beyond that finished, which needs one more ring of existence: three
/// rings, measured per axis so corner chunks get their diagonals too.
pub const REQUIRED_MARGIN: i32 = 3;

const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// The control loop that owns every lifecycle transition. Loads chunks
/// around players, dispatches population jobs, runs finish decorators and
/// queues far chunks for unload. Population runs on a job pool; its
/// completions come back over a channel so this thread stays the only
/// state writer.
pub struct ChunkLoader {
    terrain: Arc<ServerTerrain>,
    unloads: Arc<UnloadQueue>,
    jobs: JobSystem,
    populated_tx: EventSender<ChunkPos>,
    populated_rx: EventReceiver<ChunkPos>,
}

impl ChunkLoader {
    pub fn new(terrain: Arc<ServerTerrain>, unloads: Arc<UnloadQueue>, jobs: JobSystem) -> Self {
        let (populated_tx, populated_rx) = channel();
        Self {
            terrain,
            unloads,
            jobs,
            populated_tx,
            populated_rx,
        }
    }

    /// One full pass. Returns true when at least one chunk was loaded, so
    /// the outer loop knows whether it may sleep.
    pub fn run_pass(&self) -> bool {
        self.apply_population_completions();

        let players = self.terrain.players_snapshot();
        if players.is_empty() {
            for pos in self.terrain.store.positions() {
                self.unloads.push(pos);
            }
            return false;
        }

        let mut required = FxHashSet::default();
        for player in &players {
            let radius = player.loading_radius + REQUIRED_MARGIN;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    required.insert(player.column + ChunkPos::new(dx, dy));
                }
            }
        }

        let loaded = self.load_missing(&players);
        self.dispatch_population();
        self.finish_eligible();

        for pos in self.terrain.store.positions() {
            if !required.contains(&pos) {
                self.unloads.push(pos);
            }
        }

        // The transition sweep runs last so chunks loaded, populated or
        // finished this pass advance immediately.
        for pos in self.terrain.store.positions() {
            update_adjacent(&self.terrain.store, pos);
        }

        loaded > 0
    }

    pub fn run(&self, stop: StopSignal) {
        info!("chunk loader running");
        while !stop.is_stopped() {
            if !self.run_pass() {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        info!("chunk loader stopped");
    }

    /// Population jobs report back over the channel; the state flip to
    /// `Populated` happens here, on the loader thread.
    fn apply_population_completions(&self) {
        for pos in self.populated_rx.drain() {
            if let Some(chunk) = self.terrain.store.get(pos) {
                chunk.set_state(ChunkState::Populated);
            }
        }
    }

    fn load_missing(&self, players: &[crate::terrain::PlayerView]) -> usize {
        let mut budget = LOAD_CAP_PER_PASS;
        let mut loaded = 0;

        for player in players {
            if budget == 0 {
                break;
            }
            let radius = player.loading_radius + REQUIRED_MARGIN;
            let mut missing: Vec<ChunkPos> = Vec::new();
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let pos = player.column + ChunkPos::new(dx, dy);
                    if !self.terrain.store.contains(pos) {
                        missing.push(pos);
                    }
                }
            }

            // Nearest-first only matters when far behind, after a teleport
            // or login burst.
            if missing.len() > SORT_THRESHOLD {
                missing.sort_by_key(|pos| pos.distance_sq(player.column));
            }

            for pos in missing.into_iter().take(budget) {
                self.terrain.create_chunk(pos);
                budget -= 1;
                loaded += 1;
            }
        }

        if loaded > 0 {
            debug!("loaded {loaded} chunks");
        }
        loaded
    }

    fn dispatch_population(&self) {
        let mut budget = POPULATE_CAP_PER_PASS;
        for pos in self.terrain.store.positions() {
            if budget == 0 {
                break;
            }
            let Some(chunk) = self.terrain.store.get(pos) else {
                continue;
            };
            if chunk.state() != ChunkState::ShouldPopulate || !chunk.mark_populate_queued() {
                continue;
            }
            chunk.set_state(ChunkState::Populating);
            budget -= 1;

            let terrain = self.terrain.clone();
            let done = self.populated_tx.clone();
            self.jobs.spawn(move || {
                // The chunk may have been unloaded since dispatch; a
                // reload gets a fresh latch and is queued again.
                if let Some(chunk) = terrain.store.get(pos) {
                    terrain.populate_chunk(&chunk);
                    let _ = done.send(pos);
                }
            });
        }
    }

    fn finish_eligible(&self) {
        for pos in self.terrain.store.positions() {
            let Some(chunk) = self.terrain.store.get(pos) else {
                continue;
            };
            if chunk.state().at_least_border() && !chunk.is_finished() {
                self.terrain.finish_chunk(&chunk);
            }
        }
    }
}
