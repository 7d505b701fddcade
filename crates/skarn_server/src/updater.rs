use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashSet;
use tracing::info;

use skarn_core::events::{channel, EventReceiver, EventSender};
use skarn_core::signal::StopSignal;
use skarn_shared::coords::ChunkPos;

use crate::terrain::ServerTerrain;

const UPDATER_SLEEP: Duration = Duration::from_millis(50);

/// A deferred terrain mutation, queued by gameplay or network handlers
/// and executed on the updater thread.
pub type TerrainMutation = Box<dyn FnOnce(&ServerTerrain) + Send + 'static>;

/// Chunks scheduled for unload. The loader pushes here; the updater pops,
/// serializes and removes. Deduplicated so a chunk queued across several
/// passes is still unloaded once.
#[derive(Default)]
pub struct UnloadQueue {
    inner: Mutex<UnloadQueueInner>,
}

#[derive(Default)]
struct UnloadQueueInner {
    order: VecDeque<ChunkPos>,
    queued: FxHashSet<ChunkPos>,
}

impl UnloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, pos: ChunkPos) {
        let mut inner = self.inner.lock().expect("unload queue lock poisoned");
        if inner.queued.insert(pos) {
            inner.order.push_back(pos);
        }
    }

    pub fn pop(&self) -> Option<ChunkPos> {
        let mut inner = self.inner.lock().expect("unload queue lock poisoned");
        let pos = inner.order.pop_front()?;
        inner.queued.remove(&pos);
        Some(pos)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("unload queue lock poisoned")
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains queued block changes and chunk unloads. Runs on its own thread
/// so disk writes and edit bursts never stall the loader's state machine.
pub struct ChunkUpdater {
    terrain: Arc<ServerTerrain>,
    changes: EventReceiver<TerrainMutation>,
    unloads: Arc<UnloadQueue>,
}

impl ChunkUpdater {
    pub fn new(
        terrain: Arc<ServerTerrain>,
        unloads: Arc<UnloadQueue>,
    ) -> (Self, EventSender<TerrainMutation>) {
        let (tx, rx) = channel();
        (
            Self {
                terrain,
                changes: rx,
                unloads,
            },
            tx,
        )
    }

    /// One drain of both queues. Returns true when there was nothing to
    /// do, so the caller knows it may sleep.
    pub fn drain_pass(&self) -> bool {
        let mut idle = true;

        for change in self.changes.drain() {
            change(&self.terrain);
            idle = false;
        }

        while let Some(pos) = self.unloads.pop() {
            // Serialize-then-remove; unload_chunk ignores chunks already
            // gone, so duplicate queue entries are harmless.
            self.terrain.unload_chunk(pos);
            idle = false;
        }

        idle
    }

    pub fn run(&self, stop: StopSignal) {
        info!("chunk updater running");
        while !stop.is_stopped() {
            if self.drain_pass() {
                std::thread::sleep(UPDATER_SLEEP);
            }
        }
        // Final drain so edits and unloads queued during shutdown land on
        // disk before the terrain's closing save.
        self.drain_pass();
        info!("chunk updater stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ChunkUpdater, UnloadQueue};
    use crate::generate::{FlatGenerator, NoopPopulator};
    use crate::terrain::ServerTerrain;
    use skarn_shared::block::{register_default_blocks, BlockId};
    use skarn_shared::coords::ChunkPos;
    use skarn_shared::delayed::UpdateKindTable;

    fn terrain() -> Arc<ServerTerrain> {
        Arc::new(ServerTerrain::new(
            register_default_blocks(),
            Box::new(FlatGenerator::new(4)),
            Arc::new(NoopPopulator),
            UpdateKindTable::new(),
        ))
    }

    #[test]
    fn unload_queue_deduplicates() {
        let queue = UnloadQueue::new();
        queue.push(ChunkPos::new(1, 1));
        queue.push(ChunkPos::new(1, 1));
        queue.push(ChunkPos::new(2, 2));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(ChunkPos::new(1, 1)));
        assert_eq!(queue.pop(), Some(ChunkPos::new(2, 2)));
        assert_eq!(queue.pop(), None);

        // A pos may be queued again once drained.
        queue.push(ChunkPos::new(1, 1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_applies_changes_then_unloads() {
        let terrain = terrain();
        let unloads = Arc::new(UnloadQueue::new());
        let (updater, changes) = ChunkUpdater::new(terrain.clone(), unloads.clone());

        let pos = ChunkPos::new(0, 0);
        terrain.create_chunk(pos);

        changes
            .send(Box::new(|terrain| {
                terrain.set_block(3, 3, 8, BlockId::GRANITE, 0);
            }))
            .expect("updater alive");
        unloads.push(pos);

        assert!(!updater.drain_pass());
        assert!(!terrain.store.contains(pos));
        // Second drain has nothing left.
        assert!(updater.drain_pass());
    }
}
