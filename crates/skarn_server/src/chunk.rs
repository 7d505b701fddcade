use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use rustc_hash::FxHashMap;

use skarn_persist::tag::ChunkTag;
use skarn_shared::chunk::ChunkData;
use skarn_shared::coords::ChunkPos;
use skarn_shared::delayed::DelayedUpdateQueue;
use skarn_shared::entity::EntityRecord;
use skarn_shared::protocol::ChunkSnapshot;

use crate::lifecycle::ChunkState;

/// One resident server chunk. Block data sits behind its own lock so the
/// updater and population jobs can write it while snapshot sends read it;
/// the lifecycle state is written by the loader thread only.
pub struct ServerChunk {
    pub pos: ChunkPos,
    data: RwLock<ChunkData>,
    state: Mutex<ChunkState>,
    finished: AtomicBool,
    populate_queued: AtomicBool,
    pub delayed: DelayedUpdateQueue,
    entities: Mutex<FxHashMap<u64, EntityRecord>>,
}

impl ServerChunk {
    pub fn new(pos: ChunkPos, data: ChunkData, state: ChunkState) -> Self {
        Self {
            pos,
            data: RwLock::new(data),
            state: Mutex::new(state),
            finished: AtomicBool::new(false),
            populate_queued: AtomicBool::new(false),
            delayed: DelayedUpdateQueue::new(),
            entities: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn state(&self) -> ChunkState {
        *self.state.lock().expect("chunk state lock poisoned")
    }

    pub fn set_state(&self, state: ChunkState) {
        *self.state.lock().expect("chunk state lock poisoned") = state;
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Returns true the first time only; `finish()` must run exactly once.
    pub fn mark_finished(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    /// Returns true the first time only; population is queued exactly once.
    pub fn mark_populate_queued(&self) -> bool {
        !self.populate_queued.swap(true, Ordering::AcqRel)
    }

    pub fn read_data<R>(&self, f: impl FnOnce(&ChunkData) -> R) -> R {
        f(&self.data.read().expect("chunk data lock poisoned"))
    }

    pub fn write_data<R>(&self, f: impl FnOnce(&mut ChunkData) -> R) -> R {
        f(&mut self.data.write().expect("chunk data lock poisoned"))
    }

    /// Called by the terrain after the world-wide id map accepted the id.
    pub(crate) fn attach_entity(&self, record: EntityRecord) {
        self.entities
            .lock()
            .expect("chunk entity lock poisoned")
            .insert(record.id, record);
    }

    pub(crate) fn detach_entity(&self, id: u64) -> Option<EntityRecord> {
        self.entities
            .lock()
            .expect("chunk entity lock poisoned")
            .remove(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities
            .lock()
            .expect("chunk entity lock poisoned")
            .len()
    }

    pub fn entities_snapshot(&self, exclude: Option<u64>) -> Vec<EntityRecord> {
        self.entities
            .lock()
            .expect("chunk entity lock poisoned")
            .values()
            .filter(|record| Some(record.id) != exclude)
            .cloned()
            .collect()
    }

    pub fn entity_ids(&self) -> Vec<u64> {
        self.entities
            .lock()
            .expect("chunk entity lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Serializes the chunk for unload or the periodic save.
    pub fn to_tag(&self) -> ChunkTag {
        self.read_data(|data| {
            ChunkTag::from_chunk(
                self.pos,
                data,
                self.entities_snapshot(None),
                self.delayed.snapshot(),
                self.state().is_populated(),
            )
        })
    }

    /// The network "send" variant: grids + entities, no delayed updates or
    /// metadata. The requesting player's own avatar is excluded unless the
    /// caller asks for it.
    pub fn to_snapshot(&self, exclude_entity: Option<u64>) -> ChunkSnapshot {
        self.read_data(|data| {
            ChunkSnapshot::from_chunk(self.pos, data, self.entities_snapshot(exclude_entity))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ServerChunk;
    use crate::lifecycle::ChunkState;
    use skarn_shared::block::{register_default_blocks, BlockId};
    use skarn_shared::chunk::ChunkData;
    use skarn_shared::coords::{ChunkPos, LocalPos};
    use skarn_shared::entity::EntityRecord;

    #[test]
    fn finish_and_populate_latches_fire_once() {
        let chunk = ServerChunk::new(ChunkPos::new(0, 0), ChunkData::new_empty(), ChunkState::New);
        assert!(chunk.mark_populate_queued());
        assert!(!chunk.mark_populate_queued());
        assert!(chunk.mark_finished());
        assert!(!chunk.mark_finished());
        assert!(chunk.is_finished());
    }

    #[test]
    fn snapshot_excludes_the_requesting_avatar() {
        let chunk = ServerChunk::new(
            ChunkPos::new(2, 2),
            ChunkData::new_empty(),
            ChunkState::Sendable,
        );
        chunk.attach_entity(EntityRecord::new(1, 0, Vec::new(), 0));
        chunk.attach_entity(EntityRecord::new(2, 0, Vec::new(), 0));

        let snapshot = chunk.to_snapshot(Some(1));
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].id, 2);

        let full = chunk.to_snapshot(None);
        assert_eq!(full.entities.len(), 2);
    }

    #[test]
    fn tag_reflects_populated_state() {
        let registry = register_default_blocks();
        let chunk = ServerChunk::new(
            ChunkPos::new(0, 0),
            ChunkData::new_empty(),
            ChunkState::New,
        );
        chunk.write_data(|data| {
            data.set_block(LocalPos { x: 1, y: 1, z: 1 }, BlockId::GRANITE, &registry)
        });

        assert!(!chunk.to_tag().populated);
        chunk.set_state(ChunkState::Populated);
        assert!(chunk.to_tag().populated);
    }
}
