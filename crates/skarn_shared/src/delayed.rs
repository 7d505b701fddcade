use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockRegistry};
use crate::chunk::ChunkData;
use crate::coords::LocalPos;

/// A block mutation scheduled to run after a delay. `kind` indexes an
/// update table owned by the terrain; the engine only tracks timing,
/// position and validity.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelayedUpdate {
    pub kind: u16,
    pub x: u8,
    pub y: u8,
    pub z: u16,
    pub delay: f32,
    valid: bool,
}

impl DelayedUpdate {
    pub fn new(kind: u16, local: LocalPos, delay: f32) -> Self {
        Self {
            kind,
            x: local.x,
            y: local.y,
            z: local.z,
            delay,
            valid: true,
        }
    }

    pub fn local(&self) -> LocalPos {
        LocalPos {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// What one update kind does: whether the block found at the target still
/// qualifies, and the mutation applied on expiry. Gameplay registers its
/// kinds here; the engine treats the ids as opaque.
#[derive(Copy, Clone)]
pub struct UpdateKind {
    pub valid: fn(BlockId) -> bool,
    pub apply: fn(&mut ChunkData, LocalPos, &BlockRegistry),
}

#[derive(Default)]
pub struct UpdateKindTable {
    kinds: HashMap<u16, UpdateKind>,
}

impl UpdateKindTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u16, kind: UpdateKind) {
        self.kinds.insert(id, kind);
    }

    pub fn get(&self, id: u16) -> Option<&UpdateKind> {
        self.kinds.get(&id)
    }

    /// Unknown kinds are never valid; their updates expire silently.
    pub fn valid_for(&self, id: u16, block: BlockId) -> bool {
        self.kinds.get(&id).is_some_and(|kind| (kind.valid)(block))
    }
}

/// Per-chunk delayed-update list. All access goes through the internal
/// lock; cancellation marks entries invalid in place instead of removing
/// them so a concurrent tick never sees the list shift under it.
#[derive(Default)]
pub struct DelayedUpdateQueue {
    entries: Mutex<Vec<DelayedUpdate>>,
}

impl DelayedUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, update: DelayedUpdate) {
        self.entries
            .lock()
            .expect("delayed update lock poisoned")
            .push(update);
    }

    /// Marks matching entries invalid. They stay in the list until their
    /// delay runs out and are then dropped without executing.
    pub fn cancel_where(&self, mut predicate: impl FnMut(&DelayedUpdate) -> bool) {
        let mut entries = self.entries.lock().expect("delayed update lock poisoned");
        for entry in entries.iter_mut() {
            if entry.valid && predicate(entry) {
                entry.valid = false;
            }
        }
    }

    /// Advances every entry by `dt` seconds and removes the expired ones.
    /// An expired entry is returned for execution only if it is still
    /// marked valid and `still_valid` accepts the block currently at its
    /// position; the recorded target may have changed since scheduling.
    pub fn tick(
        &self,
        dt: f32,
        mut current_block: impl FnMut(LocalPos) -> BlockId,
        mut still_valid: impl FnMut(u16, BlockId) -> bool,
    ) -> Vec<DelayedUpdate> {
        let mut entries = self.entries.lock().expect("delayed update lock poisoned");
        let mut expired = Vec::new();

        entries.retain_mut(|entry| {
            entry.delay -= dt;
            if entry.delay > 0.0 {
                return true;
            }
            if entry.valid && still_valid(entry.kind, current_block(entry.local())) {
                expired.push(*entry);
            }
            false
        });

        expired
    }

    /// Valid entries only, for persistence.
    pub fn snapshot(&self) -> Vec<DelayedUpdate> {
        self.entries
            .lock()
            .expect("delayed update lock poisoned")
            .iter()
            .filter(|entry| entry.valid)
            .copied()
            .collect()
    }

    pub fn hydrate(&self, updates: Vec<DelayedUpdate>) {
        let mut entries = self.entries.lock().expect("delayed update lock poisoned");
        entries.extend(updates.into_iter().filter(|update| update.valid));
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("delayed update lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{DelayedUpdate, DelayedUpdateQueue};
    use crate::block::BlockId;
    use crate::coords::LocalPos;

    const GROW: u16 = 1;

    fn at(x: u8, y: u8, z: u16) -> LocalPos {
        LocalPos { x, y, z }
    }

    #[test]
    fn expiry_executes_only_when_block_still_matches() {
        let queue = DelayedUpdateQueue::new();
        queue.schedule(DelayedUpdate::new(GROW, at(5, 5, 10), 2.0));
        queue.schedule(DelayedUpdate::new(GROW, at(1, 1, 10), 2.0));

        // The block at (1,1,10) changed out from under its update.
        let expired = queue.tick(
            2.5,
            |local| {
                if local.x == 5 {
                    BlockId::SAPLING
                } else {
                    BlockId::GRANITE
                }
            },
            |_, block| block == BlockId::SAPLING,
        );

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].local(), at(5, 5, 10));
        assert!(queue.is_empty());
    }

    #[test]
    fn partial_tick_keeps_remaining_delay() {
        let queue = DelayedUpdateQueue::new();
        queue.schedule(DelayedUpdate::new(GROW, at(0, 0, 0), 2.0));

        assert!(queue
            .tick(1.0, |_| BlockId::SAPLING, |_, _| true)
            .is_empty());
        assert_eq!(queue.len(), 1);

        let expired = queue.tick(1.0, |_| BlockId::SAPLING, |_, _| true);
        assert_eq!(expired.len(), 1);
    }

    #[test]
    fn cancelled_entries_expire_without_executing() {
        let queue = DelayedUpdateQueue::new();
        queue.schedule(DelayedUpdate::new(GROW, at(2, 3, 4), 1.0));
        queue.cancel_where(|entry| entry.local() == at(2, 3, 4));

        // Still present until expiry, then silently dropped.
        assert_eq!(queue.len(), 1);
        let expired = queue.tick(1.5, |_| BlockId::SAPLING, |_, _| true);
        assert!(expired.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn snapshot_skips_invalid_entries() {
        let queue = DelayedUpdateQueue::new();
        queue.schedule(DelayedUpdate::new(GROW, at(1, 0, 0), 5.0));
        queue.schedule(DelayedUpdate::new(GROW, at(2, 0, 0), 5.0));
        queue.cancel_where(|entry| entry.x == 2);

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].x, 1);

        let restored = DelayedUpdateQueue::new();
        restored.hydrate(snapshot);
        assert_eq!(restored.len(), 1);
    }
}
