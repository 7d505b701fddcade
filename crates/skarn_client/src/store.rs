use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use skarn_shared::coords::ChunkPos;

use crate::terrain::ClientChunk;

/// Sliding window of resident chunks, a square of side `2*radius + 1`
/// centered on the player's chunk column.
///
/// Slots are addressed by coordinate modulo the window side, so a chunk
/// keeps its slot across recenters and only cells that fell out of the
/// window need clearing. Reads take an optimistic fast path stamped by a
/// generation counter: odd means a structural write is in progress, and a
/// counter mismatch around the read means whatever was observed must be
/// thrown away and re-read under the lock. That fallback is a correctness
/// requirement of the protocol, not an optimization detail.
pub struct WindowStore {
    radius: i32,
    side: i32,
    slots: Box<[Slot]>,
    /// Even when stable, odd while a write below holds `center`.
    generation: AtomicU64,
    /// Guards recenters and slot mutation; also the slow read path.
    center: Mutex<ChunkPos>,
}

struct Slot {
    chunk: RwLock<Option<Arc<ClientChunk>>>,
}

impl WindowStore {
    pub fn new(radius: i32, center: ChunkPos) -> Self {
        assert!(radius >= 0, "window radius must be non-negative");
        let side = 2 * radius + 1;
        let slots = (0..side * side)
            .map(|_| Slot {
                chunk: RwLock::new(None),
            })
            .collect();
        Self {
            radius,
            side,
            slots,
            generation: AtomicU64::new(0),
            center: Mutex::new(center),
        }
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    pub fn center(&self) -> ChunkPos {
        *self.center.lock().expect("window lock poisoned")
    }

    fn slot_index(&self, pos: ChunkPos) -> usize {
        let sx = pos.x.rem_euclid(self.side);
        let sy = pos.y.rem_euclid(self.side);
        (sx + sy * self.side) as usize
    }

    fn in_window(pos: ChunkPos, center: ChunkPos, radius: i32) -> bool {
        (pos.x - center.x).abs() <= radius && (pos.y - center.y).abs() <= radius
    }

    /// Optimistic read. The slot holds whatever coordinate currently maps
    /// there, so the result is verified against the requested position;
    /// recentering cannot alias one coordinate's chunk to another.
    pub fn get(&self, pos: ChunkPos) -> Option<Arc<ClientChunk>> {
        let before = self.generation.load(Ordering::Acquire);
        if before % 2 == 0 {
            let found = self.slots[self.slot_index(pos)]
                .chunk
                .read()
                .expect("window slot lock poisoned")
                .clone();
            let after = self.generation.load(Ordering::Acquire);
            if before == after {
                return found.filter(|chunk| chunk.pos == pos);
            }
        }

        // A write raced the fast path: discard and re-read synchronized.
        let _guard = self.center.lock().expect("window lock poisoned");
        self.slots[self.slot_index(pos)]
            .chunk
            .read()
            .expect("window slot lock poisoned")
            .clone()
            .filter(|chunk| chunk.pos == pos)
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.get(pos).is_some()
    }

    /// Returns false when the chunk lies outside the current window.
    pub fn insert(&self, chunk: Arc<ClientChunk>) -> bool {
        let center = self.center.lock().expect("window lock poisoned");
        if !Self::in_window(chunk.pos, *center, self.radius) {
            return false;
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        let index = self.slot_index(chunk.pos);
        *self.slots[index]
            .chunk
            .write()
            .expect("window slot lock poisoned") = Some(chunk);
        self.generation.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn remove(&self, pos: ChunkPos) -> Option<Arc<ClientChunk>> {
        let _center = self.center.lock().expect("window lock poisoned");

        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = {
            let mut slot = self.slots[self.slot_index(pos)]
                .chunk
                .write()
                .expect("window slot lock poisoned");
            if slot.as_ref().is_some_and(|chunk| chunk.pos == pos) {
                slot.take()
            } else {
                None
            }
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        removed
    }

    /// Moves the window origin. Chunks still inside the new window keep
    /// their slots; every slot whose coordinate fell outside is cleared.
    /// A move of `window` or more clears everything. The evicted chunks
    /// are returned so the caller can dispose what they own (mesh models,
    /// entity records); dropping them silently would leak the models.
    pub fn set_center(&self, new_center: ChunkPos) -> Vec<Arc<ClientChunk>> {
        let mut center = self.center.lock().expect("window lock poisoned");
        if *center == new_center {
            return Vec::new();
        }

        let mut evicted = Vec::new();
        self.generation.fetch_add(1, Ordering::AcqRel);
        for slot in self.slots.iter() {
            let mut slot = slot.chunk.write().expect("window slot lock poisoned");
            if slot
                .as_ref()
                .is_some_and(|chunk| !Self::in_window(chunk.pos, new_center, self.radius))
            {
                if let Some(chunk) = slot.take() {
                    evicted.push(chunk);
                }
            }
        }
        *center = new_center;
        self.generation.fetch_add(1, Ordering::AcqRel);
        evicted
    }

    /// Every resident chunk, window order (row-major around the center).
    pub fn resident(&self) -> Vec<Arc<ClientChunk>> {
        let center = self.center.lock().expect("window lock poisoned");
        let mut chunks = Vec::new();
        for dy in -self.radius..=self.radius {
            for dx in -self.radius..=self.radius {
                let pos = *center + ChunkPos::new(dx, dy);
                let slot = self.slots[self.slot_index(pos)]
                    .chunk
                    .read()
                    .expect("window slot lock poisoned");
                if let Some(chunk) = slot.as_ref() {
                    if chunk.pos == pos {
                        chunks.push(chunk.clone());
                    }
                }
            }
        }
        chunks
    }

    pub fn len(&self) -> usize {
        self.resident().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::WindowStore;
    use crate::terrain::ClientChunk;
    use skarn_shared::coords::ChunkPos;

    fn chunk(pos: ChunkPos) -> Arc<ClientChunk> {
        Arc::new(ClientChunk::placeholder(pos))
    }

    #[test]
    fn insert_respects_window_bounds() {
        let store = WindowStore::new(2, ChunkPos::new(10, 10));
        assert!(store.insert(chunk(ChunkPos::new(10, 10))));
        assert!(store.insert(chunk(ChunkPos::new(12, 8))));
        assert!(!store.insert(chunk(ChunkPos::new(13, 10))));

        assert!(store.get(ChunkPos::new(10, 10)).is_some());
        assert!(store.get(ChunkPos::new(13, 10)).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn slot_aliasing_does_not_leak_other_coordinates() {
        let store = WindowStore::new(2, ChunkPos::new(0, 0));
        store.insert(chunk(ChunkPos::new(2, 0)));

        // (-3, 0) maps to the same slot as (2, 0) modulo the window side
        // but is a different coordinate.
        assert!(store.get(ChunkPos::new(-3, 0)).is_none());
    }

    #[test]
    fn recenter_by_one_row_preserves_the_overlap() {
        let store = WindowStore::new(2, ChunkPos::new(10, 10));
        for dy in -2..=2 {
            for dx in -2..=2 {
                assert!(store.insert(chunk(ChunkPos::new(10 + dx, 10 + dy))));
            }
        }

        store.set_center(ChunkPos::new(10, 11));

        // The 5x4 overlap (y 9..=12) survives in place; the vacated row
        // (y = 8) is gone and the new row (y = 13) is empty.
        for x in 8..=12 {
            for y in 9..=12 {
                assert!(
                    store.get(ChunkPos::new(x, y)).is_some(),
                    "expected ({x},{y}) preserved"
                );
            }
            assert!(store.get(ChunkPos::new(x, 8)).is_none());
            assert!(store.get(ChunkPos::new(x, 13)).is_none());
        }
        assert_eq!(store.len(), 20);
    }

    #[test]
    fn recenter_beyond_the_window_clears_everything() {
        let store = WindowStore::new(2, ChunkPos::new(0, 0));
        for dy in -2..=2 {
            for dx in -2..=2 {
                store.insert(chunk(ChunkPos::new(dx, dy)));
            }
        }

        let evicted = store.set_center(ChunkPos::new(100, 100));
        assert!(store.is_empty());
        assert_eq!(evicted.len(), 25);
    }

    #[test]
    fn recenter_hands_back_exactly_the_evicted_chunks() {
        let store = WindowStore::new(1, ChunkPos::new(0, 0));
        for dy in -1..=1 {
            for dx in -1..=1 {
                store.insert(chunk(ChunkPos::new(dx, dy)));
            }
        }

        let mut evicted: Vec<_> = store
            .set_center(ChunkPos::new(1, 0))
            .iter()
            .map(|chunk| chunk.pos)
            .collect();
        evicted.sort_by_key(|pos| (pos.y, pos.x));
        assert_eq!(
            evicted,
            vec![
                ChunkPos::new(-1, -1),
                ChunkPos::new(-1, 0),
                ChunkPos::new(-1, 1),
            ]
        );

        // A no-op recenter evicts nothing.
        assert!(store.set_center(ChunkPos::new(1, 0)).is_empty());
    }

    #[test]
    fn remove_is_scoped_to_the_exact_coordinate() {
        let store = WindowStore::new(1, ChunkPos::new(0, 0));
        store.insert(chunk(ChunkPos::new(1, 1)));

        assert!(store.remove(ChunkPos::new(0, 0)).is_none());
        let removed = store.remove(ChunkPos::new(1, 1)).expect("chunk resident");
        assert_eq!(removed.pos, ChunkPos::new(1, 1));
        assert!(store.get(ChunkPos::new(1, 1)).is_none());
    }
}
