use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::FxHashMap;

use skarn_shared::coords::ChunkPos;

use crate::chunk::ServerChunk;

/// Unbounded coordinate -> chunk map. Lookups take the read lock; the
/// single-entry last-lookup cache shortcuts the common case of many
/// queries against one chunk (block edits, column scans) and is dropped
/// whenever its chunk is removed.
pub struct ChunkStore {
    chunks: RwLock<FxHashMap<ChunkPos, Arc<ServerChunk>>>,
    last_lookup: Mutex<Option<(ChunkPos, Arc<ServerChunk>)>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(FxHashMap::default()),
            last_lookup: Mutex::new(None),
        }
    }

    pub fn get(&self, pos: ChunkPos) -> Option<Arc<ServerChunk>> {
        {
            let cache = self.last_lookup.lock().expect("store cache lock poisoned");
            if let Some((cached_pos, chunk)) = cache.as_ref() {
                if *cached_pos == pos {
                    return Some(chunk.clone());
                }
            }
        }

        let chunk = self
            .chunks
            .read()
            .expect("store lock poisoned")
            .get(&pos)
            .cloned()?;

        *self.last_lookup.lock().expect("store cache lock poisoned") =
            Some((pos, chunk.clone()));
        Some(chunk)
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.get(pos).is_some()
    }

    pub fn insert(&self, chunk: Arc<ServerChunk>) {
        self.chunks
            .write()
            .expect("store lock poisoned")
            .insert(chunk.pos, chunk);
    }

    pub fn remove(&self, pos: ChunkPos) -> Option<Arc<ServerChunk>> {
        let removed = self.chunks.write().expect("store lock poisoned").remove(&pos);

        if removed.is_some() {
            let mut cache = self.last_lookup.lock().expect("store cache lock poisoned");
            if cache.as_ref().is_some_and(|(cached_pos, _)| *cached_pos == pos) {
                *cache = None;
            }
        }
        removed
    }

    pub fn positions(&self) -> Vec<ChunkPos> {
        self.chunks
            .read()
            .expect("store lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ChunkStore;
    use crate::chunk::ServerChunk;
    use crate::lifecycle::ChunkState;
    use skarn_shared::chunk::ChunkData;
    use skarn_shared::coords::ChunkPos;

    fn chunk(pos: ChunkPos) -> Arc<ServerChunk> {
        Arc::new(ServerChunk::new(pos, ChunkData::new_empty(), ChunkState::New))
    }

    #[test]
    fn insert_lookup_remove_cycle() {
        let store = ChunkStore::new();
        let pos = ChunkPos::new(3, -2);
        assert!(store.get(pos).is_none());

        store.insert(chunk(pos));
        assert!(store.contains(pos));
        assert_eq!(store.len(), 1);

        // Second get goes through the cache and returns the same chunk.
        let first = store.get(pos).expect("chunk present");
        let second = store.get(pos).expect("chunk present");
        assert!(Arc::ptr_eq(&first, &second));

        assert!(store.remove(pos).is_some());
        assert!(store.remove(pos).is_none());
        assert!(store.get(pos).is_none());
    }

    #[test]
    fn removal_invalidates_the_lookup_cache() {
        let store = ChunkStore::new();
        let pos = ChunkPos::new(0, 0);
        store.insert(chunk(pos));

        // Prime the cache, then remove behind it.
        assert!(store.get(pos).is_some());
        assert!(store.remove(pos).is_some());
        assert!(store.get(pos).is_none());

        // Reinsert under the same coordinate: the fresh chunk wins.
        let replacement = chunk(pos);
        store.insert(replacement.clone());
        let found = store.get(pos).expect("chunk present");
        assert!(Arc::ptr_eq(&found, &replacement));
    }
}
