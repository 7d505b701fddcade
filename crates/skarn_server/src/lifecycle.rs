use std::collections::VecDeque;

use tracing::trace;

use skarn_shared::coords::ChunkPos;

use crate::store::ChunkStore;

/// Server-side chunk lifecycle. States only ever advance one step at a
/// time; demotion happens when a neighbor disappears. All transitions run
/// on the loader thread, nothing else writes a chunk's state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkState {
    New,
    ShouldPopulate,
    Populating,
    Populated,
    Border,
    Loaded,
    Sendable,
}

impl ChunkState {
    /// Population has run (or was restored from a populated tag).
    pub fn is_populated(self) -> bool {
        matches!(
            self,
            ChunkState::Populated | ChunkState::Border | ChunkState::Loaded | ChunkState::Sendable
        )
    }

    pub fn at_least_border(self) -> bool {
        matches!(
            self,
            ChunkState::Border | ChunkState::Loaded | ChunkState::Sendable
        )
    }

    pub fn is_loaded(self) -> bool {
        matches!(self, ChunkState::Loaded | ChunkState::Sendable)
    }

    /// Contents may be sent to clients and trusted.
    pub fn is_sendable(self) -> bool {
        matches!(self, ChunkState::Sendable)
    }
}

/// Re-evaluates `start` and ripples outward: every chunk whose state
/// changes enqueues itself and its 8 neighbors for another look. This is
/// the wave that keeps the dependency graph consistent without a global
/// pass.
pub fn update_adjacent(store: &ChunkStore, start: ChunkPos) {
    let mut queue = VecDeque::new();
    queue.push_back(start);

    while let Some(pos) = queue.pop_front() {
        if evaluate(store, pos) {
            queue.push_back(pos);
            for neighbor in pos.neighbors8() {
                queue.push_back(neighbor);
            }
        }
    }
}

/// One demote-then-promote step for the chunk at `pos`. Returns whether
/// the state changed.
fn evaluate(store: &ChunkStore, pos: ChunkPos) -> bool {
    let Some(chunk) = store.get(pos) else {
        return false;
    };

    let state = chunk.state();
    let next = next_state(store, pos, state, chunk.is_finished());
    if next != state {
        trace!("chunk {:?} lifecycle {:?} -> {:?}", pos, state, next);
        chunk.set_state(next);
        return true;
    }
    false
}

fn next_state(
    store: &ChunkStore,
    pos: ChunkPos,
    state: ChunkState,
    finished: bool,
) -> ChunkState {
    // Demotions first: losing a neighbor drops a chunk back to Border (the
    // population itself is never undone); losing a neighbor's readiness
    // drops it one stage, and the wave carries the drop outward.
    match state {
        ChunkState::Border | ChunkState::Loaded | ChunkState::Sendable
            if !neighbors_exist(store, pos) =>
        {
            return ChunkState::Border;
        }
        ChunkState::Sendable if !neighbors_loaded(store, pos) => {
            return ChunkState::Loaded;
        }
        ChunkState::Loaded if !neighbors_finished(store, pos) => {
            return ChunkState::Border;
        }
        _ => {}
    }

    // Promotions, one stage per evaluation so no step is ever skipped.
    match state {
        ChunkState::New if neighbors_exist(store, pos) => ChunkState::ShouldPopulate,
        ChunkState::Populated if neighbors_exist(store, pos) => ChunkState::Border,
        ChunkState::Border if finished && neighbors_finished(store, pos) => ChunkState::Loaded,
        ChunkState::Loaded if neighbors_loaded(store, pos) => ChunkState::Sendable,
        other => other,
    }
}

/// Radius-1 "border satisfied" check: all 8 neighbors resident, any state.
pub fn neighbors_exist(store: &ChunkStore, pos: ChunkPos) -> bool {
    pos.neighbors8().iter().all(|&n| store.contains(n))
}

/// All 8 neighbors have run their load decorators (which implies they
/// reached at least `Border`). Gates `Border -> Loaded`.
pub fn neighbors_finished(store: &ChunkStore, pos: ChunkPos) -> bool {
    pos.neighbors8()
        .iter()
        .all(|&n| store.get(n).is_some_and(|c| c.is_finished()))
}

/// All 8 neighbors are `Loaded` or better. Gates `Loaded -> Sendable`:
/// a chunk may only be sent once its whole neighborhood has settled.
pub fn neighbors_loaded(store: &ChunkStore, pos: ChunkPos) -> bool {
    pos.neighbors8()
        .iter()
        .all(|&n| store.get(n).is_some_and(|c| c.state().is_loaded()))
}

#[cfg(test)]
mod tests {
    use super::{update_adjacent, ChunkState};
    use crate::chunk::ServerChunk;
    use crate::store::ChunkStore;
    use skarn_shared::chunk::ChunkData;
    use skarn_shared::coords::ChunkPos;
    use std::sync::Arc;

    fn insert_new(store: &ChunkStore, pos: ChunkPos) -> Arc<ServerChunk> {
        let chunk = Arc::new(ServerChunk::new(pos, ChunkData::new_empty(), ChunkState::New));
        store.insert(chunk.clone());
        chunk
    }

    #[test]
    fn new_chunk_waits_for_all_eight_neighbors() {
        let store = ChunkStore::new();
        let center = insert_new(&store, ChunkPos::new(0, 0));

        for (i, neighbor) in ChunkPos::new(0, 0).neighbors8().into_iter().enumerate() {
            update_adjacent(&store, ChunkPos::new(0, 0));
            assert_eq!(
                center.state(),
                ChunkState::New,
                "promoted with only {i} neighbors"
            );
            insert_new(&store, neighbor);
        }

        update_adjacent(&store, ChunkPos::new(0, 0));
        assert_eq!(center.state(), ChunkState::ShouldPopulate);
    }

    #[test]
    fn populated_chunk_advances_to_border_then_stalls_unfinished() {
        let store = ChunkStore::new();
        let center = insert_new(&store, ChunkPos::new(0, 0));
        for neighbor in ChunkPos::new(0, 0).neighbors8() {
            insert_new(&store, neighbor);
        }

        center.set_state(ChunkState::Populated);
        update_adjacent(&store, ChunkPos::new(0, 0));
        // Border is reached, Loaded needs finished neighbors.
        assert_eq!(center.state(), ChunkState::Border);
    }

    #[test]
    fn losing_a_neighbor_demotes_sendable_back_to_border() {
        let store = ChunkStore::new();
        // Full 5x5 block so every inner chunk genuinely keeps its 8
        // neighbors resident after the removal below.
        for dy in -2..=2 {
            for dx in -2..=2 {
                let chunk = insert_new(&store, ChunkPos::new(dx, dy));
                chunk.set_state(ChunkState::Sendable);
                chunk.mark_finished();
            }
        }

        store.remove(ChunkPos::new(1, 1));
        update_adjacent(&store, ChunkPos::new(0, 0));

        let center = store.get(ChunkPos::new(0, 0)).expect("chunk resident");
        assert_eq!(center.state(), ChunkState::Border);
        // The surviving direct neighbors of the removed chunk demote too.
        let other = store.get(ChunkPos::new(1, 0)).expect("neighbor resident");
        assert_eq!(other.state(), ChunkState::Border);
        // A chunk two steps away keeps all 8 neighbors but one of them
        // fell below Loaded, so it loses Sendable and no more.
        let diagonal = store.get(ChunkPos::new(-1, -1)).expect("chunk resident");
        assert_eq!(diagonal.state(), ChunkState::Loaded);
    }
}
