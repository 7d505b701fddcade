use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use skarn_persist::tag::ChunkTag;
use skarn_shared::block::{BlockId, BlockRegistry};
use skarn_shared::coords::{world_to_chunk, world_to_local, ChunkPos};
use skarn_shared::delayed::UpdateKindTable;
use skarn_shared::entity::EntityRecord;
use skarn_shared::protocol::ChunkSnapshot;

use crate::chunk::ServerChunk;
use crate::generate::{Generate, Populate};
use crate::lifecycle::ChunkState;
use crate::persistence::PersistenceLayer;
use crate::store::ChunkStore;

/// Where a connected player stands, in chunk columns, and how far around
/// them terrain must stay resident.
#[derive(Copy, Clone, Debug)]
pub struct PlayerView {
    pub column: ChunkPos,
    pub loading_radius: i32,
}

/// Server world facade: the chunk store, the collaborator seams, and the
/// world-wide entity bookkeeping. The loader and updater tasks both hold
/// an `Arc` of this.
pub struct ServerTerrain {
    pub registry: BlockRegistry,
    pub store: ChunkStore,
    generator: Box<dyn Generate>,
    populator: Arc<dyn Populate>,
    persistence: Option<Mutex<PersistenceLayer>>,
    update_kinds: UpdateKindTable,
    /// Entity id -> owning chunk. Ids are unique across the whole world;
    /// protected by its own lock so entity churn never contends with
    /// chunk lookups.
    entities: Mutex<FxHashMap<u64, ChunkPos>>,
    next_entity_id: AtomicU64,
    players: Mutex<FxHashMap<u64, PlayerView>>,
    tick: AtomicU64,
}

impl ServerTerrain {
    pub fn new(
        registry: BlockRegistry,
        generator: Box<dyn Generate>,
        populator: Arc<dyn Populate>,
        update_kinds: UpdateKindTable,
    ) -> Self {
        Self {
            registry,
            store: ChunkStore::new(),
            generator,
            populator,
            persistence: None,
            update_kinds,
            entities: Mutex::new(FxHashMap::default()),
            next_entity_id: AtomicU64::new(1),
            players: Mutex::new(FxHashMap::default()),
            tick: AtomicU64::new(0),
        }
    }

    pub fn with_persistence(mut self, world_dir: &Path) -> Self {
        match PersistenceLayer::open(world_dir) {
            Ok(layer) => self.persistence = Some(Mutex::new(layer)),
            Err(err) => warn!(
                "Failed to initialize persistence at {}: {}",
                world_dir.display(),
                err
            ),
        }
        self
    }

    // ---- players -------------------------------------------------------

    pub fn set_player(&self, id: u64, view: PlayerView) {
        self.players
            .lock()
            .expect("player lock poisoned")
            .insert(id, view);
    }

    pub fn remove_player(&self, id: u64) {
        self.players.lock().expect("player lock poisoned").remove(&id);
    }

    pub fn players_snapshot(&self) -> Vec<PlayerView> {
        self.players
            .lock()
            .expect("player lock poisoned")
            .values()
            .copied()
            .collect()
    }

    // ---- chunk lifecycle entry points ----------------------------------

    /// Brings the chunk at `pos` into the store, from its saved tag when
    /// one exists, otherwise fresh from the generator. Loaded tags start
    /// at `Populated` iff their populated flag was set.
    pub fn create_chunk(&self, pos: ChunkPos) -> Arc<ServerChunk> {
        if let Some(tag) = self.load_tag(pos) {
            match tag.to_chunk(&self.registry) {
                Ok(data) => {
                    let state = if tag.populated {
                        ChunkState::Populated
                    } else {
                        ChunkState::New
                    };
                    let chunk = Arc::new(ServerChunk::new(pos, data, state));
                    chunk.delayed.hydrate(tag.delayed_updates);
                    for record in tag.entities {
                        self.register_entity(pos, &chunk, record);
                    }
                    self.store.insert(chunk.clone());
                    return chunk;
                }
                Err(err) => {
                    warn!("Discarding corrupt tag for chunk {:?}: {}", pos, err);
                }
            }
        }

        let generated = self.generator.generate(pos, &self.registry);
        let chunk = Arc::new(ServerChunk::new(pos, generated.chunk, ChunkState::New));
        chunk.delayed.hydrate(generated.updates);
        self.store.insert(chunk.clone());
        chunk
    }

    /// Runs the population decorators. Called from a job thread; the
    /// loader flips the lifecycle state when the completion lands.
    pub fn populate_chunk(&self, chunk: &ServerChunk) {
        chunk.write_data(|data| {
            self.populator.populate(chunk.pos, data, &self.registry);
            // The storage recompression hook: grids are flat arrays here,
            // so only the derived columns need refreshing.
            data.recompute_height_map(&self.registry);
            data.recompute_sun_light();
        });
    }

    /// Runs the load decorators once per residency.
    pub fn finish_chunk(&self, chunk: &ServerChunk) {
        if !chunk.mark_finished() {
            return;
        }
        chunk.write_data(|data| self.populator.finish(chunk.pos, data, &self.registry));
    }

    /// Serializes and drops the chunk at `pos`. Safe to call for a chunk
    /// already gone; unload queues may name a coordinate twice.
    pub fn unload_chunk(&self, pos: ChunkPos) {
        let Some(chunk) = self.store.get(pos) else {
            return;
        };

        let tag = chunk.to_tag();
        self.save_tag(tag);

        {
            let mut entities = self.entities.lock().expect("entity lock poisoned");
            for id in chunk.entity_ids() {
                entities.remove(&id);
            }
        }
        self.store.remove(pos);
    }

    /// Serializes every resident chunk, for the final save on shutdown.
    pub fn save_all(&self) {
        let Some(persistence) = self.persistence.as_ref() else {
            return;
        };
        let tags: Vec<ChunkTag> = self
            .store
            .positions()
            .into_iter()
            .filter_map(|pos| self.store.get(pos).map(|chunk| chunk.to_tag()))
            .collect();
        let count = tags.len();
        if let Err(err) = persistence
            .lock()
            .expect("persistence lock poisoned")
            .save_chunks(tags)
        {
            warn!("Final save failed: {err}");
        } else {
            info!("Saved {count} chunks");
        }
    }

    fn load_tag(&self, pos: ChunkPos) -> Option<ChunkTag> {
        let persistence = self.persistence.as_ref()?;
        match persistence
            .lock()
            .expect("persistence lock poisoned")
            .load_chunk(pos)
        {
            Ok(tag) => tag,
            Err(err) => {
                warn!("Failed to load chunk {:?}: {}", pos, err);
                None
            }
        }
    }

    /// Persistence failures are logged and the save attempt is abandoned;
    /// the loader/updater loops must keep running regardless.
    pub fn save_tag(&self, tag: ChunkTag) {
        let Some(persistence) = self.persistence.as_ref() else {
            return;
        };
        let pos = tag.pos;
        if let Err(err) = persistence
            .lock()
            .expect("persistence lock poisoned")
            .save_chunk(tag)
        {
            warn!("Failed to save chunk {:?}: {}", pos, err);
        }
    }

    // ---- entities ------------------------------------------------------

    pub fn allocate_entity_id(&self) -> u64 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers an entity world-wide and attaches it to its chunk.
    /// Two entities with one id means two spawns were handed the same id,
    /// which is a broken invariant, not a situation to paper over.
    pub fn register_entity(&self, pos: ChunkPos, chunk: &ServerChunk, record: EntityRecord) {
        let id = record.id;
        {
            let mut entities = self.entities.lock().expect("entity lock poisoned");
            if let Some(existing) = entities.insert(id, pos) {
                panic!(
                    "duplicate entity id {id}: already resident in chunk {existing:?}, \
                     second spawn in {pos:?}"
                );
            }
        }
        chunk.attach_entity(record);
    }

    pub fn remove_entity(&self, id: u64) -> Option<EntityRecord> {
        let pos = self
            .entities
            .lock()
            .expect("entity lock poisoned")
            .remove(&id)?;
        self.store.get(pos)?.detach_entity(id)
    }

    pub fn entity_chunk(&self, id: u64) -> Option<ChunkPos> {
        self.entities
            .lock()
            .expect("entity lock poisoned")
            .get(&id)
            .copied()
    }

    // ---- blocks and ticks ----------------------------------------------

    /// Absent chunks read as absent, never as an error; callers fall back
    /// to their void/default block.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Option<BlockId> {
        let local = world_to_local(x, y, z)?;
        let chunk = self.store.get(world_to_chunk(x, y))?;
        Some(chunk.read_data(|data| data.get_block(local)))
    }

    /// Returns false when the target chunk is not resident.
    pub fn set_block(&self, x: i32, y: i32, z: i32, block: BlockId, data_value: u8) -> bool {
        let Some(local) = world_to_local(x, y, z) else {
            return false;
        };
        let Some(chunk) = self.store.get(world_to_chunk(x, y)) else {
            return false;
        };
        chunk.write_data(|data| {
            data.set_block(local, block, &self.registry);
            data.set_data(local, data_value);
        });
        true
    }

    /// Advances every resident chunk's delayed updates and executes the
    /// expired ones that still apply.
    pub fn tick_delayed(&self, dt: f32) {
        self.tick.fetch_add(1, Ordering::Relaxed);
        for pos in self.store.positions() {
            let Some(chunk) = self.store.get(pos) else {
                continue;
            };
            let expired = chunk.delayed.tick(
                dt,
                |local| chunk.read_data(|data| data.get_block(local)),
                |kind, block| self.update_kinds.valid_for(kind, block),
            );
            for update in expired {
                if let Some(kind) = self.update_kinds.get(update.kind) {
                    chunk.write_data(|data| (kind.apply)(data, update.local(), &self.registry));
                }
            }
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// The network send variant, only produced once a chunk is sendable.
    pub fn make_snapshot(&self, pos: ChunkPos, exclude_entity: Option<u64>) -> Option<ChunkSnapshot> {
        let chunk = self.store.get(pos)?;
        if !chunk.state().is_sendable() {
            return None;
        }
        Some(chunk.to_snapshot(exclude_entity))
    }
}
