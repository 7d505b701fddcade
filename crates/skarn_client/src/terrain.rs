use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use skarn_shared::block::{BlockId, BlockRegistry};
use skarn_shared::chunk::ChunkData;
use skarn_shared::coords::{
    section_of, world_to_chunk, world_to_local, ChunkPos, LocalPos, CHUNK_SIZE, SECTION_COUNT,
    SECTION_SIZE,
};
use skarn_shared::delayed::{DelayedUpdate, DelayedUpdateQueue, UpdateKindTable};
use skarn_shared::entity::EntityRecord;
use skarn_shared::protocol::{decode_snapshot, ChunkSnapshot, C2S, S2C};

use crate::mesher::section_is_solid;
use crate::render::RenderBackend;
use crate::store::WindowStore;
use crate::visibility::Visibility;

/// One chunk as the client holds it. Created as an empty placeholder when
/// the window requests it, filled in when the snapshot arrives.
pub struct ClientChunk {
    pub pos: ChunkPos,
    data: RwLock<ChunkData>,
    /// Set once a snapshot has been installed; placeholder until then.
    loaded: AtomicBool,
    /// Latch so the window requests each chunk once.
    requested: AtomicBool,
    pub renderer: crate::visibility::RendererChunk,
    pub delayed: DelayedUpdateQueue,
    /// Ids of the entities delivered with the snapshot, for cleanup when
    /// the chunk leaves the window.
    entity_ids: Mutex<Vec<u64>>,
}

impl ClientChunk {
    pub fn placeholder(pos: ChunkPos) -> Self {
        Self {
            pos,
            data: RwLock::new(ChunkData::new_empty()),
            loaded: AtomicBool::new(false),
            requested: AtomicBool::new(false),
            renderer: crate::visibility::RendererChunk::new(),
            delayed: DelayedUpdateQueue::new(),
            entity_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn read_data(&self) -> RwLockReadGuard<'_, ChunkData> {
        self.data.read().expect("chunk data lock poisoned")
    }

    pub fn write_data(&self) -> RwLockWriteGuard<'_, ChunkData> {
        self.data.write().expect("chunk data lock poisoned")
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    /// Returns true the first time only.
    pub fn mark_requested(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }
}

/// Client-side terrain: the sliding window of chunks, the visibility
/// state driving meshing, and the entity records the server has shared.
pub struct ClientTerrain {
    pub registry: Arc<BlockRegistry>,
    pub store: WindowStore,
    pub visibility: Visibility,
    update_kinds: UpdateKindTable,
    entities: Mutex<FxHashMap<u64, EntityRecord>>,
}

impl ClientTerrain {
    pub fn new(radius: i32, registry: Arc<BlockRegistry>, update_kinds: UpdateKindTable) -> Self {
        Self {
            registry,
            store: WindowStore::new(radius, ChunkPos::new(0, 0)),
            visibility: Visibility::new(),
            update_kinds,
            entities: Mutex::new(FxHashMap::default()),
        }
    }

    /// Handles one server message. Some messages call for a reply; the
    /// caller sends whatever comes back.
    pub fn apply_message(
        &self,
        msg: &S2C,
        backend: &dyn RenderBackend,
    ) -> Result<Option<C2S>, String> {
        match msg {
            S2C::ChunkSnapshot {
                payload,
                format_version,
                ..
            } => {
                let snapshot = decode_snapshot(payload, *format_version)?;
                self.install_snapshot(snapshot)?;
                Ok(None)
            }
            S2C::ChunkUnload { pos } => {
                self.unload_chunk(*pos, backend);
                Ok(None)
            }
            S2C::BlockChange { x, y, z, block, data } => {
                self.set_block_world(*x, *y, *z, *block, *data);
                Ok(None)
            }
            S2C::BlockAir { x, y, z } => {
                self.set_block_world(*x, *y, *z, BlockId::AIR, 0);
                Ok(None)
            }
            S2C::EntityMove {
                entity_id, tick, ..
            } => {
                let mut entities = self.entities.lock().expect("entity lock poisoned");
                match entities.get_mut(entity_id) {
                    Some(record) => {
                        record.last_tick = *tick;
                        Ok(None)
                    }
                    None => Ok(Some(C2S::RequestEntity {
                        entity_id: *entity_id,
                    })),
                }
            }
            S2C::EntityState { record } => {
                self.entities
                    .lock()
                    .expect("entity lock poisoned")
                    .insert(record.id, record.clone());
                Ok(None)
            }
        }
    }

    /// Installs arrived chunk content. The chunk slot may already hold the
    /// request placeholder; a snapshot for a position outside the current
    /// window is stale and dropped.
    pub fn install_snapshot(&self, snapshot: ChunkSnapshot) -> Result<(), String> {
        let data = ChunkData::from_parts(
            snapshot.blocks,
            snapshot.data,
            snapshot.light,
            &self.registry,
        )?;

        let chunk = match self.store.get(snapshot.pos) {
            Some(chunk) => chunk,
            None => {
                let chunk = Arc::new(ClientChunk::placeholder(snapshot.pos));
                if !self.store.insert(chunk.clone()) {
                    debug!(pos = ?snapshot.pos, "dropping snapshot outside the window");
                    return Ok(());
                }
                chunk
            }
        };

        for section in 0..SECTION_COUNT {
            chunk
                .renderer
                .set_solid(section, section_is_solid(&data, section, &self.registry));
        }
        *chunk.write_data() = data;
        chunk.mark_loaded();

        {
            let mut ids = chunk.entity_ids.lock().expect("entity lock poisoned");
            let mut entities = self.entities.lock().expect("entity lock poisoned");
            for record in snapshot.entities {
                ids.push(record.id);
                entities.insert(record.id, record);
            }
        }

        // Fresh data invalidates this chunk's geometry and the border
        // faces of the chunks that were meshed against missing-as-air.
        chunk.renderer.mark_all_dirty();
        for neighbor in snapshot.pos.neighbors8() {
            if let Some(neighbor) = self.store.get(neighbor) {
                neighbor.renderer.mark_all_dirty();
            }
        }
        self.visibility.invalidate();
        Ok(())
    }

    /// Moves the window to a new center and disposes everything it pushed
    /// out. Eviction by camera movement owns the same cleanup duties as a
    /// server-driven unload: models released, entities dropped.
    pub fn recenter(&self, center: ChunkPos, backend: &dyn RenderBackend) {
        for chunk in self.store.set_center(center) {
            self.dispose_chunk(&chunk, backend);
        }
    }

    fn unload_chunk(&self, pos: ChunkPos, backend: &dyn RenderBackend) {
        if let Some(chunk) = self.store.remove(pos) {
            self.dispose_chunk(&chunk, backend);
        }
    }

    fn dispose_chunk(&self, chunk: &ClientChunk, backend: &dyn RenderBackend) {
        chunk.renderer.release_all(backend);

        let ids = chunk.entity_ids.lock().expect("entity lock poisoned");
        let mut entities = self.entities.lock().expect("entity lock poisoned");
        for id in ids.iter() {
            entities.remove(id);
        }
    }

    pub fn get_block(&self, pos: ChunkPos, local: LocalPos) -> Option<BlockId> {
        self.store
            .get(pos)
            .map(|chunk| chunk.read_data().get_block(local))
    }

    pub fn entity(&self, id: u64) -> Option<EntityRecord> {
        self.entities
            .lock()
            .expect("entity lock poisoned")
            .get(&id)
            .cloned()
    }

    fn set_block_world(&self, x: i32, y: i32, z: i32, block: BlockId, data: u8) {
        let Some(local) = world_to_local(x, y, z) else {
            warn!(x, y, z, "block change outside the world column");
            return;
        };
        let pos = world_to_chunk(x, y);
        self.set_block(pos, local, block, data);
    }

    /// Applies a block change and dirties every section whose geometry can
    /// see the changed cell. Silently ignored when the chunk is not
    /// resident; the server resends the region as a snapshot anyway.
    pub fn set_block(&self, pos: ChunkPos, local: LocalPos, block: BlockId, data: u8) -> bool {
        let Some(chunk) = self.store.get(pos) else {
            return false;
        };
        {
            let mut chunk_data = chunk.write_data();
            chunk_data.set_block(local, block, &self.registry);
            chunk_data.set_data(local, data);
        }
        chunk
            .delayed
            .cancel_where(|update| update.local() == local);

        self.dirty_after_change(pos, local);
        true
    }

    /// A changed cell is sampled by its own section, by the vertically
    /// adjacent section when it sits on a section floor or ceiling, and by
    /// the bordering chunk's sections when it sits on a chunk edge.
    fn dirty_after_change(&self, pos: ChunkPos, local: LocalPos) {
        let section = section_of(local.z);
        let edge = (CHUNK_SIZE - 1) as u8;

        let mut columns = vec![pos];
        if local.x == 0 {
            columns.push(ChunkPos::new(pos.x - 1, pos.y));
        } else if local.x == edge {
            columns.push(ChunkPos::new(pos.x + 1, pos.y));
        }
        if local.y == 0 {
            columns.push(ChunkPos::new(pos.x, pos.y - 1));
        } else if local.y == edge {
            columns.push(ChunkPos::new(pos.x, pos.y + 1));
        }

        let z_in_section = usize::from(local.z) % SECTION_SIZE;
        let mut sections = vec![section];
        if z_in_section == 0 && section > 0 {
            sections.push(section - 1);
        } else if z_in_section == SECTION_SIZE - 1 && section + 1 < SECTION_COUNT {
            sections.push(section + 1);
        }

        for column in &columns {
            if let Some(chunk) = self.store.get(*column) {
                for &section in &sections {
                    chunk.renderer.mark_dirty(section);
                }
            }
        }
        self.visibility.invalidate();
    }

    pub fn schedule_delayed(&self, pos: ChunkPos, update: DelayedUpdate) {
        if let Some(chunk) = self.store.get(pos) {
            chunk.delayed.schedule(update);
        }
    }

    /// Advances delayed updates on every loaded chunk and applies the ones
    /// that expired while still valid.
    pub fn tick_delayed(&self, dt: f32) {
        for chunk in self.store.resident() {
            if !chunk.is_loaded() {
                continue;
            }
            let expired = chunk.delayed.tick(
                dt,
                |local| chunk.read_data().get_block(local),
                |kind, block| self.update_kinds.valid_for(kind, block),
            );
            for update in expired {
                if let Some(kind) = self.update_kinds.get(update.kind) {
                    {
                        let mut data = chunk.write_data();
                        (kind.apply)(&mut *data, update.local(), &self.registry);
                    }
                    self.dirty_after_change(chunk.pos, update.local());
                }
            }
        }
    }
}
