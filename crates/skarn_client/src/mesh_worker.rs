use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use skarn_shared::block::BlockRegistry;
use skarn_shared::chunk::ChunkData;
use skarn_shared::coords::{ChunkPos, CHUNK_SIZE};

use crate::mesher::{
    build_section, lod_for_distance, BufferPool, MeshScratch, SectionNeighbors, SectionOutcome,
};
use crate::render::RenderBackend;
use crate::terrain::ClientTerrain;

/// One section build. Chunk data is snapshotted behind `Arc` so every
/// section of the same chunk shares one copy taken at schedule time.
pub struct MeshRequest {
    pub pos: ChunkPos,
    pub section: usize,
    pub chunk: Arc<ChunkData>,
    // Neighbor order: +X, -X, +Y, -Y
    pub neighbors: [Option<Arc<ChunkData>>; 4],
    pub registry: Arc<BlockRegistry>,
    pub lod: u8,
    pub version: u32,
}

pub struct MeshResult {
    pub pos: ChunkPos,
    pub section: usize,
    pub scratch: MeshScratch,
    pub outcome: SectionOutcome,
    pub version: u32,
}

/// Threaded section meshing: builds run on a rayon pool, finished
/// geometry comes back through a channel and is installed on the main
/// thread so the renderer state never needs cross-thread locking beyond
/// the per-chunk section mutex.
pub struct MeshWorker {
    pool: ThreadPool,
    buffers: Arc<BufferPool>,
    completed_rx: Receiver<MeshResult>,
    completed_tx: Sender<MeshResult>,
}

impl Default for MeshWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshWorker {
    pub fn new() -> Self {
        let available = std::thread::available_parallelism()
            .map(|parallelism| parallelism.get())
            .unwrap_or(4);
        let worker_threads = available.saturating_sub(1).max(2).min(8);
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("mesh-worker-{index}"))
            .build()
            .expect("failed to create mesh worker thread pool");
        let (completed_tx, completed_rx) = mpsc::channel();

        Self {
            pool,
            buffers: Arc::new(BufferPool::new()),
            completed_rx,
            completed_tx,
        }
    }

    pub fn submit(&self, request: MeshRequest) {
        let completed_tx = self.completed_tx.clone();
        let mut scratch = self.buffers.check_out();
        self.pool.spawn(move || {
            let neighbors = SectionNeighbors {
                pos_x: request.neighbors[0].as_deref(),
                neg_x: request.neighbors[1].as_deref(),
                pos_y: request.neighbors[2].as_deref(),
                neg_y: request.neighbors[3].as_deref(),
            };
            let outcome = build_section(
                &request.chunk,
                neighbors,
                request.section,
                &request.registry,
                request.lod,
                &mut scratch,
            );
            let _ = completed_tx.send(MeshResult {
                pos: request.pos,
                section: request.section,
                scratch,
                outcome,
                version: request.version,
            });
        });
    }

    pub fn poll(&self) -> Vec<MeshResult> {
        let mut completed = Vec::new();
        while let Ok(result) = self.completed_rx.try_recv() {
            completed.push(result);
        }
        completed
    }

    /// Dispatches builds for every visible section that is dirty or whose
    /// LOD no longer matches its camera distance, near chunks first.
    /// Returns the number of builds submitted.
    pub fn schedule(&self, terrain: &ClientTerrain, camera_chunk: ChunkPos) -> usize {
        let mut chunks = terrain.store.resident();
        chunks.sort_by_key(|chunk| chunk.pos.distance_sq(camera_chunk));

        let mut submitted = 0;
        for chunk in chunks {
            if !chunk.is_loaded() {
                continue;
            }
            let distance_blocks =
                (chunk.pos.distance_sq(camera_chunk) as f32).sqrt() * CHUNK_SIZE as f32;
            let lod = lod_for_distance(distance_blocks);
            let sections = chunk.renderer.sections_needing_build(lod);
            if sections.is_empty() {
                continue;
            }

            let data = Arc::new(chunk.read_data().clone());
            let neighbors = [
                ChunkPos::new(chunk.pos.x + 1, chunk.pos.y),
                ChunkPos::new(chunk.pos.x - 1, chunk.pos.y),
                ChunkPos::new(chunk.pos.x, chunk.pos.y + 1),
                ChunkPos::new(chunk.pos.x, chunk.pos.y - 1),
            ]
            .map(|pos| {
                terrain
                    .store
                    .get(pos)
                    .filter(|neighbor| neighbor.is_loaded())
                    .map(|neighbor| Arc::new(neighbor.read_data().clone()))
            });

            for section in sections {
                let version = chunk.renderer.begin_build(section, lod);
                self.submit(MeshRequest {
                    pos: chunk.pos,
                    section,
                    chunk: data.clone(),
                    neighbors: neighbors.clone(),
                    registry: terrain.registry.clone(),
                    lod,
                    version,
                });
                submitted += 1;
            }
        }
        submitted
    }

    /// Drains finished builds and installs the ones that are still
    /// wanted. Scratch buffers go back to the pool either way. Returns
    /// the number of sections installed.
    pub fn apply_completions(&self, terrain: &ClientTerrain, backend: &dyn RenderBackend) -> usize {
        let mut installed = 0;
        for result in self.poll() {
            if let Some(chunk) = terrain.store.get(result.pos) {
                if chunk.renderer.replace_mesh(
                    result.section,
                    &result.scratch,
                    &result.outcome,
                    result.version,
                    backend,
                ) {
                    installed += 1;
                }
            }
            self.buffers.give_back(result.scratch);
        }
        installed
    }

    pub fn idle_buffers(&self) -> usize {
        self.buffers.idle_count()
    }
}
