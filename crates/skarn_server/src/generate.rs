use skarn_shared::block::{BlockId, BlockRegistry};
use skarn_shared::chunk::ChunkData;
use skarn_shared::coords::{ChunkPos, LocalPos};
use skarn_shared::delayed::DelayedUpdate;

/// Raw terrain for one chunk column plus any updates the generator wants
/// scheduled from the start (dripping fluids, settling gravel).
pub struct GeneratedChunk {
    pub chunk: ChunkData,
    pub updates: Vec<DelayedUpdate>,
}

/// World-generation collaborator. The noise and biome math live outside
/// the engine; the loader only calls this for chunks with no saved tag.
pub trait Generate: Send + Sync {
    fn generate(&self, pos: ChunkPos, registry: &BlockRegistry) -> GeneratedChunk;
}

/// Population collaborator: decorators run once per chunk after all 8
/// neighbors exist, then load decorators via `finish` every time a chunk
/// re-reaches `Border`-with-finish.
pub trait Populate: Send + Sync {
    fn populate(&self, pos: ChunkPos, chunk: &mut ChunkData, registry: &BlockRegistry);

    /// Post-population load decorators; runs exactly once per residency.
    fn finish(&self, _pos: ChunkPos, _chunk: &mut ChunkData, _registry: &BlockRegistry) {}
}

/// Featureless slab world: bedstone floor, granite fill, turf surface.
/// Good enough for the default binary and for exercising the pipeline in
/// tests without noise dependencies.
pub struct FlatGenerator {
    pub surface_z: u16,
}

impl FlatGenerator {
    pub fn new(surface_z: u16) -> Self {
        Self { surface_z }
    }
}

impl Generate for FlatGenerator {
    fn generate(&self, _pos: ChunkPos, registry: &BlockRegistry) -> GeneratedChunk {
        let mut chunk = ChunkData::new_empty();
        for y in 0..16u8 {
            for x in 0..16u8 {
                chunk.set_block(LocalPos { x, y, z: 0 }, BlockId::BEDSTONE, registry);
                for z in 1..self.surface_z {
                    chunk.set_block(LocalPos { x, y, z }, BlockId::GRANITE, registry);
                }
                chunk.set_block(
                    LocalPos {
                        x,
                        y,
                        z: self.surface_z,
                    },
                    BlockId::VERDANT_TURF,
                    registry,
                );
            }
        }
        GeneratedChunk {
            chunk,
            updates: Vec::new(),
        }
    }
}

/// Populator that does nothing, for worlds decorated elsewhere.
pub struct NoopPopulator;

impl Populate for NoopPopulator {
    fn populate(&self, _pos: ChunkPos, _chunk: &mut ChunkData, _registry: &BlockRegistry) {}
}
