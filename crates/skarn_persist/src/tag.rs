use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use skarn_shared::block::BlockRegistry;
use skarn_shared::chunk::{ChunkData, TagValue};
use skarn_shared::coords::{ChunkPos, CHUNK_VOLUME};
use skarn_shared::delayed::DelayedUpdate;
use skarn_shared::entity::EntityRecord;

use crate::codec::{rle_decode, rle_encode};

/// The persistence record for one chunk. Grids are stored run-length
/// encoded; sun light and the height map are derived on load and never
/// written out. `populated` decides the lifecycle state a loaded chunk
/// starts in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkTag {
    pub pos: ChunkPos,
    pub blocks: Vec<u8>,
    pub data: Vec<u8>,
    pub light: Vec<u8>,
    pub entities: Vec<EntityRecord>,
    pub delayed_updates: Vec<DelayedUpdate>,
    pub populated: bool,
    pub metadata: HashMap<String, TagValue>,
}

impl ChunkTag {
    pub fn from_chunk(
        pos: ChunkPos,
        chunk: &ChunkData,
        entities: Vec<EntityRecord>,
        delayed_updates: Vec<DelayedUpdate>,
        populated: bool,
    ) -> Self {
        Self {
            pos,
            blocks: rle_encode(chunk.blocks_raw()),
            data: rle_encode(chunk.data_raw()),
            light: rle_encode(chunk.block_light_raw()),
            entities,
            delayed_updates,
            populated,
            metadata: chunk.metadata.clone(),
        }
    }

    /// Rebuilds the grids. Entities and delayed updates are hydrated by the
    /// caller, which owns the world-wide entity bookkeeping.
    pub fn to_chunk(&self, registry: &BlockRegistry) -> Result<ChunkData, String> {
        let blocks = rle_decode(&self.blocks, CHUNK_VOLUME)
            .map_err(|err| format!("chunk {:?} block grid: {err}", self.pos))?;
        let data = rle_decode(&self.data, CHUNK_VOLUME)
            .map_err(|err| format!("chunk {:?} data grid: {err}", self.pos))?;
        let light = rle_decode(&self.light, CHUNK_VOLUME)
            .map_err(|err| format!("chunk {:?} light grid: {err}", self.pos))?;

        let mut chunk = ChunkData::from_parts(blocks, data, light, registry)?;
        chunk.metadata = self.metadata.clone();
        Ok(chunk)
    }
}
