use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockRegistry};
use crate::coords::{column_index, local_to_index, LocalPos, CHUNK_VOLUME, COLUMN_AREA, Z_SIZE};

pub const FULL_SUN: u8 = 15;

/// Free-form per-chunk metadata persisted alongside the grids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// The block grids of one chunk: ids, per-block data, block light and sun
/// light, all flat arrays addressed by local (x, y, z), plus the height map
/// used to rebuild sun light columns.
#[derive(Clone, Debug)]
pub struct ChunkData {
    blocks: Box<[u8]>,
    data: Box<[u8]>,
    block_light: Box<[u8]>,
    sun_light: Box<[u8]>,
    height_map: Box<[u16; COLUMN_AREA]>,
    pub metadata: HashMap<String, TagValue>,
}

impl ChunkData {
    pub fn new_empty() -> Self {
        Self {
            blocks: vec![0; CHUNK_VOLUME].into_boxed_slice(),
            data: vec![0; CHUNK_VOLUME].into_boxed_slice(),
            block_light: vec![0; CHUNK_VOLUME].into_boxed_slice(),
            sun_light: vec![FULL_SUN; CHUNK_VOLUME].into_boxed_slice(),
            height_map: Box::new([0; COLUMN_AREA]),
            metadata: HashMap::new(),
        }
    }

    /// Rebuilds a chunk from raw persisted/network grids. Sun light and the
    /// height map are derived, not transported.
    pub fn from_parts(
        blocks: Vec<u8>,
        data: Vec<u8>,
        block_light: Vec<u8>,
        registry: &BlockRegistry,
    ) -> Result<Self, String> {
        for (label, grid) in [("blocks", &blocks), ("data", &data), ("light", &block_light)] {
            if grid.len() != CHUNK_VOLUME {
                return Err(format!(
                    "chunk {label} grid has {} entries, expected {CHUNK_VOLUME}",
                    grid.len()
                ));
            }
        }

        let mut chunk = Self {
            blocks: blocks.into_boxed_slice(),
            data: data.into_boxed_slice(),
            block_light: block_light.into_boxed_slice(),
            sun_light: vec![0; CHUNK_VOLUME].into_boxed_slice(),
            height_map: Box::new([0; COLUMN_AREA]),
            metadata: HashMap::new(),
        };
        chunk.recompute_height_map(registry);
        chunk.recompute_sun_light();
        Ok(chunk)
    }

    pub fn get_block(&self, local: LocalPos) -> BlockId {
        BlockId(self.blocks[local_to_index(local)])
    }

    /// Sets a block and keeps the column height and sun light current.
    pub fn set_block(&mut self, local: LocalPos, block: BlockId, registry: &BlockRegistry) {
        let index = local_to_index(local);
        self.blocks[index] = block.0;
        self.data[index] = 0;

        let column = column_index(local.x, local.y);
        let height = self.height_map[column];
        if registry.is_opaque(block) {
            if local.z + 1 > height {
                self.height_map[column] = local.z + 1;
                self.recompute_sun_column(local.x, local.y);
            }
        } else if local.z + 1 == height {
            self.height_map[column] = self.scan_column_height(local.x, local.y, registry);
            self.recompute_sun_column(local.x, local.y);
        }
    }

    pub fn get_data(&self, local: LocalPos) -> u8 {
        self.data[local_to_index(local)]
    }

    pub fn set_data(&mut self, local: LocalPos, value: u8) {
        self.data[local_to_index(local)] = value;
    }

    pub fn get_block_light(&self, local: LocalPos) -> u8 {
        self.block_light[local_to_index(local)]
    }

    pub fn set_block_light(&mut self, local: LocalPos, level: u8) {
        self.block_light[local_to_index(local)] = level;
    }

    pub fn get_sun_light(&self, local: LocalPos) -> u8 {
        self.sun_light[local_to_index(local)]
    }

    pub fn height(&self, x: u8, y: u8) -> u16 {
        self.height_map[column_index(x, y)]
    }

    pub fn blocks_raw(&self) -> &[u8] {
        &self.blocks
    }

    pub fn data_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn block_light_raw(&self) -> &[u8] {
        &self.block_light
    }

    pub fn recompute_height_map(&mut self, registry: &BlockRegistry) {
        for y in 0..16u8 {
            for x in 0..16u8 {
                self.height_map[column_index(x, y)] = self.scan_column_height(x, y, registry);
            }
        }
    }

    /// Sun light is a column model: full above the highest opaque block,
    /// dark below it.
    pub fn recompute_sun_light(&mut self) {
        for y in 0..16u8 {
            for x in 0..16u8 {
                self.recompute_sun_column(x, y);
            }
        }
    }

    fn scan_column_height(&self, x: u8, y: u8, registry: &BlockRegistry) -> u16 {
        for z in (0..Z_SIZE as u16).rev() {
            let block = BlockId(self.blocks[local_to_index(LocalPos { x, y, z })]);
            if registry.is_opaque(block) {
                return z + 1;
            }
        }
        0
    }

    fn recompute_sun_column(&mut self, x: u8, y: u8) {
        let height = self.height_map[column_index(x, y)];
        for z in 0..Z_SIZE as u16 {
            let level = if z >= height { FULL_SUN } else { 0 };
            self.sun_light[local_to_index(LocalPos { x, y, z })] = level;
        }
    }
}

impl Default for ChunkData {
    fn default() -> Self {
        Self::new_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkData, FULL_SUN};
    use crate::block::{register_default_blocks, BlockId};
    use crate::coords::{LocalPos, CHUNK_VOLUME};

    #[test]
    fn empty_chunk_is_air_under_full_sun() {
        let chunk = ChunkData::new_empty();
        let pos = LocalPos { x: 3, y: 7, z: 100 };
        assert_eq!(chunk.get_block(pos), BlockId::AIR);
        assert_eq!(chunk.get_sun_light(pos), FULL_SUN);
        assert_eq!(chunk.height(3, 7), 0);
    }

    #[test]
    fn set_block_tracks_column_height_and_sun() {
        let registry = register_default_blocks();
        let mut chunk = ChunkData::new_empty();

        chunk.set_block(LocalPos { x: 5, y: 5, z: 20 }, BlockId::GRANITE, &registry);
        assert_eq!(chunk.height(5, 5), 21);
        assert_eq!(chunk.get_sun_light(LocalPos { x: 5, y: 5, z: 10 }), 0);
        assert_eq!(chunk.get_sun_light(LocalPos { x: 5, y: 5, z: 21 }), FULL_SUN);

        // Removing the block drops the column back to its lower surface.
        chunk.set_block(LocalPos { x: 5, y: 5, z: 10 }, BlockId::LOAM, &registry);
        chunk.set_block(LocalPos { x: 5, y: 5, z: 20 }, BlockId::AIR, &registry);
        assert_eq!(chunk.height(5, 5), 11);
        assert_eq!(chunk.get_sun_light(LocalPos { x: 5, y: 5, z: 15 }), FULL_SUN);
    }

    #[test]
    fn from_parts_validates_grid_lengths() {
        let registry = register_default_blocks();
        let err = ChunkData::from_parts(vec![0; 7], vec![0; 7], vec![0; 7], &registry);
        assert!(err.is_err());

        let mut blocks = vec![0u8; CHUNK_VOLUME];
        blocks[0] = BlockId::GRANITE.0;
        let chunk = ChunkData::from_parts(
            blocks,
            vec![0; CHUNK_VOLUME],
            vec![0; CHUNK_VOLUME],
            &registry,
        )
        .expect("valid grids");
        assert_eq!(chunk.get_block(LocalPos { x: 0, y: 0, z: 0 }), BlockId::GRANITE);
        assert_eq!(chunk.height(0, 0), 1);
    }
}
