use glam::Vec3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::block::BlockId;
use crate::chunk::ChunkData;
use crate::coords::ChunkPos;
use crate::entity::EntityRecord;

pub const PROTOCOL_VERSION: u32 = 1;
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// Full chunk content as sent server to client: the three transported
/// grids plus resident entities. Delayed updates and metadata stay server
/// side; sun light and the height map are derived on install.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub pos: ChunkPos,
    pub blocks: Vec<u8>,
    pub data: Vec<u8>,
    pub light: Vec<u8>,
    pub entities: Vec<EntityRecord>,
}

impl ChunkSnapshot {
    pub fn from_chunk(pos: ChunkPos, chunk: &ChunkData, entities: Vec<EntityRecord>) -> Self {
        Self {
            pos,
            blocks: chunk.blocks_raw().to_vec(),
            data: chunk.data_raw().to_vec(),
            light: chunk.block_light_raw().to_vec(),
            entities,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum C2S {
    RequestChunks {
        positions: Vec<ChunkPos>,
    },
    /// Sent when a movement packet references an entity the client does
    /// not know yet; the answer is an `EntityState`.
    RequestEntity {
        entity_id: u64,
    },
    BlockEdit {
        x: i32,
        y: i32,
        z: i32,
        block: BlockId,
        data: u8,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum S2C {
    ChunkSnapshot {
        pos: ChunkPos,
        /// lz4-compressed bincode of a `ChunkSnapshot`.
        payload: Vec<u8>,
        format_version: u8,
    },
    ChunkUnload {
        pos: ChunkPos,
    },
    BlockChange {
        x: i32,
        y: i32,
        z: i32,
        block: BlockId,
        data: u8,
    },
    /// Shorthand for the common removal case; carries no id/data payload.
    BlockAir {
        x: i32,
        y: i32,
        z: i32,
    },
    EntityMove {
        entity_id: u64,
        position: Vec3,
        tick: u64,
    },
    EntityState {
        record: EntityRecord,
    },
}

pub fn encode<T: Serialize>(msg: &T) -> Vec<u8> {
    bincode::serialize(msg).expect("failed to encode protocol payload")
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(data)
}

pub fn encode_snapshot(snapshot: &ChunkSnapshot) -> S2C {
    let raw = encode(snapshot);
    S2C::ChunkSnapshot {
        pos: snapshot.pos,
        payload: lz4_flex::compress_prepend_size(&raw),
        format_version: SNAPSHOT_FORMAT_VERSION,
    }
}

pub fn decode_snapshot(payload: &[u8], format_version: u8) -> Result<ChunkSnapshot, String> {
    if format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(format!(
            "unsupported snapshot format version {format_version}, expected {SNAPSHOT_FORMAT_VERSION}"
        ));
    }
    let raw = lz4_flex::decompress_size_prepended(payload)
        .map_err(|err| format!("failed to decompress chunk snapshot: {err}"))?;
    decode(&raw).map_err(|err| format!("failed to decode chunk snapshot: {err}"))
}

#[cfg(test)]
mod tests {
    use super::{
        decode, decode_snapshot, encode, encode_snapshot, ChunkSnapshot, C2S, S2C,
    };
    use crate::block::{register_default_blocks, BlockId};
    use crate::chunk::ChunkData;
    use crate::coords::{ChunkPos, LocalPos};
    use crate::entity::EntityRecord;

    #[test]
    fn c2s_round_trip_serialization() {
        let request = C2S::RequestChunks {
            positions: vec![ChunkPos::new(1, -2), ChunkPos::new(3, 4)],
        };
        let decoded: C2S = decode(&encode(&request)).expect("decode request chunks");
        assert_eq!(decoded, request);

        let edit = C2S::BlockEdit {
            x: -11,
            y: 23,
            z: 70,
            block: BlockId::GRANITE,
            data: 2,
        };
        let decoded: C2S = decode(&encode(&edit)).expect("decode block edit");
        assert_eq!(decoded, edit);
    }

    #[test]
    fn air_shorthand_round_trips() {
        let air = S2C::BlockAir { x: 5, y: 6, z: 7 };
        let decoded: S2C = decode(&encode(&air)).expect("decode block air");
        assert_eq!(decoded, air);
    }

    #[test]
    fn snapshot_compresses_and_round_trips() {
        let registry = register_default_blocks();
        let mut chunk = ChunkData::new_empty();
        chunk.set_block(LocalPos { x: 1, y: 2, z: 3 }, BlockId::GRANITE, &registry);

        let snapshot = ChunkSnapshot::from_chunk(
            ChunkPos::new(-4, 9),
            &chunk,
            vec![EntityRecord::new(7, 1, vec![9], 100)],
        );

        let msg = encode_snapshot(&snapshot);
        let S2C::ChunkSnapshot {
            pos,
            payload,
            format_version,
        } = &msg
        else {
            panic!("expected ChunkSnapshot message");
        };
        assert_eq!(*pos, snapshot.pos);
        // Mostly-air grids compress far below their raw size.
        assert!(payload.len() < snapshot.blocks.len());

        let decoded = decode_snapshot(payload, *format_version).expect("decode snapshot");
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn snapshot_with_unknown_version_is_rejected() {
        let chunk = ChunkData::new_empty();
        let snapshot = ChunkSnapshot::from_chunk(ChunkPos::new(0, 0), &chunk, Vec::new());
        let S2C::ChunkSnapshot { payload, .. } = encode_snapshot(&snapshot) else {
            panic!("expected ChunkSnapshot message");
        };
        assert!(decode_snapshot(&payload, 99).is_err());
    }
}
