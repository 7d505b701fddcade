use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use skarn_shared::coords::ChunkPos;

use crate::compression::{compress_zstd, decompress_zstd};
use crate::tag::ChunkTag;
use crate::versioning::{migrate_region_payload, CURRENT_REGION_FORMAT_VERSION, FORMAT_VERSION};

#[derive(Serialize, Deserialize)]
struct RegionDisk {
    format_version: u32,
    chunks: Vec<ChunkTag>,
}

/// One region file: the tags of up to 16x16 chunk columns, held in memory
/// and rewritten wholesale on flush.
pub struct RegionFile {
    path: PathBuf,
    chunks: HashMap<ChunkPos, ChunkTag>,
}

impl RegionFile {
    pub const MAGIC: [u8; 4] = *b"SKRN";
    const WIRE_VERSION_UNCOMPRESSED: u8 = 1;
    const WIRE_VERSION_ZSTD: u8 = 2;

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Ok(Self {
                path,
                chunks: HashMap::new(),
            });
        }

        let bytes = fs::read(&path)?;
        if bytes.is_empty() {
            return Ok(Self {
                path,
                chunks: HashMap::new(),
            });
        }

        if bytes.len() < Self::MAGIC.len() || bytes[..4] != Self::MAGIC[..] {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid region file magic; expected SKRN",
            ));
        }

        let payload = &bytes[Self::MAGIC.len()..];
        let (wire_version, wire_payload) = payload.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "missing region wire format version")
        })?;

        let disk = match *wire_version {
            Self::WIRE_VERSION_UNCOMPRESSED => Self::decode_region_disk_with_migration(wire_payload)?,
            Self::WIRE_VERSION_ZSTD => {
                let decompressed = decompress_zstd(wire_payload).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("failed to decompress region payload: {err}"),
                    )
                })?;
                Self::decode_region_disk_with_migration(&decompressed)?
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported region wire format version {other}; expected 1 or 2"),
                ))
            }
        };

        debug!(
            "Loaded region {:?} with {} chunks (format v{})",
            path,
            disk.chunks.len(),
            disk.format_version
        );

        Ok(Self {
            path,
            chunks: disk.chunks.into_iter().map(|tag| (tag.pos, tag)).collect(),
        })
    }

    pub fn save_chunk(&mut self, tag: ChunkTag) {
        self.chunks.insert(tag.pos, tag);
    }

    pub fn load_chunk(&self, pos: ChunkPos) -> Option<ChunkTag> {
        self.chunks.get(&pos).cloned()
    }

    pub fn remove_chunk(&mut self, pos: ChunkPos) -> Option<ChunkTag> {
        self.chunks.remove(&pos)
    }

    pub fn flush(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let disk = RegionDisk {
            format_version: FORMAT_VERSION,
            chunks: self.chunks.values().cloned().collect(),
        };

        let encoded = bincode::serialize(&disk).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to encode region payload: {err}"),
            )
        })?;
        let compressed = compress_zstd(&encoded, 3)?;

        let mut bytes = Vec::with_capacity(Self::MAGIC.len() + 1 + compressed.len());
        bytes.extend_from_slice(&Self::MAGIC);
        bytes.push(Self::WIRE_VERSION_ZSTD);
        bytes.extend_from_slice(&compressed);

        fs::write(&self.path, bytes)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_positions(&self) -> Vec<ChunkPos> {
        self.chunks.keys().copied().collect()
    }

    pub fn tags(&self) -> impl Iterator<Item = &ChunkTag> {
        self.chunks.values()
    }

    fn decode_region_disk_with_migration(payload: &[u8]) -> io::Result<RegionDisk> {
        let source_version = Self::decode_region_version(payload)?;
        let migrated = migrate_region_payload(source_version, payload.to_vec()).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to migrate region payload from format v{source_version}: {err}"),
            )
        })?;
        if source_version != CURRENT_REGION_FORMAT_VERSION {
            debug!(
                "Migrated region payload format v{} -> v{}",
                source_version, CURRENT_REGION_FORMAT_VERSION
            );
        }
        Self::decode_region_disk(&migrated)
    }

    fn decode_region_disk(payload: &[u8]) -> io::Result<RegionDisk> {
        bincode::deserialize(payload).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to decode region payload: {err}"),
            )
        })
    }

    fn decode_region_version(payload: &[u8]) -> io::Result<u32> {
        let mut cursor = Cursor::new(payload);
        bincode::deserialize_from::<_, u32>(&mut cursor).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to decode region version prefix: {err}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::RegionFile;
    use crate::tag::ChunkTag;
    use skarn_shared::chunk::ChunkData;
    use skarn_shared::coords::ChunkPos;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("skarn_region_test_{}_{name}.skr", std::process::id()));
        path
    }

    fn empty_tag(pos: ChunkPos) -> ChunkTag {
        ChunkTag::from_chunk(pos, &ChunkData::new_empty(), Vec::new(), Vec::new(), true)
    }

    #[test]
    fn region_file_round_trips_through_disk() {
        let path = temp_path("round_trip");
        let _ = std::fs::remove_file(&path);

        let mut region = RegionFile::open(&path).expect("open new region");
        region.save_chunk(empty_tag(ChunkPos::new(1, 2)));
        region.save_chunk(empty_tag(ChunkPos::new(-3, 4)));
        region.flush().expect("flush region");

        let reopened = RegionFile::open(&path).expect("reopen region");
        assert_eq!(reopened.chunk_count(), 2);
        let tag = reopened
            .load_chunk(ChunkPos::new(1, 2))
            .expect("chunk present");
        assert!(tag.populated);
        assert!(reopened.load_chunk(ChunkPos::new(9, 9)).is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn garbage_file_is_rejected() {
        let path = temp_path("garbage");
        std::fs::write(&path, b"not a region file at all").expect("write garbage");
        assert!(RegionFile::open(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_opens_empty() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        let region = RegionFile::open(&path).expect("open missing region");
        assert_eq!(region.chunk_count(), 0);
        assert!(region.load_chunk(ChunkPos::new(0, 0)).is_none());
    }
}
