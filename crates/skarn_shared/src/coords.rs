use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

pub const CHUNK_SIZE: usize = 16;
pub const CHUNK_SHIFT: u32 = 4;
pub const Z_SIZE: usize = 512;
pub const SECTION_SIZE: usize = 16;
pub const SECTION_COUNT: usize = Z_SIZE / SECTION_SIZE;
pub const SECTION_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * SECTION_SIZE;
pub const COLUMN_AREA: usize = CHUNK_SIZE * CHUNK_SIZE;
pub const CHUNK_VOLUME: usize = COLUMN_AREA * Z_SIZE;

/// Horizontal chunk column coordinate. Chunks span the full world height,
/// so two components are enough.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

/// Block coordinate inside one chunk: x/y in 0..16, z in 0..Z_SIZE.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: u8,
    pub y: u8,
    pub z: u16,
}

impl ChunkPos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The 8 surrounding columns, the radius-1 neighborhood every lifecycle
    /// predicate is evaluated over.
    pub fn neighbors8(self) -> [ChunkPos; 8] {
        let mut out = [ChunkPos::default(); 8];
        let mut i = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                out[i] = ChunkPos::new(self.x + dx, self.y + dy);
                i += 1;
            }
        }
        out
    }

    pub fn distance_sq(self, other: ChunkPos) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        dx * dx + dy * dy
    }
}

impl Add for ChunkPos {
    type Output = ChunkPos;

    fn add(self, rhs: Self) -> Self::Output {
        ChunkPos::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for ChunkPos {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for ChunkPos {
    type Output = ChunkPos;

    fn sub(self, rhs: Self) -> Self::Output {
        ChunkPos::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for ChunkPos {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

/// Maps a world block column to its chunk via arithmetic shift, which
/// floors for negative coordinates.
pub fn world_to_chunk(block_x: i32, block_y: i32) -> ChunkPos {
    ChunkPos::new(block_x >> CHUNK_SHIFT, block_y >> CHUNK_SHIFT)
}

pub fn world_to_local(block_x: i32, block_y: i32, block_z: i32) -> Option<LocalPos> {
    if block_z < 0 || block_z >= Z_SIZE as i32 {
        return None;
    }
    let mask = (CHUNK_SIZE - 1) as i32;
    Some(LocalPos {
        x: (block_x & mask) as u8,
        y: (block_y & mask) as u8,
        z: block_z as u16,
    })
}

pub fn chunk_to_world(chunk: ChunkPos, local: LocalPos) -> (i32, i32, i32) {
    (
        (chunk.x << CHUNK_SHIFT) + i32::from(local.x),
        (chunk.y << CHUNK_SHIFT) + i32::from(local.y),
        i32::from(local.z),
    )
}

pub fn local_to_index(local: LocalPos) -> usize {
    usize::from(local.x) + usize::from(local.y) * CHUNK_SIZE + usize::from(local.z) * COLUMN_AREA
}

pub fn index_to_local(index: usize) -> LocalPos {
    assert!(index < CHUNK_VOLUME, "chunk index out of bounds: {index}");

    let z = index / COLUMN_AREA;
    let rem = index % COLUMN_AREA;
    let y = rem / CHUNK_SIZE;
    let x = rem % CHUNK_SIZE;

    LocalPos {
        x: x as u8,
        y: y as u8,
        z: z as u16,
    }
}

pub fn column_index(x: u8, y: u8) -> usize {
    usize::from(x) + usize::from(y) * CHUNK_SIZE
}

/// The vertical 16-block section a local z falls in.
pub fn section_of(z: u16) -> usize {
    usize::from(z) / SECTION_SIZE
}
