use std::sync::Mutex;

use glam::Vec3;

use skarn_shared::block::{BlockId, BlockRegistry};
use skarn_shared::chunk::ChunkData;
use skarn_shared::coords::{LocalPos, CHUNK_SIZE, SECTION_SIZE, Z_SIZE};

use crate::render::{MeshBuffers, TerrainVertex};

const CHUNK_SIZE_I32: i32 = CHUNK_SIZE as i32;
const LIGHT_MAX: f32 = 15.0;

/// Camera distance (blocks) past which a section builds at LOD 1, which
/// drops the alpha pass. Crossing the threshold rebuilds the section even
/// when no block changed.
pub const LOD_DISTANCE_BLOCKS: f32 = 192.0;

pub fn lod_for_distance(distance_blocks: f32) -> u8 {
    if distance_blocks > LOD_DISTANCE_BLOCKS {
        1
    } else {
        0
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    fn grow(aabb: &mut Option<Aabb>, point: Vec3) {
        match aabb {
            Some(aabb) => {
                aabb.min = aabb.min.min(point);
                aabb.max = aabb.max.max(point);
            }
            None => *aabb = Some(Aabb { min: point, max: point }),
        }
    }
}

/// Horizontal neighbors of the chunk being meshed. Vertical neighbors are
/// other sections of the same column. A missing neighbor reads as air;
/// the snapshot install dirties the border again once it arrives.
#[derive(Copy, Clone, Default)]
pub struct SectionNeighbors<'a> {
    pub pos_x: Option<&'a ChunkData>,
    pub neg_x: Option<&'a ChunkData>,
    pub pos_y: Option<&'a ChunkData>,
    pub neg_y: Option<&'a ChunkData>,
}

/// Geometry scratch checked out around each build. Pooling keeps the
/// grown vector capacity with the pool instead of in hidden thread-local
/// state.
#[derive(Default)]
pub struct MeshScratch {
    pub opaque: MeshBuffers,
    pub alpha: MeshBuffers,
}

#[derive(Default)]
pub struct BufferPool {
    idle: Mutex<Vec<MeshScratch>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_out(&self) -> MeshScratch {
        self.idle
            .lock()
            .expect("buffer pool lock poisoned")
            .pop()
            .unwrap_or_default()
    }

    pub fn give_back(&self, mut scratch: MeshScratch) {
        scratch.opaque.clear();
        scratch.alpha.clear();
        self.idle
            .lock()
            .expect("buffer pool lock poisoned")
            .push(scratch);
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("buffer pool lock poisoned").len()
    }
}

/// Everything a build reports besides the geometry itself, which stays in
/// the scratch the caller passed in.
#[derive(Clone, Debug, Default)]
pub struct SectionOutcome {
    pub solid: bool,
    pub opaque_aabb: Option<Aabb>,
    pub alpha_aabb: Option<Aabb>,
}

/// Every block opaque and fully connected: the section can never be seen
/// into and needs no mesh.
pub fn section_is_solid(chunk: &ChunkData, section: usize, registry: &BlockRegistry) -> bool {
    let z_base = (section * SECTION_SIZE) as u16;
    for z in z_base..z_base + SECTION_SIZE as u16 {
        for y in 0..CHUNK_SIZE as u8 {
            for x in 0..CHUNK_SIZE as u8 {
                if !registry.is_connected_opaque(chunk.get_block(LocalPos { x, y, z })) {
                    return false;
                }
            }
        }
    }
    true
}

struct FaceSpec {
    offset: [i32; 3],
    normal: [f32; 3],
    corners: [[f32; 3]; 4],
}

const FACE_SPECS: [FaceSpec; 6] = [
    // +X
    FaceSpec {
        offset: [1, 0, 0],
        normal: [1.0, 0.0, 0.0],
        corners: [
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 1.0, 1.0],
            [1.0, 0.0, 1.0],
        ],
    },
    // -X
    FaceSpec {
        offset: [-1, 0, 0],
        normal: [-1.0, 0.0, 0.0],
        corners: [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [0.0, 1.0, 0.0],
        ],
    },
    // +Y
    FaceSpec {
        offset: [0, 1, 0],
        normal: [0.0, 1.0, 0.0],
        corners: [
            [0.0, 1.0, 0.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 1.0],
            [1.0, 1.0, 0.0],
        ],
    },
    // -Y
    FaceSpec {
        offset: [0, -1, 0],
        normal: [0.0, -1.0, 0.0],
        corners: [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 0.0, 1.0],
            [0.0, 0.0, 1.0],
        ],
    },
    // +Z
    FaceSpec {
        offset: [0, 0, 1],
        normal: [0.0, 0.0, 1.0],
        corners: [
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ],
    },
    // -Z
    FaceSpec {
        offset: [0, 0, -1],
        normal: [0.0, 0.0, -1.0],
        corners: [
            [0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
        ],
    },
];

/// Builds one section's geometry into `scratch`. Positions are local to
/// the chunk (x/y in 0..16, z absolute in the column) so the render layer
/// places whole chunks. At LOD 1 the alpha pass is skipped.
pub fn build_section(
    chunk: &ChunkData,
    neighbors: SectionNeighbors<'_>,
    section: usize,
    registry: &BlockRegistry,
    lod: u8,
    scratch: &mut MeshScratch,
) -> SectionOutcome {
    scratch.opaque.clear();
    scratch.alpha.clear();

    let mut outcome = SectionOutcome::default();
    if section_is_solid(chunk, section, registry) {
        outcome.solid = true;
        return outcome;
    }

    let z_base = (section * SECTION_SIZE) as i32;
    for z in z_base..z_base + SECTION_SIZE as i32 {
        for y in 0..CHUNK_SIZE_I32 {
            for x in 0..CHUNK_SIZE_I32 {
                let block = chunk.get_block(LocalPos {
                    x: x as u8,
                    y: y as u8,
                    z: z as u16,
                });
                if block == BlockId::AIR {
                    continue;
                }

                let props = registry.get_properties(block);
                if props.alpha && lod > 0 {
                    continue;
                }

                for face in &FACE_SPECS {
                    let (neighbor, light) = sample(
                        chunk,
                        neighbors,
                        x + face.offset[0],
                        y + face.offset[1],
                        z + face.offset[2],
                    );
                    if registry.is_opaque(neighbor) {
                        continue;
                    }
                    // Same-type alpha blocks share an interior; no inner
                    // faces between two water cells.
                    if props.alpha && neighbor == block {
                        continue;
                    }

                    let (buffers, aabb) = if props.alpha {
                        (&mut scratch.alpha, &mut outcome.alpha_aabb)
                    } else {
                        (&mut scratch.opaque, &mut outcome.opaque_aabb)
                    };
                    emit_face(buffers, aabb, face, x, y, z, light);
                }
            }
        }
    }

    outcome
}

fn emit_face(
    buffers: &mut MeshBuffers,
    aabb: &mut Option<Aabb>,
    face: &FaceSpec,
    x: i32,
    y: i32,
    z: i32,
    light: f32,
) {
    let base = buffers.vertices.len() as u32;
    for corner in &face.corners {
        let position = [
            x as f32 + corner[0],
            y as f32 + corner[1],
            z as f32 + corner[2],
        ];
        Aabb::grow(aabb, Vec3::from(position));
        buffers.vertices.push(TerrainVertex {
            position,
            normal: face.normal,
            light,
            color: [1.0, 1.0, 1.0],
        });
    }
    buffers
        .indices
        .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
}

/// Block and exposure light at a possibly out-of-chunk cell. Above and
/// below the world, and past a missing neighbor, reads as fully lit air.
fn sample(
    chunk: &ChunkData,
    neighbors: SectionNeighbors<'_>,
    x: i32,
    y: i32,
    z: i32,
) -> (BlockId, f32) {
    if z < 0 || z >= Z_SIZE as i32 {
        return (BlockId::AIR, 1.0);
    }

    let (source, lx, ly) = if (0..CHUNK_SIZE_I32).contains(&x) && (0..CHUNK_SIZE_I32).contains(&y)
    {
        (Some(chunk), x, y)
    } else if x < 0 {
        (neighbors.neg_x, x + CHUNK_SIZE_I32, y)
    } else if x >= CHUNK_SIZE_I32 {
        (neighbors.pos_x, x - CHUNK_SIZE_I32, y)
    } else if y < 0 {
        (neighbors.neg_y, x, y + CHUNK_SIZE_I32)
    } else {
        (neighbors.pos_y, x, y - CHUNK_SIZE_I32)
    };

    let Some(source) = source else {
        return (BlockId::AIR, 1.0);
    };
    let local = LocalPos {
        x: lx as u8,
        y: ly as u8,
        z: z as u16,
    };
    let light = source
        .get_block_light(local)
        .max(source.get_sun_light(local)) as f32
        / LIGHT_MAX;
    (source.get_block(local), light)
}
