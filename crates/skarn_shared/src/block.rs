use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Minimum opacity connection for a block to count toward a solid section.
/// Blocks below the threshold (leaves, grilles) leave visibility gaps even
/// though they are opaque for face culling.
pub const OPACITY_CONNECTED_MIN: u8 = 128;

#[repr(transparent)]
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Pod,
    Zeroable,
)]
pub struct BlockId(pub u8);

impl BlockId {
    pub const AIR: Self = Self(0);
    pub const BEDSTONE: Self = Self(1);
    pub const GRANITE: Self = Self(2);
    pub const LOAM: Self = Self(3);
    pub const VERDANT_TURF: Self = Self(4);
    pub const DUNE_SAND: Self = Self(5);
    pub const TIMBER_LOG: Self = Self(6);
    pub const CANOPY_LEAVES: Self = Self(7);
    pub const STILL_WATER: Self = Self(8);
    pub const CRYSTAL_PANE: Self = Self(9);
    pub const SNOWCAP: Self = Self(10);
    pub const GLOWSPAR: Self = Self(11);
    pub const SAPLING: Self = Self(12);
}

/// The properties the chunk engine itself consumes. Gameplay behavior for a
/// block type lives outside this crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockProperties {
    pub name: String,
    /// Opaque blocks cull neighbor faces and block the visibility fill.
    pub opaque: bool,
    /// How completely an opaque block closes off its cell, 0..=255.
    pub connection: u8,
    /// Rendered in the alpha pass instead of the opaque pass.
    pub alpha: bool,
    pub light_emission: u8,
}

pub struct BlockRegistry {
    properties: Vec<BlockProperties>,
    by_name: HashMap<String, BlockId>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn register(&mut self, props: BlockProperties) -> BlockId {
        if let Some(existing) = self.by_name.get(props.name.as_str()) {
            return *existing;
        }

        let next_index = self.properties.len();
        let id = BlockId(
            u8::try_from(next_index).expect("block registry exceeded BlockId capacity (u8::MAX)"),
        );

        self.by_name.insert(props.name.clone(), id);
        self.properties.push(props);
        id
    }

    pub fn get_properties(&self, id: BlockId) -> &BlockProperties {
        self.properties
            .get(id.0 as usize)
            .or_else(|| self.properties.get(BlockId::AIR.0 as usize))
            .expect("block registry is empty; call register_default_blocks() first")
    }

    pub fn get_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    pub fn is_opaque(&self, id: BlockId) -> bool {
        self.get_properties(id).opaque
    }

    /// True when the block both is opaque and closes its cell fully enough
    /// to contribute to a solid section.
    pub fn is_connected_opaque(&self, id: BlockId) -> bool {
        let props = self.get_properties(id);
        props.opaque && props.connection >= OPACITY_CONNECTED_MIN
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        register_default_blocks()
    }
}

pub fn register_default_blocks() -> BlockRegistry {
    fn block(name: &str, opaque: bool, connection: u8, alpha: bool) -> BlockProperties {
        block_with_light(name, opaque, connection, alpha, 0)
    }

    fn block_with_light(
        name: &str,
        opaque: bool,
        connection: u8,
        alpha: bool,
        light_emission: u8,
    ) -> BlockProperties {
        BlockProperties {
            name: name.to_string(),
            opaque,
            connection,
            alpha,
            light_emission,
        }
    }

    let mut registry = BlockRegistry::new();

    let defaults = [
        block("air", false, 0, false),
        block("bedstone", true, 255, false),
        block("granite", true, 255, false),
        block("loam", true, 255, false),
        block("verdant_turf", true, 255, false),
        block("dune_sand", true, 255, false),
        block("timber_log", true, 255, false),
        block("canopy_leaves", true, 48, false),
        block("still_water", false, 0, true),
        block("crystal_pane", false, 0, true),
        block("snowcap", true, 200, false),
        block_with_light("glowspar", true, 255, false, 14),
        block("sapling", false, 0, false),
    ];

    for props in defaults {
        registry.register(props);
    }

    registry
}
