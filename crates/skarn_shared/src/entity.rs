use serde::{Deserialize, Serialize};

/// A persisted or transmitted entity. `id` is unique across the whole
/// world, not per chunk; `state` is the opaque gameplay payload and
/// `last_tick` lets a loading chunk run catch-up simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: u64,
    pub kind: u16,
    pub state: Vec<u8>,
    pub last_tick: u64,
}

impl EntityRecord {
    pub fn new(id: u64, kind: u16, state: Vec<u8>, last_tick: u64) -> Self {
        Self {
            id,
            kind,
            state,
            last_tick,
        }
    }
}
