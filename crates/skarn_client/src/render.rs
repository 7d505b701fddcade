use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytemuck::{Pod, Zeroable};

/// Vertex layout handed to the GPU layer. Kept `Pod` so backends can blit
/// whole buffers without a conversion pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub light: f32,
    pub color: [f32; 3],
}

#[derive(Clone, Debug, Default)]
pub struct MeshBuffers {
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
}

impl MeshBuffers {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }
}

/// Opaque GPU model reference issued by the backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub u64);

/// The draw layer as the engine sees it: build a model from finished
/// vertex buffers, release it when its section goes invisible. Everything
/// GPU-specific lives behind this.
pub trait RenderBackend: Send + Sync {
    fn build_model(&self, buffers: &MeshBuffers) -> ModelHandle;
    fn release_model(&self, handle: ModelHandle);
}

/// Backend that only counts; used headless and in tests to observe model
/// lifetimes without a GPU.
#[derive(Default)]
pub struct CountingBackend {
    next_handle: AtomicU64,
    live: AtomicUsize,
    released: AtomicUsize,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_models(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn released_models(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl RenderBackend for CountingBackend {
    fn build_model(&self, _buffers: &MeshBuffers) -> ModelHandle {
        self.live.fetch_add(1, Ordering::SeqCst);
        ModelHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn release_model(&self, _handle: ModelHandle) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
