use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bitflags::bitflags;
use glam::Vec3;

use skarn_shared::coords::{world_to_chunk, ChunkPos, SECTION_COUNT, SECTION_SIZE};

use crate::mesher::{Aabb, MeshScratch, SectionOutcome};
use crate::render::{ModelHandle, RenderBackend};
use crate::store::WindowStore;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Every block opaque and connected; blocks the flood fill.
        const SOLID = 1 << 0;
        /// Reachability result of the last completed pass.
        const VISIBLE = 1 << 1;
        /// Transient: reachability being computed by the current pass.
        const PREPARE_VISIBLE = 1 << 2;
        /// Transient: visited marker of the current flood fill.
        const CULLED = 1 << 3;
        /// Geometry is stale and needs a rebuild.
        const DIRTY = 1 << 4;
    }
}

/// Per-section render state of one client chunk.
pub struct SectionState {
    pub flags: SectionFlags,
    pub opaque_model: Option<ModelHandle>,
    pub alpha_model: Option<ModelHandle>,
    pub opaque_aabb: Option<Aabb>,
    pub alpha_aabb: Option<Aabb>,
    pub lod: u8,
    /// Bumped when a build is dispatched; completions carrying an older
    /// stamp are discarded.
    version: u32,
}

impl SectionState {
    fn new() -> Self {
        Self {
            flags: SectionFlags::empty(),
            opaque_model: None,
            alpha_model: None,
            opaque_aabb: None,
            alpha_aabb: None,
            lod: 0,
            version: 0,
        }
    }
}

/// Render-side companion of a client chunk: one state per 16-block
/// vertical section. Owned by the chunk; mesh models are owned here and
/// released the moment a section stops being visible.
pub struct RendererChunk {
    sections: Mutex<Vec<SectionState>>,
}

impl Default for RendererChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererChunk {
    pub fn new() -> Self {
        Self {
            sections: Mutex::new((0..SECTION_COUNT).map(|_| SectionState::new()).collect()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SectionState>> {
        self.sections.lock().expect("renderer chunk lock poisoned")
    }

    pub fn flags(&self, section: usize) -> SectionFlags {
        self.lock()[section].flags
    }

    pub fn mark_dirty(&self, section: usize) {
        self.lock()[section].flags.insert(SectionFlags::DIRTY);
    }

    pub fn mark_all_dirty(&self) {
        for state in self.lock().iter_mut() {
            state.flags.insert(SectionFlags::DIRTY);
        }
    }

    /// Seeds the solidity flag without a mesh build, used when chunk data
    /// arrives and solidity can be read straight off the blocks.
    pub fn set_solid(&self, section: usize, solid: bool) {
        self.lock()[section].flags.set(SectionFlags::SOLID, solid);
    }

    /// Sections that currently want a rebuild: visible and either dirty
    /// or built at a different LOD than the camera now calls for.
    pub fn sections_needing_build(&self, target_lod: u8) -> Vec<usize> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, state)| {
                state.flags.contains(SectionFlags::VISIBLE)
                    && (state.flags.contains(SectionFlags::DIRTY) || state.lod != target_lod)
            })
            .map(|(section, _)| section)
            .collect()
    }

    /// Clears the transient pass flags ahead of a flood fill.
    fn begin_visibility_pass(&self) {
        for state in self.lock().iter_mut() {
            state
                .flags
                .remove(SectionFlags::PREPARE_VISIBLE | SectionFlags::CULLED);
        }
    }

    /// Fill visit: marks the section reached. Returns `None` when already
    /// visited this pass, otherwise whether the fill may pass through.
    fn visit(&self, section: usize) -> Option<bool> {
        let mut sections = self.lock();
        let state = &mut sections[section];
        if state.flags.contains(SectionFlags::CULLED) {
            return None;
        }
        state
            .flags
            .insert(SectionFlags::CULLED | SectionFlags::PREPARE_VISIBLE);
        Some(!state.flags.contains(SectionFlags::SOLID))
    }

    /// Applies the pass result: newly visible sections turn dirty so a
    /// build gets scheduled, newly hidden ones release their models right
    /// away and invalidate any build still in flight.
    fn finish_visibility_pass(&self, backend: &dyn RenderBackend) {
        let mut sections = self.lock();
        for state in sections.iter_mut() {
            let prepare = state.flags.contains(SectionFlags::PREPARE_VISIBLE);
            let visible = state.flags.contains(SectionFlags::VISIBLE);
            if prepare == visible {
                continue;
            }
            if prepare {
                state.flags.insert(SectionFlags::VISIBLE | SectionFlags::DIRTY);
            } else {
                state.flags.remove(SectionFlags::VISIBLE | SectionFlags::DIRTY);
                state.version = state.version.wrapping_add(1);
                if let Some(model) = state.opaque_model.take() {
                    backend.release_model(model);
                }
                if let Some(model) = state.alpha_model.take() {
                    backend.release_model(model);
                }
                state.opaque_aabb = None;
                state.alpha_aabb = None;
            }
        }
    }

    /// Stamps a build dispatch: clears the dirty flag, records the LOD
    /// and returns the version the completion must present.
    pub fn begin_build(&self, section: usize, lod: u8) -> u32 {
        let mut sections = self.lock();
        let state = &mut sections[section];
        state.flags.remove(SectionFlags::DIRTY);
        state.lod = lod;
        state.version = state.version.wrapping_add(1);
        state.version
    }

    /// Publishes a finished build under a short critical section. The
    /// section must still be visible and the version current; a mesh
    /// computed for a since-hidden or re-dirtied section is discarded.
    pub fn replace_mesh(
        &self,
        section: usize,
        scratch: &MeshScratch,
        outcome: &SectionOutcome,
        version: u32,
        backend: &dyn RenderBackend,
    ) -> bool {
        let mut sections = self.lock();
        let state = &mut sections[section];
        if state.version != version || !state.flags.contains(SectionFlags::VISIBLE) {
            return false;
        }

        if let Some(model) = state.opaque_model.take() {
            backend.release_model(model);
        }
        if let Some(model) = state.alpha_model.take() {
            backend.release_model(model);
        }

        state.flags.set(SectionFlags::SOLID, outcome.solid);
        state.opaque_model = (!scratch.opaque.is_empty())
            .then(|| backend.build_model(&scratch.opaque));
        state.alpha_model = (!scratch.alpha.is_empty())
            .then(|| backend.build_model(&scratch.alpha));
        state.opaque_aabb = outcome.opaque_aabb;
        state.alpha_aabb = outcome.alpha_aabb;
        true
    }

    /// Releases everything, for chunk eviction.
    pub fn release_all(&self, backend: &dyn RenderBackend) {
        let mut sections = self.lock();
        for state in sections.iter_mut() {
            state.flags = SectionFlags::empty();
            state.version = state.version.wrapping_add(1);
            if let Some(model) = state.opaque_model.take() {
                backend.release_model(model);
            }
            if let Some(model) = state.alpha_model.take() {
                backend.release_model(model);
            }
        }
    }
}

/// Camera-driven reachability. The fill reruns only when the camera
/// crosses into a new chunk column or section, or after an explicit
/// invalidation (a block change that touched solidity).
pub struct Visibility {
    last_camera_cell: Mutex<Option<(ChunkPos, i32)>>,
    invalidated: AtomicBool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new()
    }
}

impl Visibility {
    pub fn new() -> Self {
        Self {
            last_camera_cell: Mutex::new(None),
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Runs the flood fill if the camera moved cells or something was
    /// invalidated. Returns whether a pass ran.
    pub fn update(
        &self,
        store: &WindowStore,
        backend: &dyn RenderBackend,
        camera_world: Vec3,
    ) -> bool {
        let camera_chunk = world_to_chunk(camera_world.x as i32, camera_world.y as i32);
        let camera_section = (camera_world.z as i32).div_euclid(SECTION_SIZE as i32);
        let cell = (camera_chunk, camera_section);

        {
            let mut last = self.last_camera_cell.lock().expect("visibility lock poisoned");
            if *last == Some(cell) && !self.invalidated.swap(false, Ordering::AcqRel) {
                return false;
            }
            *last = Some(cell);
        }

        flood_fill(store, camera_chunk, camera_section);
        for chunk in store.resident() {
            chunk.renderer.finish_visibility_pass(backend);
        }
        true
    }
}

/// Breadth-first reachability over (column, section) cells, double
/// buffered instead of recursive. Propagation is monotonic per axis: a
/// cell only spreads in directions moving away from the camera cell,
/// which bounds the fill to one outward sweep.
pub fn flood_fill(store: &WindowStore, camera_chunk: ChunkPos, camera_section: i32) {
    for chunk in store.resident() {
        chunk.renderer.begin_visibility_pass();
    }

    let mut current: VecDeque<(ChunkPos, i32)> = VecDeque::new();
    let mut next: VecDeque<(ChunkPos, i32)> = VecDeque::new();

    // The camera's own cell always counts as reachable and seeds all six
    // directions, solid or not; the camera can be inside a solid section.
    if let Some(chunk) = store.get(camera_chunk) {
        if in_column(camera_section) {
            let _ = chunk.renderer.visit(camera_section as usize);
        }
    }
    current.push_back((camera_chunk, camera_section + 1));
    current.push_back((camera_chunk, camera_section - 1));
    current.push_back((ChunkPos::new(camera_chunk.x + 1, camera_chunk.y), camera_section));
    current.push_back((ChunkPos::new(camera_chunk.x - 1, camera_chunk.y), camera_section));
    current.push_back((ChunkPos::new(camera_chunk.x, camera_chunk.y + 1), camera_section));
    current.push_back((ChunkPos::new(camera_chunk.x, camera_chunk.y - 1), camera_section));

    while !current.is_empty() {
        while let Some((pos, section)) = current.pop_front() {
            if !in_column(section) {
                continue;
            }
            let Some(chunk) = store.get(pos) else {
                continue;
            };
            let Some(pass_through) = chunk.renderer.visit(section as usize) else {
                continue;
            };
            if !pass_through {
                continue;
            }

            let dx = pos.x - camera_chunk.x;
            let dy = pos.y - camera_chunk.y;
            let dz = section - camera_section;

            if dz >= 0 {
                next.push_back((pos, section + 1));
            }
            if dz <= 0 {
                next.push_back((pos, section - 1));
            }
            if dx >= 0 {
                next.push_back((ChunkPos::new(pos.x + 1, pos.y), section));
            }
            if dx <= 0 {
                next.push_back((ChunkPos::new(pos.x - 1, pos.y), section));
            }
            if dy >= 0 {
                next.push_back((ChunkPos::new(pos.x, pos.y + 1), section));
            }
            if dy <= 0 {
                next.push_back((ChunkPos::new(pos.x, pos.y - 1), section));
            }
        }
        std::mem::swap(&mut current, &mut next);
    }
}

fn in_column(section: i32) -> bool {
    (0..SECTION_COUNT as i32).contains(&section)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{flood_fill, SectionFlags};
    use crate::mesher::{MeshScratch, SectionOutcome};
    use crate::render::CountingBackend;
    use crate::store::WindowStore;
    use crate::terrain::ClientChunk;
    use skarn_shared::coords::{ChunkPos, SECTION_COUNT};

    fn store_with_window(radius: i32) -> WindowStore {
        let store = WindowStore::new(radius, ChunkPos::new(0, 0));
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                store.insert(Arc::new(ClientChunk::placeholder(ChunkPos::new(dx, dy))));
            }
        }
        store
    }

    fn solid_column(store: &WindowStore, pos: ChunkPos) {
        let chunk = store.get(pos).expect("chunk resident");
        for section in 0..SECTION_COUNT {
            chunk.renderer.set_solid(section, true);
        }
    }

    #[test]
    fn fill_reaches_open_neighbors_in_all_directions() {
        let store = store_with_window(2);
        flood_fill(&store, ChunkPos::new(0, 0), 3);

        for (pos, section) in [
            (ChunkPos::new(0, 0), 3usize),
            (ChunkPos::new(1, 0), 3),
            (ChunkPos::new(-2, 0), 3),
            (ChunkPos::new(2, 2), 3),
            (ChunkPos::new(0, 0), 5),
            (ChunkPos::new(1, 1), 2),
        ] {
            let flags = store
                .get(pos)
                .expect("chunk resident")
                .renderer
                .flags(section);
            assert!(
                flags.contains(SectionFlags::PREPARE_VISIBLE),
                "expected {pos:?} section {section} reachable"
            );
        }
    }

    #[test]
    fn solid_wall_blocks_the_fill_behind_it() {
        let store = store_with_window(3);
        // Full-height wall across x = 2, so no path routes around in y.
        for dy in -3..=3 {
            solid_column(&store, ChunkPos::new(2, dy));
        }

        flood_fill(&store, ChunkPos::new(0, 0), 3);

        // The wall face itself is reachable.
        let wall = store.get(ChunkPos::new(2, 0)).expect("chunk resident");
        assert!(wall.renderer.flags(3).contains(SectionFlags::PREPARE_VISIBLE));

        // Nothing strictly behind it is.
        let behind = store.get(ChunkPos::new(3, 0)).expect("chunk resident");
        for section in 0..SECTION_COUNT {
            assert!(
                !behind
                    .renderer
                    .flags(section)
                    .contains(SectionFlags::PREPARE_VISIBLE),
                "section {section} visible behind a solid wall"
            );
        }
    }

    #[test]
    fn becoming_invisible_releases_models_immediately() {
        let store = store_with_window(1);
        let backend = CountingBackend::new();
        let chunk = store.get(ChunkPos::new(1, 0)).expect("chunk resident");

        flood_fill(&store, ChunkPos::new(0, 0), 3);
        for resident in store.resident() {
            resident.renderer.finish_visibility_pass(&backend);
        }
        assert!(chunk.renderer.flags(3).contains(SectionFlags::VISIBLE));

        let version = chunk.renderer.begin_build(3, 0);
        let mut scratch = MeshScratch::default();
        scratch.opaque.vertices.push(bytemuck::Zeroable::zeroed());
        let outcome = SectionOutcome::default();
        assert!(chunk
            .renderer
            .replace_mesh(3, &scratch, &outcome, version, &backend));
        assert_eq!(backend.live_models(), 1);

        // Wall off the whole x = 0 column line; (1, 0) becomes
        // unreachable from a camera at (-1, 0).
        for dy in -1..=1 {
            solid_column(&store, ChunkPos::new(0, dy));
        }
        flood_fill(&store, ChunkPos::new(-1, 0), 3);
        for resident in store.resident() {
            resident.renderer.finish_visibility_pass(&backend);
        }

        assert!(!chunk.renderer.flags(3).contains(SectionFlags::VISIBLE));
        assert_eq!(backend.live_models(), 0);
        assert_eq!(backend.released_models(), 1);
    }

    #[test]
    fn stale_build_versions_are_discarded() {
        let store = store_with_window(1);
        let backend = CountingBackend::new();
        let chunk = store.get(ChunkPos::new(0, 0)).expect("chunk resident");

        flood_fill(&store, ChunkPos::new(0, 0), 0);
        chunk.renderer.finish_visibility_pass(&backend);

        let stale = chunk.renderer.begin_build(0, 0);
        let fresh = chunk.renderer.begin_build(0, 0);
        let scratch = MeshScratch::default();
        let outcome = SectionOutcome::default();

        assert!(!chunk.renderer.replace_mesh(0, &scratch, &outcome, stale, &backend));
        assert!(chunk.renderer.replace_mesh(0, &scratch, &outcome, fresh, &backend));
    }
}
