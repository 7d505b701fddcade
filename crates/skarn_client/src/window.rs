use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use skarn_core::signal::{StopSignal, Waker};
use skarn_shared::coords::ChunkPos;
use skarn_shared::protocol::C2S;

use crate::render::RenderBackend;
use crate::terrain::ClientTerrain;

/// Resend cadence for chunks that were requested but never arrived.
const PENDING_RESCAN: Duration = Duration::from_secs(3);

/// Drives the sliding window from the camera position: recenters the
/// store, creates request placeholders for chunks entering the loading
/// disc and keeps asking the server for the ones that have not arrived.
pub struct WindowController {
    radius: i32,
    /// Offsets within the loading disc, nearest first. Requests go out in
    /// this order so close terrain fills in before the horizon.
    offsets: Vec<ChunkPos>,
    waker: Waker,
}

impl WindowController {
    pub fn new(radius: i32) -> Self {
        let mut offsets = Vec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    offsets.push(ChunkPos::new(dx, dy));
                }
            }
        }
        offsets.sort_by_key(|offset| offset.distance_sq(ChunkPos::new(0, 0)));

        Self {
            radius,
            offsets,
            waker: Waker::new(),
        }
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Moves the window to the camera's chunk and returns the positions
    /// that need a first request, nearest first. Chunks already holding a
    /// placeholder keep their request latch across recenters; evicted
    /// chunks release their models through the backend.
    pub fn update(
        &self,
        terrain: &ClientTerrain,
        camera_chunk: ChunkPos,
        backend: &dyn RenderBackend,
    ) -> Vec<ChunkPos> {
        if terrain.store.center() != camera_chunk {
            debug!(center = ?camera_chunk, "window recentered");
            terrain.recenter(camera_chunk, backend);
            self.waker.wake();
        }

        let mut requests = Vec::new();
        for offset in &self.offsets {
            let pos = camera_chunk + *offset;
            let chunk = match terrain.store.get(pos) {
                Some(chunk) => chunk,
                None => {
                    let chunk = Arc::new(crate::terrain::ClientChunk::placeholder(pos));
                    terrain.store.insert(chunk.clone());
                    chunk
                }
            };
            if chunk.mark_requested() {
                requests.push(pos);
            }
        }
        requests
    }

    /// Resident chunks still waiting for their snapshot, nearest first.
    pub fn missing(&self, terrain: &ClientTerrain) -> Vec<ChunkPos> {
        let center = terrain.store.center();
        self.offsets
            .iter()
            .map(|offset| center + *offset)
            .filter(|pos| {
                terrain
                    .store
                    .get(*pos)
                    .is_some_and(|chunk| !chunk.is_loaded())
            })
            .collect()
    }

    /// Pending-scan loop: while snapshots are outstanding, re-request them
    /// on a slow cadence in case the first ask was lost; otherwise park
    /// until the window moves. Stopping the loop while it is parked takes
    /// a `wake()` after the stop, which dispose paths do.
    pub fn run(&self, terrain: &ClientTerrain, stop: &StopSignal, mut send: impl FnMut(C2S)) {
        while !stop.is_stopped() {
            let missing = self.missing(terrain);
            if missing.is_empty() {
                self.waker.sleep_until_woken();
            } else {
                send(C2S::RequestChunks { positions: missing });
                self.waker.sleep(PENDING_RESCAN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;

    use super::WindowController;
    use crate::render::CountingBackend;
    use crate::terrain::ClientTerrain;
    use skarn_core::signal::StopSignal;
    use skarn_shared::block::register_default_blocks;
    use skarn_shared::chunk::ChunkData;
    use skarn_shared::coords::ChunkPos;
    use skarn_shared::delayed::UpdateKindTable;
    use skarn_shared::protocol::{ChunkSnapshot, C2S};

    fn terrain(radius: i32) -> ClientTerrain {
        ClientTerrain::new(
            radius,
            Arc::new(register_default_blocks()),
            UpdateKindTable::new(),
        )
    }

    #[test]
    fn first_update_requests_the_disc_nearest_first() {
        let terrain = terrain(3);
        let backend = CountingBackend::new();
        let controller = WindowController::new(3);
        let requests = controller.update(&terrain, ChunkPos::new(0, 0), &backend);

        assert_eq!(requests[0], ChunkPos::new(0, 0));
        for pos in &requests {
            assert!(pos.x * pos.x + pos.y * pos.y <= 9, "{pos:?} outside the disc");
        }
        for pair in requests.windows(2) {
            let origin = ChunkPos::new(0, 0);
            assert!(pair[0].distance_sq(origin) <= pair[1].distance_sq(origin));
        }

        // Everything already has a placeholder; nothing to ask twice.
        assert!(controller
            .update(&terrain, ChunkPos::new(0, 0), &backend)
            .is_empty());
    }

    #[test]
    fn recenter_requests_only_newly_entered_chunks() {
        let terrain = terrain(2);
        let backend = CountingBackend::new();
        let controller = WindowController::new(2);
        controller.update(&terrain, ChunkPos::new(0, 0), &backend);

        let requests = controller.update(&terrain, ChunkPos::new(1, 0), &backend);
        assert!(requests.contains(&ChunkPos::new(3, 0)));
        assert!(!requests.contains(&ChunkPos::new(0, 0)));
        for pos in &requests {
            let dx = pos.x - 1;
            assert!(dx * dx + pos.y * pos.y <= 4, "{pos:?} outside the disc");
        }
    }

    #[test]
    fn missing_drains_as_snapshots_install() {
        let terrain = terrain(1);
        let backend = CountingBackend::new();
        let controller = WindowController::new(1);
        let requested = controller.update(&terrain, ChunkPos::new(0, 0), &backend);
        assert_eq!(controller.missing(&terrain).len(), requested.len());

        for pos in requested {
            terrain
                .install_snapshot(ChunkSnapshot::from_chunk(
                    pos,
                    &ChunkData::new_empty(),
                    Vec::new(),
                ))
                .expect("install");
        }
        assert!(controller.missing(&terrain).is_empty());
    }

    #[test]
    fn pending_scan_resends_outstanding_requests_until_stopped() {
        let terrain = Arc::new(terrain(1));
        let backend = CountingBackend::new();
        let controller = Arc::new(WindowController::new(1));
        controller.update(&terrain, ChunkPos::new(0, 0), &backend);

        let (tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        let handle = {
            let terrain = terrain.clone();
            let controller = controller.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                controller.run(&terrain, &stop, move |msg| {
                    let _ = tx.send(msg);
                });
            })
        };

        let first = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("a pending request");
        let C2S::RequestChunks { positions } = first else {
            panic!("expected a chunk request");
        };
        assert!(positions.contains(&ChunkPos::new(0, 0)));

        stop.stop();
        controller.waker().wake();
        handle.join().expect("scan thread panicked");
    }

    #[test]
    fn idle_scan_parks_until_the_window_moves() {
        let terrain = Arc::new(terrain(0));
        let backend = CountingBackend::new();
        let controller = Arc::new(WindowController::new(0));
        for pos in controller.update(&terrain, ChunkPos::new(0, 0), &backend) {
            terrain
                .install_snapshot(ChunkSnapshot::from_chunk(
                    pos,
                    &ChunkData::new_empty(),
                    Vec::new(),
                ))
                .expect("install");
        }
        assert!(controller.missing(&terrain).is_empty());

        let (tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        let handle = {
            let terrain = terrain.clone();
            let controller = controller.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                controller.run(&terrain, &stop, move |msg| {
                    let _ = tx.send(msg);
                });
            })
        };

        // The recenter wakes the parked loop, which then re-requests the
        // chunk that just entered the window.
        controller.update(&terrain, ChunkPos::new(5, 5), &backend);
        let msg = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("a request after the recenter");
        let C2S::RequestChunks { positions } = msg else {
            panic!("expected a chunk request");
        };
        assert_eq!(positions, vec![ChunkPos::new(5, 5)]);

        stop.stop();
        controller.waker().wake();
        handle.join().expect("scan thread panicked");
    }
}
