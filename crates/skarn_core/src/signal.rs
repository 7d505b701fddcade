use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Stop flag polled by the long-running background loops.
#[derive(Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Bounded sleep that can be cut short from another thread.
///
/// The pending-scan and loader tasks park here when they have no work and
/// are woken early when the window moves or a chunk arrives.
#[derive(Clone, Default)]
pub struct Waker {
    inner: Arc<WakerInner>,
}

#[derive(Default)]
struct WakerInner {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Waker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .expect("waker mutex poisoned");
        *pending = true;
        self.inner.condvar.notify_all();
    }

    /// Sleeps until `timeout` elapses or `wake` is called, whichever is
    /// first. Returns true if woken explicitly.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let mut pending = self
            .inner
            .pending
            .lock()
            .expect("waker mutex poisoned");
        if !*pending {
            let (guard, _) = self
                .inner
                .condvar
                .wait_timeout(pending, timeout)
                .expect("waker mutex poisoned");
            pending = guard;
        }
        let woken = *pending;
        *pending = false;
        woken
    }

    /// Sleeps with no timeout until `wake` is called.
    pub fn sleep_until_woken(&self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .expect("waker mutex poisoned");
        while !*pending {
            pending = self
                .inner
                .condvar
                .wait(pending)
                .expect("waker mutex poisoned");
        }
        *pending = false;
    }
}
