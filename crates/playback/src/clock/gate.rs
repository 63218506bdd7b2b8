use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{DisplayTick, TickCallback};

thread_local! {
    // address of the gate whose callback is running on this thread, 0 if none
    static TICKING: Cell<usize> = const { Cell::new(0) };
}

struct TickingGuard {
    previous: usize,
}

impl TickingGuard {
    fn enter(gate: &TickGate) -> Self {
        let previous = TICKING.with(|t| t.replace(gate.addr()));
        Self { previous }
    }
}

impl Drop for TickingGuard {
    fn drop(&mut self) {
        TICKING.with(|t| t.set(self.previous));
    }
}

/// Owns a clock's callback and serialises ticks against `close`.
///
/// Both clock implementations share this: the platform thread calls [`TickGate::tick`],
/// `stop` calls [`TickGate::close`]. Once `close` returns the callback is gone, so no
/// tick can start after it.
pub(crate) struct TickGate {
    open: AtomicBool,
    callback: Mutex<Option<TickCallback>>,
    ticks: AtomicU64,
    // gate of the previous run, closed from inside its own tick; our first tick waits
    // for that tick to return
    predecessor: Mutex<Option<Arc<TickGate>>>,
}

impl TickGate {
    pub(crate) fn new(callback: TickCallback) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            callback: Mutex::new(Some(callback)),
            ticks: AtomicU64::new(0),
            predecessor: Mutex::new(None),
        })
    }

    /// Keep ticks of this gate from overlapping a tick of `previous` that is still
    /// running, as happens after `stop` then `start` from inside a tick.
    pub(crate) fn follow(&self, previous: Arc<TickGate>) {
        *self.predecessor.lock() = Some(previous);
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Run one tick. Returns `false` once the gate is closed; the driver should stop
    /// scheduling.
    pub(crate) fn tick(&self, at: Instant) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        let previous = self.predecessor.lock().take();
        if let Some(previous) = previous {
            if !previous.is_ticking_here() {
                drop(previous.callback.lock());
            }
        }
        let _ticking = TickingGuard::enter(self);
        let mut slot = self.callback.lock();
        if !self.open.load(Ordering::Acquire) {
            slot.take();
            return false;
        }
        let Some(callback) = slot.as_mut() else {
            return false;
        };
        let sequence = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        callback(DisplayTick { sequence, at });

        if !self.open.load(Ordering::Acquire) {
            // closed from inside the callback
            slot.take();
            return false;
        }
        true
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
        if self.is_ticking_here() {
            return;
        }
        // waits for an in-flight tick
        let callback = self.callback.lock().take();
        drop(callback);
    }

    pub(crate) fn is_ticking_here(&self) -> bool {
        TICKING.with(|t| t.get() == self.addr())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
