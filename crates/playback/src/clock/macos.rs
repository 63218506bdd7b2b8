//! CoreVideo display link clock.
//!
//! The link calls back on a high-priority thread owned by CoreVideo, once per refresh
//! of the active displays. The callback context is a leaked `Arc<TickGate>` that is
//! reclaimed after the link has been stopped and released.

use std::ffi::c_void;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::gate::TickGate;
use super::{ClockError, DisplayClock, TickCallback};
use crate::ClockConfig;

type CVDisplayLinkRef = *mut c_void;
type CVReturn = i32;
type CVOptionFlags = u64;

const K_CV_RETURN_SUCCESS: CVReturn = 0;

type CVDisplayLinkOutputCallback = unsafe extern "C" fn(
    display_link: CVDisplayLinkRef,
    in_now: *const c_void,
    in_output_time: *const c_void,
    flags_in: CVOptionFlags,
    flags_out: *mut CVOptionFlags,
    context: *mut c_void,
) -> CVReturn;

#[link(name = "CoreVideo", kind = "framework")]
extern "C" {
    fn CVDisplayLinkCreateWithActiveCGDisplays(link_out: *mut CVDisplayLinkRef) -> CVReturn;
    fn CVDisplayLinkSetOutputCallback(
        link: CVDisplayLinkRef,
        callback: Option<CVDisplayLinkOutputCallback>,
        context: *mut c_void,
    ) -> CVReturn;
    fn CVDisplayLinkStart(link: CVDisplayLinkRef) -> CVReturn;
    fn CVDisplayLinkStop(link: CVDisplayLinkRef) -> CVReturn;
    fn CVDisplayLinkRelease(link: CVDisplayLinkRef);
}

unsafe extern "C" fn display_link_fired(
    _link: CVDisplayLinkRef,
    _now: *const c_void,
    _output_time: *const c_void,
    _flags_in: CVOptionFlags,
    _flags_out: *mut CVOptionFlags,
    context: *mut c_void,
) -> CVReturn {
    // SAFETY: context is the `Arc<TickGate>` leaked in `Link::create`; it is only
    // reclaimed after CVDisplayLinkStop has returned.
    let gate = unsafe { &*(context as *const TickGate) };
    gate.tick(Instant::now());
    K_CV_RETURN_SUCCESS
}

struct Link {
    raw: CVDisplayLinkRef,
    context: *const TickGate,
    gate: Arc<TickGate>,
}

// SAFETY: CVDisplayLink is thread-safe and the context pointer is only dereferenced
// through `&TickGate`, which is Sync.
unsafe impl Send for Link {}

impl Link {
    fn create(gate: Arc<TickGate>) -> Result<Self, ClockError> {
        let mut raw: CVDisplayLinkRef = std::ptr::null_mut();
        // SAFETY: out-pointer to a local.
        let status = unsafe { CVDisplayLinkCreateWithActiveCGDisplays(&mut raw) };
        if status != K_CV_RETURN_SUCCESS || raw.is_null() {
            return Err(ClockError::SchedulerUnavailable(format!(
                "CVDisplayLinkCreateWithActiveCGDisplays returned {status}"
            )));
        }

        let context = Arc::into_raw(Arc::clone(&gate));
        let link = Self { raw, context, gate };
        // SAFETY: `raw` is a live display link and `context` outlives it (see Drop).
        let status = unsafe {
            CVDisplayLinkSetOutputCallback(
                link.raw,
                Some(display_link_fired),
                link.context as *mut c_void,
            )
        };
        if status != K_CV_RETURN_SUCCESS {
            return Err(ClockError::SchedulerUnavailable(format!(
                "CVDisplayLinkSetOutputCallback returned {status}"
            )));
        }

        // SAFETY: as above.
        let status = unsafe { CVDisplayLinkStart(link.raw) };
        if status != K_CV_RETURN_SUCCESS {
            return Err(ClockError::SchedulerUnavailable(format!(
                "CVDisplayLinkStart returned {status}"
            )));
        }
        Ok(link)
    }

    fn halt(&self) {
        // SAFETY: `raw` stays valid until Drop.
        let status = unsafe { CVDisplayLinkStop(self.raw) };
        if status != K_CV_RETURN_SUCCESS {
            warn!(status, "CVDisplayLinkStop failed");
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.halt();
        // SAFETY: the link is stopped, so the callback no longer runs; both the link
        // reference and the leaked context are released exactly once here.
        unsafe {
            CVDisplayLinkRelease(self.raw);
            drop(Arc::from_raw(self.context));
        }
    }
}

/// Display clock backed by `CVDisplayLink`. Follows the refresh rate of the active
/// displays; `ClockConfig::refresh_hz` is ignored.
pub struct CoreVideoDisplayClock {
    config: ClockConfig,
    link: Mutex<Option<Link>>,
    // a link stopped from inside its own callback; released on the next start or drop
    retired: Mutex<Option<Link>>,
}

impl CoreVideoDisplayClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
            retired: Mutex::new(None),
        }
    }
}

impl Default for CoreVideoDisplayClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl DisplayClock for CoreVideoDisplayClock {
    fn start(&self, callback: TickCallback) -> Result<(), ClockError> {
        let mut link = self.link.lock();
        if link.is_some() {
            debug!("display link already running");
            return Ok(());
        }
        let gate = TickGate::new(callback);
        let mut retired = self.retired.lock();
        if let Some(old) = retired.as_ref() {
            gate.follow(Arc::clone(&old.gate));
            // releasing a link from inside its own callback is not allowed
            if !old.gate.is_ticking_here() {
                retired.take();
            }
        }
        drop(retired);

        *link = Some(Link::create(gate)?);
        if let Some(hz) = self.config.refresh_hz {
            debug!(hz, "refresh override ignored by the display link");
        }
        info!("display link started");
        Ok(())
    }

    fn stop(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        link.gate.close();
        if link.gate.is_ticking_here() {
            link.halt();
            *self.retired.lock() = Some(link);
            debug!("display link stopped from its own callback");
            return;
        }
        let ticks = link.gate.ticks();
        drop(link);
        debug!(ticks, "display link stopped");
    }

    fn is_running(&self) -> bool {
        self.link.lock().is_some()
    }
}

impl Drop for CoreVideoDisplayClock {
    fn drop(&mut self) {
        self.stop();
        self.retired.lock().take();
    }
}
