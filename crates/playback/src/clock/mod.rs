//! Display-synchronized tick sources.
//!
//! One trait, one implementation per target picked at build time through
//! [`PlatformDisplayClock`]. macOS drives ticks from a CoreVideo display link; other
//! targets run a deadline-scheduled timer thread paced to the monitor refresh rate.

use std::time::Instant;

use thiserror::Error;

mod gate;
#[cfg(target_os = "macos")]
mod macos;
mod threaded;

#[cfg(target_os = "macos")]
pub use macos::CoreVideoDisplayClock;
pub use threaded::ThreadedDisplayClock;

#[cfg(target_os = "macos")]
pub type PlatformDisplayClock = CoreVideoDisplayClock;
#[cfg(not(target_os = "macos"))]
pub type PlatformDisplayClock = ThreadedDisplayClock;

/// One display refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTick {
    /// Counts ticks since `start`, beginning at 1.
    pub sequence: u64,
    pub at: Instant,
}

pub type TickCallback = Box<dyn FnMut(DisplayTick) + Send + 'static>;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("display-synchronized timer unavailable: {0}")]
    SchedulerUnavailable(String),
}

/// Repeating tick paced by the display.
///
/// Ticks of one clock never overlap. They run on a thread owned by the clock, never the
/// caller's. `start` on a running clock and `stop` on a stopped clock are no-ops.
/// Once `stop` returns the callback will not be invoked again; a tick that is already
/// running is waited for, unless `stop` is called from inside that tick, in which case
/// the tick finishes normally after `stop` returns. A `start` made from inside that
/// tick holds its first tick back until the old one has returned.
pub trait DisplayClock: Send + Sync {
    fn start(&self, callback: TickCallback) -> Result<(), ClockError>;

    fn stop(&self);

    fn is_running(&self) -> bool;
}
