//! Display-paced delivery of decoded frames.
//!
//! A [`DisplayClock`] ticks once per display refresh. On every tick the [`FramePump`]
//! asks a [`FrameSource`](frame_source::FrameSource) for its latest frame and, if there
//! is one, publishes it into the [`FrameMailbox`]. The presenter reads the mailbox on its
//! own schedule; nothing on the tick path waits for rendering.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod clock;
mod mailbox;
mod pump;

pub use clock::{
    ClockError, DisplayClock, DisplayTick, PlatformDisplayClock, ThreadedDisplayClock,
    TickCallback,
};
#[cfg(target_os = "macos")]
pub use clock::CoreVideoDisplayClock;
pub use mailbox::{FrameMailbox, FrameNotifier, MailboxSnapshot};
pub use pump::{FrameLoop, FramePump, PumpOutcome, PumpStats};

/// Refresh rate assumed when neither the platform nor the configuration knows better.
pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Overrides the detected display refresh rate. The timer-thread clock uses this
    /// directly; the CoreVideo clock follows the display and ignores it.
    pub refresh_hz: Option<f64>,
    pub thread_name: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            refresh_hz: None,
            thread_name: "display-clock".to_string(),
        }
    }
}

impl ClockConfig {
    pub fn with_refresh_hz(mut self, hz: f64) -> Self {
        self.refresh_hz = Some(hz);
        self
    }

    /// Tick interval, falling back to [`DEFAULT_REFRESH_HZ`] for missing or absurd rates.
    pub fn interval(&self) -> Duration {
        let hz = self
            .refresh_hz
            .filter(|hz| hz.is_finite() && *hz >= 1.0 && *hz <= 1000.0)
            .unwrap_or(DEFAULT_REFRESH_HZ);
        Duration::from_secs_f64(1.0 / hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_falls_back_for_bad_rates() {
        let default = ClockConfig::default().interval();
        assert_eq!(default, Duration::from_secs_f64(1.0 / 60.0));
        assert_eq!(ClockConfig::default().with_refresh_hz(0.0).interval(), default);
        assert_eq!(
            ClockConfig::default().with_refresh_hz(f64::NAN).interval(),
            default
        );
        assert_eq!(
            ClockConfig::default().with_refresh_hz(120.0).interval(),
            Duration::from_secs_f64(1.0 / 120.0)
        );
    }
}
