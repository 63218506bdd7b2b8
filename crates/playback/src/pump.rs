use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use frame_source::FrameSource;
use tracing::{debug, trace};

use crate::clock::{ClockError, DisplayClock};
use crate::mailbox::FrameMailbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Published(u64),
    Idle,
}

#[derive(Debug, Default)]
pub struct PumpStats {
    ticks: AtomicU64,
    published: AtomicU64,
    idle: AtomicU64,
}

impl PumpStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Ticks on which the source had nothing new.
    pub fn idle(&self) -> u64 {
        self.idle.load(Ordering::Relaxed)
    }
}

/// Moves the source's latest frame into the mailbox, one pull per tick.
///
/// Every frame the source returns is published, even if the same instance came back
/// twice; `None` leaves the mailbox alone. There is no retry: the next tick is one.
pub struct FramePump<S> {
    source: S,
    mailbox: Arc<FrameMailbox>,
    stats: Arc<PumpStats>,
}

impl<S: FrameSource> FramePump<S> {
    pub fn new(source: S, mailbox: Arc<FrameMailbox>) -> Self {
        Self {
            source,
            mailbox,
            stats: Arc::new(PumpStats::default()),
        }
    }

    pub fn tick(&mut self) -> PumpOutcome {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        match self.source.pull_latest_frame() {
            Some(frame) => {
                let frame_id = frame.id();
                let sequence = self.mailbox.publish(frame);
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                trace!(sequence, frame = %frame_id, "frame published");
                PumpOutcome::Published(sequence)
            }
            None => {
                self.stats.idle.fetch_add(1, Ordering::Relaxed);
                PumpOutcome::Idle
            }
        }
    }

    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.stats)
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.mailbox
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

/// A display clock driving a frame pump. Stops the clock when dropped.
pub struct FrameLoop<C: DisplayClock> {
    clock: C,
    mailbox: Arc<FrameMailbox>,
    stats: Arc<PumpStats>,
}

impl<C: DisplayClock> FrameLoop<C> {
    /// Start `clock` with a pump from `source` into `mailbox`. On failure the source is
    /// dropped; the caller picks a fallback clock and builds a new one.
    pub fn start<S>(clock: C, source: S, mailbox: Arc<FrameMailbox>) -> Result<Self, ClockError>
    where
        S: FrameSource + 'static,
    {
        let mut pump = FramePump::new(source, Arc::clone(&mailbox));
        let stats = pump.stats();
        clock.start(Box::new(move |_tick| {
            pump.tick();
        }))?;
        Ok(Self {
            clock,
            mailbox,
            stats,
        })
    }

    /// After this returns the pump makes no further mailbox writes.
    pub fn stop(&self) {
        if !self.clock.is_running() {
            return;
        }
        self.clock.stop();
        debug!(
            ticks = self.stats.ticks(),
            published = self.stats.published(),
            idle = self.stats.idle(),
            "frame loop stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.mailbox
    }

    pub fn stats(&self) -> &Arc<PumpStats> {
        &self.stats
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: DisplayClock> Drop for FrameLoop<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_source::{FrameDescriptor, PixelFormat, VideoFrameBuffer};
    use std::collections::VecDeque;

    fn frame() -> VideoFrameBuffer {
        VideoFrameBuffer::from_host(FrameDescriptor::new(2, 2, PixelFormat::Bgra8), vec![0; 16])
            .unwrap()
    }

    #[test]
    fn idle_tick_leaves_mailbox_untouched() {
        let mailbox = Arc::new(FrameMailbox::new());
        let first = frame();
        let mut script = VecDeque::from(vec![Some(first.clone()), None]);
        let mut pump = FramePump::new(move || script.pop_front().flatten(), mailbox.clone());

        assert_eq!(pump.tick(), PumpOutcome::Published(1));
        assert_eq!(pump.tick(), PumpOutcome::Idle);

        let snapshot = mailbox.read();
        assert_eq!(snapshot.sequence, 1);
        assert!(snapshot.frame.unwrap().same_instance(&first));
        let stats = pump.stats();
        assert_eq!((stats.ticks(), stats.published(), stats.idle()), (2, 1, 1));
    }

    #[test]
    fn repeated_instance_is_republished() {
        let mailbox = Arc::new(FrameMailbox::new());
        let same = frame();
        let mut pump = FramePump::new(move || Some(same.clone()), mailbox.clone());
        pump.tick();
        pump.tick();
        assert_eq!(mailbox.sequence(), 2);
    }

    #[test]
    fn three_ticks_keep_only_the_last_frame() {
        let mailbox = Arc::new(FrameMailbox::new());
        let frames = vec![frame(), frame(), frame()];
        let mut queue: VecDeque<_> = frames.iter().cloned().collect();
        let mut pump = FramePump::new(move || queue.pop_front(), mailbox.clone());
        for _ in 0..3 {
            pump.tick();
        }
        let snapshot = mailbox.read();
        assert_eq!(snapshot.sequence, 3);
        assert!(snapshot.frame.unwrap().same_instance(&frames[2]));
    }
}
