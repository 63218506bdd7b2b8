//! Moves a blocking decoder off the clock thread.
//!
//! The worker decodes as fast as the decoder allows and overwrites a single latest-frame
//! slot; the pump takes whatever is there on its next tick. Frames the pump never saw
//! are dropped, which is the intended latest-wins behaviour.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{FrameDecoder, FrameSource, SourceError, VideoFrameBuffer};

const ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// Counters published by the worker thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub decoded: u64,
    /// Frames overwritten in the slot before anyone pulled them.
    pub dropped: u64,
    pub errors: u64,
    pub finished: bool,
}

#[derive(Default)]
struct Counters {
    decoded: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    finished: AtomicBool,
}

type LatestFrameSlot = Arc<Mutex<Option<VideoFrameBuffer>>>;

/// Non-blocking [`FrameSource`] fed by a [`FrameDecoder`] running on its own thread.
///
/// Dropping the source stops the worker and joins it. A decode call already in
/// progress is allowed to finish first.
pub struct BackgroundSource {
    slot: LatestFrameSlot,
    counters: Arc<Counters>,
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl BackgroundSource {
    pub fn spawn<D: FrameDecoder>(decoder: D) -> Result<Self, SourceError> {
        let slot: LatestFrameSlot = Arc::new(Mutex::new(None));
        let counters = Arc::new(Counters::default());
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let name = format!("decode-{}", decoder.describe());
        let worker_slot = Arc::clone(&slot);
        let worker_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(decoder, worker_slot, worker_counters, stop_rx))?;
        info!(worker = %name, "decode worker started");

        Ok(Self {
            slot,
            counters,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            decoded: self.counters.decoded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            finished: self.counters.finished.load(Ordering::Acquire),
        }
    }

    /// True once the decoder reported end of stream or the worker was stopped.
    pub fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Acquire)
    }
}

impl FrameSource for BackgroundSource {
    fn pull_latest_frame(&mut self) -> Option<VideoFrameBuffer> {
        self.slot.lock().take()
    }
}

impl Drop for BackgroundSource {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("decode worker panicked");
            }
        }
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}

fn run_worker<D: FrameDecoder>(
    mut decoder: D,
    slot: LatestFrameSlot,
    counters: Arc<Counters>,
    stop_rx: Receiver<()>,
) {
    let label = decoder.describe();
    while !stop_requested(&stop_rx) {
        match decoder.decode_next() {
            Ok(Some(frame)) => {
                counters.decoded.fetch_add(1, Ordering::Relaxed);
                let displaced = slot.lock().replace(frame);
                if displaced.is_some() {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(None) => {
                debug!(decoder = %label, "end of stream");
                break;
            }
            Err(err) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(decoder = %label, %err, "decode failed; retrying");
                match stop_rx.recv_timeout(ERROR_BACKOFF) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        }
    }
    counters.finished.store(true, Ordering::Release);
    debug!(
        decoder = %label,
        decoded = counters.decoded.load(Ordering::Relaxed),
        dropped = counters.dropped.load(Ordering::Relaxed),
        "decode worker exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PatternConfig, TestPatternDecoder};
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn fast_pattern() -> PatternConfig {
        PatternConfig {
            width: 8,
            height: 8,
            fps: 1000.0,
            ..PatternConfig::default()
        }
    }

    #[test]
    fn keeps_only_the_latest_frame() {
        let decoder = TestPatternDecoder::new(fast_pattern()).with_limit(3);
        let last_timestamp = decoder.pattern().timestamp_for(2);
        let mut source = BackgroundSource::spawn(decoder).unwrap();

        assert!(wait_until(|| source.is_finished()));
        let stats = source.stats();
        assert_eq!(stats.decoded, 3);
        assert_eq!(stats.dropped, 2);

        let frame = source.pull_latest_frame().expect("last frame is waiting");
        assert_eq!(frame.timestamp(), Some(last_timestamp));
        assert!(source.pull_latest_frame().is_none());
    }

    struct Flaky {
        calls: u32,
    }

    impl FrameDecoder for Flaky {
        fn decode_next(&mut self) -> Result<Option<VideoFrameBuffer>, SourceError> {
            self.calls += 1;
            match self.calls {
                1 => Err(SourceError::Decode("corrupt packet".into())),
                2 => Ok(Some(
                    crate::TestPattern::new(fast_pattern()).render(0)?,
                )),
                _ => Ok(None),
            }
        }
    }

    #[test]
    fn errors_are_retried() {
        let mut source = BackgroundSource::spawn(Flaky { calls: 0 }).unwrap();
        assert!(wait_until(|| source.is_finished()));
        let stats = source.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.decoded, 1);
        assert!(source.pull_latest_frame().is_some());
    }

    #[test]
    fn drop_stops_an_endless_decoder() {
        let source = BackgroundSource::spawn(TestPatternDecoder::new(fast_pattern())).unwrap();
        assert!(wait_until(|| source.stats().decoded > 0));
        assert!(!source.is_finished());
        drop(source);
    }
}
