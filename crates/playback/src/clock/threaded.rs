use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::gate::TickGate;
use super::{ClockError, DisplayClock, TickCallback};
use crate::ClockConfig;

struct Running {
    gate: Arc<TickGate>,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Display clock driven by a dedicated timer thread.
///
/// Ticks are scheduled against absolute deadlines one refresh interval apart. A tick
/// that overruns skips the deadlines it missed instead of firing a burst to catch up.
pub struct ThreadedDisplayClock {
    config: ClockConfig,
    running: Mutex<Option<Running>>,
    // stopped from its own tick, which may still be running
    retiring: Mutex<Option<Arc<TickGate>>>,
}

impl ThreadedDisplayClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            retiring: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval()
    }
}

impl Default for ThreadedDisplayClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl DisplayClock for ThreadedDisplayClock {
    fn start(&self, callback: TickCallback) -> Result<(), ClockError> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("display clock already running");
            return Ok(());
        }

        let gate = TickGate::new(callback);
        if let Some(previous) = self.retiring.lock().take() {
            gate.follow(previous);
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = self.interval();
        let thread_gate = Arc::clone(&gate);
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_timer(thread_gate, interval, stop_rx))
            .map_err(|err| ClockError::SchedulerUnavailable(err.to_string()))?;

        info!(
            interval_us = interval.as_micros() as u64,
            thread = %self.config.thread_name,
            "display clock started"
        );
        *running = Some(Running {
            gate,
            stop_tx,
            handle,
        });
        Ok(())
    }

    fn stop(&self) {
        let Some(Running {
            gate,
            stop_tx,
            handle,
        }) = self.running.lock().take()
        else {
            return;
        };

        gate.close();
        let _ = stop_tx.try_send(());
        drop(stop_tx);

        if handle.thread().id() == thread::current().id() {
            // stopped from inside a tick; the thread exits once it returns
            debug!(ticks = gate.ticks(), "display clock stopped from its own tick");
            *self.retiring.lock() = Some(gate);
            return;
        }
        if handle.join().is_err() {
            warn!("display clock thread panicked");
        }
        debug!(ticks = gate.ticks(), "display clock stopped");
    }

    fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for ThreadedDisplayClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(gate: Arc<TickGate>, interval: Duration, stop_rx: Receiver<()>) {
    let mut deadline = Instant::now() + interval;
    loop {
        let now = Instant::now();
        if deadline > now {
            match stop_rx.recv_timeout(deadline - now) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        } else if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        if !gate.tick(Instant::now()) {
            break;
        }

        deadline += interval;
        let now = Instant::now();
        if deadline < now {
            let behind = (now - deadline).as_nanos();
            let missed = behind / interval.as_nanos().max(1) + 1;
            trace!(missed = missed as u64, "display clock skipped ticks");
            deadline += interval * missed.min(u32::MAX as u128) as u32;
        }
    }
}
