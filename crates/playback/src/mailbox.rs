use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use frame_source::VideoFrameBuffer;
use parking_lot::Mutex;
use tracing::trace;

type FrameListener = Arc<dyn Fn(u64) + Send + Sync>;

struct Slot {
    frame: Option<VideoFrameBuffer>,
    sequence: u64,
}

/// Contents of the mailbox at one instant. `sequence == 0` means nothing was ever
/// published.
#[derive(Debug, Clone)]
pub struct MailboxSnapshot {
    pub frame: Option<VideoFrameBuffer>,
    pub sequence: u64,
}

/// Single-slot, latest-wins hand-off between the frame pump and the presenter.
///
/// `publish` overwrites unconditionally and bumps the sequence under one lock, so a
/// reader always sees a frame together with the sequence it was published under.
/// `read` never removes anything; the presenter compares sequences to detect that
/// nothing changed since its last draw.
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    subscribers: Mutex<Vec<Sender<u64>>>,
    listeners: Mutex<Vec<FrameListener>>,
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                sequence: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Replace the current frame and return its sequence number.
    pub fn publish(&self, frame: VideoFrameBuffer) -> u64 {
        let (sequence, previous) = {
            let mut slot = self.slot.lock();
            slot.sequence += 1;
            (slot.sequence, slot.frame.replace(frame))
        };
        // the displaced frame may run a decoder release hook; keep that out of the lock
        drop(previous);
        self.notify(sequence);
        sequence
    }

    pub fn read(&self) -> MailboxSnapshot {
        let slot = self.slot.lock();
        MailboxSnapshot {
            frame: slot.frame.clone(),
            sequence: slot.sequence,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.slot.lock().sequence
    }

    /// Channel that wakes up when a new frame lands. Bursts of publishes coalesce into
    /// a single pending notification, so the receiver should always `read` the mailbox
    /// rather than trust the carried sequence.
    pub fn subscribe(&self) -> FrameNotifier {
        let (tx, rx) = bounded(1);
        self.subscribers.lock().push(tx);
        FrameNotifier { rx }
    }

    /// Register a callback run on the publishing thread after every publish, with the
    /// new sequence. Must be cheap: it runs on the display clock's tick.
    pub fn on_frame_available(&self, listener: impl Fn(u64) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    fn notify(&self, sequence: u64) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(sequence) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => {
                    trace!("dropping closed frame subscriber");
                    false
                }
            });

        let listeners: Vec<FrameListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(sequence);
        }
    }
}

/// Receiving side of [`FrameMailbox::subscribe`].
pub struct FrameNotifier {
    rx: Receiver<u64>,
}

impl FrameNotifier {
    /// Consume a pending notification, if any.
    pub fn try_recv(&self) -> Option<u64> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<u64> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn receiver(&self) -> &Receiver<u64> {
        &self.rx
    }
}
