//! Decoded video frames and the producer side of the presentation path.
//!
//! The decoder itself lives outside this workspace. This crate defines the handle it
//! hands out ([`VideoFrameBuffer`]), the non-blocking pull contract the frame pump
//! relies on ([`FrameSource`]), and a worker that adapts blocking decoders to it.

use thiserror::Error;

mod frame;
mod pattern;
mod worker;

pub use frame::{
    FrameDescriptor, FrameError, FrameId, FrameStorage, PixelFormat, RowOrder, SharedImage,
    VideoFrameBuffer,
};
pub use pattern::{PatternConfig, TestPattern, TestPatternDecoder, TestPatternSource};
pub use worker::{BackgroundSource, WorkerStats};

/// Non-blocking producer of decoded frames.
///
/// Called once per display refresh from the clock thread, so an implementation must
/// return within a small fraction of the refresh budget. `None` covers "not ready yet",
/// end of stream and decode errors alike. A decoder whose pull can block should be
/// wrapped in [`BackgroundSource`].
pub trait FrameSource: Send {
    fn pull_latest_frame(&mut self) -> Option<VideoFrameBuffer>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<VideoFrameBuffer> + Send,
{
    fn pull_latest_frame(&mut self) -> Option<VideoFrameBuffer> {
        self()
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn pull_latest_frame(&mut self) -> Option<VideoFrameBuffer> {
        (**self).pull_latest_frame()
    }
}

/// Blocking decoder, driven from a dedicated thread by [`BackgroundSource`].
pub trait FrameDecoder: Send + 'static {
    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    fn decode_next(&mut self) -> Result<Option<VideoFrameBuffer>, SourceError>;

    /// Short human readable name used in logs and thread names.
    fn describe(&self) -> String {
        "decoder".to_string()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to spawn decode worker: {0}")]
    Spawn(#[from] std::io::Error),
}
