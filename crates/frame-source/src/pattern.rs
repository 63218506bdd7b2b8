//! Synthetic frames for the viewer and for tests.
//!
//! Stands in for a real decoder: a gradient with a bar that moves one step per frame
//! and a solid marker in the top-left corner. The marker is written into whichever
//! memory row is the visual top for the configured row order, so a wrong flip on
//! the GPU side shows up as the marker landing in the bottom-left.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    FrameDecoder, FrameDescriptor, FrameError, PixelFormat, RowOrder, SourceError,
    VideoFrameBuffer,
};

const MARKER_RGB: [u8; 3] = [255, 32, 32];
const BAR_RGB: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub row_order: RowOrder,
    pub format: PixelFormat,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            row_order: RowOrder::TopDown,
            format: PixelFormat::Bgra8,
        }
    }
}

impl PatternConfig {
    fn frame_duration(&self) -> Duration {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            30.0
        };
        Duration::from_secs_f64(1.0 / fps)
    }
}

/// Renders frame `n` of the pattern into a fresh host buffer.
#[derive(Debug, Clone)]
pub struct TestPattern {
    config: PatternConfig,
    frame_duration: Duration,
}

impl TestPattern {
    pub fn new(config: PatternConfig) -> Self {
        let frame_duration = config.frame_duration();
        Self {
            config,
            frame_duration,
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Presentation timestamp of frame `index`.
    pub fn timestamp_for(&self, index: u64) -> Duration {
        self.frame_duration.saturating_mul(index.min(u32::MAX as u64) as u32)
    }

    pub fn render(&self, index: u64) -> Result<VideoFrameBuffer, FrameError> {
        let PatternConfig {
            width,
            height,
            format,
            row_order,
            ..
        } = self.config;
        let descriptor = FrameDescriptor::new(width, height, format)
            .with_row_order(row_order)
            .with_timestamp(self.timestamp_for(index));
        if width == 0 || height == 0 {
            // Let the buffer constructor report the geometry error.
            return VideoFrameBuffer::from_host(descriptor, Vec::new());
        }

        let stride = descriptor.stride as usize;
        let required = descriptor.required_len().ok_or(FrameError::TooLarge { width, height })?;
        let mut pixels = vec![0u8; required];

        let bar_width = (width / 16).max(1);
        let bar_x = ((index * bar_width as u64) % width as u64) as u32;
        let marker_w = (width / 8).max(1);
        let marker_h = (height / 8).max(1);

        for y in 0..height {
            let memory_row = match row_order {
                RowOrder::TopDown => y,
                RowOrder::BottomUp => height - 1 - y,
            } as usize;
            let row = &mut pixels[memory_row * stride..memory_row * stride + stride];
            for x in 0..width {
                let rgb = if x < marker_w && y < marker_h {
                    MARKER_RGB
                } else if x >= bar_x && x < bar_x + bar_width {
                    BAR_RGB
                } else {
                    [
                        gradient(x, width),
                        gradient(y, height),
                        (index % 256) as u8,
                    ]
                };
                let px = &mut row[x as usize * 4..x as usize * 4 + 4];
                px.copy_from_slice(&encode(format, rgb));
            }
        }

        trace!(index, width, height, ?format, ?row_order, "rendered test pattern");
        VideoFrameBuffer::from_host(descriptor, pixels)
    }
}

fn gradient(pos: u32, extent: u32) -> u8 {
    if extent <= 1 {
        return 0;
    }
    (pos as u64 * 255 / (extent as u64 - 1)) as u8
}

/// Opaque pixel in the memory order of `format`.
fn encode(format: PixelFormat, [r, g, b]: [u8; 3]) -> [u8; 4] {
    match format {
        PixelFormat::Bgra8 => [b, g, r, 255],
        PixelFormat::Rgba8 => [r, g, b, 255],
    }
}

/// Non-blocking source that yields a new pattern frame whenever wall time crosses a
/// frame boundary and `None` in between.
pub struct TestPatternSource {
    pattern: TestPattern,
    started: Instant,
    last_index: Option<u64>,
}

impl TestPatternSource {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            pattern: TestPattern::new(config),
            started: Instant::now(),
            last_index: None,
        }
    }

    pub fn pattern(&self) -> &TestPattern {
        &self.pattern
    }

    /// Frame due at `elapsed` since the source was created.
    pub fn frame_index_at(&self, elapsed: Duration) -> u64 {
        (elapsed.as_nanos() / self.pattern.frame_duration.as_nanos().max(1)) as u64
    }
}

impl crate::FrameSource for TestPatternSource {
    fn pull_latest_frame(&mut self) -> Option<VideoFrameBuffer> {
        let index = self.frame_index_at(self.started.elapsed());
        if self.last_index == Some(index) {
            return None;
        }
        self.last_index = Some(index);
        match self.pattern.render(index) {
            Ok(frame) => Some(frame),
            Err(err) => {
                trace!(%err, "test pattern cannot be rendered");
                None
            }
        }
    }
}

/// Blocking decoder over [`TestPattern`]: each call sleeps until the next frame is
/// due, like a decoder pacing itself to the stream's frame rate.
pub struct TestPatternDecoder {
    pattern: TestPattern,
    next_index: u64,
    next_due: Option<Instant>,
    limit: Option<u64>,
}

impl TestPatternDecoder {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            pattern: TestPattern::new(config),
            next_index: 0,
            next_due: None,
            limit: None,
        }
    }

    /// End the stream after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn pattern(&self) -> &TestPattern {
        &self.pattern
    }
}

impl FrameDecoder for TestPatternDecoder {
    fn decode_next(&mut self) -> Result<Option<VideoFrameBuffer>, SourceError> {
        if self.limit.is_some_and(|limit| self.next_index >= limit) {
            debug!(frames = self.next_index, "test pattern stream ended");
            return Ok(None);
        }

        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due + self.pattern.frame_duration);

        let frame = self.pattern.render(self.next_index)?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        let cfg = self.pattern.config();
        format!("pattern-{}x{}", cfg.width, cfg.height)
    }
}
