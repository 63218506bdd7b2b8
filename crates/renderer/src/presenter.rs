use std::sync::Arc;

use frame_source::FrameId;
use playback::FrameMailbox;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::bridge::{BridgeStats, TextureBridge, DEFAULT_TEXTURE_CACHE_CAPACITY};
use crate::device::{ClearColor, DisplaySurface, DrawPass, GpuDevice};
use crate::pipeline::PipelineCache;
use crate::RendererError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    /// Skip the draw when the mailbox has not changed since the last present.
    pub skip_unchanged: bool,
    pub texture_cache_capacity: usize,
    /// Fill for an empty mailbox and behind the quad.
    pub clear_color: ClearColor,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            skip_unchanged: true,
            texture_cache_capacity: DEFAULT_TEXTURE_CACHE_CAPACITY,
            clear_color: ClearColor::TRANSPARENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unchanged,
    TextureUnavailable,
    DrawableUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented { sequence: u64, frame: FrameId },
    /// Nothing published yet; the surface was cleared.
    Blank,
    Skipped(SkipReason),
}

impl PresentOutcome {
    /// The draw failed for a transient reason and the frame is still waiting; the host
    /// should ask again rather than wait for the next publish, which may never come.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            PresentOutcome::Skipped(SkipReason::TextureUnavailable | SkipReason::DrawableUnavailable)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenterStats {
    pub presented: u64,
    pub blank: u64,
    pub skipped_unchanged: u64,
    pub skipped_texture: u64,
    pub skipped_drawable: u64,
}

/// Draws the mailbox's current frame on request.
///
/// Per-frame trouble (no texture, no drawable) is reported as a skipped outcome and
/// leaves the last presented image on screen; the next request retries. Only a
/// pipeline that cannot be built is returned as an error.
pub struct Presenter<D: GpuDevice> {
    device: Arc<D>,
    mailbox: Arc<FrameMailbox>,
    bridge: TextureBridge<D>,
    pipelines: Arc<PipelineCache<D::Pipeline>>,
    config: PresenterConfig,
    last_presented: Option<u64>,
    needs_redraw: bool,
    texture_failures: u32,
    stats: PresenterStats,
}

impl<D: GpuDevice> Presenter<D> {
    pub fn new(
        device: Arc<D>,
        mailbox: Arc<FrameMailbox>,
        pipelines: Arc<PipelineCache<D::Pipeline>>,
        config: PresenterConfig,
    ) -> Self {
        let bridge = TextureBridge::new(Arc::clone(&device), config.texture_cache_capacity);
        Self {
            device,
            mailbox,
            bridge,
            pipelines,
            config,
            last_presented: None,
            needs_redraw: true,
            texture_failures: 0,
            stats: PresenterStats::default(),
        }
    }

    /// Build the pipeline now instead of on the first draw.
    pub fn prepare(&self) -> Result<(), RendererError> {
        self.pipelines.pipeline_for(&*self.device).map(|_| ())
    }

    /// Redraw on the next `render` even if no new frame arrived.
    pub fn invalidate(&mut self) {
        self.needs_redraw = true;
    }

    /// True when a `render` now would draw something.
    pub fn has_pending_frame(&self) -> bool {
        self.needs_redraw || self.last_presented != Some(self.mailbox.sequence())
    }

    #[instrument(name = "presenter.render", skip_all, fields(device = %self.device.id()))]
    pub fn render<S>(&mut self, surface: &mut S) -> Result<PresentOutcome, RendererError>
    where
        S: DisplaySurface<Target = D::Target>,
    {
        let snapshot = self.mailbox.read();
        if self.config.skip_unchanged
            && !self.needs_redraw
            && self.last_presented == Some(snapshot.sequence)
        {
            self.stats.skipped_unchanged += 1;
            return Ok(PresentOutcome::Skipped(SkipReason::Unchanged));
        }

        let pipeline = self.pipelines.pipeline_for(&*self.device)?;

        let Some(frame) = snapshot.frame else {
            let target = match surface.acquire() {
                Ok(target) => target,
                Err(err) => return Ok(self.skip_drawable(err)),
            };
            self.device
                .draw(&target, DrawPass::Clear(self.config.clear_color))?;
            surface.present(target);
            self.mark_presented(snapshot.sequence);
            self.stats.blank += 1;
            trace!("presented blank surface");
            return Ok(PresentOutcome::Blank);
        };

        let texture = match self.bridge.texture_for(&frame) {
            Ok(texture) => {
                if self.texture_failures > 0 {
                    debug!(failures = self.texture_failures, "texture creation recovered");
                    self.texture_failures = 0;
                }
                texture
            }
            Err(err) => {
                self.texture_failures += 1;
                if self.texture_failures == 1 {
                    warn!(%err, frame = %frame.id(), "keeping previous frame on screen");
                } else {
                    trace!(%err, frame = %frame.id(), "texture still unavailable");
                }
                self.stats.skipped_texture += 1;
                return Ok(PresentOutcome::Skipped(SkipReason::TextureUnavailable));
            }
        };

        let target = match surface.acquire() {
            Ok(target) => target,
            Err(err) => return Ok(self.skip_drawable(err)),
        };
        self.device.draw(
            &target,
            DrawPass::Quad {
                pipeline: &*pipeline,
                texture: &*texture,
                background: self.config.clear_color,
            },
        )?;
        surface.present(target);

        self.mark_presented(snapshot.sequence);
        self.stats.presented += 1;
        trace!(sequence = snapshot.sequence, frame = %frame.id(), "frame presented");
        Ok(PresentOutcome::Presented {
            sequence: snapshot.sequence,
            frame: frame.id(),
        })
    }

    fn skip_drawable(&mut self, err: RendererError) -> PresentOutcome {
        trace!(%err, "no drawable; skipping draw");
        self.stats.skipped_drawable += 1;
        PresentOutcome::Skipped(SkipReason::DrawableUnavailable)
    }

    fn mark_presented(&mut self, sequence: u64) {
        self.last_presented = Some(sequence);
        self.needs_redraw = false;
    }

    pub fn last_presented(&self) -> Option<u64> {
        self.last_presented
    }

    pub fn stats(&self) -> PresenterStats {
        self.stats
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.mailbox
    }

    pub fn config(&self) -> &PresenterConfig {
        &self.config
    }
}
