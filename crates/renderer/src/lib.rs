//! GPU presentation of decoded frames.
//!
//! The [`Presenter`] reads the frame mailbox on a redraw request, gets the frame's
//! texture from the [`TextureBridge`] (zero-copy import when the frame already lives
//! on the device, one upload otherwise), takes the device's pipeline from the
//! [`PipelineCache`] and draws a full-screen quad onto a [`DisplaySurface`].
//!
//! [`GpuDevice`] is the seam to the graphics API; [`WgpuDevice`] is the implementation
//! shipped here.

use frame_source::FrameId;
use thiserror::Error;

mod bridge;
mod device;
mod pipeline;
mod presenter;
mod surface;
mod wgpu_backend;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeStats, TextureBridge, DEFAULT_TEXTURE_CACHE_CAPACITY};
pub use device::{ClearColor, DeviceId, DisplaySurface, DrawPass, GpuDevice};
pub use pipeline::{quad_vertices, PipelineCache, QuadVertex};
pub use presenter::{PresentOutcome, Presenter, PresenterConfig, PresenterStats, SkipReason};
pub use surface::{OffscreenSurface, WgpuDrawable, WgpuSurface};
pub use wgpu_backend::{
    shared_pipeline_cache, FrameUniforms, WgpuContext, WgpuDevice, WgpuPipeline, WgpuSharedTexture,
    WgpuTexture,
};

#[derive(Debug, Error)]
pub enum RendererError {
    /// Recoverable: the presenter keeps the previous frame and retries next draw.
    #[error("texture creation failed for {frame}: {reason}")]
    TextureCreationFailed { frame: FrameId, reason: String },
    #[error("pipeline compilation failed: {0}")]
    PipelineCompilationFailed(String),
    /// Recoverable: the draw is skipped.
    #[error("no drawable available: {0}")]
    DrawableUnavailable(String),
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("Request device error: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("Create surface error: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("surface is not supported by the adapter")]
    UnsupportedSurface,
    #[error("Buffer async error")]
    BufferAsync,
}
