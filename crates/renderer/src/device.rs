//! The seam between the presenter and a concrete GPU API.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use frame_source::VideoFrameBuffer;
use serde::{Deserialize, Serialize};

use crate::RendererError;

/// Process-unique identity of a GPU device. Pipelines are cached per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

/// What to put on a drawable.
pub enum DrawPass<'a, P, T> {
    /// Nothing to show; fill the target.
    Clear(ClearColor),
    /// Full-screen quad sampling `texture`, over `background`.
    Quad {
        pipeline: &'a P,
        texture: &'a T,
        background: ClearColor,
    },
}

/// A GPU device as the presenter needs it.
///
/// `import_texture` wraps memory the frame already shares with the GPU; `upload_texture`
/// copies host bytes once. Both produce a texture that remembers the frame's row order
/// so `draw` can pick the matching vertex stage.
pub trait GpuDevice: Send + Sync + 'static {
    type Texture: Send + Sync + 'static;
    type Pipeline: Send + Sync + 'static;
    type Target;

    fn id(&self) -> DeviceId;

    /// Build the shader program and fixed-function state. Called at most once per
    /// device by [`PipelineCache`](crate::PipelineCache) on success.
    fn compile_pipeline(&self) -> Result<Self::Pipeline, RendererError>;

    fn can_import(&self, frame: &VideoFrameBuffer) -> bool;

    fn import_texture(&self, frame: &VideoFrameBuffer) -> Result<Self::Texture, RendererError>;

    fn upload_texture(&self, frame: &VideoFrameBuffer) -> Result<Self::Texture, RendererError>;

    fn draw(
        &self,
        target: &Self::Target,
        pass: DrawPass<'_, Self::Pipeline, Self::Texture>,
    ) -> Result<(), RendererError>;
}

/// Where presented frames end up: a window surface or an offscreen texture.
pub trait DisplaySurface {
    type Target;

    /// Next drawable, or [`RendererError::DrawableUnavailable`] when there is none
    /// this time around.
    fn acquire(&mut self) -> Result<Self::Target, RendererError>;

    fn present(&mut self, target: Self::Target);

    fn size(&self) -> (u32, u32);
}
