//! Counting stand-ins for a GPU device and a display surface.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use frame_source::{FrameDescriptor, FrameId, PixelFormat, SharedImage, VideoFrameBuffer};
use parking_lot::Mutex;

use crate::device::{ClearColor, DeviceId, DisplaySurface, DrawPass, GpuDevice};
use crate::RendererError;

pub(crate) fn host_frame() -> VideoFrameBuffer {
    VideoFrameBuffer::from_host(FrameDescriptor::new(2, 2, PixelFormat::Bgra8), vec![0; 16])
        .unwrap()
}

pub(crate) struct StubShared;

impl SharedImage for StubShared {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn shared_frame() -> VideoFrameBuffer {
    VideoFrameBuffer::from_shared(
        FrameDescriptor::new(2, 2, PixelFormat::Bgra8),
        Arc::new(StubShared),
    )
    .unwrap()
}

#[derive(Debug)]
pub(crate) struct StubTexture {
    pub frame: FrameId,
    pub imported: bool,
}

#[derive(Debug)]
pub(crate) struct StubPipeline {
    pub serial: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Drawn {
    Clear(ClearColor),
    Quad { frame: FrameId, pipeline: usize },
}

#[derive(Debug)]
pub(crate) struct StubTarget {
    pub index: usize,
}

pub(crate) struct CountingDevice {
    id: DeviceId,
    compiles: AtomicUsize,
    imports: AtomicUsize,
    uploads: AtomicUsize,
    fail_compile: AtomicBool,
    failing_uploads: AtomicUsize,
    drawn: Mutex<Vec<Drawn>>,
}

impl CountingDevice {
    pub fn new() -> Self {
        Self {
            id: DeviceId::next(),
            compiles: AtomicUsize::new(0),
            imports: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            fail_compile: AtomicBool::new(false),
            failing_uploads: AtomicUsize::new(0),
            drawn: Mutex::new(Vec::new()),
        }
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fail_compiles(&self, fail: bool) {
        self.fail_compile.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    pub fn drawn(&self) -> Vec<Drawn> {
        self.drawn.lock().clone()
    }
}

impl GpuDevice for CountingDevice {
    type Texture = StubTexture;
    type Pipeline = StubPipeline;
    type Target = StubTarget;

    fn id(&self) -> DeviceId {
        self.id
    }

    fn compile_pipeline(&self) -> Result<StubPipeline, RendererError> {
        let serial = self.compiles.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_compile.load(Ordering::SeqCst) {
            return Err(RendererError::PipelineCompilationFailed(
                "entry point missing".to_string(),
            ));
        }
        Ok(StubPipeline { serial })
    }

    fn can_import(&self, frame: &VideoFrameBuffer) -> bool {
        frame
            .shared_image()
            .is_some_and(|image| image.as_any().is::<StubShared>())
    }

    fn import_texture(&self, frame: &VideoFrameBuffer) -> Result<StubTexture, RendererError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        Ok(StubTexture {
            frame: frame.id(),
            imported: true,
        })
    }

    fn upload_texture(&self, frame: &VideoFrameBuffer) -> Result<StubTexture, RendererError> {
        let failing = self.failing_uploads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_uploads.store(failing - 1, Ordering::SeqCst);
            return Err(RendererError::TextureCreationFailed {
                frame: frame.id(),
                reason: "out of texture memory".to_string(),
            });
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(StubTexture {
            frame: frame.id(),
            imported: false,
        })
    }

    fn draw(
        &self,
        _target: &StubTarget,
        pass: DrawPass<'_, StubPipeline, StubTexture>,
    ) -> Result<(), RendererError> {
        let drawn = match pass {
            DrawPass::Clear(color) => Drawn::Clear(color),
            DrawPass::Quad {
                pipeline, texture, ..
            } => Drawn::Quad {
                frame: texture.frame,
                pipeline: pipeline.serial,
            },
        };
        self.drawn.lock().push(drawn);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct StubSurface {
    pub unavailable: bool,
    pub acquired: usize,
    pub presented: Vec<usize>,
}

impl DisplaySurface for StubSurface {
    type Target = StubTarget;

    fn acquire(&mut self) -> Result<StubTarget, RendererError> {
        if self.unavailable {
            return Err(RendererError::DrawableUnavailable("window occluded".to_string()));
        }
        self.acquired += 1;
        Ok(StubTarget {
            index: self.acquired,
        })
    }

    fn present(&mut self, target: StubTarget) {
        self.presented.push(target.index);
    }

    fn size(&self) -> (u32, u32) {
        (1280, 720)
    }
}
