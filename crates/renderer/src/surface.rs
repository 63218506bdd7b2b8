use std::sync::mpsc::{channel, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::device::DisplaySurface;
use crate::wgpu_backend::{WgpuContext, WgpuDevice};
use crate::RendererError;

/// One drawable: a swapchain image, or the offscreen target.
pub struct WgpuDrawable {
    view: wgpu::TextureView,
    frame: Option<wgpu::SurfaceTexture>,
}

impl WgpuDrawable {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Window surface presented with vsync (`Fifo`).
pub struct WgpuSurface {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    config: wgpu::SurfaceConfiguration,
}

impl WgpuSurface {
    /// Configure `surface` for the context's device. Picks a non-sRGB format so frame
    /// bytes reach the screen without a transfer-function conversion.
    pub fn new(
        surface: wgpu::Surface<'static>,
        context: &WgpuContext,
        width: u32,
        height: u32,
    ) -> Result<Self, RendererError> {
        let capabilities = surface.get_capabilities(&context.adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or(RendererError::UnsupportedSurface)?;
        let alpha_mode = capabilities
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &config);
        info!(?format, width = config.width, height = config.height, "surface configured");

        Ok(Self {
            surface,
            device: Arc::clone(&context.device),
            config,
        })
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Returns `true` if the size changed. Zero sizes (minimised windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width, height) == (self.config.width, self.config.height)
        {
            return false;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        debug!(width, height, "surface resized");
        true
    }

    fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }
}

impl DisplaySurface for WgpuSurface {
    type Target = WgpuDrawable;

    fn acquire(&mut self) -> Result<WgpuDrawable, RendererError> {
        match self.surface.get_current_texture() {
            Ok(frame) => {
                if frame.suboptimal {
                    trace!("suboptimal surface texture");
                }
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(WgpuDrawable {
                    view,
                    frame: Some(frame),
                })
            }
            Err(err @ (wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                debug!(%err, "reconfiguring surface");
                self.reconfigure();
                Err(RendererError::DrawableUnavailable(err.to_string()))
            }
            Err(err) => Err(RendererError::DrawableUnavailable(err.to_string())),
        }
    }

    fn present(&mut self, target: WgpuDrawable) {
        if let Some(frame) = target.frame {
            frame.present();
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

/// Render target that never reaches a screen. Used for snapshots and GPU tests.
pub struct OffscreenSurface {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    texture: wgpu::Texture,
    width: u32,
    height: u32,
    presented: u64,
}

impl OffscreenSurface {
    pub fn new(device: &WgpuDevice, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = device.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("present.offscreen"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: device.target_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        Self {
            device: Arc::clone(device.device()),
            queue: Arc::clone(device.queue()),
            texture,
            width,
            height,
            presented: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Copy the target back to host memory, tightly packed, in the target's format.
    pub fn read_pixels(&self) -> Result<Vec<u8>, RendererError> {
        let row_bytes = self.width * 4;
        let row_pitch = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("present.offscreen_readback"),
            size: row_pitch as u64 * self.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present.offscreen_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_pitch),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        loop {
            match rx.try_recv() {
                Ok(Ok(())) => break,
                Ok(Err(_)) | Err(TryRecvError::Disconnected) => {
                    return Err(RendererError::BufferAsync)
                }
                Err(TryRecvError::Empty) => {
                    self.device.poll(wgpu::Maintain::Poll);
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((row_bytes * self.height) as usize);
        for row in mapped.chunks(row_pitch as usize).take(self.height as usize) {
            pixels.extend_from_slice(&row[..row_bytes as usize]);
        }
        drop(mapped);
        staging.unmap();
        Ok(pixels)
    }
}

impl DisplaySurface for OffscreenSurface {
    type Target = WgpuDrawable;

    fn acquire(&mut self) -> Result<WgpuDrawable, RendererError> {
        Ok(WgpuDrawable {
            view: self
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
            frame: None,
        })
    }

    fn present(&mut self, _target: WgpuDrawable) {
        self.presented += 1;
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}
