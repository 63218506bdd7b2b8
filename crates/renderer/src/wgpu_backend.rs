use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use frame_source::{PixelFormat, RowOrder, SharedImage, VideoFrameBuffer};
use once_cell::sync::Lazy;
use tracing::{debug, info, instrument};
use wgpu::util::DeviceExt;

use crate::device::{ClearColor, DeviceId, DrawPass, GpuDevice};
use crate::pipeline::PipelineCache;
use crate::presenter::{Presenter, PresenterConfig};
use crate::surface::WgpuDrawable;
use crate::RendererError;

static SHARED_PIPELINES: Lazy<Arc<PipelineCache<WgpuPipeline>>> =
    Lazy::new(|| Arc::new(PipelineCache::new()));

/// Process-wide pipeline cache for wgpu devices.
pub fn shared_pipeline_cache() -> Arc<PipelineCache<WgpuPipeline>> {
    Arc::clone(&SHARED_PIPELINES)
}

/// Adapter, device and queue requested for presentation.
pub struct WgpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl WgpuContext {
    /// Request a device able to present to `compatible_surface`, or a headless one.
    pub async fn new(
        instance: wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, RendererError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RendererError::NoAdapter)?;

        let info = adapter.get_info();
        info!(
            adapter = %info.name,
            backend = ?info.backend,
            "gpu adapter selected"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("present.device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

/// A texture already on a [`WgpuDevice`], handed out by a hardware decoder. Frames
/// carrying one are sampled in place instead of being uploaded.
pub struct WgpuSharedTexture {
    device: DeviceId,
    texture: Arc<wgpu::Texture>,
}

impl WgpuSharedTexture {
    pub fn new(device: &WgpuDevice, texture: Arc<wgpu::Texture>) -> Self {
        Self {
            device: device.id(),
            texture,
        }
    }

    pub fn texture(&self) -> &Arc<wgpu::Texture> {
        &self.texture
    }
}

impl SharedImage for WgpuSharedTexture {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn label(&self) -> &str {
        "wgpu-texture"
    }
}

/// Per-texture vertex uniforms; layout matches `FrameUniforms` in `present.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Share of the texture covered by the frame. Below 1.0 when a decoder hands out
    /// a padded surface (1920x1088 for 1080p).
    pub uv_scale: [f32; 2],
    pub _padding: [f32; 2],
}

impl FrameUniforms {
    pub fn for_frame(frame: (u32, u32), texture: (u32, u32)) -> Self {
        let axis = |frame: u32, texture: u32| {
            if texture == 0 {
                1.0
            } else {
                (frame as f32 / texture as f32).min(1.0)
            }
        };
        Self {
            uv_scale: [axis(frame.0, texture.0), axis(frame.1, texture.1)],
            _padding: [0.0; 2],
        }
    }
}

/// A frame's texture plus the bind group the presentation pipeline samples.
pub struct WgpuTexture {
    texture: Arc<wgpu::Texture>,
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    row_order: RowOrder,
    uniforms: FrameUniforms,
}

impl WgpuTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn row_order(&self) -> RowOrder {
        self.row_order
    }

    pub fn uniforms(&self) -> FrameUniforms {
        self.uniforms
    }
}

/// Presentation pipelines for one device and target format, one per row order.
pub struct WgpuPipeline {
    top_down: wgpu::RenderPipeline,
    bottom_up: wgpu::RenderPipeline,
    format: wgpu::TextureFormat,
}

impl WgpuPipeline {
    pub fn for_row_order(&self, row_order: RowOrder) -> &wgpu::RenderPipeline {
        match row_order {
            RowOrder::TopDown => &self.top_down,
            RowOrder::BottomUp => &self.bottom_up,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

pub(crate) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn to_wgpu_color(color: ClearColor) -> wgpu::Color {
    wgpu::Color {
        r: color.r,
        g: color.g,
        b: color.b,
        a: color.a,
    }
}

/// [`GpuDevice`] over a wgpu device and queue, drawing into `target_format`.
pub struct WgpuDevice {
    id: DeviceId,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    target_format: wgpu::TextureFormat,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl WgpuDevice {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("present.frame_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("present.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            id: DeviceId::next(),
            device,
            queue,
            target_format,
            bind_group_layout,
            sampler,
        }
    }

    pub fn from_context(context: &WgpuContext, target_format: wgpu::TextureFormat) -> Self {
        Self::new(
            Arc::clone(&context.device),
            Arc::clone(&context.queue),
            target_format,
        )
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }

    fn wrap(&self, texture: Arc<wgpu::Texture>, frame: &VideoFrameBuffer) -> WgpuTexture {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let uniforms = FrameUniforms::for_frame(
            (frame.width(), frame.height()),
            (texture.width(), texture.height()),
        );
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("present.frame_uniforms"),
                contents: bytemuck::cast_slice(&[uniforms]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present.frame_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });
        WgpuTexture {
            texture,
            view,
            bind_group,
            row_order: frame.row_order(),
            uniforms,
        }
    }

    fn importable<'a>(&self, frame: &'a VideoFrameBuffer) -> Option<&'a WgpuSharedTexture> {
        let shared = frame
            .shared_image()?
            .as_any()
            .downcast_ref::<WgpuSharedTexture>()?;
        let texture = shared.texture();
        let usable = shared.device == self.id
            && texture.format() == texture_format(frame.format())
            && texture.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING)
            && texture.width() >= frame.width()
            && texture.height() >= frame.height();
        usable.then_some(shared)
    }

    fn create_pipeline(
        &self,
        label: &str,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        vertex_entry: &str,
    ) -> wgpu::RenderPipeline {
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: vertex_entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.target_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
    }
}

impl GpuDevice for WgpuDevice {
    type Texture = WgpuTexture;
    type Pipeline = WgpuPipeline;
    type Target = WgpuDrawable;

    fn id(&self) -> DeviceId {
        self.id
    }

    #[instrument(name = "wgpu.compile_pipeline", skip_all, fields(format = ?self.target_format))]
    fn compile_pipeline(&self) -> Result<WgpuPipeline, RendererError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("present.shader"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                    "shaders/present.wgsl"
                ))),
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("present.pipeline_layout"),
                bind_group_layouts: &[&self.bind_group_layout],
                push_constant_ranges: &[],
            });
        let top_down = self.create_pipeline("present.top_down", &layout, &shader, "vs_top_down");
        let bottom_up =
            self.create_pipeline("present.bottom_up", &layout, &shader, "vs_bottom_up");

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RendererError::PipelineCompilationFailed(err.to_string()));
        }
        Ok(WgpuPipeline {
            top_down,
            bottom_up,
            format: self.target_format,
        })
    }

    fn can_import(&self, frame: &VideoFrameBuffer) -> bool {
        self.importable(frame).is_some()
    }

    fn import_texture(&self, frame: &VideoFrameBuffer) -> Result<WgpuTexture, RendererError> {
        let shared = self
            .importable(frame)
            .ok_or_else(|| RendererError::TextureCreationFailed {
                frame: frame.id(),
                reason: "shared image does not belong to this device".to_string(),
            })?;
        Ok(self.wrap(Arc::clone(shared.texture()), frame))
    }

    fn upload_texture(&self, frame: &VideoFrameBuffer) -> Result<WgpuTexture, RendererError> {
        let fail = |reason: String| RendererError::TextureCreationFailed {
            frame: frame.id(),
            reason,
        };
        let bytes = frame
            .host_bytes()
            .ok_or_else(|| fail("shared image cannot be imported on this device".to_string()))?;

        let (width, height) = (frame.width(), frame.height());
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(fail(format!(
                "{width}x{height} exceeds the device limit of {max}"
            )));
        }

        // rows must start on a texel boundary
        let row_bytes = frame.descriptor().row_bytes();
        let repacked;
        let (data, bytes_per_row) = if frame.stride() % 4 == 0 {
            (bytes, frame.stride())
        } else {
            repacked = bytes
                .chunks(frame.stride() as usize)
                .take(height as usize)
                .flat_map(|row| &row[..row_bytes as usize])
                .copied()
                .collect::<Vec<u8>>();
            (repacked.as_slice(), row_bytes)
        };

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("present.frame"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(frame.format()),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            size,
        );
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(fail(err.to_string()));
        }

        debug!(frame = %frame.id(), width, height, bytes_per_row, "uploaded frame");
        Ok(self.wrap(Arc::new(texture), frame))
    }

    fn draw(
        &self,
        target: &WgpuDrawable,
        pass: DrawPass<'_, WgpuPipeline, WgpuTexture>,
    ) -> Result<(), RendererError> {
        let clear = match &pass {
            DrawPass::Clear(color) => *color,
            DrawPass::Quad { background, .. } => *background,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present.encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(to_wgpu_color(clear)),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let DrawPass::Quad {
                pipeline, texture, ..
            } = pass
            {
                render_pass.set_pipeline(pipeline.for_row_order(texture.row_order));
                render_pass.set_bind_group(0, &texture.bind_group, &[]);
                render_pass.draw(0..4, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl Presenter<WgpuDevice> {
    /// Presenter using the process-wide wgpu pipeline cache.
    pub fn with_shared_pipelines(
        device: Arc<WgpuDevice>,
        mailbox: Arc<playback::FrameMailbox>,
        config: PresenterConfig,
    ) -> Self {
        Presenter::new(device, mailbox, shared_pipeline_cache(), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::PresentOutcome;
    use crate::surface::OffscreenSurface;
    use crate::DisplaySurface;
    use frame_source::FrameDescriptor;
    use playback::FrameMailbox;
    use pollster::FutureExt;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn init_device() -> Option<WgpuDevice> {
        let context = WgpuContext::new(wgpu::Instance::default(), None)
            .block_on()
            .ok()?;
        Some(WgpuDevice::from_context(
            &context,
            wgpu::TextureFormat::Rgba8Unorm,
        ))
    }

    fn two_row_frame(row_order: RowOrder) -> VideoFrameBuffer {
        // first memory row red, second blue, both 2 pixels wide
        let mut bytes = Vec::new();
        for px in [RED, RED, BLUE, BLUE] {
            bytes.extend_from_slice(&px);
        }
        let desc = FrameDescriptor::new(2, 2, PixelFormat::Rgba8).with_row_order(row_order);
        VideoFrameBuffer::from_host(desc, bytes).unwrap()
    }

    fn present_once(
        device: &Arc<WgpuDevice>,
        frame: VideoFrameBuffer,
    ) -> (PresentOutcome, Vec<u8>) {
        let mailbox = Arc::new(FrameMailbox::new());
        mailbox.publish(frame);
        let mut surface = OffscreenSurface::new(device, 2, 2);
        let mut presenter =
            Presenter::with_shared_pipelines(device.clone(), mailbox, PresenterConfig::default());
        let outcome = presenter.render(&mut surface).expect("render");
        let pixels = surface.read_pixels().expect("readback");
        (outcome, pixels)
    }

    #[test]
    fn top_down_frame_keeps_first_row_on_top() {
        let Some(device) = init_device() else {
            eprintln!("skipping top_down_frame_keeps_first_row_on_top: no gpu adapter");
            return;
        };
        let device = Arc::new(device);
        let (outcome, pixels) = present_once(&device, two_row_frame(RowOrder::TopDown));
        assert!(matches!(outcome, PresentOutcome::Presented { .. }));
        assert_eq!(&pixels[0..4], &RED);
        assert_eq!(&pixels[8..12], &BLUE);
    }

    #[test]
    fn bottom_up_frame_is_flipped() {
        let Some(device) = init_device() else {
            eprintln!("skipping bottom_up_frame_is_flipped: no gpu adapter");
            return;
        };
        let device = Arc::new(device);
        let (_, pixels) = present_once(&device, two_row_frame(RowOrder::BottomUp));
        assert_eq!(&pixels[0..4], &BLUE);
        assert_eq!(&pixels[8..12], &RED);
    }

    #[test]
    fn bgra_frames_are_sampled_without_conversion() {
        let Some(device) = init_device() else {
            eprintln!("skipping bgra_frames_are_sampled_without_conversion: no gpu adapter");
            return;
        };
        let device = Arc::new(device);
        let desc = FrameDescriptor::new(2, 2, PixelFormat::Bgra8);
        let frame = VideoFrameBuffer::from_host(desc, [0u8, 0, 255, 255].repeat(4)).unwrap();
        let (_, pixels) = present_once(&device, frame);
        assert!(pixels.chunks(4).all(|px| px == RED));
    }

    #[test]
    fn empty_mailbox_clears_to_transparent() {
        let Some(device) = init_device() else {
            eprintln!("skipping empty_mailbox_clears_to_transparent: no gpu adapter");
            return;
        };
        let device = Arc::new(device);
        let mut surface = OffscreenSurface::new(&device, 2, 2);
        let mut presenter = Presenter::with_shared_pipelines(
            device.clone(),
            Arc::new(FrameMailbox::new()),
            PresenterConfig::default(),
        );
        assert_eq!(presenter.render(&mut surface).unwrap(), PresentOutcome::Blank);
        assert!(surface.read_pixels().unwrap().iter().all(|b| *b == 0));
        assert_eq!(surface.size(), (2, 2));
    }

    #[test]
    fn device_textures_are_imported_without_upload() {
        let Some(device) = init_device() else {
            eprintln!("skipping device_textures_are_imported_without_upload: no gpu adapter");
            return;
        };
        let texture = device.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("test.decoded"),
            size: wgpu::Extent3d {
                width: 2,
                height: 2,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let shared = WgpuSharedTexture::new(&device, Arc::new(texture));
        let desc = FrameDescriptor::new(2, 2, PixelFormat::Rgba8);
        let frame = VideoFrameBuffer::from_shared(desc, Arc::new(shared)).unwrap();

        assert!(device.can_import(&frame));
        let mut bridge = crate::TextureBridge::new(Arc::new(device), 2);
        bridge.texture_for(&frame).unwrap();
        let stats = bridge.stats();
        assert_eq!((stats.imports, stats.uploads), (1, 0));
    }

    #[test]
    fn padded_surfaces_scale_texture_coordinates() {
        assert_eq!(FrameUniforms::for_frame((2, 2), (2, 2)).uv_scale, [1.0, 1.0]);
        let padded = FrameUniforms::for_frame((1920, 1080), (1920, 1088));
        assert_eq!(padded.uv_scale[0], 1.0);
        assert!((padded.uv_scale[1] - 1080.0 / 1088.0).abs() < f32::EPSILON);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 16);
    }

    #[test]
    fn padded_shared_texture_shows_only_the_frame() {
        let Some(device) = init_device() else {
            eprintln!("skipping padded_shared_texture_shows_only_the_frame: no gpu adapter");
            return;
        };
        const GREEN: [u8; 4] = [0, 255, 0, 255];
        // 2x2 frame in the top rows of a 2x4 surface, padding rows green
        let size = wgpu::Extent3d {
            width: 2,
            height: 4,
            depth_or_array_layers: 1,
        };
        let texture = device.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("test.padded"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let mut texels = Vec::new();
        for px in [RED, RED, BLUE, BLUE, GREEN, GREEN, GREEN, GREEN] {
            texels.extend_from_slice(&px);
        }
        device.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(8),
                rows_per_image: Some(4),
            },
            size,
        );

        let shared = WgpuSharedTexture::new(&device, Arc::new(texture));
        let desc = FrameDescriptor::new(2, 2, PixelFormat::Rgba8);
        let frame = VideoFrameBuffer::from_shared(desc, Arc::new(shared)).unwrap();
        assert!(device.can_import(&frame));

        let device = Arc::new(device);
        let (outcome, pixels) = present_once(&device, frame);
        assert!(matches!(outcome, PresentOutcome::Presented { .. }));
        assert_eq!(&pixels[0..4], &RED);
        assert_eq!(&pixels[8..12], &BLUE);
        assert!(pixels.chunks(4).all(|px| px != GREEN));
    }

    #[test]
    fn shared_cache_compiles_once_per_device() {
        let Some(device) = init_device() else {
            eprintln!("skipping shared_cache_compiles_once_per_device: no gpu adapter");
            return;
        };
        let cache = shared_pipeline_cache();
        let first = cache.pipeline_for(&device).unwrap();
        let second = shared_pipeline_cache().pipeline_for(&device).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.format(), wgpu::TextureFormat::Rgba8Unorm);
    }
}
