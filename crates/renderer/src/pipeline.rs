use std::collections::HashMap;
use std::sync::Arc;

use frame_source::RowOrder;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::device::{DeviceId, GpuDevice};
use crate::RendererError;

/// Compiled pipelines, built at most once per device.
///
/// Lookups for different devices never wait on each other; concurrent first calls for
/// the same device block until the one compile finishes. A failed compile is not
/// remembered, so the next call tries again.
pub struct PipelineCache<P> {
    entries: Mutex<HashMap<DeviceId, Arc<OnceCell<Arc<P>>>>>,
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<P: Send + Sync + 'static> PipelineCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline_for<D>(&self, device: &D) -> Result<Arc<P>, RendererError>
    where
        D: GpuDevice<Pipeline = P>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(device.id()).or_default())
        };
        cell.get_or_try_init(|| compile(device)).map(Arc::clone)
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.entries
            .lock()
            .get(&device)
            .is_some_and(|cell| cell.get().is_some())
    }

    /// Drop the pipeline of a device that is going away.
    pub fn forget(&self, device: DeviceId) -> bool {
        self.entries.lock().remove(&device).is_some()
    }
}

#[instrument(name = "pipeline_cache.compile", skip_all, fields(device = %device.id()))]
fn compile<D: GpuDevice>(device: &D) -> Result<Arc<D::Pipeline>, RendererError> {
    let pipeline = device.compile_pipeline()?;
    info!("presentation pipeline compiled");
    Ok(Arc::new(pipeline))
}

/// One corner of the full-screen triangle strip, as the vertex stage emits it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
}

/// CPU mirror of the vertex stage in `shaders/present.wgsl`, for an unpadded texture.
pub fn quad_vertices(row_order: RowOrder) -> [QuadVertex; 4] {
    std::array::from_fn(|index| {
        let x = (index & 1) as f32;
        let y = ((index >> 1) & 1) as f32;
        let v = match row_order {
            RowOrder::TopDown => 1.0 - y,
            RowOrder::BottomUp => y,
        };
        QuadVertex {
            position: [x * 2.0 - 1.0, y * 2.0 - 1.0],
            tex_coords: [x, v],
        }
    })
}
