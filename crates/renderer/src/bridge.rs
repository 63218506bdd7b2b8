use std::collections::VecDeque;
use std::sync::Arc;

use frame_source::{FrameId, VideoFrameBuffer};
use tracing::{debug, trace};

use crate::device::GpuDevice;
use crate::RendererError;

pub const DEFAULT_TEXTURE_CACHE_CAPACITY: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub hits: u64,
    pub imports: u64,
    pub uploads: u64,
    pub evictions: u64,
    pub failures: u64,
}

struct CacheEntry<T> {
    frame: FrameId,
    texture: Arc<T>,
    // an imported texture aliases the frame's memory, so the frame stays alive with it
    _backing: Option<VideoFrameBuffer>,
}

/// Turns frames into sampled textures on one device.
///
/// Keeps the textures of the last few frame instances, keyed by [`FrameId`], so a
/// redraw of a frame already on the GPU neither re-uploads nor re-wraps it. Frames
/// that share memory with the device are imported; everything else is uploaded once.
pub struct TextureBridge<D: GpuDevice> {
    device: Arc<D>,
    entries: VecDeque<CacheEntry<D::Texture>>,
    capacity: usize,
    stats: BridgeStats,
}

impl<D: GpuDevice> TextureBridge<D> {
    pub fn new(device: Arc<D>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            device,
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            stats: BridgeStats::default(),
        }
    }

    pub fn texture_for(
        &mut self,
        frame: &VideoFrameBuffer,
    ) -> Result<Arc<D::Texture>, RendererError> {
        let id = frame.id();
        if let Some(pos) = self.entries.iter().position(|entry| entry.frame == id) {
            if let Some(entry) = self.entries.remove(pos) {
                self.stats.hits += 1;
                let texture = Arc::clone(&entry.texture);
                self.entries.push_back(entry);
                trace!(frame = %id, "texture cache hit");
                return Ok(texture);
            }
        }

        let imported = self.device.can_import(frame);
        let created = if imported {
            self.device.import_texture(frame)
        } else {
            self.device.upload_texture(frame)
        };
        let texture = match created {
            Ok(texture) => Arc::new(texture),
            Err(err) => {
                self.stats.failures += 1;
                return Err(err);
            }
        };

        if imported {
            self.stats.imports += 1;
        } else {
            self.stats.uploads += 1;
        }
        debug!(
            frame = %id,
            width = frame.width(),
            height = frame.height(),
            imported,
            "created frame texture"
        );

        self.entries.push_back(CacheEntry {
            frame: id,
            texture: Arc::clone(&texture),
            _backing: imported.then(|| frame.clone()),
        });
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.stats.evictions += 1;
                trace!(frame = %evicted.frame, "evicted frame texture");
            }
        }
        Ok(texture)
    }

    pub fn contains(&self, frame: FrameId) -> bool {
        self.entries.iter().any(|entry| entry.frame == frame)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{host_frame, shared_frame, CountingDevice};

    #[test]
    fn same_frame_uploads_once() {
        let device = Arc::new(CountingDevice::new());
        let mut bridge = TextureBridge::new(device.clone(), 3);
        let frame = host_frame();

        let first = bridge.texture_for(&frame).unwrap();
        let second = bridge.texture_for(&frame).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(device.uploads(), 1);
        assert_eq!(bridge.stats().hits, 1);
    }

    #[test]
    fn shared_frames_are_imported_not_uploaded() {
        let device = Arc::new(CountingDevice::new());
        let mut bridge = TextureBridge::new(device.clone(), 3);
        let frame = shared_frame();

        let texture = bridge.texture_for(&frame).unwrap();
        bridge.texture_for(&frame).unwrap();
        assert!(texture.imported);
        assert_eq!((device.imports(), device.uploads()), (1, 0));
        // the bridge keeps the aliased frame alive
        assert_eq!(frame.ref_count(), 2);
    }

    #[test]
    fn oldest_texture_is_evicted() {
        let device = Arc::new(CountingDevice::new());
        let mut bridge = TextureBridge::new(device.clone(), 2);
        let frames = [host_frame(), host_frame(), host_frame()];

        for frame in &frames {
            bridge.texture_for(frame).unwrap();
        }
        assert_eq!(bridge.len(), 2);
        assert!(!bridge.contains(frames[0].id()));
        assert_eq!(bridge.stats().evictions, 1);

        bridge.texture_for(&frames[0]).unwrap();
        assert_eq!(device.uploads(), 4);
    }

    #[test]
    fn recently_used_textures_survive_eviction() {
        let device = Arc::new(CountingDevice::new());
        let mut bridge = TextureBridge::new(device.clone(), 2);
        let a = host_frame();
        let b = host_frame();
        bridge.texture_for(&a).unwrap();
        bridge.texture_for(&b).unwrap();
        bridge.texture_for(&a).unwrap();
        bridge.texture_for(&host_frame()).unwrap();

        assert!(bridge.contains(a.id()));
        assert!(!bridge.contains(b.id()));
    }

    #[test]
    fn failures_are_not_cached() {
        let device = Arc::new(CountingDevice::new());
        device.fail_next_uploads(1);
        let mut bridge = TextureBridge::new(device.clone(), 3);
        let frame = host_frame();

        assert!(matches!(
            bridge.texture_for(&frame),
            Err(RendererError::TextureCreationFailed { .. })
        ));
        assert!(bridge.texture_for(&frame).is_ok());
        assert_eq!(bridge.stats().failures, 1);
        assert_eq!(bridge.stats().uploads, 1);
    }
}
