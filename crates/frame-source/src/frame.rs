use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interleaved 4-channel, 8-bit-per-channel layouts. Sampled as-is, never converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// Order of rows in memory. Bottom-up buffers need flipped texture coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    #[default]
    TopDown,
    BottomUp,
}

/// Process-unique identity of one buffer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// An image that already lives where the GPU can sample it (an IOSurface, a dmabuf, a
/// texture on the presenting device). GPU backends downcast through [`SharedImage::as_any`]
/// to recognise handles they can import without a copy.
pub trait SharedImage: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn label(&self) -> &str {
        "shared-image"
    }
}

#[derive(Clone)]
pub enum FrameStorage {
    Host(Arc<[u8]>),
    Shared(Arc<dyn SharedImage>),
}

impl fmt::Debug for FrameStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStorage::Host(bytes) => f.debug_tuple("Host").field(&bytes.len()).finish(),
            FrameStorage::Shared(image) => f.debug_tuple("Shared").field(&image.label()).finish(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },
    #[error("stride {stride} is smaller than one row ({min} bytes)")]
    StrideTooSmall { stride: u32, min: u32 },
    #[error("pixel buffer holds {len} bytes, frame needs {required}")]
    BufferTooSmall { len: usize, required: usize },
    #[error("frame of {width}x{height} does not fit in addressable memory")]
    TooLarge { width: u32, height: u32 },
}

/// Geometry and layout of a frame, fixed for the lifetime of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub row_order: RowOrder,
    pub timestamp: Option<Duration>,
}

impl FrameDescriptor {
    /// Tightly packed, top-down rows.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: width.saturating_mul(format.bytes_per_pixel()),
            format,
            row_order: RowOrder::TopDown,
            timestamp: None,
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_row_order(mut self, row_order: RowOrder) -> Self {
        self.row_order = row_order;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Saturates for widths no valid frame can have.
    pub fn row_bytes(&self) -> u32 {
        self.width.saturating_mul(self.format.bytes_per_pixel())
    }

    /// Bytes a host buffer must hold; the last row does not need its padding. `None`
    /// when that overflows `usize`.
    pub fn required_len(&self) -> Option<usize> {
        if self.height == 0 {
            return Some(0);
        }
        let row = self.width.checked_mul(self.format.bytes_per_pixel())? as usize;
        (self.stride as usize)
            .checked_mul(self.height as usize - 1)?
            .checked_add(row)
    }

    fn too_large(&self) -> FrameError {
        FrameError::TooLarge {
            width: self.width,
            height: self.height,
        }
    }

    fn validate(&self) -> Result<usize, FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        let min = self
            .width
            .checked_mul(self.format.bytes_per_pixel())
            .ok_or_else(|| self.too_large())?;
        if self.stride < min {
            return Err(FrameError::StrideTooSmall {
                stride: self.stride,
                min,
            });
        }
        self.required_len().ok_or_else(|| self.too_large())
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

struct FrameShared {
    id: FrameId,
    descriptor: FrameDescriptor,
    storage: FrameStorage,
    release: Option<ReleaseHook>,
}

impl Drop for FrameShared {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Reference-counted handle to one decoded image.
///
/// Cloning acquires another reference; dropping releases it. When the last reference
/// goes away the decoder's release hook runs, so a pump or presenter holding a clone
/// keeps the decoder's memory alive exactly as long as it needs it.
#[derive(Clone)]
pub struct VideoFrameBuffer {
    shared: Arc<FrameShared>,
}

impl VideoFrameBuffer {
    pub fn from_host(
        descriptor: FrameDescriptor,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<Self, FrameError> {
        Self::host(descriptor, bytes.into(), None)
    }

    /// Host frame whose memory the decoder wants back: `release` runs once the last
    /// handle is dropped, or straight away if the frame is rejected.
    pub fn from_host_with_release(
        descriptor: FrameDescriptor,
        bytes: impl Into<Arc<[u8]>>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Result<Self, FrameError> {
        Self::host(descriptor, bytes.into(), Some(Box::new(release)))
    }

    pub fn from_shared(
        descriptor: FrameDescriptor,
        image: Arc<dyn SharedImage>,
    ) -> Result<Self, FrameError> {
        Self::shared(descriptor, image, None)
    }

    /// Shared-image variant of [`VideoFrameBuffer::from_host_with_release`].
    pub fn from_shared_with_release(
        descriptor: FrameDescriptor,
        image: Arc<dyn SharedImage>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Result<Self, FrameError> {
        Self::shared(descriptor, image, Some(Box::new(release)))
    }

    fn host(
        descriptor: FrameDescriptor,
        bytes: Arc<[u8]>,
        release: Option<ReleaseHook>,
    ) -> Result<Self, FrameError> {
        let checked = descriptor.validate().and_then(|required| {
            if bytes.len() < required {
                Err(FrameError::BufferTooSmall {
                    len: bytes.len(),
                    required,
                })
            } else {
                Ok(())
            }
        });
        match checked {
            Ok(()) => Ok(Self::build(descriptor, FrameStorage::Host(bytes), release)),
            Err(err) => Err(reject(err, release)),
        }
    }

    fn shared(
        descriptor: FrameDescriptor,
        image: Arc<dyn SharedImage>,
        release: Option<ReleaseHook>,
    ) -> Result<Self, FrameError> {
        match descriptor.validate() {
            Ok(_) => Ok(Self::build(descriptor, FrameStorage::Shared(image), release)),
            Err(err) => Err(reject(err, release)),
        }
    }

    fn build(
        descriptor: FrameDescriptor,
        storage: FrameStorage,
        release: Option<ReleaseHook>,
    ) -> Self {
        Self {
            shared: Arc::new(FrameShared {
                id: FrameId::next(),
                descriptor,
                storage,
                release,
            }),
        }
    }

    pub fn id(&self) -> FrameId {
        self.shared.id
    }

    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.shared.descriptor
    }

    pub fn width(&self) -> u32 {
        self.shared.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.shared.descriptor.height
    }

    pub fn stride(&self) -> u32 {
        self.shared.descriptor.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.shared.descriptor.format
    }

    pub fn row_order(&self) -> RowOrder {
        self.shared.descriptor.row_order
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.shared.descriptor.timestamp
    }

    pub fn storage(&self) -> &FrameStorage {
        &self.shared.storage
    }

    pub fn host_bytes(&self) -> Option<&[u8]> {
        match &self.shared.storage {
            FrameStorage::Host(bytes) => Some(bytes),
            FrameStorage::Shared(_) => None,
        }
    }

    pub fn shared_image(&self) -> Option<&Arc<dyn SharedImage>> {
        match &self.shared.storage {
            FrameStorage::Shared(image) => Some(image),
            FrameStorage::Host(_) => None,
        }
    }

    /// Number of live handles to this buffer instance.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    pub fn same_instance(&self, other: &VideoFrameBuffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

// a rejected frame never gets a handle, so its memory goes back to the decoder now
fn reject(err: FrameError, release: Option<ReleaseHook>) -> FrameError {
    if let Some(release) = release {
        release();
    }
    err
}

impl fmt::Debug for VideoFrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrameBuffer")
            .field("id", &self.shared.id)
            .field("descriptor", &self.shared.descriptor)
            .field("storage", &self.shared.storage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn rejects_short_host_buffers() {
        let desc = FrameDescriptor::new(4, 2, PixelFormat::Bgra8).with_stride(20);
        let err = VideoFrameBuffer::from_host(desc, vec![0u8; 35]).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferTooSmall {
                len: 35,
                required: 36
            }
        );
        assert!(VideoFrameBuffer::from_host(desc, vec![0u8; 36]).is_ok());
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let zero = FrameDescriptor::new(0, 4, PixelFormat::Rgba8);
        assert!(matches!(
            VideoFrameBuffer::from_host(zero, Vec::new()),
            Err(FrameError::ZeroSize { .. })
        ));

        let narrow = FrameDescriptor::new(4, 4, PixelFormat::Rgba8).with_stride(8);
        assert_eq!(
            VideoFrameBuffer::from_host(narrow, vec![0u8; 64]).unwrap_err(),
            FrameError::StrideTooSmall { stride: 8, min: 16 }
        );
    }

    #[test]
    fn oversized_geometry_is_an_error_not_a_panic() {
        let wide = FrameDescriptor::new(1 << 30, 1, PixelFormat::Bgra8);
        assert_eq!(
            VideoFrameBuffer::from_host(wide, vec![0u8; 4]).unwrap_err(),
            FrameError::TooLarge {
                width: 1 << 30,
                height: 1
            }
        );
        assert!(matches!(
            VideoFrameBuffer::from_shared(wide, Arc::new(FakeSurface)),
            Err(FrameError::TooLarge { .. })
        ));
        assert_eq!(wide.row_bytes(), u32::MAX);
        assert_eq!(wide.required_len(), None);
    }

    #[test]
    fn every_buffer_gets_a_fresh_identity() {
        let desc = FrameDescriptor::new(1, 1, PixelFormat::Bgra8);
        let a = VideoFrameBuffer::from_host(desc, vec![0u8; 4]).unwrap();
        let b = VideoFrameBuffer::from_host(desc, vec![0u8; 4]).unwrap();
        assert_ne!(a.id(), b.id());

        let a2 = a.clone();
        assert_eq!(a.id(), a2.id());
        assert!(a.same_instance(&a2));
        assert!(!a.same_instance(&b));
    }

    #[test]
    fn release_hook_runs_after_last_reference() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let desc = FrameDescriptor::new(2, 2, PixelFormat::Bgra8);
        let frame = VideoFrameBuffer::from_host_with_release(desc, vec![0u8; 16], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let held_by_presenter = frame.clone();
        assert_eq!(frame.ref_count(), 2);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(held_by_presenter);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_frame_releases_immediately() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let desc = FrameDescriptor::new(2, 2, PixelFormat::Bgra8);
        let err = VideoFrameBuffer::from_host_with_release(desc, vec![0u8; 8], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
        assert!(matches!(err, FrameError::BufferTooSmall { .. }));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    struct FakeSurface;

    impl SharedImage for FakeSurface {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn shared_storage_is_downcastable() {
        let desc = FrameDescriptor::new(8, 8, PixelFormat::Bgra8);
        let frame = VideoFrameBuffer::from_shared(desc, Arc::new(FakeSurface)).unwrap();
        assert!(frame.host_bytes().is_none());
        let image = frame.shared_image().expect("shared storage");
        assert!(image.as_any().downcast_ref::<FakeSurface>().is_some());
    }
}
