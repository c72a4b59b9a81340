//! Camera acquisition.
//!
//! A [`MediaCaptureSession`] binds at most one live stream to its sink. The
//! stream is owned by the [`StreamHandle`] returned from `start`, which
//! releases it on drop so every exit path of the owning view gives the
//! hardware back.

use log::{debug, info};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::CameraError;
use crate::sampler::FrameSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One decoded frame in packed RGB8 layout.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub rgb_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A live stream handed out by a [`CameraBackend`].
pub trait VideoStream: Send {
    /// Size of the frames the device is producing; `(0, 0)` until the first
    /// frame has arrived.
    fn natural_size(&self) -> (u32, u32);

    fn read_frame(&mut self) -> Result<RgbFrame, CameraError>;

    /// Stop every underlying track. Called exactly once by the session.
    fn release(&mut self);
}

pub trait CameraBackend: Send + Sync {
    fn acquire(&self, resolution: Resolution) -> Result<Box<dyn VideoStream>, CameraError>;
}

pub(crate) struct Slot {
    pub(crate) generation: u64,
    pub(crate) stream: Option<Box<dyn VideoStream>>,
}

pub(crate) type SharedSlot = Arc<Mutex<Slot>>;

pub(crate) fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Release the bound stream. With `generation` set, only the stream started
/// under that generation is released, so a stale handle cannot stop a newer
/// stream on the same sink.
fn release_slot(slot: &SharedSlot, generation: Option<u64>) -> bool {
    let mut slot = lock_slot(slot);
    if let Some(generation) = generation {
        if slot.generation != generation {
            return false;
        }
    }
    match slot.stream.take() {
        Some(mut stream) => {
            stream.release();
            info!("Camera stream {} released", slot.generation);
            true
        }
        None => false,
    }
}

pub struct MediaCaptureSession {
    backend: Arc<dyn CameraBackend>,
    resolution: Resolution,
    slot: SharedSlot,
}

impl MediaCaptureSession {
    pub fn new(backend: Arc<dyn CameraBackend>, resolution: Resolution) -> Self {
        Self {
            backend,
            resolution,
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                stream: None,
            })),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn start(&self) -> Result<StreamHandle, CameraError> {
        let mut slot = lock_slot(&self.slot);
        if slot.stream.is_some() {
            return Err(CameraError::AlreadyActive);
        }

        let stream = self.backend.acquire(self.resolution)?;
        slot.generation += 1;
        slot.stream = Some(stream);
        info!(
            "Camera stream {} started at {}x{}",
            slot.generation, self.resolution.width, self.resolution.height
        );

        Ok(StreamHandle {
            slot: Arc::clone(&self.slot),
            generation: slot.generation,
        })
    }

    /// Release whatever stream is bound. No-op when nothing is.
    pub fn stop(&self) {
        if !release_slot(&self.slot, None) {
            debug!("stop() on idle capture session");
        }
    }

    pub fn is_active(&self) -> bool {
        lock_slot(&self.slot).stream.is_some()
    }
}

impl Drop for MediaCaptureSession {
    fn drop(&mut self) {
        release_slot(&self.slot, None);
    }
}

/// Exclusive ownership of one started stream.
pub struct StreamHandle {
    slot: SharedSlot,
    generation: u64,
}

impl StreamHandle {
    pub fn is_active(&self) -> bool {
        let slot = lock_slot(&self.slot);
        slot.generation == self.generation && slot.stream.is_some()
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        release_slot(&self.slot, Some(self.generation));
    }

    pub fn sampler(&self, jpeg_quality: u8) -> FrameSampler {
        FrameSampler::new(Arc::clone(&self.slot), self.generation, jpeg_quality)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("generation", &self.generation)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Backend used when the binary was built without a camera driver.
pub struct UnavailableBackend;

impl CameraBackend for UnavailableBackend {
    fn acquire(&self, _resolution: Resolution) -> Result<Box<dyn VideoStream>, CameraError> {
        Err(CameraError::AccessDenied(
            "no camera driver compiled in (build with the `opencv` feature)".to_string(),
        ))
    }
}

/// The camera backend for `device_id` on this build.
pub fn default_backend(device_id: i32) -> Arc<dyn CameraBackend> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(v4l2::OpenCvBackend::new(device_id))
    }
    #[cfg(not(feature = "opencv"))]
    {
        debug!("Camera {} requested but no driver is compiled in", device_id);
        Arc::new(UnavailableBackend)
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: i32,
    pub device_path: String,
    pub name: String,
}

/// Enumerate V4L2 capture nodes, skipping the metadata nodes integrated
/// cameras expose next to the real one.
pub fn list_devices() -> Vec<DeviceInfo> {
    list_devices_in(Path::new("/sys/class/video4linux"))
}

fn list_devices_in(video_dir: &Path) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    let Ok(entries) = std::fs::read_dir(video_dir) else {
        return devices;
    };

    for entry in entries.flatten() {
        let node = entry.file_name().to_string_lossy().to_string();
        let Some(device_id) = node.strip_prefix("video").and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };

        if let Ok(index) = std::fs::read_to_string(entry.path().join("index")) {
            if index.trim() != "0" {
                debug!("Skipping {} (index {}), likely metadata device", node, index.trim());
                continue;
            }
        }

        let name = std::fs::read_to_string(entry.path().join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| format!("Camera {}", device_id));

        devices.push(DeviceInfo {
            device_id,
            device_path: format!("/dev/{}", node),
            name,
        });
    }

    devices.sort_by_key(|d| d.device_id);
    devices
}

#[cfg(feature = "opencv")]
mod v4l2 {
    use log::warn;
    use opencv::prelude::*;
    use opencv::videoio::{self, VideoCapture, CAP_V4L2};

    use super::{CameraBackend, Resolution, RgbFrame, VideoStream};
    use crate::error::CameraError;

    pub struct OpenCvBackend {
        device_id: i32,
    }

    impl OpenCvBackend {
        pub fn new(device_id: i32) -> Self {
            Self { device_id }
        }
    }

    impl CameraBackend for OpenCvBackend {
        fn acquire(&self, resolution: Resolution) -> Result<Box<dyn VideoStream>, CameraError> {
            let mut cap = VideoCapture::new(self.device_id, CAP_V4L2)
                .map_err(|e| CameraError::AccessDenied(format!("failed to open video{}: {}", self.device_id, e)))?;

            if !cap.is_opened().unwrap_or(false) {
                return Err(CameraError::AccessDenied(format!("video{} could not be opened", self.device_id)));
            }

            cap.set(videoio::CAP_PROP_FRAME_WIDTH, resolution.width as f64).ok();
            cap.set(videoio::CAP_PROP_FRAME_HEIGHT, resolution.height as f64).ok();

            Ok(Box::new(OpenCvStream { cap, released: false }))
        }
    }

    struct OpenCvStream {
        cap: VideoCapture,
        released: bool,
    }

    impl VideoStream for OpenCvStream {
        fn natural_size(&self) -> (u32, u32) {
            if self.released {
                return (0, 0);
            }
            let width = self.cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
            let height = self.cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
            (width.max(0.0) as u32, height.max(0.0) as u32)
        }

        fn read_frame(&mut self) -> Result<RgbFrame, CameraError> {
            let mut mat = opencv::core::Mat::default();
            self.cap
                .read(&mut mat)
                .map_err(|e| CameraError::Frame(e.to_string()))?;

            if mat.empty() {
                return Err(CameraError::Frame("empty frame".to_string()));
            }

            let mut rgb_mat = opencv::core::Mat::default();
            opencv::imgproc::cvt_color(&mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB, 0)
                .map_err(|e| CameraError::Frame(format!("color conversion failed: {}", e)))?;

            let width = rgb_mat.cols() as u32;
            let height = rgb_mat.rows() as u32;
            let rgb_data = rgb_mat
                .data_bytes()
                .map_err(|e| CameraError::Frame(e.to_string()))?
                .to_vec();

            Ok(RgbFrame { rgb_data, width, height })
        }

        fn release(&mut self) {
            if self.released {
                return;
            }
            self.released = true;
            if let Err(e) = self.cap.release() {
                warn!("Failed to release camera: {}", e);
            }
        }
    }

    impl Drop for OpenCvStream {
        fn drop(&mut self) {
            self.release();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake device producing a flat grey frame of a fixed size.
    pub struct FakeBackend {
        pub size: (u32, u32),
        pub deny: bool,
        pub acquired: Arc<AtomicUsize>,
        pub released: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                deny: false,
                acquired: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn denied() -> Self {
            Self { deny: true, ..Self::new(0, 0) }
        }
    }

    struct FakeStream {
        size: (u32, u32),
        released: Arc<AtomicUsize>,
    }

    impl VideoStream for FakeStream {
        fn natural_size(&self) -> (u32, u32) {
            self.size
        }

        fn read_frame(&mut self) -> Result<RgbFrame, CameraError> {
            let (width, height) = self.size;
            Ok(RgbFrame {
                rgb_data: vec![128; (width * height * 3) as usize],
                width,
                height,
            })
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraBackend for FakeBackend {
        fn acquire(&self, _resolution: Resolution) -> Result<Box<dyn VideoStream>, CameraError> {
            if self.deny {
                return Err(CameraError::AccessDenied("permission denied".to_string()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                size: self.size,
                released: Arc::clone(&self.released),
            }))
        }
    }
}
