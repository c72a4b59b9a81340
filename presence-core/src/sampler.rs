use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use log::debug;

use crate::camera::{lock_slot, RgbFrame, SharedSlot};
use crate::error::CameraError;

pub const JPEG_MIME: &str = "image/jpeg";

/// An encoded still taken from a live stream. Owns its bytes; holds no
/// reference back to the session it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledFrame {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

impl SampledFrame {
    pub fn jpeg(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            mime: JPEG_MIME,
            width,
            height,
        }
    }
}

/// Something the recognition poller can pull frames from.
pub trait FrameSource: Send + Sync + 'static {
    fn is_active(&self) -> bool;

    /// `Ok(None)` means the stream is not ready yet; the tick is skipped.
    fn sample(&self) -> Result<Option<SampledFrame>, CameraError>;
}

/// Takes stills from the stream a [`StreamHandle`](crate::camera::StreamHandle)
/// started. Once that stream is released every sample is `None`.
#[derive(Clone)]
pub struct FrameSampler {
    slot: SharedSlot,
    generation: u64,
    quality: u8,
}

impl FrameSampler {
    pub(crate) fn new(slot: SharedSlot, generation: u64, quality: u8) -> Self {
        Self {
            slot,
            generation,
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameSource for FrameSampler {
    fn is_active(&self) -> bool {
        let slot = lock_slot(&self.slot);
        slot.generation == self.generation && slot.stream.is_some()
    }

    fn sample(&self) -> Result<Option<SampledFrame>, CameraError> {
        // The slot stays locked through read and encode so two samples can
        // never interleave on the same stream.
        let mut slot = lock_slot(&self.slot);
        if slot.generation != self.generation {
            return Ok(None);
        }
        let Some(stream) = slot.stream.as_mut() else {
            return Ok(None);
        };

        let (width, height) = stream.natural_size();
        if width == 0 || height == 0 {
            debug!("Stream not ready, skipping sample");
            return Ok(None);
        }

        let frame = stream.read_frame()?;
        encode_jpeg(&frame, self.quality).map(Some)
    }
}

pub fn encode_jpeg(frame: &RgbFrame, quality: u8) -> Result<SampledFrame, CameraError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.width == 0 || frame.height == 0 || frame.rgb_data.len() != expected {
        return Err(CameraError::Frame(format!(
            "{}x{} frame carries {} bytes, expected {}",
            frame.width,
            frame.height,
            frame.rgb_data.len(),
            expected
        )));
    }

    let mut bytes = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .write_image(&frame.rgb_data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| CameraError::Encode(e.to_string()))?;

    Ok(SampledFrame::jpeg(bytes, frame.width, frame.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::FakeBackend;
    use crate::camera::{MediaCaptureSession, Resolution};
    use std::sync::Arc;

    #[test]
    fn samples_jpeg_at_natural_size() {
        let session = MediaCaptureSession::new(Arc::new(FakeBackend::new(32, 24)), Resolution::new(640, 480));
        let handle = session.start().unwrap();
        let sampler = handle.sampler(85);

        let frame = sampler.sample().unwrap().expect("stream is ready");
        assert_eq!(frame.mime, "image/jpeg");
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(&frame.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn zero_sized_stream_is_not_ready() {
        let session = MediaCaptureSession::new(Arc::new(FakeBackend::new(0, 0)), Resolution::new(640, 480));
        let handle = session.start().unwrap();
        assert!(handle.sampler(85).sample().unwrap().is_none());
    }

    #[test]
    fn released_stream_yields_nothing() {
        let session = MediaCaptureSession::new(Arc::new(FakeBackend::new(8, 8)), Resolution::new(640, 480));
        let mut handle = session.start().unwrap();
        let sampler = handle.sampler(85);
        handle.stop();

        assert!(!sampler.is_active());
        assert!(sampler.sample().unwrap().is_none());

        // A sampler from the old stream must not read the new one.
        let _next = session.start().unwrap();
        assert!(sampler.sample().unwrap().is_none());
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = RgbFrame {
            rgb_data: vec![0; 10],
            width: 4,
            height: 4,
        };
        assert!(matches!(encode_jpeg(&frame, 80), Err(CameraError::Frame(_))));
    }
}
