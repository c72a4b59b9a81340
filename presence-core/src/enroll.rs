//! Enrollment form state: who is being enrolled and the face images that go
//! with them.

use image::ImageFormat;
use log::{debug, info};
use std::fs;
use std::path::Path;

use crate::api::AdminApi;
use crate::camera::{MediaCaptureSession, StreamHandle};
use crate::error::{CameraError, Error, Result};
use crate::sampler::{FrameSource, SampledFrame};

pub const DEFAULT_MAX_CAPTURES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentImage {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl EnrollmentImage {
    /// Read an image file verbatim. The MIME type comes from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let format = ImageFormat::from_path(path)
            .map_err(|_| Error::Validation(format!("{} is not a supported image file", path.display())))?;
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(Error::Validation(format!("{} is empty", path.display())));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());

        Ok(Self {
            file_name,
            mime: format.to_mime_type().to_string(),
            bytes,
        })
    }

    fn from_capture(frame: SampledFrame, index: usize) -> Self {
        Self {
            file_name: format!("capture_{}.jpg", index),
            mime: frame.mime.to_string(),
            bytes: frame.bytes,
        }
    }
}

/// A validated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub user_id: String,
    pub name: String,
    pub images: Vec<EnrollmentImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Upload,
    Camera,
}

pub struct EnrollmentForm {
    pub user_id: String,
    pub name: String,
    mode: CaptureMode,
    uploads: Vec<EnrollmentImage>,
    captures: Vec<EnrollmentImage>,
    max_captures: usize,
    jpeg_quality: u8,
    stream: Option<StreamHandle>,
}

impl EnrollmentForm {
    pub fn new(max_captures: usize, jpeg_quality: u8) -> Self {
        Self {
            user_id: String::new(),
            name: String::new(),
            mode: CaptureMode::Upload,
            uploads: Vec::new(),
            captures: Vec::new(),
            max_captures,
            jpeg_quality,
            stream: None,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn max_captures(&self) -> usize {
        self.max_captures
    }

    /// Images pending for the current mode.
    pub fn images(&self) -> &[EnrollmentImage] {
        match self.mode {
            CaptureMode::Upload => &self.uploads,
            CaptureMode::Camera => &self.captures,
        }
    }

    /// Switching drops the other mode's pending images; leaving camera mode
    /// also stops the camera.
    pub fn set_mode(&mut self, mode: CaptureMode) {
        if mode == self.mode {
            return;
        }
        match mode {
            CaptureMode::Upload => {
                self.stop_camera();
                self.captures.clear();
            }
            CaptureMode::Camera => {
                self.uploads.clear();
            }
        }
        debug!("Enrollment capture mode -> {:?}", mode);
        self.mode = mode;
    }

    /// Replace the upload selection with `paths`.
    pub fn select_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<usize> {
        if self.mode != CaptureMode::Upload {
            return Err(Error::Validation("Switch to upload mode to select files".to_string()));
        }
        let images = paths
            .iter()
            .map(|p| EnrollmentImage::from_path(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.uploads = images;
        Ok(self.uploads.len())
    }

    pub fn start_camera(&mut self, session: &MediaCaptureSession) -> Result<(), CameraError> {
        if self.mode != CaptureMode::Camera {
            self.set_mode(CaptureMode::Camera);
        }
        if self.is_capturing() {
            return Ok(());
        }
        self.stream = Some(session.start()?);
        Ok(())
    }

    pub fn stop_camera(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.stream.as_ref().is_some_and(StreamHandle::is_active)
    }

    /// Take one still from the running camera. Returns the number of
    /// captured images.
    pub fn capture(&mut self) -> Result<usize> {
        if self.captures.len() >= self.max_captures {
            return Err(Error::Validation(format!(
                "Capture limit of {} images reached",
                self.max_captures
            )));
        }
        let stream = self
            .stream
            .as_ref()
            .filter(|s| s.is_active())
            .ok_or_else(|| Error::Validation("Start the camera before capturing".to_string()))?;

        let frame = stream
            .sampler(self.jpeg_quality)
            .sample()?
            .ok_or_else(|| CameraError::Frame("camera is not ready yet".to_string()))?;

        let index = self.captures.len();
        self.captures.push(EnrollmentImage::from_capture(frame, index));
        debug!("Captured enrollment image {}/{}", index + 1, self.max_captures);
        Ok(self.captures.len())
    }

    pub fn validate(&self) -> Result<Enrollment> {
        let user_id = self.user_id.trim();
        let name = self.name.trim();
        if user_id.is_empty() || name.is_empty() {
            return Err(Error::Validation("Please fill in all fields".to_string()));
        }

        let images = self.images();
        if images.is_empty() {
            let hint = match self.mode {
                CaptureMode::Upload => "Please upload at least one image",
                CaptureMode::Camera => "Please capture at least one image",
            };
            return Err(Error::Validation(hint.to_string()));
        }

        Ok(Enrollment {
            user_id: user_id.to_string(),
            name: name.to_string(),
            images: images.to_vec(),
        })
    }

    /// Validate locally, then post. The form is cleared and the camera
    /// stopped only when the server accepts the enrollment.
    pub fn submit(&mut self, api: &impl AdminApi) -> Result<Enrollment> {
        let enrollment = self.validate()?;
        api.add_user(&enrollment)?;
        info!("Enrollment of {} accepted", enrollment.user_id);
        self.reset();
        Ok(enrollment)
    }

    pub fn reset(&mut self) {
        self.user_id.clear();
        self.name.clear();
        self.uploads.clear();
        self.captures.clear();
        self.stop_camera();
    }
}

impl Default for EnrollmentForm {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPTURES, 85)
    }
}
