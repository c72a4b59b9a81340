//! Presence core library
//!
//! Camera capture, frame sampling, the periodic recognition loop and the
//! admin API client shared by the kiosk and the admin console.

pub mod api;
pub mod camera;
pub mod config;
pub mod enroll;
pub mod error;
mod multipart;
pub mod poller;
pub mod recognize;
pub mod report;
pub mod sampler;
pub mod status;
pub mod storage;

pub use api::{AdminApi, ApiClient, ApiConfig, AttendanceQuery, AttendanceRecord, AttendanceReport, User};
pub use camera::{CameraBackend, MediaCaptureSession, Resolution, StreamHandle};
pub use config::PresenceConfig;
pub use enroll::{CaptureMode, Enrollment, EnrollmentForm, EnrollmentImage};
pub use error::{CameraError, Error, Result};
pub use poller::{PollerHandle, RecognitionPoller};
pub use recognize::{RecognitionOutcome, Recognizer};
pub use sampler::{FrameSampler, FrameSource, SampledFrame};
pub use status::{CaptureStatus, CaptureStatusModel, StatusKind};
pub use storage::TokenStore;
