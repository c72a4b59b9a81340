use thiserror::Error;

/// Failures raised while acquiring or reading a camera stream.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Permission denied, no device present, or the device refused to open.
    #[error("camera access denied: {0}")]
    AccessDenied(String),
    #[error("a stream is already bound to this capture session")]
    AlreadyActive,
    #[error("failed to read frame: {0}")]
    Frame(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// Network failure, unexpected HTTP status, or a response body that is
    /// not the expected shape.
    #[error("transport error: {0}")]
    Transport(String),

    /// Input rejected locally before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// The server answered with a structured `success: false`.
    #[error("{0}")]
    Application(String),

    #[error("not logged in; run `presence login` first")]
    NotLoggedIn,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Transport(format!("invalid response: {}", e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
