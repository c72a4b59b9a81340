use log::{debug, warn};
use serde::Deserialize;
use std::future::Future;

use crate::sampler::SampledFrame;

/// Categorised result of submitting one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Matched(String),
    UnknownUser,
    AlreadyMarked,
    /// Network failure, unreadable body, or a response of an unexpected
    /// shape.
    TransportError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecognizeResponse {
    success: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub const ALREADY_MARKED: &str = "already_marked";

impl RecognitionOutcome {
    /// Classify a raw response body from the recognition endpoint.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<RecognizeResponse>(body) {
            Ok(response) => Self::from_response(response),
            Err(e) => {
                warn!("Unreadable recognition response: {}", e);
                RecognitionOutcome::TransportError
            }
        }
    }

    pub(crate) fn from_response(response: RecognizeResponse) -> Self {
        match response {
            RecognizeResponse {
                success: true,
                name: Some(name),
                ..
            } if !name.trim().is_empty() => RecognitionOutcome::Matched(name),
            RecognizeResponse { success: true, .. } => {
                warn!("Recognition succeeded without a name");
                RecognitionOutcome::TransportError
            }
            RecognizeResponse {
                success: false,
                error: Some(error),
                ..
            } if error == ALREADY_MARKED => RecognitionOutcome::AlreadyMarked,
            RecognizeResponse { success: false, error, .. } => {
                debug!("Recognition rejected: {:?}", error);
                RecognitionOutcome::UnknownUser
            }
        }
    }
}

/// Submits a frame to the recognition service.
pub trait Recognizer: Send + Sync + 'static {
    /// Never fails: every failure mode is folded into
    /// [`RecognitionOutcome::TransportError`].
    fn recognize(&self, frame: SampledFrame) -> impl Future<Output = RecognitionOutcome> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_carries_name() {
        assert_eq!(
            RecognitionOutcome::from_body(r#"{"success": true, "name": "Alice"}"#),
            RecognitionOutcome::Matched("Alice".to_string())
        );
    }

    #[test]
    fn already_marked_is_distinguished() {
        assert_eq!(
            RecognitionOutcome::from_body(r#"{"success": false, "error": "already_marked"}"#),
            RecognitionOutcome::AlreadyMarked
        );
    }

    #[test]
    fn other_failures_are_unknown_user() {
        assert_eq!(
            RecognitionOutcome::from_body(r#"{"success": false}"#),
            RecognitionOutcome::UnknownUser
        );
        assert_eq!(
            RecognitionOutcome::from_body(r#"{"success": false, "error": "no_face"}"#),
            RecognitionOutcome::UnknownUser
        );
    }

    #[test]
    fn unexpected_shapes_are_transport_errors() {
        for body in [
            "",
            "<html>502 Bad Gateway</html>",
            r#"{"name": "Alice"}"#,
            r#"{"success": true}"#,
            r#"{"success": true, "name": ""}"#,
            r#"{"success": "yes"}"#,
        ] {
            assert_eq!(RecognitionOutcome::from_body(body), RecognitionOutcome::TransportError, "{}", body);
        }
    }
}
