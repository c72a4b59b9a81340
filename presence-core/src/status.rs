//! Transient, self-expiring status shown under the camera preview.

use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::recognize::RecognitionOutcome;

pub const CAMERA_ACCESS_MESSAGE: &str = "Failed to access camera. Please check permissions.";
pub const ALREADY_MARKED_MESSAGE: &str = "Attendance already recorded.";
pub const UNKNOWN_USER_MESSAGE: &str = "Unknown User. Please contact Admin.";
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error. Please try again.";

pub const DEFAULT_EXPIRY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CaptureStatus {
    #[default]
    Empty,
    Showing { kind: StatusKind, message: String },
}

impl CaptureStatus {
    pub fn kind(&self) -> Option<StatusKind> {
        match self {
            CaptureStatus::Empty => None,
            CaptureStatus::Showing { kind, .. } => Some(*kind),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CaptureStatus::Empty => "",
            CaptureStatus::Showing { message, .. } => message,
        }
    }
}

/// Status line for a recognition outcome.
pub fn describe(outcome: &RecognitionOutcome) -> (StatusKind, String) {
    match outcome {
        RecognitionOutcome::Matched(name) => (StatusKind::Success, format!("Attendance Marked for {}!", name)),
        RecognitionOutcome::AlreadyMarked => (StatusKind::Info, ALREADY_MARKED_MESSAGE.to_string()),
        RecognitionOutcome::UnknownUser => (StatusKind::Error, UNKNOWN_USER_MESSAGE.to_string()),
        RecognitionOutcome::TransportError => (StatusKind::Error, CONNECTION_ERROR_MESSAGE.to_string()),
    }
}

struct Expiry {
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    torn_down: bool,
}

/// `Empty -> Showing` on every update, `Showing -> Empty` once the expiry
/// window passes without a newer update. A newer update cancels the pending
/// expiry, so at most one is ever armed.
pub struct CaptureStatusModel {
    tx: Arc<watch::Sender<CaptureStatus>>,
    expiry: Duration,
    state: Arc<Mutex<Expiry>>,
}

fn lock(state: &Mutex<Expiry>) -> MutexGuard<'_, Expiry> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CaptureStatusModel {
    pub fn new(expiry: Duration) -> Self {
        let (tx, _) = watch::channel(CaptureStatus::Empty);
        Self {
            tx: Arc::new(tx),
            expiry,
            state: Arc::new(Mutex::new(Expiry {
                epoch: 0,
                timer: None,
                torn_down: false,
            })),
        }
    }

    pub fn current(&self) -> CaptureStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.tx.subscribe()
    }

    pub fn apply(&self, outcome: &RecognitionOutcome) {
        let (kind, message) = describe(outcome);
        self.show(kind, message);
    }

    /// Show a status that clears itself after the expiry window.
    pub fn show(&self, kind: StatusKind, message: impl Into<String>) {
        self.set(kind, message.into(), true);
    }

    /// Show a status that stays until replaced or cleared.
    pub fn pin(&self, kind: StatusKind, message: impl Into<String>) {
        self.set(kind, message.into(), false);
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        if state.torn_down {
            return;
        }
        state.epoch += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.tx.send_replace(CaptureStatus::Empty);
    }

    fn set(&self, kind: StatusKind, message: String, expires: bool) {
        let mut state = lock(&self.state);
        if state.torn_down {
            debug!("Status update after teardown dropped: {}", message);
            return;
        }

        state.epoch += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.tx.send_replace(CaptureStatus::Showing { kind, message });

        if !expires {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; status will not expire");
            return;
        };

        let epoch = state.epoch;
        let expiry = self.expiry;
        let tx = Arc::clone(&self.tx);
        let shared = Arc::clone(&self.state);
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(expiry).await;
            let mut state = lock(&shared);
            if state.epoch == epoch && !state.torn_down {
                state.timer = None;
                tx.send_replace(CaptureStatus::Empty);
            }
        }));
    }

    /// Cancel any pending expiry and ignore all later updates.
    pub fn teardown(&self) {
        let mut state = lock(&self.state);
        state.torn_down = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl Default for CaptureStatusModel {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl Drop for CaptureStatusModel {
    fn drop(&mut self) {
        self.teardown();
    }
}
