//! Fixed-interval recognition loop.
//!
//! Ticks are serialised: a tick samples, uploads and reports before the next
//! one may start. Slots that pass while an upload is still pending collapse
//! into one late tick instead of queueing.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::recognize::{RecognitionOutcome, Recognizer};
use crate::sampler::{FrameSource, SampledFrame};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

/// Shorter intervals are raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct RecognitionPoller<S, R> {
    source: Arc<S>,
    recognizer: Arc<R>,
}

impl<S: FrameSource, R: Recognizer> RecognitionPoller<S, R> {
    pub fn new(source: S, recognizer: R) -> Self {
        Self {
            source: Arc::new(source),
            recognizer: Arc::new(recognizer),
        }
    }

    /// Start polling on the current Tokio runtime. The first tick fires one
    /// `interval` after the call.
    pub fn start<F>(&self, interval: Duration, on_outcome: F) -> PollerHandle
    where
        F: FnMut(RecognitionOutcome) + Send + 'static,
    {
        let interval = clamp_interval(interval);
        let gate = Arc::new(Mutex::new(true));
        let ticks = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run(
            Arc::clone(&self.source),
            Arc::clone(&self.recognizer),
            interval,
            Arc::clone(&gate),
            Arc::clone(&ticks),
            on_outcome,
        ));
        info!("Recognition poller started ({} ms interval)", interval.as_millis());

        PollerHandle {
            gate,
            ticks,
            task: Some(task),
        }
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        warn!(
            "Poll interval of {} ms raised to {} ms",
            interval.as_millis(),
            MIN_INTERVAL.as_millis()
        );
        return MIN_INTERVAL;
    }
    interval
}

async fn run<S, R, F>(
    source: Arc<S>,
    recognizer: Arc<R>,
    interval: Duration,
    gate: Arc<Mutex<bool>>,
    ticks: Arc<AtomicU64>,
    mut on_outcome: F,
) where
    S: FrameSource,
    R: Recognizer,
    F: FnMut(RecognitionOutcome) + Send + 'static,
{
    let mut schedule = tokio::time::interval_at(Instant::now() + interval, interval);
    schedule.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        schedule.tick().await;
        let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let Some(outcome) = poll_once(&source, &*recognizer, tick).await else {
            continue;
        };

        // The gate is held while the callback runs, so once stop() has
        // closed it no callback can be mid-flight or start later.
        let open = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            debug!("Tick {}: poller stopped, discarding {:?}", tick, outcome);
            return;
        }
        on_outcome(outcome);
    }
}

/// Sample then upload. `None` when the tick had nothing to send.
async fn poll_once<S: FrameSource, R: Recognizer>(
    source: &Arc<S>,
    recognizer: &R,
    tick: u64,
) -> Option<RecognitionOutcome> {
    if !source.is_active() {
        debug!("Tick {}: capture session inactive", tick);
        return None;
    }

    let frame = sample_off_thread(Arc::clone(source), tick).await?;
    debug!("Tick {}: uploading {} byte frame", tick, frame.bytes.len());
    Some(recognizer.recognize(frame).await)
}

/// Camera read and JPEG encode block, so they run on the blocking pool.
async fn sample_off_thread<S: FrameSource>(source: Arc<S>, tick: u64) -> Option<SampledFrame> {
    match tokio::task::spawn_blocking(move || source.sample()).await {
        Ok(Ok(Some(frame))) => Some(frame),
        Ok(Ok(None)) => {
            debug!("Tick {}: stream not ready", tick);
            None
        }
        Ok(Err(e)) => {
            warn!("Tick {}: sampling failed: {}", tick, e);
            None
        }
        Err(e) => {
            warn!("Tick {}: sampling task failed: {}", tick, e);
            None
        }
    }
}

/// Cancels the poll loop on [`stop`](PollerHandle::stop) or drop.
pub struct PollerHandle {
    gate: Arc<Mutex<bool>>,
    ticks: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// After this returns the outcome callback never runs again. Must not
    /// be called from inside that callback.
    pub fn stop(&mut self) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = false;
        if let Some(task) = self.task.take() {
            task.abort();
            info!(
                "Recognition poller stopped after {} tick(s)",
                self.ticks.load(Ordering::Relaxed)
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
