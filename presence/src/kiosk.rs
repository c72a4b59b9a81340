//! Attendance kiosk: live camera, periodic recognition and a status line
//! that clears itself.

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;

use presence_core::status::CAMERA_ACCESS_MESSAGE;
use presence_core::{CaptureStatus, CaptureStatusModel, MediaCaptureSession, RecognitionPoller, StatusKind};

use crate::app::AppContext;

pub fn run(ctx: &AppContext) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(kiosk(ctx))
}

async fn kiosk(ctx: &AppContext) -> Result<()> {
    let session = MediaCaptureSession::new(ctx.camera_backend(), ctx.kiosk_resolution());
    let status = Arc::new(CaptureStatusModel::new(ctx.config.status_expiry()));
    let mut updates = status.subscribe();

    println!("Presence attendance kiosk. Look at the camera. Ctrl+C to quit.");

    let mut stream = match session.start() {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Camera unavailable: {}", e);
            status.pin(StatusKind::Error, CAMERA_ACCESS_MESSAGE);
            None
        }
    };

    let mut poller = stream.as_ref().map(|stream| {
        let sink = Arc::clone(&status);
        RecognitionPoller::new(stream.sampler(ctx.config.camera.jpeg_quality), ctx.kiosk_client())
            .start(ctx.config.poll_interval(), move |outcome| sink.apply(&outcome))
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&updates.borrow_and_update());
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down kiosk");
    if let Some(poller) = poller.as_mut() {
        poller.stop();
    }
    status.teardown();
    if let Some(stream) = stream.as_mut() {
        stream.stop();
    }
    session.stop();
    Ok(())
}

fn render(status: &CaptureStatus) {
    match status.kind() {
        Some(StatusKind::Success) => println!("[ok]   {}", status.message()),
        Some(StatusKind::Info) => println!("[info] {}", status.message()),
        Some(StatusKind::Error) => println!("[err]  {}", status.message()),
        None => println!("[...]  Waiting for a face"),
    }
}
