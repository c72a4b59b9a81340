//! Admin console commands.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use presence_core::camera;
use presence_core::{AdminApi, AttendanceQuery, CaptureMode, EnrollmentForm, MediaCaptureSession};

use crate::app::AppContext;

const MAX_CAPTURE_MISSES: usize = 10;

pub enum EnrollSource {
    Files(Vec<PathBuf>),
    Camera { count: usize, interval_ms: u64 },
}

pub fn cmd_login(ctx: &AppContext, token: &str) -> Result<()> {
    ctx.store.save_token(token).context("Failed to store the admin token")?;

    // Check the token against the server; keep it either way.
    match ctx.admin_client()?.list_users() {
        Ok(users) => println!("Logged in. {} user(s) enrolled.", users.len()),
        Err(e) => {
            warn!("Token stored but the server check failed: {}", e);
            println!("Token stored, but the server did not accept it yet: {}", e);
        }
    }
    Ok(())
}

pub fn cmd_logout(ctx: &AppContext) -> Result<()> {
    if ctx.store.clear_token().context("Failed to clear the admin token")? {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

pub fn cmd_users_list(ctx: &AppContext) -> Result<()> {
    let users = ctx.admin_client()?.list_users().context("Failed to fetch users")?;

    if users.is_empty() {
        println!("No users enrolled.");
        return Ok(());
    }

    println!("{:<20} NAME", "USER ID");
    for user in &users {
        println!("{:<20} {}", user.user_id, user.name);
    }
    println!("\n{} user(s)", users.len());
    Ok(())
}

pub fn cmd_users_delete(ctx: &AppContext, user_id: &str, yes: bool) -> Result<()> {
    let client = ctx.admin_client()?;

    if !yes && !confirm(&format!("Are you sure you want to delete {}?", user_id))? {
        println!("Cancelled.");
        return Ok(());
    }

    client
        .delete_user(user_id)
        .with_context(|| format!("Failed to delete user {}", user_id))?;
    println!("User {} deleted.", user_id);
    Ok(())
}

pub fn cmd_enroll(ctx: &AppContext, user_id: &str, name: &str, source: EnrollSource) -> Result<()> {
    let client = ctx.admin_client()?;
    let mut form = EnrollmentForm::new(ctx.config.enrollment.max_captures, ctx.config.camera.jpeg_quality);
    form.user_id = user_id.to_string();
    form.name = name.to_string();

    match source {
        EnrollSource::Files(paths) => {
            form.set_mode(CaptureMode::Upload);
            let added = form.select_files(paths.as_slice()).context("Failed to read enrollment images")?;
            info!("Selected {} image(s) for {}", added, user_id);
        }
        EnrollSource::Camera { count, interval_ms } => {
            let session = MediaCaptureSession::new(ctx.camera_backend(), ctx.enroll_resolution());
            form.start_camera(&session).context("Failed to start the camera")?;
            capture_series(&mut form, count, Duration::from_millis(interval_ms))?;
            form.stop_camera();
        }
    }

    let enrollment = form.submit(&client).context("Failed to add user")?;
    println!(
        "User {} ({}) enrolled with {} image(s).",
        enrollment.name,
        enrollment.user_id,
        enrollment.images.len()
    );
    Ok(())
}

fn capture_series(form: &mut EnrollmentForm, count: usize, interval: Duration) -> Result<()> {
    let target = count.min(form.max_captures());
    if target < count {
        warn!("Capping captures at {}", target);
    }

    println!("Look at the camera. Capturing {} image(s)...", target);
    let mut misses = 0;
    while form.images().len() < target {
        std::thread::sleep(interval);
        match form.capture() {
            Ok(total) => println!("  captured {}/{}", total, target),
            Err(presence_core::Error::Camera(e)) if misses < MAX_CAPTURE_MISSES => {
                misses += 1;
                warn!("Capture skipped: {}", e);
            }
            Err(e) => return Err(e).context("Capture failed"),
        }
    }
    Ok(())
}

pub fn cmd_attendance(ctx: &AppContext, query: &AttendanceQuery) -> Result<()> {
    let report = ctx
        .admin_client()?
        .attendance(query)
        .context("Failed to fetch attendance records")?;

    println!("Attendance {} to {}", query.from_date, query.to_date);
    if report.records.is_empty() {
        println!("No records.");
    } else {
        println!("{:<20} {:<24} {:<12} TIME", "USER ID", "NAME", "DATE");
        for record in &report.records {
            let (date, time) = presence_core::report::local_date_time(&record.timestamp, &chrono::Local);
            println!("{:<20} {:<24} {:<12} {}", record.user_id, record.name, date, time);
        }
    }
    println!("\nUnique attendees: {}", report.total_unique);
    Ok(())
}

pub fn cmd_export(ctx: &AppContext, query: &AttendanceQuery, dir: &Path) -> Result<()> {
    let report = ctx
        .admin_client()?
        .attendance(query)
        .context("Failed to fetch attendance records")?;

    let path = presence_core::report::export_csv(
        &report.records,
        &chrono::Local,
        &query.from_date,
        &query.to_date,
        dir,
    )
    .context("Failed to write CSV")?;
    println!("Exported {} record(s) to {}", report.records.len(), path.display());
    Ok(())
}

pub fn cmd_cameras() -> Result<()> {
    let devices = camera::list_devices();
    if devices.is_empty() {
        bail!("No cameras found");
    }
    for device in devices {
        println!("{:>3}  {:<14} {}", device.device_id, device.device_path, device.name);
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
