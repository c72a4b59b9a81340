mod admin;
mod app;
mod kiosk;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use app::AppContext;

#[derive(Parser, Debug)]
#[command(name = "presence", version, about = "Face-recognition attendance kiosk and admin console")]
struct Args {
    /// Config file (default: ~/.config/presence/config.json, then /etc/presence/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the API base URL from the config file
    #[arg(long, global = true, env = "PRESENCE_API_URL")]
    api_url: Option<String>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the attendance kiosk until interrupted
    Kiosk,

    /// Store the admin token used by the admin commands
    Login {
        #[arg(long, env = "PRESENCE_ADMIN_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Forget the stored admin token
    Logout,

    /// Manage enrolled users
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Enroll a user from image files or camera captures
    Enroll {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        name: String,
        /// Face images to upload
        #[arg(long = "image", value_name = "PATH", required_unless_present = "camera", conflicts_with = "camera")]
        images: Vec<PathBuf>,
        /// Capture the images from the camera instead
        #[arg(long)]
        camera: bool,
        /// Number of camera captures
        #[arg(long, default_value_t = 5)]
        count: usize,
        /// Delay between camera captures in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Show attendance records for a date range
    Attendance {
        #[command(flatten)]
        filter: AttendanceFilter,
    },

    /// Export attendance records to CSV
    Export {
        #[command(flatten)]
        filter: AttendanceFilter,
        /// Directory the CSV file is written to
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// List detected cameras
    Cameras,
}

#[derive(Subcommand, Debug)]
enum UsersAction {
    /// List enrolled users
    List,
    /// Delete an enrolled user
    Delete {
        user_id: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(clap::Args, Debug)]
struct AttendanceFilter {
    /// First day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Only records whose user ID or name matches
    #[arg(long, default_value = "")]
    user: String,
}

impl AttendanceFilter {
    fn query(&self) -> presence_core::AttendanceQuery {
        let today = chrono::Utc::now().date_naive();
        presence_core::AttendanceQuery {
            from_date: self.from.unwrap_or(today).format("%Y-%m-%d").to_string(),
            to_date: self.to.unwrap_or(today).format("%Y-%m-%d").to_string(),
            user: self.user.clone(),
        }
    }
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let ctx = AppContext::load(args.config.as_deref(), args.api_url)?;

    match args.command {
        Command::Kiosk => kiosk::run(&ctx),
        Command::Login { token } => admin::cmd_login(&ctx, &token),
        Command::Logout => admin::cmd_logout(&ctx),
        Command::Users { action } => match action {
            UsersAction::List => admin::cmd_users_list(&ctx),
            UsersAction::Delete { user_id, yes } => admin::cmd_users_delete(&ctx, &user_id, yes),
        },
        Command::Enroll {
            user_id,
            name,
            images,
            camera,
            count,
            interval_ms,
        } => {
            let source = if camera {
                admin::EnrollSource::Camera { count, interval_ms }
            } else {
                admin::EnrollSource::Files(images)
            };
            admin::cmd_enroll(&ctx, &user_id, &name, source)
        }
        Command::Attendance { filter } => admin::cmd_attendance(&ctx, &filter.query()),
        Command::Export { filter, dir } => admin::cmd_export(&ctx, &filter.query(), &dir),
        Command::Cameras => admin::cmd_cameras(),
    }
}
