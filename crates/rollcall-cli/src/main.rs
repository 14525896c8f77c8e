use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, student_id: i64, image: Vec<u8>) -> zbus::Result<String>;
    async fn mark_attendance(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn refresh_cache(&self) -> zbus::Result<String>;
    async fn add_student(&self, name: &str, class_name: &str) -> zbus::Result<i64>;
    async fn rename_student(&self, student_id: i64, name: &str) -> zbus::Result<bool>;
    async fn remove_student(&self, student_id: i64) -> zbus::Result<bool>;
    async fn list_students(&self, class_name: &str) -> zbus::Result<String>;
    async fn attendance_on(&self, date: &str, class_name: &str) -> zbus::Result<String>;
    async fn attendance_history(&self, class_name: &str) -> zbus::Result<String>;
    async fn insights(&self, class_name: &str) -> zbus::Result<String>;
    async fn low_attendance(&self, class_name: &str) -> zbus::Result<String>;
    async fn kiosk_start(&self, owner: &str) -> zbus::Result<String>;
    async fn kiosk_stop(&self) -> zbus::Result<bool>;
    async fn kiosk_status(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student
    AddStudent {
        name: String,
        /// Class the student belongs to (e.g. "7B")
        #[arg(short, long)]
        class: String,
    },
    /// Change a student's name
    RenameStudent { id: i64, name: String },
    /// Remove a student and their attendance history
    RemoveStudent { id: i64 },
    /// List registered students
    Students {
        #[arg(short, long)]
        class: Option<String>,
    },
    /// Enroll a face sample for a student from an image file
    Enroll { id: i64, image: PathBuf },
    /// Mark attendance from a captured image file
    Mark { image: PathBuf },
    /// Reload enrolled faces into the daemon's matching cache
    Refresh,
    /// Attendance for a day (YYYY-MM-DD, default today)
    Today {
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        class: Option<String>,
    },
    /// Attendance counts per day
    History {
        #[arg(short, long)]
        class: Option<String>,
    },
    /// Today's and this week's attendance summary
    Insights {
        #[arg(short, long)]
        class: Option<String>,
    },
    /// Students below the weekly attendance floor
    LowAttendance {
        #[arg(short, long)]
        class: Option<String>,
    },
    /// Kiosk session control
    Kiosk {
        #[command(subcommand)]
        action: KioskAction,
    },
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum KioskAction {
    /// Claim the kiosk for an operator
    Start { owner: String },
    /// Release the kiosk
    Stop,
    /// Show who holds the kiosk
    Status,
}

fn read_image(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

/// Re-indent a JSON reply for the terminal; non-JSON passes through.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;
    tracing::debug!(system = cli.system, "connected to rollcalld");

    let class = |c: Option<String>| c.unwrap_or_default();

    match cli.command {
        Commands::AddStudent { name, class } => {
            let id = proxy.add_student(&name, &class).await?;
            println!("Added {name} ({class}) as student {id}");
        }
        Commands::RenameStudent { id, name } => {
            if proxy.rename_student(id, &name).await? {
                println!("Student {id} is now {name}");
            } else {
                println!("No student with id {id}");
            }
        }
        Commands::RemoveStudent { id } => {
            if proxy.remove_student(id).await? {
                println!("Removed student {id}");
            } else {
                println!("No student with id {id}");
            }
        }
        Commands::Students { class: c } => {
            println!("{}", pretty(&proxy.list_students(&class(c)).await?));
        }
        Commands::Enroll { id, image } => {
            let reply = proxy.enroll(id, read_image(&image)?).await?;
            println!("{}", pretty(&reply));
        }
        Commands::Mark { image } => {
            let reply = proxy.mark_attendance(read_image(&image)?).await?;
            println!("{}", pretty(&reply));
        }
        Commands::Refresh => {
            println!("{}", pretty(&proxy.refresh_cache().await?));
        }
        Commands::Today { date, class: c } => {
            let reply = proxy
                .attendance_on(&date.unwrap_or_default(), &class(c))
                .await?;
            println!("{}", pretty(&reply));
        }
        Commands::History { class: c } => {
            println!("{}", pretty(&proxy.attendance_history(&class(c)).await?));
        }
        Commands::Insights { class: c } => {
            println!("{}", pretty(&proxy.insights(&class(c)).await?));
        }
        Commands::LowAttendance { class: c } => {
            println!("{}", pretty(&proxy.low_attendance(&class(c)).await?));
        }
        Commands::Kiosk { action } => match action {
            KioskAction::Start { owner } => {
                println!("{}", pretty(&proxy.kiosk_start(&owner).await?));
            }
            KioskAction::Stop => {
                if proxy.kiosk_stop().await? {
                    println!("Kiosk stopped");
                } else {
                    println!("Kiosk was not active");
                }
            }
            KioskAction::Status => {
                println!("{}", pretty(&proxy.kiosk_status().await?));
            }
        },
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?));
        }
    }

    Ok(())
}
