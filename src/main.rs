use std::error::Error;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use slotwise::access::{Account, Requester};
use slotwise::config::Config;
use slotwise::engine::{Engine, SearchFilter};
use slotwise::model::{AppointmentDraft, Status};
use slotwise::notify::{self, LogSink, NotifyHub};
use slotwise::policy::DEFAULT_SLOT_MINUTES;
use slotwise::time::{parse_date, parse_datetime, parse_time, OperatingZone};
use slotwise::{observability, reaper, render};

const WAL_FILE: &str = "appointments.wal";

/// Appointment scheduling engine: book capacity-limited time slots and lay
/// them out on a calendar. Configuration comes from SLOTWISE_* variables.
#[derive(Parser)]
#[command(name = "slotwise", version = env!("CARGO_PKG_VERSION"), long_about = None)]
struct Cli {
    /// Role the command runs as
    #[arg(global = true, long, value_enum, default_value_t = RoleArg::Admin)]
    role: RoleArg,

    /// Account id of the requester (required for members)
    #[arg(global = true, long)]
    account: Option<Ulid>,

    /// Profile name used when a booking leaves the customer name blank
    #[arg(global = true, long = "account-name")]
    account_name: Option<String>,

    #[arg(global = true, long = "account-email")]
    account_email: Option<String>,

    #[arg(global = true, long = "account-phone")]
    account_phone: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Member,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder scheduler and WAL compactor until interrupted
    Serve,

    /// Bookable windows on a date (YYYY-MM-DD)
    Slots {
        date: String,
        /// Window length in minutes
        #[arg(long, default_value_t = DEFAULT_SLOT_MINUTES)]
        duration: u32,
    },

    /// Book an appointment (times as YYYY-MM-DD HH:MM or RFC 3339)
    Book {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[command(flatten)]
        contact: ContactArgs,
        /// Admin walk-in with no owning account
        #[arg(long = "walk-in")]
        walk_in: bool,
    },

    /// Change an appointment's time, contact details or notes
    Revise {
        id: Ulid,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[command(flatten)]
        contact: ContactArgs,
        #[arg(long)]
        status: Option<Status>,
    },

    /// Set status: confirmed, pending or cancelled
    Status { id: Ulid, status: Status },

    /// Delete an appointment
    Delete { id: Ulid },

    /// Show one appointment
    Show { id: Ulid },

    /// Calendar events from FROM up to and including TO (YYYY-MM-DD)
    Calendar { from: String, to: String },

    /// The requester's own bookings, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
    },

    /// Admin search across all bookings
    Search {
        #[arg(long)]
        date: Option<String>,
        /// Start time of day (HH:MM)
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

#[derive(clap::Args)]
struct ContactArgs {
    #[arg(long)]
    customer: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

impl ContactArgs {
    fn into_draft(self, zone: &OperatingZone, start: Option<String>, end: Option<String>) -> Result<AppointmentDraft, Box<dyn Error>> {
        Ok(AppointmentDraft {
            start: start.map(|s| parse_datetime(zone, &s)).transpose()?,
            end: end.map(|s| parse_datetime(zone, &s)).transpose()?,
            customer_name: self.customer,
            customer_email: self.email,
            customer_phone: self.phone,
            notes: self.notes,
            status: None,
        })
    }
}

impl Cli {
    fn requester(&self) -> Result<Requester, Box<dyn Error>> {
        let id = match (self.role, self.account) {
            (_, Some(id)) => id,
            (RoleArg::Admin, None) => Ulid::nil(),
            (RoleArg::Member, None) => return Err("--account is required for members".into()),
        };
        let account = Account {
            id,
            name: self.account_name.clone(),
            email: self.account_email.clone(),
            phone: self.account_phone.clone(),
        };
        Ok(match self.role {
            RoleArg::Admin => Requester::admin(account),
            RoleArg::Member => Requester::member(account),
        })
    }
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `[local midnight of from, local midnight after to)`.
fn date_range(zone: &OperatingZone, from: NaiveDate, to: NaiveDate) -> Result<(i64, i64), Box<dyn Error>> {
    let after = to.checked_add_days(Days::new(1)).ok_or("date out of range")?;
    let start = zone.midnight(from).ok_or("date out of range")?;
    let end = zone.midnight(after).ok_or("date out of range")?;
    Ok((start, end))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.data_dir.join(WAL_FILE),
        notify.clone(),
        config.policy.clone(),
    )?);
    let zone = config.policy.zone;
    let requester = cli.requester()?;
    let dispatcher = tokio::spawn(notify::run_dispatcher(notify.subscribe(), Arc::new(LogSink)));

    match cli.command {
        Commands::Serve => serve(engine.clone(), &config).await?,
        Commands::Slots { date, duration } => {
            let slots = engine.available_slots(parse_date(&date)?, duration).await?;
            print_json(&render::render_slots(&slots, &zone))?;
        }
        Commands::Book {
            start,
            end,
            contact,
            walk_in,
        } => {
            let draft = contact.into_draft(&zone, start, end)?;
            let booked = if walk_in {
                engine.book_walk_in(&requester, draft).await?
            } else {
                engine.book(&requester, draft).await?
            };
            print_json(&booked)?;
        }
        Commands::Revise {
            id,
            start,
            end,
            contact,
            status,
        } => {
            let mut changes = contact.into_draft(&zone, start, end)?;
            changes.status = status;
            print_json(&engine.revise(&requester, id, changes).await?)?;
        }
        Commands::Status { id, status } => {
            print_json(&engine.set_status(&requester, id, status).await?)?;
        }
        Commands::Delete { id } => print_json(&engine.delete(&requester, id).await?)?,
        Commands::Show { id } => print_json(&engine.get(&requester, id).await?)?,
        Commands::Calendar { from, to } => {
            let (from, to) = date_range(&zone, parse_date(&from)?, parse_date(&to)?)?;
            print_json(&engine.calendar(&requester, from, to).await?)?;
        }
        Commands::List { page } => print_json(&engine.list_for(&requester, page).await)?,
        Commands::Search {
            date,
            time,
            name,
            phone,
            email,
            page,
        } => {
            let filter = SearchFilter {
                date: date.as_deref().map(parse_date).transpose()?,
                time: time.as_deref().map(parse_time).transpose()?,
                name,
                phone,
                email,
            };
            print_json(&engine.search(&requester, &filter, page).await?)?;
        }
    }

    // The dispatcher stops once the last handle on the hub is gone, after
    // delivering what is already queued.
    drop(engine);
    drop(notify);
    if let Err(e) = dispatcher.await {
        tracing::warn!("notice dispatcher failed: {e}");
    }
    Ok(())
}

async fn serve(engine: Arc<Engine>, config: &Config) -> Result<(), Box<dyn Error>> {
    observability::init(config.metrics_port)?;

    info!("slotwise serving");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  appointments: {}", engine.len());
    info!("  reminder interval: {:?}", config.reminder_interval);
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reminders = tokio::spawn(reaper::run_reminders(engine.clone(), config.reminder_interval));
    let compactor = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_check_period,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    info!("shutdown signal received, stopping workers");

    reminders.abort();
    compactor.abort();
    // Aborted tasks release their engine handles once awaited.
    let _ = reminders.await;
    let _ = compactor.await;
    if engine.wal_appends_since_compact().await > 0
        && let Err(e) = engine.compact_wal().await
    {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("slotwise stopped");
    Ok(())
}
