use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast;

use dosekeeper_lib::{
    db::{Database, LogRecord, NewSchedule},
    health::HealthMonitor,
    load_progress,
    pipeline::{EventPipeline, CHANGE_FEED_CAPACITY},
    settings::SettingsStore,
    utils::logging,
};
#[cfg(feature = "ble")]
use dosekeeper_lib::{
    db::StoreChange, device::BtleplugLink, reminders::LocalNotifier, settings::CompanionSettings,
    Companion,
};
#[cfg(feature = "ble")]
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dosekeeper")]
#[command(about = "Dose logs, medication schedules and adherence for the tracker companion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a dose taken now (default)
    Log,

    /// List dose logs, newest first
    Logs,

    /// Add a medication schedule
    Schedule {
        /// Local time of day, HH:MM
        #[arg(long)]
        at: String,

        #[arg(long)]
        name: Option<String>,

        /// Remind every day instead of once
        #[arg(long)]
        daily: bool,
    },

    /// List schedules by time of day
    Schedules,

    /// Delete logs, schedules or both
    Clear {
        #[arg(value_enum)]
        what: ClearTarget,
    },

    /// Weekly and monthly adherence
    Adherence,

    /// Show or change companion settings
    Settings {
        /// Cancel a schedule's previous reminder when it is re-armed
        #[arg(long)]
        replace_existing: Option<bool>,

        /// Minutes either side of a dose time that still count as taken
        #[arg(long)]
        tolerance_minutes: Option<i64>,

        /// Stop confirming a delivered reminder after this many checks (0 = never)
        #[arg(long)]
        max_polls: Option<u32>,
    },

    /// Connect to the tracker and keep reminders running until Ctrl-C
    #[cfg(feature = "ble")]
    Run,
}

#[derive(Clone, Copy, ValueEnum)]
enum ClearTarget {
    Logs,
    Schedules,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| anyhow!("no data directory on this platform; pass --data-dir"))?
            .join("dosekeeper"),
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let db = Database::new(data_dir.join("dosekeeper.sqlite3"))?;

    match cli.command.unwrap_or(Commands::Log) {
        Commands::Log => cmd_log(db).await,
        Commands::Logs => cmd_logs(db).await,
        Commands::Schedule { at, name, daily } => cmd_schedule(db, &at, name, daily).await,
        Commands::Schedules => cmd_schedules(db).await,
        Commands::Clear { what } => cmd_clear(db, what).await,
        Commands::Adherence => {
            let tolerance = settings.get().adherence_tolerance();
            cmd_adherence(db, tolerance).await
        }
        Commands::Settings {
            replace_existing,
            tolerance_minutes,
            max_polls,
        } => cmd_settings(&settings, replace_existing, tolerance_minutes, max_polls),
        #[cfg(feature = "ble")]
        Commands::Run => cmd_run(db, settings.get()).await,
    }
}

fn format_log(log: &LogRecord) -> String {
    let when = DateTime::<Utc>::from_timestamp(log.timestamp, 0)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| log.timestamp.to_string());
    format!("{:>5}  {when}  {}", log.id, log.source.as_str())
}

async fn cmd_log(db: Database) -> Result<()> {
    let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
    let pipeline = EventPipeline::new(db, changes, HealthMonitor::new());
    pipeline
        .manual_log(Utc::now(), |record| {
            println!("Logged dose: {}", format_log(record));
        })
        .await?;
    Ok(())
}

async fn cmd_logs(db: Database) -> Result<()> {
    let logs = db.list_logs().await?;
    if logs.is_empty() {
        println!("No doses logged yet.");
    }
    for log in &logs {
        println!("{}", format_log(log));
    }
    Ok(())
}

async fn cmd_schedule(db: Database, at: &str, name: Option<String>, daily: bool) -> Result<()> {
    let time = NaiveTime::parse_from_str(at, "%H:%M")
        .with_context(|| format!("'{at}' is not a time of day (HH:MM)"))?;
    let local = Local
        .from_local_datetime(&Local::now().date_naive().and_time(time))
        .earliest()
        .ok_or_else(|| anyhow!("{at} does not exist today in the local time zone"))?;

    let schedule = NewSchedule {
        name,
        time: local.with_timezone(&Utc),
        repeats_daily: daily,
    };
    let id = db.insert_schedule(&schedule).await?;
    println!(
        "Saved schedule {id}: {} at {}{}",
        schedule.clone().with_id(id).display_name(),
        time.format("%H:%M"),
        if daily { " every day" } else { "" }
    );
    println!("The reminder is armed the next time the companion runs.");
    Ok(())
}

async fn cmd_schedules(db: Database) -> Result<()> {
    let schedules = db.list_schedules().await?;
    if schedules.is_empty() {
        println!("No schedules.");
    }
    for schedule in &schedules {
        println!(
            "{:>5}  {}  {:<20} {}",
            schedule.id,
            schedule.local_time_of_day().format("%H:%M"),
            schedule.display_name(),
            if schedule.repeats_daily { "daily" } else { "once" }
        );
    }
    Ok(())
}

async fn cmd_clear(db: Database, what: ClearTarget) -> Result<()> {
    if matches!(what, ClearTarget::Logs | ClearTarget::All) {
        let removed = db.delete_all_logs().await?;
        println!("Removed {removed} log(s).");
    }
    if matches!(what, ClearTarget::Schedules | ClearTarget::All) {
        let removed = db.delete_all_schedules().await?;
        println!("Removed {removed} schedule(s).");
    }
    Ok(())
}

async fn cmd_adherence(db: Database, tolerance: chrono::Duration) -> Result<()> {
    let progress = load_progress(&db, Local::now().date_naive(), tolerance).await?;
    println!(
        "Weekly:  {:>3}%  ({}/{})",
        progress.weekly.percent(),
        progress.weekly.taken,
        progress.weekly.scheduled
    );
    println!(
        "Monthly: {:>3}%  ({}/{})",
        progress.monthly.percent(),
        progress.monthly.taken,
        progress.monthly.scheduled
    );
    let series: Vec<String> = progress
        .series
        .iter()
        .map(|week| format!("{}%", week.percent()))
        .collect();
    println!("Last {} weeks: {}", series.len(), series.join(" "));
    Ok(())
}

fn cmd_settings(
    store: &SettingsStore,
    replace_existing: Option<bool>,
    tolerance_minutes: Option<i64>,
    max_polls: Option<u32>,
) -> Result<()> {
    let settings = if replace_existing.is_some() || tolerance_minutes.is_some() || max_polls.is_some() {
        store.update(|settings| {
            if let Some(replace) = replace_existing {
                settings.replace_existing = replace;
            }
            if let Some(minutes) = tolerance_minutes {
                settings.adherence_tolerance_minutes = minutes;
            }
            if let Some(max) = max_polls {
                settings.confirm_max_polls = (max > 0).then_some(max);
            }
        })?
    } else {
        store.get()
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[cfg(feature = "ble")]
async fn cmd_run(db: Database, settings: CompanionSettings) -> Result<()> {
    let (link, events) = BtleplugLink::open().await?;
    let companion = Companion::start(
        settings,
        db,
        link,
        events,
        Arc::new(LocalNotifier::default()),
    )
    .await;
    let mut state = companion.device().watch_state();
    let mut feed = companion.subscribe();
    println!(
        "Companion running with {} reminder(s); press Ctrl-C to stop.",
        companion.reminders().active_loops()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("Tracker: {}", state.borrow().label());
            }
            change = feed.recv() => {
                if let Ok(StoreChange::LogInserted(record)) = change {
                    println!("Logged dose: {}", format_log(&record));
                }
            }
        }
    }

    companion.shutdown().await;
    Ok(())
}
