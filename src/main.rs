//! # AllAboutMe: Automation Scheduler
//!
//! Plans the day's video slots, walks them through script → video → publish,
//! and forwards automation errors to the operator.
//!
//! Usage:
//!   allaboutme run                      # Start the three triggers until Ctrl-C
//!   allaboutme schedule create          # Create today's slots now
//!   allaboutme dispatch                 # One dispatch tick
//!   allaboutme logs --level ERROR       # Recent automation log entries
//!   allaboutme enable | disable | status

mod dry_run;

use std::path::PathBuf;
use std::sync::Arc;

use allaboutme_core::AllAboutMeConfig;
use allaboutme_scheduler::notify::channel_from_config;
use allaboutme_scheduler::{
    AutomationDb, AutomationEngine, Clock, LogLevel, SystemClock, TriggerOutcome, WorkRequest,
    WorkerRuntime, work_channel,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use crate::dry_run::DryRun;

#[derive(Parser)]
#[command(
    name = "allaboutme",
    version,
    about = "🎬 AllAboutMe: short-video automation scheduler"
)]
struct Cli {
    /// Config file (default: ~/.allaboutme/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daily, dispatch and notify triggers until Ctrl-C
    Run,
    /// Daily schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Advance every due post by one stage
    Dispatch,
    /// Send pending error notifications
    NotifyErrors,
    /// Show automation log entries, newest first
    Logs {
        /// INFO, WARNING or ERROR
        #[arg(long)]
        level: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Show whether automation is on and today's progress
    Status,
    /// Turn automation on (creates today's schedule if missing)
    Enable,
    /// Turn automation off
    Disable,
    /// Read or write a setting
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create today's slots
    Create,
    /// List every slot
    List,
}

#[derive(Subcommand)]
enum SettingsAction {
    Get { key: String },
    Set { key: String, value: String },
}

/// Everything a command needs, wired the same way as `run`.
struct App {
    engine: Arc<AutomationEngine>,
    runtime: Arc<WorkerRuntime>,
    work_rx: mpsc::UnboundedReceiver<WorkRequest>,
    clock: Arc<dyn Clock>,
    json: bool,
}

impl App {
    fn build(config: &AllAboutMeConfig, json: bool) -> Result<Self> {
        let db_path = config.database_path();
        let db = Arc::new(
            AutomationDb::open(&db_path)
                .with_context(|| format!("opening database {}", db_path.display()))?,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (queue, work_rx) = work_channel();
        let collaborators = Arc::new(DryRun::new());
        let runtime = Arc::new(WorkerRuntime::new(
            db.clone(),
            clock.clone(),
            collaborators.clone(),
            collaborators.clone(),
            collaborators,
        ));
        let engine = Arc::new(AutomationEngine::new(
            db,
            clock.clone(),
            Arc::new(queue),
            channel_from_config(&config.notify),
            config,
        )?);
        Ok(Self {
            engine,
            runtime,
            work_rx,
            clock,
            json,
        })
    }

    fn print<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }

    /// Execute whatever a one-shot dispatch queued, in order.
    async fn drain_work(&mut self) {
        while let Ok(request) = self.work_rx.try_recv() {
            let _ = self.runtime.execute(request).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "allaboutme=debug,allaboutme_scheduler=debug,allaboutme_core=debug"
    } else {
        "allaboutme=info,allaboutme_scheduler=info,allaboutme_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => AllAboutMeConfig::load_from(path)?,
        None => AllAboutMeConfig::load()?,
    };
    let mut app = App::build(&config, cli.json)?;

    match cli.command {
        Command::Run => run(app).await?,
        Command::Schedule { action: ScheduleAction::Create } => {
            match app.engine.create_schedule().await? {
                TriggerOutcome::Ran(summary) => app.print(&summary, |s| {
                    println!("✅ Created {} posts", s.created);
                    println!("   First: {}", s.first.with_timezone(&app.engine.offset()));
                    println!("   Last:  {}", s.last.with_timezone(&app.engine.offset()));
                })?,
                _ => println!("⏭️ Schedule generation already running"),
            }
        }
        Command::Schedule { action: ScheduleAction::List } => {
            let posts = app.engine.db().list_posts()?;
            app.print(&posts, |posts| {
                if posts.is_empty() {
                    println!("No scheduled posts.");
                }
                for p in posts {
                    println!(
                        "#{:<5} {}  {:<17} script={:<6} video={:<6}{}",
                        p.id,
                        p.scheduled_time.with_timezone(&app.engine.offset()).format("%Y-%m-%d %H:%M"),
                        p.status.as_str(),
                        p.script_ref.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                        p.video_ref.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                        p.error_message
                            .as_deref()
                            .map(|e| format!("  ⚠️ {e}"))
                            .unwrap_or_default(),
                    );
                }
            })?;
        }
        Command::Dispatch => {
            if let TriggerOutcome::Ran(report) = app.engine.dispatch().await? {
                app.drain_work().await;
                app.print(&report, |r| {
                    println!(
                        "📬 {} processed, {} advanced, {} failed",
                        r.processed, r.advanced, r.failed
                    );
                })?;
            }
        }
        Command::NotifyErrors => {
            if let TriggerOutcome::Ran(report) = app.engine.run_notify().await? {
                app.print(&report, |r| match &r.error {
                    Some(e) => println!("⚠️ Delivery failed, will retry: {e}"),
                    None => println!("📨 {} error(s) notified", r.notified),
                })?;
            }
        }
        Command::Logs { level, limit } => {
            let level = match level.as_deref() {
                Some(raw) => match LogLevel::parse(raw) {
                    Some(l) => Some(l),
                    None => bail!("Unknown log level '{raw}' (use INFO, WARNING or ERROR)"),
                },
                None => None,
            };
            let logs = app.engine.db().recent_logs(limit, level)?;
            app.print(&logs, |logs| {
                for log in logs {
                    let mark = if log.notified { "✓" } else { " " };
                    println!(
                        "{} [{:<7}] {} {}",
                        log.created_at.with_timezone(&app.engine.offset()).format("%Y-%m-%d %H:%M:%S"),
                        log.level.as_str(),
                        mark,
                        log.message
                    );
                    if let Some(details) = &log.details {
                        println!("      {details}");
                    }
                }
            })?;
        }
        Command::Status => {
            let status = app.engine.status()?;
            app.print(&status, |s| {
                println!(
                    "Automation: {}",
                    if s.enabled { "🟢 active" } else { "⚪ inactive" }
                );
                println!("   Pending posts:   {}", s.pending_posts);
                println!("   Published today: {}", s.published_today);
            })?;
        }
        Command::Enable => {
            let created = app
                .engine
                .enable()
                .await
                .context("automation left disabled: today's schedule could not be created")?;
            println!("✅ Automation enabled");
            if let Some(summary) = created {
                println!("   Created today's schedule: {} posts", summary.created);
            }
        }
        Command::Disable => {
            app.engine.disable()?;
            println!("⏸️ Automation disabled");
        }
        Command::Settings { action: SettingsAction::Get { key } } => {
            match app.engine.db().get_setting(&key)? {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} is not set"),
            }
        }
        Command::Settings { action: SettingsAction::Set { key, value } } => {
            app.engine.db().set_setting(&key, &value, app.clock.now())?;
            println!("✅ {key} = {value}");
        }
    }

    Ok(())
}

async fn run(app: App) -> Result<()> {
    let App {
        engine,
        runtime,
        work_rx,
        ..
    } = app;

    println!("🎬 AllAboutMe v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   Automation: {}",
        if engine.automation_enabled()? { "🟢 active" } else { "⚪ inactive (run `allaboutme enable`)" }
    );
    println!();

    let worker = tokio::spawn(runtime.run(work_rx));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = engine.clone().spawn(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        handle.await?;
    }

    // Dropping the engine closes the work queue; the runtime exits after that.
    drop(engine);
    worker.await?;
    Ok(())
}
