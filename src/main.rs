//! compdeps CLI
//!
//! Administrative command-line interface for the dependency store:
//! - Create the store
//! - Inspect and edit the notification queue
//! - Query and maintain the dependency index
//! - Drain the queue with the updater

use anyhow::Context;
use clap::{Parser, Subcommand};
use compdeps::store::{depends, DependsTable};
use compdeps::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "compdeps")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Computation dependency index and change notification queue")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the store and its tables
    Init,

    /// Change notification queue
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },

    /// Dependency index
    Depends {
        #[command(subcommand)]
        action: DependsAction,
    },

    /// Process queued notifications
    Update {
        /// Rebuild the whole index first
        #[arg(long)]
        full: bool,
    },

    /// Print a default config file
    Config,
}

#[derive(Subcommand)]
pub enum NotifyAction {
    /// Queue an event
    Enqueue {
        /// Event type: ts-created, ts-deleted, ts-modified, comp-modified,
        /// group-modified, full-eval, ts-code-changed, or a one-letter code
        event: EventType,
        /// Target key (time series, computation or group id)
        key: i64,
    },
    /// Remove and print the oldest event
    Pop,
    /// Print every queued event without removing it
    List,
    /// Delete one event by record number
    Delete { record_id: i64 },
}

#[derive(Subcommand)]
pub enum DependsAction {
    /// Time series that trigger a computation
    Triggers { comp_id: i64 },
    /// Computations triggered by any of the given time series
    Affected {
        ts_keys: Vec<i64>,
        /// Only computations owned by this application
        #[arg(long)]
        app: Option<i64>,
    },
    /// Remove a deleted time series from the index and groups
    RemoveTs { ts_key: i64 },
    /// Print index rows
    List {
        /// Only rows for this computation
        #[arg(long)]
        comp: Option<i64>,
    },
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("compdeps={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);
    let json = config.format == "json";

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path))?;
            let writer = Arc::new(file);
            if json {
                registry.with(fmt::layer().json().with_writer(writer)).init();
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
        }
        None => {
            if json {
                registry
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            } else {
                registry.with(fmt::layer().with_writer(std::io::stderr)).init();
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_notifications(records: &[ChangeNotification], format: &str) -> anyhow::Result<()> {
    if format == "json" {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    println!("{:<10} {:<16} {:<12} {}", "Record", "Event", "Key", "Enqueued");
    println!("{}", "-".repeat(64));
    for r in records {
        println!(
            "{:<10} {:<16} {:<12} {}",
            r.record_id,
            r.event_type.to_string(),
            r.target_key,
            r.enqueued_at.format("%Y-%m-%d %H:%M:%S%.3f")
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", config::generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    let store = Arc::new(
        Store::from_config(&config.store)
            .with_context(|| format!("Cannot open store at {}", config.store.path))?,
    );
    let materializer = DependencyMaterializer::new(
        store.clone(),
        ReferenceCaches::new(&config.cache),
        Collaborators::standalone(store.clone()),
    );
    let queue = NotifyQueue::new(store.clone());

    match cli.command {
        Commands::Config => {}

        Commands::Init => {
            let active = store.read(|conn| depends::count(conn, DependsTable::Active))?;
            println!("Store ready at {}", config.store.resolved_path().display());
            println!("  Index rows: {}", active);
            println!("  Queued notifications: {}", queue.len()?);
        }

        Commands::Notify { action } => match action {
            NotifyAction::Enqueue { event, key } => {
                let record = queue.enqueue(event, key)?;
                if cli.format == "json" {
                    print_json(&record)?;
                } else {
                    println!("Enqueued {}", record);
                }
            }
            NotifyAction::Pop => match queue.dequeue_oldest()? {
                Some(record) if cli.format == "json" => print_json(&record)?,
                Some(record) => println!("{}", record),
                None => println!("Queue is empty."),
            },
            NotifyAction::List => print_notifications(&queue.peek_all()?, &cli.format)?,
            NotifyAction::Delete { record_id } => {
                if queue.delete_by_id(record_id)? {
                    println!("Deleted record {}", record_id);
                } else {
                    println!("No record {}", record_id);
                }
            }
        },

        Commands::Depends { action } => match action {
            DependsAction::Triggers { comp_id } => {
                let triggers = materializer.triggers_for(CompId(comp_id))?;
                if cli.format == "json" {
                    print_json(&triggers)?;
                } else if triggers.is_empty() {
                    println!("Computation {} has no triggers.", comp_id);
                } else {
                    for t in &triggers {
                        println!("{}", t);
                    }
                }
            }
            DependsAction::Affected { ts_keys, app } => {
                let keys: Vec<TsKey> = ts_keys.into_iter().map(TsKey).collect();
                let comps = materializer.computations_affected_by(&keys, app.map(AppId))?;
                if cli.format == "json" {
                    print_json(&comps)?;
                } else {
                    for comp_id in &comps {
                        println!("{}", comp_id);
                    }
                }
            }
            DependsAction::RemoveTs { ts_key } => {
                let report = materializer.remove_time_series(TsKey(ts_key))?;
                println!("Removed time series {}:", ts_key);
                println!("  Index rows: {}", report.index_rows);
                println!("  Group memberships: {}", report.memberships);
                if !report.disabled.is_empty() {
                    let ids: Vec<String> = report.disabled.iter().map(|c| c.to_string()).collect();
                    println!("  Disabled computations: {}", ids.join(", "));
                }
            }
            DependsAction::List { comp } => {
                let records = store.read(|conn| depends::all_records(conn, DependsTable::Active))?;
                let records: Vec<DependsRecord> = records
                    .into_iter()
                    .filter(|r| comp.map_or(true, |c| r.comp_id == CompId(c)))
                    .collect();
                if cli.format == "json" {
                    print_json(&records)?;
                } else {
                    println!("{:<12} {}", "Computation", "Time series");
                    println!("{}", "-".repeat(30));
                    for r in &records {
                        println!("{:<12} {}", r.comp_id, r.ts_key);
                    }
                }
            }
        },

        Commands::Update { full } => {
            let mut updater_config = config.updater.clone();
            updater_config.full_eval_on_startup |= full;

            let updater = DependsUpdater::new(materializer, queue, store.clone());
            let stats = updater.catch_up(&updater_config)?;
            if cli.format == "json" {
                print_json(&stats)?;
            } else {
                println!("Processed {} notification(s), {} failed", stats.done, stats.errors);
            }
        }
    }

    Ok(())
}
