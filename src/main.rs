//! Command-line host for a [`Station`].
//!
//! Every command prints JSON on stdout; logs go to stderr and are filtered
//! through `RUST_LOG` (default `info`).

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use serde::Serialize;
use station_config::Config;
use station_federation::{FeatureFilters, FeatureStatus, Station};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "station", version, about = "Federated view over every Conductor source on disk")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON by extension).
    #[arg(long, short, global = true, env = "STATION_CONFIG")]
    config: Option<PathBuf>,
    /// Directory to scan, replacing the configured scan paths. Repeatable.
    #[arg(long = "scan", global = true)]
    scan_paths: Vec<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sources under the scan paths without opening them.
    Discover,
    /// Aggregate counts across every valid source.
    Stats,
    /// Sync engine snapshot.
    State,
    /// Search memory names and contents.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List features.
    Features {
        /// Only this source alias.
        #[arg(long)]
        source: Option<String>,
        /// pending, in_progress, passed, failed or blocked.
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Mark a session completed.
    CompleteSession {
        /// Composite id, `alias:session-id`.
        id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Poll for changes and print each notification until Ctrl-C.
    Watch {
        /// Poll at the short live interval.
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Command failed");
            ExitCode::FAILURE
        },
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if !cli.scan_paths.is_empty() {
        config.scan_paths = cli.scan_paths.clone();
    }
    if config.scan_paths.is_empty() {
        config.scan_paths.push(std::env::current_dir().or_raise(|| ErrorKind::Config)?);
    }
    Ok(config)
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Output)?;
    println!("{json}");
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let station = Station::new();
    if matches!(cli.command, Command::Discover) {
        return execute(&station, &config, cli.command).await;
    }

    station.initialize(&config).await.or_raise(|| ErrorKind::Station)?;
    let outcome = execute(&station, &config, cli.command).await;
    station.shutdown().await;
    outcome
}

async fn execute(station: &Station, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Discover => {
            let found = station
                .discover(&config.scan_paths, &config.exclude_patterns, config.scan_depth)
                .await
                .or_raise(|| ErrorKind::Station)?;
            print(&found)
        },
        Command::Stats => print(&*station.stats().await.or_raise(|| ErrorKind::Station)?),
        Command::State => print(&station.sync_state()),
        Command::Search { query, limit } => {
            print(&*station.search_memories(&query, limit).await.or_raise(|| ErrorKind::Station)?)
        },
        Command::Features { source, status, limit } => {
            let status = match status {
                Some(status) => Some(
                    status
                        .parse::<FeatureStatus>()
                        .or_raise(|| ErrorKind::Usage(format!("unknown feature status `{status}`")))?,
                ),
                None => None,
            };
            let filters = FeatureFilters {
                source_alias: source,
                status,
                limit,
                ..Default::default()
            };
            print(&*station.features(&filters).await.or_raise(|| ErrorKind::Station)?)
        },
        Command::CompleteSession { id, notes } => {
            station.complete_session(&id, notes.as_deref()).await.or_raise(|| ErrorKind::Station)?;
            print(&serde_json::json!({ "completed": id }))
        },
        Command::Watch { live } => {
            station.set_live_mode(live).await.or_raise(|| ErrorKind::Station)?;
            let subscription = station.on_data_change(|changed| {
                match serde_json::to_string(&serde_json::json!({ "changed": changed })) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Could not encode change notification"),
                }
            });
            tracing::info!(sources = station.sources().len(), live, "Watching for changes, Ctrl-C to stop");
            let signal = tokio::signal::ctrl_c().await.or_raise(|| ErrorKind::Signal);
            subscription.unsubscribe();
            signal
        },
    }
}
