//! Interactive CLI for submitting, resuming, and inspecting discovery runs.

use clap::{Parser, Subcommand};
use colored::Colorize;
use discovery_core::config::RunConfig;
use discovery_core::market::HttpMarketDataClient;
use discovery_core::orchestrate::runner;
use discovery_core::orchestrate::store::{RunStatus, RunStore};
use discovery_core::orchestrate::telemetry::TelemetryBus;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(author, version, about = "numerical discovery core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite run store path
    #[arg(long, global = true, default_value = "runs.db")]
    store: String,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new discovery run from a JSON config file
    Run {
        #[arg(required = true)]
        config_path: String,
        #[arg(long, default_value = "runs")]
        runs_root: String,
    },
    /// Resume a failed or canceled run
    Resume {
        #[arg(required = true)]
        run_id: String,
    },
    /// Show the status of a run
    Status {
        #[arg(required = true)]
        run_id: String,
    },
}

#[tokio::main]
async fn main() {
    discovery_core::init_logging();
    let cli = Cli::parse();
    let store = match RunStore::open(&cli.store) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            eprintln!("{} {e}", "failed to open run store:".red());
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Run { config_path, runs_root } => cmd_run(&config_path, &runs_root, store).await,
        Command::Resume { run_id } => cmd_resume(&run_id, &store.lock().expect("run store lock poisoned")),
        Command::Status { run_id } => cmd_status(&run_id, &store.lock().expect("run store lock poisoned")),
    }
}

async fn cmd_run(config_path: &str, runs_root: &str, store: Arc<Mutex<RunStore>>) {
    let text = match std::fs::read_to_string(config_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{} {e}", "failed to read config:".red());
            std::process::exit(1);
        }
    };
    let config: RunConfig = match serde_json::from_str(&text) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {e}", "invalid config json:".red());
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{} {e}", "config rejected:".red());
        std::process::exit(1);
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!("submit run with budget_minutes={}?", config.budget_minutes))
        .default(true)
        .interact()
        .unwrap_or(true);
    if !confirmed {
        println!("{}", "aborted".yellow());
        return;
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let config_hash = u64::from_str_radix(&config.config_hash(), 16).unwrap_or(0);
    store
        .lock()
        .expect("run store lock poisoned")
        .upsert_run(&run_id, RunStatus::Running, "init", 0.0, &text, config_hash, None)
        .expect("run store write");

    let market = Arc::new(HttpMarketDataClient::new("https://api.binance.com", 3));
    let cancel = Arc::new(AtomicBool::new(false));
    let log = Arc::new(runner::StageLog::with_store(store.clone(), &run_id));
    let telemetry = Arc::new(TelemetryBus::new());

    println!("{} {}", "run".green().bold(), run_id);
    match runner::run(&run_id, &config, market, runs_root, cancel, log, telemetry, store.clone()).await {
        Ok(scorecards) => {
            store
                .lock()
                .expect("run store lock poisoned")
                .upsert_run(&run_id, RunStatus::Completed, "done", 1.0, &text, 0, None)
                .ok();
            println!("{} {} scorecards", "completed with".green(), scorecards.len());
        }
        Err(e) => {
            store
                .lock()
                .expect("run store lock poisoned")
                .upsert_run(&run_id, RunStatus::Failed, "failed", 0.0, &text, 0, Some(&e.to_string()))
                .ok();
            eprintln!("{} {e}", "run failed:".red());
        }
    }
}

fn cmd_resume(run_id: &str, store: &RunStore) {
    match store.resume(run_id) {
        Ok(()) => println!("{} {run_id}", "resumed".green()),
        Err(e) => eprintln!("{} {e}", "resume failed:".red()),
    }
}

fn cmd_status(run_id: &str, store: &RunStore) {
    match store.run_status(run_id) {
        Ok(Some(status)) => println!("{run_id}: {status:?}"),
        Ok(None) => println!("{}", "no such run".yellow()),
        Err(e) => eprintln!("{} {e}", "status query failed:".red()),
    }
}
