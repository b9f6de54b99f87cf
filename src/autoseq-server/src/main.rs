// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod listener;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use autoseq_app::init_logging;
use autoseq_core::controller::{AutomationController, BoundedRecovery, CycleLimit};
use autoseq_core::{AutomationState, DynResult};
use autoseq_fetch::{FetchDataUpdateStep, JsonFetcher};

use config::ServerConfig;
use listener::JsonEventWriter;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - automation sequencer daemon");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
    /// Fetch DataUpdate input from this URL
    #[arg(short = 'u', long = "data-url")]
    data_url: Option<String>,
    /// Stop after this many completed cycles (0 = unlimited)
    #[arg(short = 'n', long = "max-cycles")]
    max_cycles: Option<u64>,
    /// Print automation events as JSON lines on stdout
    #[arg(long = "json-events")]
    json_events: bool,
}

/// Overlay command-line arguments on top of the file configuration.
fn apply_cli(cli: &Cli, cfg: &mut ServerConfig) {
    if let Some(level) = &cli.log_level {
        cfg.general.log_level = Some(level.clone());
    }
    if let Some(url) = &cli.data_url {
        cfg.data.enabled = true;
        cfg.data.url = Some(url.clone());
    }
    if let Some(max_cycles) = cli.max_cycles {
        cfg.run.max_cycles = max_cycles;
    }
    if cli.json_events {
        cfg.general.json_events = true;
    }
}

fn build_controller(cfg: &ServerConfig) -> DynResult<AutomationController> {
    let policy = CycleLimit::wrap(
        BoundedRecovery::new(cfg.recovery.max_attempts),
        cfg.run.max_cycles,
    );
    let mut builder = AutomationController::builder()
        .timings(cfg.timings.to_stage_timings())
        .policy(policy);

    if cfg.data.enabled {
        let url = cfg
            .data
            .url
            .clone()
            .ok_or("[data].url must be set when data is enabled")?;
        let fetcher = JsonFetcher::new(Duration::from_millis(cfg.data.timeout_ms))?;
        let step = FetchDataUpdateStep::<Value>::new(fetcher, url);
        tokio::spawn(log_data_updates(step.subscribe()));
        builder = builder.handler(AutomationState::DataUpdate, step);
    }

    Ok(builder.build())
}

async fn log_data_updates(mut rx: watch::Receiver<Option<Value>>) {
    while rx.changed().await.is_ok() {
        if let Some(value) = rx.borrow_and_update().as_ref() {
            debug!("Fetched data: {}", value);
        }
    }
}

/// Resolve when the run has ended on its own: the loop exited, or it
/// settled in a terminal state such as `Idle` after the last cycle.
async fn run_finished(
    controller: &AutomationController,
    mut state_rx: watch::Receiver<AutomationState>,
) {
    let settled = async {
        while state_rx.changed().await.is_ok() {
            if state_rx.borrow_and_update().is_terminal() {
                break;
            }
        }
    };
    tokio::select! {
        _ = controller.wait_stopped() => {}
        _ = settled => {}
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    apply_cli(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let controller = build_controller(&cfg)?;
    if cfg.general.json_events {
        controller.subscribe(Arc::new(JsonEventWriter::stdout()));
    }

    info!(
        "Starting autoseq-server (max cycles: {}, recoveries: {}, data: {})",
        cfg.run.max_cycles,
        cfg.recovery.max_attempts,
        cfg.data.url.as_deref().filter(|_| cfg.data.enabled).unwrap_or("simulated"),
    );

    if !cfg.run.auto_start {
        info!("Auto start disabled, waiting for Ctrl+C");
        signal::ctrl_c().await?;
        return Ok(());
    }

    let state_rx = controller.subscribe_state();
    controller.start();

    tokio::select! {
        _ = run_finished(&controller, state_rx) => {
            info!("Automation run finished");
        }
        res = signal::ctrl_c() => {
            res?;
            info!("Ctrl+C received, stopping automation");
            tokio::select! {
                _ = controller.stop() => {}
                res = signal::ctrl_c() => {
                    res?;
                    warn!("Second Ctrl+C received, emergency stop");
                    controller.emergency_stop();
                }
            }
        }
    }

    controller.shutdown().await;
    let final_state = controller.current_state();
    info!("Final state: {}", final_state);
    if final_state == AutomationState::Error {
        return Err("automation ended with a fault".into());
    }
    Ok(())
}
