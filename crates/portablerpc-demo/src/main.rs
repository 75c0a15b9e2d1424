//! # portablerpc-demo
//!
//! Two endpoints in one process: a "worker" that adds numbers and a "main"
//! side that waits for the worker to report `ready`, asks it to add two
//! operands and prints the answer.

#![deny(unsafe_code)]

mod worker;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use portablerpc::{Connection, RequestError, Transport};
use portablerpc_settings::{RpcSettings, TransportSettings};
use portablerpc_transport::{LinesTransport, MemoryTransport};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Extra time allowed past the configured ready delay.
const READY_GRACE: Duration = Duration::from_secs(5);

/// Byte-pipe buffer for the lines transport.
const PIPE_CAPACITY: usize = 64 * 1024;

/// portablerpc demo: a worker endpoint that adds two numbers.
#[derive(Parser, Debug)]
#[command(name = "portablerpc-demo", about = "portablerpc worker demo")]
struct Cli {
    /// Channel linking the two endpoints.
    #[arg(long, value_enum, default_value_t = TransportKind::Memory)]
    transport: TransportKind,

    /// Settings file (defaults to `~/.portablerpc/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, overriding settings (e.g. `debug`, `portablerpc=trace`).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Ask the worker to add two numbers.
    Add {
        /// First operand.
        a: String,
        /// Second operand.
        b: String,
    },
}

/// How the two endpoints are connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// Bounded in-process channels.
    Memory,
    /// Newline-delimited JSON over an in-process byte pipe.
    Lines,
}

#[derive(Deserialize, Debug, PartialEq, Eq)]
struct Sum {
    value: i64,
}

fn load_demo_settings(cli: &Cli) -> Result<RpcSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(portablerpc_settings::settings_path);
    let mut settings = portablerpc_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

/// Build both ends of the chosen channel: `(main side, worker side)`.
fn link(kind: TransportKind, settings: &TransportSettings) -> (Arc<dyn Transport>, Arc<dyn Transport>) {
    match kind {
        TransportKind::Memory => {
            let (main_side, worker_side) = MemoryTransport::pair(settings.channel_capacity);
            (Arc::new(main_side), Arc::new(worker_side))
        }
        TransportKind::Lines => {
            let (main_pipe, worker_pipe) = tokio::io::duplex(PIPE_CAPACITY);
            let (main_read, main_write) = tokio::io::split(main_pipe);
            let (worker_read, worker_write) = tokio::io::split(worker_pipe);
            (
                Arc::new(LinesTransport::spawn(main_read, main_write, settings.max_line_length)),
                Arc::new(LinesTransport::spawn(
                    worker_read,
                    worker_write,
                    settings.max_line_length,
                )),
            )
        }
    }
}

/// Run one `add` exchange. The inner `Err` is the worker's error payload.
async fn run_add(
    kind: TransportKind,
    settings: &RpcSettings,
    a: String,
    b: String,
) -> Result<std::result::Result<i64, Value>> {
    let (main_side, worker_side) = link(kind, &settings.transport);
    let main = Connection::new(main_side);
    let worker = Connection::new(worker_side);

    let (ready_tx, ready_rx) = oneshot::channel();
    let ready_tx = Mutex::new(Some(ready_tx));
    let _ready = main.on_notification(worker::READY, move |_: &Value| {
        if let Some(tx) = ready_tx.lock().take() {
            let _ = tx.send(());
        }
    });

    info!(transport = ?kind, "activating worker");
    let delay = Duration::from_millis(settings.demo.ready_delay_ms);
    drop(tokio::spawn(worker::run(worker.clone(), delay)));

    tokio::time::timeout(delay + READY_GRACE, ready_rx)
        .await
        .context("worker never reported ready")?
        .context("ready listener went away")?;
    info!("worker is ready");

    let outcome = main
        .request::<_, Sum>(worker::ADD, &[a, b])
        .context("failed to send add request")?
        .await;
    debug!(?outcome, "add finished");

    main.dispose();
    worker.dispose();

    match outcome {
        Ok(sum) => Ok(Ok(sum.value)),
        Err(RequestError::Remote(error)) => Ok(Err(error)),
        Err(other) => Err(other).context("add request failed"),
    }
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_owned)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_demo_settings(&cli)?;
    portablerpc_logging::init_from_settings(&settings.logging);

    let Command::Add { a, b } = cli.command;
    match run_add(cli.transport, &settings, a, b).await? {
        Ok(value) => {
            println!("Result: {value}");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            eprintln!("Error calculating result: {}", error_message(&error));
            Ok(ExitCode::FAILURE)
        }
    }
}
