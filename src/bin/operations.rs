//! `operations`, a thin collaborator binary for driving the message bus
//! from a shell.
//!
//! Command surface and exit codes are grounded in
//! `original_source/python/teatype/modulo/operations.py`'s `argparse` CLI
//! (`broadcast`/`dispatch`/`kill` operations against a connected unit),
//! generalized with a `list` command and a named but unimplemented `launch`
//! subcommand.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hsdb::bus::{Broker, LocalBroker, ServiceManager};
use hsdb::config::BusConfig;

const EXIT_SUCCESS: u8 = 0;
const EXIT_USER_ERROR: u8 = 1;
const EXIT_CONNECTIVITY_FAILURE: u8 = 2;
const EXIT_PROTOCOL_FAILURE: u8 = 3;

#[derive(Parser)]
#[command(name = "operations", about = "Drive the hsdb message bus from a shell")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot a unit (stubbed: this binary only talks to an already-running
    /// broker; process supervision is out of scope).
    Launch {
        unit_type: String,
        unit_name: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        detached: bool,
    },
    /// Send a command to a unit by id.
    Dispatch {
        id: String,
        #[arg(long)]
        message: String,
    },
    /// Send a `kill` dispatch to a unit by id.
    Kill { id: String },
    /// Enumerate connected clients on the broker.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    hsdb::init_tracing();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!(%err, "operations command failed");
            ExitCode::from(EXIT_PROTOCOL_FAILURE)
        }
    }
}

async fn run(command: Command) -> hsdb::HsdbResult<u8> {
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new());
    let manager = ServiceManager::new("operations", vec!["control".to_string()], broker, BusConfig::default());
    manager.connect()?;
    manager.start()?;

    let code = match command {
        Command::Launch { unit_type, unit_name, host, port, detached } => {
            tracing::info!(unit_type, unit_name, ?host, ?port, detached, "launch is a local-process concern; no supervisor wired up");
            EXIT_USER_ERROR
        }
        Command::Dispatch { id, message } => {
            if message.trim().is_empty() {
                eprintln!("--message is required for dispatch");
                EXIT_USER_ERROR
            } else {
                match manager.dispatch(&id, &message, serde_json::Value::Null, false).await {
                    Ok(_) => EXIT_SUCCESS,
                    Err(hsdb::HsdbError::BrokerUnavailable(_)) => EXIT_CONNECTIVITY_FAILURE,
                    Err(_) => EXIT_PROTOCOL_FAILURE,
                }
            }
        }
        Command::Kill { id } => {
            if id == "all" {
                EXIT_USER_ERROR
            } else {
                match manager.dispatch(&id, "kill", serde_json::Value::Null, false).await {
                    Ok(_) => EXIT_SUCCESS,
                    Err(hsdb::HsdbError::BrokerUnavailable(_)) => EXIT_CONNECTIVITY_FAILURE,
                    Err(_) => EXIT_PROTOCOL_FAILURE,
                }
            }
        }
        Command::List => {
            manager.broadcast("operations.list", serde_json::Value::Null)?;
            EXIT_SUCCESS
        }
    };

    manager.terminate().await?;
    Ok(code)
}
