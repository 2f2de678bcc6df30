//! steplogger: command-line client for the StepLogger daemon.
//!
//! Stands in for the overlay UI (start a session, press the waypoint button)
//! and for the positioning collaborator (push positions and fixes). All
//! session state lives in the daemon; this binary only talks to it.
//!
//! ## Subcommands
//!
//! - `start`, `press`: drive the active session
//! - `position`, `fix`: feed position estimates and location fixes
//! - `status`, `health`, `shutdown`: inspect or stop the daemon
//! - `config`: read and edit the local configuration file

mod logging;
mod service_client;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use service_client::{ClientError, ServiceClient};
use steplogger_core::{AppPaths, ConfigStore, CoreError, WaypointScript, SCRIPT_KEY};

#[derive(Parser)]
#[command(name = "steplogger")]
#[command(about = "Waypoint and position logging client")]
#[command(version)]
struct Cli {
    /// Configuration file edited by `config` (defaults to <root>/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new logging session, replacing any active one
    Start {
        /// Suffix for the session directory name
        #[arg(value_name = "UID", default_value = "")]
        uid: String,
    },

    /// Press the waypoint button
    Press,

    /// Report a position estimate
    #[command(allow_negative_numbers = true)]
    Position {
        /// Unix time in milliseconds
        timestamp: i64,
        x: f64,
        y: f64,
        z: f64,
    },

    /// Report a location fix
    #[command(allow_negative_numbers = true)]
    Fix { longitude: f64, latitude: f64 },

    /// Show the active session
    Status,

    /// Check that the daemon is reachable
    Health,

    /// Stop the daemon
    Shutdown,

    /// Read or edit the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print a value
    Get { key: String },

    /// Set a value and write the file
    Set { key: String, value: String },

    /// Validate the waypoint script
    Check,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Key not set: {0}")]
    KeyNotSet(String),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() {
    let cli = Cli::parse();

    let paths = match AppPaths::resolve() {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("steplogger: {}", err);
            std::process::exit(1);
        }
    };
    let _logging_guard = logging::init(&paths);

    if let Err(err) = run(cli, &paths) {
        tracing::error!(error = %err, "steplogger command failed");
        eprintln!("steplogger: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli, paths: &AppPaths) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(|| paths.config_file());

    match cli.command {
        Commands::Start { uid } => {
            let started = connect(paths)?.start_logging_session(&uid)?;
            println!(
                "Session {} started in {} ({} waypoints)",
                started.session_id, started.directory, started.length
            );
        }
        Commands::Press => connect(paths)?.press_waypoint()?,
        Commands::Position { timestamp, x, y, z } => {
            connect(paths)?.log_position(timestamp, x, y, z)?
        }
        Commands::Fix {
            longitude,
            latitude,
        } => connect(paths)?.report_fix(longitude, latitude)?,
        Commands::Status => {
            let status = connect(paths)?.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Health => {
            let mut client = ServiceClient::new(paths.socket());
            let health = client.connect()?;
            println!(
                "Daemon {} (pid {}, protocol {})",
                health.version, health.pid, health.protocol_version
            );
        }
        Commands::Shutdown => connect(paths)?.shutdown()?,
        Commands::Config { command } => run_config(command, config_path)?,
    }
    Ok(())
}

fn run_config(command: ConfigCommand, path: PathBuf) -> Result<(), CliError> {
    let mut config = ConfigStore::new(path);
    match command {
        ConfigCommand::Get { key } => {
            config.load()?;
            let value = config.get(&key).ok_or_else(|| CliError::KeyNotSet(key.clone()))?;
            println!("{}", value);
        }
        ConfigCommand::Set { key, value } => {
            match config.load() {
                Ok(()) | Err(CoreError::ConfigNotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
            config.set(key, value);
            config.store()?;
            tracing::info!(path = %config.path().display(), "Configuration written");
        }
        ConfigCommand::Check => {
            config.load()?;
            let script = WaypointScript::from_config(&config)?;
            println!("{}: {} waypoints", SCRIPT_KEY, script.len());
            for (index, waypoint) in script.iter().enumerate() {
                println!(
                    "  {}: {}",
                    index,
                    waypoint.fields().collect::<Vec<_>>().join(":")
                );
            }
        }
    }
    Ok(())
}

fn connect(paths: &AppPaths) -> Result<ServiceClient, CliError> {
    let mut client = ServiceClient::new(paths.socket());
    client.connect()?;
    Ok(client)
}
