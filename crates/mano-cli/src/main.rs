//! Mano CLI - a terminal front-end for the Mano dashboard.
//!
//! Logs in against the analytics backend, shows the overview metrics, and
//! runs free-text queries, either one-shot or from an interactive shell.

mod app;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, Command};
use mano_core::Config;

/// Log file prefix inside `<data_dir>/logs`
const LOG_FILE_PREFIX: &str = "mano";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to a daily rolling file when a log directory is available, so
/// they never interleave with command output; otherwise to stderr.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
            .ok()
    });

    match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn log_dir(config: &Config) -> Option<PathBuf> {
    let dir = config.data_dir().ok()?.join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

fn load_config() -> Config {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            // Tracing is not up yet
            eprintln!("Warning: failed to load config ({:#}), using defaults", e);
            Config::default()
        }
    };
    config.with_env_overrides()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        println!("{}", app::USAGE);
        return Ok(());
    }

    let config = load_config();
    let _log_guard = init_tracing(log_dir(&config).as_deref());
    info!(base_url = %config.base_url(), "Mano CLI starting");

    let mut app = App::new(config)?;
    let result = app.run(command).await;

    if let Err(ref e) = result {
        warn!(error = %e, "Command failed");
    }
    info!("Mano CLI shutting down");
    result
}
