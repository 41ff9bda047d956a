pub mod app;
pub mod config;
pub mod controller;
pub mod db;
pub mod editor;
pub mod engine;
pub mod errors;
pub mod inhibitor;
pub mod logs;
pub mod models;
pub mod prompt;
pub mod settings;
pub mod store;

#[cfg(feature = "desktop")]
mod desktop;

pub use crate::app::BotApp;
pub use crate::config::BotConfig;
pub use crate::controller::{RunController, StartOutcome};
pub use crate::errors::{AppError, AppResult};
#[cfg(feature = "desktop")]
pub use crate::desktop::run;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file subscriber under `<data_dir>/logs`. `RUST_LOG` wins over
/// `default_filter`.
pub fn init_tracing(data_dir: &Path, default_filter: &str) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "simpleinstabot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
