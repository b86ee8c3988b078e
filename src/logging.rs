//! Logging infrastructure
//!
//! Sets up file-based logging for applications embedding the client. The
//! library itself only emits `tracing` events; installing a subscriber is
//! left to the host, and this module is the default way to do it.

use crate::config::LoggingConfig;
use crate::error::{LdapError, LdapResult};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the background writer alive for the life of the process
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Get the directory containing the executable
fn get_executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Initialize logging to the configured file.
///
/// Only the first call installs a subscriber; later calls return `Ok(())`
/// without touching the global dispatcher.
pub fn init_logging(config: &LoggingConfig) -> LdapResult<()> {
    let mut installed = false;
    // Concurrent first calls wait here until one of them has finished
    LOG_GUARD.get_or_try_init(|| {
        let guard = install_subscriber(config)?;
        installed = true;
        Ok::<_, LdapError>(guard)
    })?;

    if installed {
        tracing::info!(
            directory = ?config.directory,
            file = %config.file_name,
            "Logging initialized"
        );
    }
    Ok(())
}

fn install_subscriber(config: &LoggingConfig) -> LdapResult<WorkerGuard> {
    let log_dir = config.directory.clone().unwrap_or_else(get_executable_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(&log_dir, &config.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| LdapError::Config(format!("failed to install log subscriber: {}", e)))?;

    Ok(guard)
}
