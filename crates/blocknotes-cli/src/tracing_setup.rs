use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the log filter, e.g. `blocknotes_core=debug`
pub const LOG_ENV: &str = "BLOCKNOTES_LOG";
/// Environment variable naming a log file, used when `--log-file` is absent
pub const LOG_FILE_ENV: &str = "BLOCKNOTES_LOG_FILE";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: stderr always, plus a plain-text file
/// layer when a log file is given.
///
/// A log file that cannot be opened is reported as an error, but stderr
/// logging is installed first.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let log_file = log_file
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(LOG_FILE_ENV).map(Into::into));

    let Some(path) = log_file else {
        return registry
            .try_init()
            .context("Failed to install tracing subscriber");
    };

    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            registry
                .try_init()
                .context("Failed to install tracing subscriber")?;
            return Err(e).with_context(|| format!("Failed to open log file {}", path.display()));
        }
    };

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter());

    registry
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}
