//! Tracing setup for the binary.
//!
//! `RUST_LOG` wins over everything; otherwise `-v`/`-q`, then the
//! configured level. Records from crates that use `log` (fuser does) are
//! bridged into the same subscriber.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::settings::LoggingSettings;

/// Keeps the file writer flushing; drop it last.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn filter_for(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!("{},fuser=warn", level)).with_context(|| format!("invalid log level `{}`", level))
}

pub fn init(settings: &LoggingSettings, level_override: Option<&str>) -> Result<LogGuard> {
    let filter = filter_for(level_override.unwrap_or(&settings.level))?;

    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log file `{}` has no file name", path.display()))?;
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).context("a tracing subscriber is already installed")?;
    tracing_log::LogTracer::init().context("failed to bridge `log` records")?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(filter_for("debug").is_ok());
        assert!(filter_for("fusevars=trace").is_ok());
    }
}
