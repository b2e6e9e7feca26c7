//! Structured logging setup: an `EnvFilter` layer seeded from
//! `LoggerConfig::level`, plus an optional file appender when
//! `LoggerConfig::file` is set.

use std::fs::OpenOptions;

use storm_control_config::LoggerConfig;
use storm_control_core::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber. Must be called at most once,
/// before any other component logs.
pub fn init(cfg: &LoggerConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .unwrap_or_else(|_| EnvFilter::new(format!("storm_control={}", cfg.level)));

    let registry = tracing_subscriber::registry().with(env_filter);

    if cfg.file.is_empty() {
        registry.with(fmt::layer()).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.file)
            .map_err(|e| Error::Config(format!("opening log file {}: {e}", cfg.file)))?;
        registry.with(fmt::layer().with_writer(file).with_ansi(false)).init();
    }

    Ok(())
}
