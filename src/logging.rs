//! Tracing subscriber setup.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directive, e.g. `info,secret_expiry_watcher=debug`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line, for log aggregation
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_LEVEL_ENV)
        .from_env_lossy()
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let (json_layer, text_layer) = match format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false)
                    .flatten_event(true),
            ),
            None,
        ),
        LogFormat::Text => (None, Some(fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(env_filter())
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

/// Initialize logging for tests (with simpler output).
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
