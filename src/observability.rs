//! Logging setup for the slicing pipeline.
//!
//! Events carry a `component` and a dotted `event` name so runs can be
//! filtered the same way whether output is pretty or JSON.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::pipeline::PipelineReport;

pub const LOG_LEVEL_ENV: &str = "TSWIN_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "TSWIN_LOG_FORMAT";
pub const LOG_TARGET_ENV: &str = "TSWIN_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads logging settings; unparseable values keep their defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();

    LoggingConfig {
        level: non_empty_env(LOG_LEVEL_ENV).unwrap_or(defaults.level),
        format: non_empty_env(LOG_FORMAT_ENV)
            .and_then(|raw| parse_log_format(&raw))
            .unwrap_or(defaults.format),
        include_target: non_empty_env(LOG_TARGET_ENV)
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "tswin_roll",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_input_selected(kind: &str, path: &Path, table: Option<&str>) {
    match table {
        Some(table) => info!(
            component = "tswin_roll",
            event = "input.selected",
            kind,
            path = %path.display(),
            table
        ),
        None => info!(
            component = "tswin_roll",
            event = "input.selected",
            kind,
            path = %path.display()
        ),
    }
}

pub fn log_run_summary(report: &PipelineReport) {
    info!(
        component = "tswin_roll",
        event = "app.finish",
        input_points = report.slice.input_points,
        windows = report.slice.emitted_windows,
        window_rows = report.window_rows_written,
        training_rows = report.training_rows_written
    );
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
