//! # Structured Logging Module
//!
//! Environment-aware structured logging: a console layer, plus a JSON file layer
//! when `CONVERGE_LOG_DIR` names a directory. `RUST_LOG` overrides the level
//! derived from the environment.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call repeatedly; never panics when another global subscriber is installed.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(log_level));

        let log_path = log_file_path(&environment);
        let file_layer = log_path.as_ref().and_then(|path| {
            let dir = path.parent()?;
            let file_name = path.file_name()?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The writer flushes on a background thread for the process lifetime
            std::mem::forget(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(log_level)),
            )
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = ?log_path,
            "Structured logging initialized"
        );
    });
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// `<dir>/<environment>.<pid>.<timestamp>.log` when `CONVERGE_LOG_DIR` is usable
fn log_file_path(environment: &str) -> Option<PathBuf> {
    let log_dir = PathBuf::from(std::env::var("CONVERGE_LOG_DIR").ok()?);
    if fs::create_dir_all(&log_dir).is_err() {
        eprintln!(
            "Unable to create log directory {}, logging to console only",
            log_dir.display()
        );
        return None;
    }

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    Some(log_dir.join(format!("{environment}.{}.{timestamp}.log", process::id())))
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log one lifecycle step (create/read/update/delete) of a resource
pub fn log_lifecycle_operation(
    operation: &str,
    resource_id: Option<&str>,
    status: &str,
    elapsed_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        resource_id = resource_id,
        status = %status,
        elapsed_ms = elapsed_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "LIFECYCLE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_lifecycle_operation("create", Some("ami-1"), "started", None, None);
        log_error("reconciler", "delete", "boom", Some("test"));
    }
}
