//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use r_switch_logging::Verbosity;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter overrides, highest priority first.
const LOG_ENVS: [&str; 2] = ["R_SWITCH_LOG", "RUST_LOG"];

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static CONSOLE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Resolve the filter for one sink.
///
/// `R_SWITCH_LOG`, then `RUST_LOG`, win over the configured verbosity so
/// operators can raise logging for a single run without editing the config
/// file. Invalid directives are reported and skipped.
fn sink_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::new(sink_directive(verbosity, |key| std::env::var(key).ok()))
}

fn sink_directive(verbosity: Verbosity, lookup: impl Fn(&str) -> Option<String>) -> String {
    for key in LOG_ENVS {
        let Some(directive) = lookup(key) else {
            continue;
        };
        match EnvFilter::try_new(&directive) {
            Ok(_) => return directive,
            Err(err) => eprintln!("invalid {key} directive ({err}); ignoring it"),
        }
    }
    verbosity.filter_directive().to_owned()
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// Console output goes to stderr so command output on stdout stays clean.
/// A daily rolling JSON log file is written under the configured directory.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = daily(&config.directory, format!("{}.log", prefix));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());

    let _ = FILE_GUARD.set(file_guard);
    let _ = CONSOLE_GUARD.set(console_guard);

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(console_writer)
            .with_filter(sink_filter(config.console_verbosity))
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .with_filter(sink_filter(config.console_verbosity))
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .with_filter(sink_filter(config.file_verbosity))
        .boxed();

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        console = %config.console_verbosity,
        file = %config.file_verbosity,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_log_directory() {
        let dir = tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            ..LoggingConfig::default()
        };
        init_tracing("r-switch-test", &config).unwrap();
        assert!(config.directory.is_dir());
    }

    #[test]
    fn env_directives_override_configured_verbosity() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |key: &str| {
                pairs
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| value.to_string())
            }
        };

        assert_eq!(sink_directive(Verbosity::Summary, env(&[])), "info");
        assert_eq!(
            sink_directive(Verbosity::Summary, env(&[("RUST_LOG", "debug")])),
            "debug"
        );
        assert_eq!(
            sink_directive(
                Verbosity::Summary,
                env(&[("RUST_LOG", "debug"), ("R_SWITCH_LOG", "r_switch_core=trace")])
            ),
            "r_switch_core=trace"
        );
        // A broken override falls through to the next source.
        assert_eq!(
            sink_directive(
                Verbosity::Error,
                env(&[("R_SWITCH_LOG", "r_switch_core=loud"), ("RUST_LOG", "warn")])
            ),
            "warn"
        );
    }

    #[test]
    fn log_format_uses_kebab_case() {
        let format: LogFormat = serde_json::from_str("\"structured-json\"").unwrap();
        assert_eq!(format, LogFormat::StructuredJson);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
