//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Verbosity vocabulary accepted by the logging collaborator, ordered from
/// quietest to noisiest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Suppress the message entirely.
    None,
    /// Failure that is about to be propagated.
    Error,
    /// Expected but noteworthy condition (e.g. an unreachable device).
    Warning,
    /// High level progress.
    #[default]
    Summary,
    /// Per-operation detail.
    Detailed,
    /// Developer diagnostics.
    Debug,
    /// Everything, including raw payload dumps.
    All,
}

impl Verbosity {
    /// Lowercase name used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::None => "none",
            Verbosity::Error => "error",
            Verbosity::Warning => "warning",
            Verbosity::Summary => "summary",
            Verbosity::Detailed => "detailed",
            Verbosity::Debug => "debug",
            Verbosity::All => "all",
        }
    }

    /// Tracing level a message of this verbosity is emitted at. `None` has no level.
    pub fn level(&self) -> Option<Level> {
        match self {
            Verbosity::None => None,
            Verbosity::Error => Some(Level::ERROR),
            Verbosity::Warning => Some(Level::WARN),
            Verbosity::Summary => Some(Level::INFO),
            Verbosity::Detailed | Verbosity::Debug => Some(Level::DEBUG),
            Verbosity::All => Some(Level::TRACE),
        }
    }

    /// `EnvFilter` directive that admits messages up to this verbosity.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Verbosity::None => "off",
            Verbosity::Error => "error",
            Verbosity::Warning => "warn",
            Verbosity::Summary => "info",
            Verbosity::Detailed | Verbosity::Debug => "debug",
            Verbosity::All => "trace",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a verbosity name is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid verbosity '{0}', expected one of none|error|warning|summary|detailed|debug|all")]
pub struct VerbosityParseError(pub String);

impl FromStr for Verbosity {
    type Err = VerbosityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Verbosity::None),
            "error" => Ok(Verbosity::Error),
            "warning" => Ok(Verbosity::Warning),
            "summary" => Ok(Verbosity::Summary),
            "detailed" => Ok(Verbosity::Detailed),
            "debug" => Ok(Verbosity::Debug),
            "all" => Ok(Verbosity::All),
            other => Err(VerbosityParseError(other.to_owned())),
        }
    }
}

/// Log a plain message at the given verbosity.
pub fn log_message(message: &str, verbosity: Verbosity) {
    let tag = verbosity.as_str();
    match verbosity {
        Verbosity::None => {}
        Verbosity::Error => tracing::error!(verbosity = tag, "{message}"),
        Verbosity::Warning => tracing::warn!(verbosity = tag, "{message}"),
        Verbosity::Summary => tracing::info!(verbosity = tag, "{message}"),
        Verbosity::Detailed | Verbosity::Debug => tracing::debug!(verbosity = tag, "{message}"),
        Verbosity::All => tracing::trace!(verbosity = tag, "{message}"),
    }
}
