//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Tracks whether a fatal error has been reported by a previous run.
///
/// The marker file survives restarts so a supervisor can tell that the last
/// run terminated abnormally and avoid repeating alerts.
#[derive(Debug, Clone)]
pub struct FatalErrorTracker {
    path: PathBuf,
}

impl FatalErrorTracker {
    /// Track fatal errors using the marker file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if a fatal error was recorded and not yet cleared.
    pub fn has_fatal_error(&self) -> bool {
        self.path.exists()
    }

    /// Write `message` to the marker file, replacing any previous record.
    pub fn record(&self, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, format!("{} {}\n", Utc::now().to_rfc3339(), message))
    }

    /// Remove the marker file. Returns true if a record existed.
    pub fn clear(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Log a fatal error and, when a tracker is supplied, persist it.
///
/// The process is left running; the caller decides whether to exit.
pub fn log_fatal_error(message: &str, tracker: Option<&FatalErrorTracker>) {
    tracing::error!(fatal = true, "FATAL ERROR: {message}");
    if let Some(tracker) = tracker {
        if let Err(err) = tracker.record(message) {
            tracing::warn!(path = %tracker.path().display(), error = %err, "unable to record fatal error");
        }
    }
}
