//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Logging collaborator used by the R-Switch device control layer.
//!
//! Messages are routed through `tracing`; the verbosity vocabulary mirrors the
//! levels operators already use in configuration files.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod fatal;
pub mod macros;
pub mod verbosity;

pub use fatal::{log_fatal_error, FatalErrorTracker};
pub use verbosity::{log_message, Verbosity, VerbosityParseError};

/// Initialize a baseline tracing subscriber suitable for development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Device label (`name (ID: n)`) associated with the log event.
    pub device: Option<&'a str>,
    /// Component (input/output/meter) name associated with the log event.
    pub component: Option<&'a str>,
    /// Wire protocol in use (`REST`, `RPC`, `SIM`).
    pub protocol: Option<&'a str>,
    /// Operating mode (live or simulate).
    pub mode: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device label.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach a component name.
    pub fn with_component(mut self, component: &'a str) -> Self {
        self.component = Some(component);
        self
    }

    /// Attach the protocol tag.
    pub fn with_protocol(mut self, protocol: &'a str) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Attach an operating mode descriptor.
    pub fn with_mode(mut self, mode: &'a str) -> Self {
        self.mode = Some(mode);
        self
    }
}
