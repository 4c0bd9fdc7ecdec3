//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use r_switch_models::ModelError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

/// Failures raised by the device control layer.
///
/// An unreachable device is not an error; see
/// [`TransportOutcome::Offline`](crate::transport::TransportOutcome::Offline).
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{kind} {identity} not found")]
    NotFound { kind: &'static str, identity: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("timeout on {protocol} call for device {device} after {attempts} attempts")]
    Timeout {
        device: String,
        protocol: &'static str,
        attempts: u32,
    },
    #[error("connection error on {protocol} call for device {device}: {message}")]
    Connection {
        device: String,
        protocol: &'static str,
        message: String,
    },
    #[error("{protocol} request to {device} returned 401 unauthorised; authentication is not supported")]
    Unauthorized {
        device: String,
        protocol: &'static str,
    },
    #[error("{0}")]
    Protocol(String),
    #[error("simulation file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ControlError {
    pub fn protocol(message: impl Into<String>) -> Self {
        ControlError::Protocol(message.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        ControlError::InvalidConfig(message.into())
    }

    /// True when a request exhausted its retries waiting for a response.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControlError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::NotFound { .. })
    }
}
