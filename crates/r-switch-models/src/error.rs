//! ---
//! ems_section: "02-device-models"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device model catalogue and capability lookup."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file {path} could not be read: {source}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model data is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("device model {0} not found in the model library")]
    UnknownModel(String),
    #[error("unknown describe mode '{0}', expected brief or detailed")]
    UnknownMode(String),
}
