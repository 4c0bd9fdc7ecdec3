//! ---
//! ems_section: "02-device-models"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device model catalogue and capability lookup."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Immutable catalogue of supported Shelly device models.
//!
//! The library is loaded once and shared read-only between every device
//! built from it.

pub mod error;

use std::fmt::{self, Write as _};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::{ModelError, Result};

const BUNDLED_MODELS: &str = include_str!("../data/shelly_models.json");

/// Wire protocol spoken by a device generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Protocol {
    /// Gen-1 HTTP GET endpoints.
    #[serde(rename = "REST")]
    Rest,
    /// Gen-2+ JSON-RPC over HTTP POST.
    #[serde(rename = "RPC")]
    #[default]
    Rpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rest => "REST",
            Protocol::Rpc => "RPC",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_name() -> String {
    "Unknown Model Name".to_owned()
}

fn default_generation() -> u8 {
    3
}

fn default_one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Capabilities of one device model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation")]
    pub generation: u8,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_one")]
    pub inputs: usize,
    #[serde(default = "default_one")]
    pub outputs: usize,
    #[serde(default)]
    pub meters: usize,
    /// Meters are independent channels rather than part of each output.
    #[serde(default)]
    pub meters_seperate: bool,
    #[serde(default = "default_true")]
    pub temperature_monitoring: bool,
}

/// Rendering style for [`ModelLibrary::describe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescribeMode {
    #[default]
    Brief,
    Detailed,
}

impl FromStr for DescribeMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "brief" => Ok(DescribeMode::Brief),
            "detailed" => Ok(DescribeMode::Detailed),
            other => Err(ModelError::UnknownMode(other.to_owned())),
        }
    }
}

/// Read-only list of [`ModelDescriptor`]s.
#[derive(Debug, Clone, Default)]
pub struct ModelLibrary {
    models: Vec<ModelDescriptor>,
}

impl ModelLibrary {
    /// Parse the catalogue compiled into this crate.
    pub fn bundled() -> Result<Self> {
        let library = Self::from_json(BUNDLED_MODELS)?;
        debug!(models = library.len(), "imported bundled Shelly model library");
        Ok(library)
    }

    /// Load a catalogue override from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ModelError::Missing {
            path: path.to_path_buf(),
            source,
        })?;
        let library = Self::from_json(&contents)?;
        debug!(path = %path.display(), models = library.len(), "imported Shelly model library");
        Ok(library)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let models: Vec<ModelDescriptor> = serde_json::from_str(contents)?;
        Ok(Self { models })
    }

    /// Find the descriptor for a model identifier.
    pub fn lookup(&self, model: &str) -> Result<&ModelDescriptor> {
        self.models
            .iter()
            .find(|descriptor| descriptor.model == model)
            .ok_or_else(|| ModelError::UnknownModel(model.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Render the catalogue as text, optionally restricted to one model.
    pub fn describe(&self, mode: DescribeMode, model: Option<&str>) -> String {
        if self.models.is_empty() {
            return "No models loaded.".to_owned();
        }

        let mut out = String::from("Shelly Model Library:\n");
        for descriptor in self
            .models
            .iter()
            .filter(|d| model.map_or(true, |wanted| d.model == wanted))
        {
            let url = descriptor.url.as_deref().unwrap_or("N/A");
            // Writing to a String cannot fail.
            let _ = match mode {
                DescribeMode::Brief => writeln!(
                    out,
                    "Model: {}, Name: {}, URL: {}",
                    descriptor.model, descriptor.name, url
                ),
                DescribeMode::Detailed => writeln!(
                    out,
                    "Model: {}\n  Name: {}\n  URL: {}\n  Generation: {}\n  Protocol: {}\n  Inputs: {}\n  Outputs: {}\n  Meters: {}\n  Meters Separate: {}\n  Temperature Monitoring: {}",
                    descriptor.model,
                    descriptor.name,
                    url,
                    descriptor.generation,
                    descriptor.protocol,
                    descriptor.inputs,
                    descriptor.outputs,
                    descriptor.meters,
                    descriptor.meters_seperate,
                    descriptor.temperature_monitoring
                ),
            };
        }
        out.trim_end().to_owned()
    }
}
