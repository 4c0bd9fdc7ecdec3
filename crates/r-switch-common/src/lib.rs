//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the R-Switch workspace.
//! This crate exposes configuration loading, change detection and the
//! tracing bootstrap consumed by the device layer and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ComponentConfig, ConfigFormat, ConfigWatcher, DeviceConfig, LoadedAppConfig,
    LoggingConfig, ShellySettings, WebhookSettings,
};
pub use logging::{init_tracing, LogFormat};
