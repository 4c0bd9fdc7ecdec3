//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shelly smart-switch control: device registry, protocol transports and
//! status reconciliation.
//!
//! ```no_run
//! # async fn demo() -> r_switch_core::Result<()> {
//! use r_switch_common::ShellySettings;
//! use r_switch_core::DeviceRegistry;
//!
//! let mut registry = DeviceRegistry::new(ShellySettings::default()).await?;
//! for (label, result) in registry.refresh_all().await {
//!     println!("{label}: {result:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod transport;
pub mod webhook;

pub use device::{
    Component, ComponentIdentity, ComponentKind, Device, DeviceIdentity, DeviceInfo, Input, Meter,
    Output,
};
pub use error::{ControlError, Result};
pub use metrics::TransportMetrics;
pub use reconcile::StatusReport;
pub use registry::{DeviceRegistry, DeviceRegistryBuilder};
pub use transport::{
    DeviceTransport, LivenessProbe, PingProbe, RequestPolicy, TransportOutcome,
};
pub use webhook::{WebhookEvent, WebhookQueue, TOGGLE_OFF, TOGGLE_ON};
