//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Network connectivity and edge adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Inbound HTTP surface: devices call back here when an input toggles.

pub mod listener;

pub use listener::{WebhookListenerBuilder, WebhookListenerHandle};
