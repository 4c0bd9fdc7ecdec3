//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Queue of input events delivered by device webhooks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_switch_common::WebhookSettings;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use url::Url;

use crate::error::{ControlError, Result};

pub const TOGGLE_ON: &str = "input.toggle_on";
pub const TOGGLE_OFF: &str = "input.toggle_off";

/// One notification pushed by a device, e.g. `input.toggle_on` for `Porch Switch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookEvent {
    pub event: String,
    pub component: String,
}

impl WebhookEvent {
    pub fn new(event: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            component: component.into(),
        }
    }
}

/// FIFO of webhook events plus a wake signal for a waiting caller.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct WebhookQueue {
    events: Arc<Mutex<VecDeque<WebhookEvent>>>,
    wake: Arc<Notify>,
}

impl WebhookQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: WebhookEvent) {
        self.events.lock().push_back(event);
        self.wake.notify_one();
    }

    /// Oldest queued event, or `None` when empty. Never blocks.
    pub fn pop(&self) -> Option<WebhookEvent> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Wait until an event is pushed or `timeout` elapses.
    ///
    /// Returns true when woken by a push. A push that happened while nobody
    /// was waiting wakes the next call immediately.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wake.notified())
            .await
            .is_ok()
    }
}

/// URL a device calls for `event` on the input named `component`.
pub fn hook_url(settings: &WebhookSettings, event: &str, component: &str) -> Result<String> {
    let host = settings
        .webhook_host
        .as_deref()
        .filter(|host| !host.trim().is_empty())
        .ok_or_else(|| ControlError::invalid_config("WebhookHost is not configured"))?;
    let path = if settings.webhook_path.starts_with('/') {
        settings.webhook_path.clone()
    } else {
        format!("/{}", settings.webhook_path)
    };
    let mut url = Url::parse(&format!("http://{host}:{}{path}", settings.webhook_port))
        .map_err(|err| ControlError::invalid_config(format!("invalid webhook address: {err}")))?;
    url.query_pairs_mut()
        .append_pair("event", event)
        .append_pair("component", component);
    Ok(url.into())
}
