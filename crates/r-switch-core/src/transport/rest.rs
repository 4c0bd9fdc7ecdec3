//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;

use super::{base_url, DeviceTransport, RequestExecutor, TransportOutcome};
use crate::device::{Device, DeviceInfo};
use crate::error::{ControlError, Result};
use crate::reconcile::{parse_rest_status, StatusReport};

/// Gen-1 HTTP GET adapter.
#[derive(Clone)]
pub struct RestAdapter {
    executor: Arc<RequestExecutor>,
}

impl RestAdapter {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// GET `http://{host}:{port}/{path}` and return the JSON body.
    pub async fn get(&self, device: &Device, path: &str) -> Result<TransportOutcome<Value>> {
        let url = format!("{}/{}", base_url(device)?, path.trim_start_matches('/'));
        let outcome = self
            .executor
            .execute(device, |client| {
                client
                    .get(url.as_str())
                    .header(CONTENT_TYPE, "application/json")
            })
            .await?;
        let Some(reply) = outcome.online() else {
            return Ok(TransportOutcome::Offline);
        };

        if reply.status == StatusCode::UNAUTHORIZED {
            return Err(ControlError::Unauthorized {
                device: device.label.clone(),
                protocol: "REST",
            });
        }
        if reply.status != StatusCode::OK {
            return Err(ControlError::protocol(format!(
                "REST request to {} returned status code {}, expected 200",
                device.label,
                reply.status.as_u16()
            )));
        }

        let body: Value = serde_json::from_str(&reply.body).map_err(|err| {
            ControlError::protocol(format!(
                "REST request to {} returned invalid JSON: {err}",
                device.label
            ))
        })?;
        if is_empty(&body) {
            return Err(ControlError::protocol(format!(
                "REST request to {} returned empty result",
                device.label
            )));
        }
        Ok(TransportOutcome::Online(body))
    }
}

pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl DeviceTransport for RestAdapter {
    fn name(&self) -> &'static str {
        "REST"
    }

    async fn fetch_status(&self, info: &DeviceInfo) -> Result<TransportOutcome<StatusReport>> {
        // Gen-1 firmware never reports metering on the relay itself.
        if !info.device.meters_seperate {
            return Err(ControlError::protocol(format!(
                "Shelly model {} (device {}) is configured with combined meters and switches, which REST devices do not support",
                info.device.model, info.device.label
            )));
        }
        match self.get(&info.device, "status").await? {
            TransportOutcome::Online(status) => {
                parse_rest_status(info, &status).map(TransportOutcome::Online)
            }
            TransportOutcome::Offline => Ok(TransportOutcome::Offline),
        }
    }

    async fn switch_output(
        &self,
        info: &DeviceInfo,
        channel: usize,
        on: bool,
    ) -> Result<TransportOutcome<()>> {
        let turn = if on { "on" } else { "off" };
        let outcome = self
            .get(&info.device, &format!("relay/{channel}?turn={turn}"))
            .await?;
        Ok(outcome.map(|_| ()))
    }
}
