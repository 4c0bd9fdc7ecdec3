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
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::rest::is_empty;
use super::{base_url, DeviceTransport, RequestExecutor, TransportOutcome};
use crate::device::{Device, DeviceInfo};
use crate::error::{ControlError, Result};
use crate::reconcile::{parse_rpc_status, StatusReport};

/// Gen-2+ JSON-RPC adapter posting to `/rpc`.
#[derive(Clone)]
pub struct RpcAdapter {
    executor: Arc<RequestExecutor>,
}

impl RpcAdapter {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Call `method` and return the `result` member of the response.
    pub async fn call(
        &self,
        device: &Device,
        method: &str,
        params: Option<Value>,
    ) -> Result<TransportOutcome<Value>> {
        let url = format!("{}/rpc", base_url(device)?);
        let mut envelope = json!({"id": 0, "method": method});
        if let Some(params) = params {
            envelope["params"] = params;
        }

        let outcome = self
            .executor
            .execute(device, |client| client.post(url.as_str()).json(&envelope))
            .await?;
        let Some(reply) = outcome.online() else {
            return Ok(TransportOutcome::Offline);
        };

        if reply.status == StatusCode::UNAUTHORIZED {
            return Err(ControlError::Unauthorized {
                device: device.label.clone(),
                protocol: "RPC",
            });
        }

        let body: Value = serde_json::from_str(&reply.body).unwrap_or(Value::Null);
        if let Some(message) = body["error"]["message"].as_str() {
            return Err(ControlError::protocol(format!(
                "RPC {method} to {} returned error: {message} (code: {})",
                device.label, body["error"]["code"]
            )));
        }
        if reply.status != StatusCode::OK {
            return Err(ControlError::protocol(format!(
                "RPC {method} to {} returned status code {}, expected 200",
                device.label,
                reply.status.as_u16()
            )));
        }

        let result = &body["result"];
        if is_empty(result) {
            return Err(ControlError::protocol(format!(
                "RPC {method} to {} returned empty result",
                device.label
            )));
        }
        Ok(TransportOutcome::Online(result.clone()))
    }

    /// A separately metered channel that cannot be read fails the whole status call.
    async fn call_meter(&self, device: &Device, method: &str, channel: usize) -> Result<Value> {
        match self.call(device, method, Some(json!({"id": channel}))).await? {
            TransportOutcome::Online(value) => Ok(value),
            TransportOutcome::Offline => Err(ControlError::protocol(format!(
                "device {} is online, but meters are separate and {method} for channel {channel} failed",
                device.label
            ))),
        }
    }
}

#[async_trait]
impl DeviceTransport for RpcAdapter {
    fn name(&self) -> &'static str {
        "RPC"
    }

    async fn fetch_status(&self, info: &DeviceInfo) -> Result<TransportOutcome<StatusReport>> {
        let device = &info.device;
        let status = match self.call(device, "Shelly.GetStatus", None).await? {
            TransportOutcome::Online(status) => status,
            TransportOutcome::Offline => return Ok(TransportOutcome::Offline),
        };

        let mut em = Vec::new();
        let mut em_data = Vec::new();
        if device.meters_seperate {
            for channel in 0..device.meter_count {
                em.push(self.call_meter(device, "EM1.GetStatus", channel).await?);
                em_data.push(self.call_meter(device, "EM1Data.GetStatus", channel).await?);
            }
        }

        parse_rpc_status(info, &status, &em, &em_data).map(TransportOutcome::Online)
    }

    async fn switch_output(
        &self,
        info: &DeviceInfo,
        channel: usize,
        on: bool,
    ) -> Result<TransportOutcome<()>> {
        let outcome = self
            .call(
                &info.device,
                "Switch.Set",
                Some(json!({"id": channel, "on": on})),
            )
            .await?;
        Ok(outcome.map(|_| ()))
    }
}
