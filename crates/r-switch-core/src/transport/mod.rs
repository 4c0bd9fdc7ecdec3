//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Protocol adapters and the request policy they share.

use std::net::Ipv6Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r_switch_common::ShellySettings;
use r_switch_logging::{sw_debug, sw_warn, LogContext};
use reqwest::{Client, RequestBuilder, StatusCode};
use url::Host;

use crate::device::{Device, DeviceInfo};
use crate::error::{ControlError, Result};
use crate::metrics::TransportMetrics;
use crate::reconcile::StatusReport;

pub mod rest;
pub mod rpc;
pub mod simulated;

pub use rest::RestAdapter;
pub use rpc::RpcAdapter;
pub use simulated::SimulatedTransport;

/// Result of a request against a device that may be unreachable.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOutcome<T> {
    Online(T),
    /// The liveness probe failed, so no request was sent.
    Offline,
}

impl<T> TransportOutcome<T> {
    pub fn is_online(&self) -> bool {
        matches!(self, TransportOutcome::Online(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransportOutcome<U> {
        match self {
            TransportOutcome::Online(value) => TransportOutcome::Online(f(value)),
            TransportOutcome::Offline => TransportOutcome::Offline,
        }
    }

    pub fn online(self) -> Option<T> {
        match self {
            TransportOutcome::Online(value) => Some(value),
            TransportOutcome::Offline => None,
        }
    }
}

/// Unified interface implemented by the REST, RPC and simulated transports.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Tag used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Read the current device status.
    async fn fetch_status(&self, device: &DeviceInfo) -> Result<TransportOutcome<StatusReport>>;

    /// Switch one output channel on or off.
    async fn switch_output(
        &self,
        device: &DeviceInfo,
        channel: usize,
        on: bool,
    ) -> Result<TransportOutcome<()>>;
}

/// Reachability check performed before a request is sent.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, hostname: &str, timeout: Duration) -> bool;
}

/// ICMP probe using the system `ping` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

#[async_trait]
impl LivenessProbe for PingProbe {
    async fn is_alive(&self, hostname: &str, timeout: Duration) -> bool {
        let mut command = tokio::process::Command::new("ping");
        if cfg!(windows) {
            command.args(["-n", "1", "-w", &timeout.as_millis().max(1).to_string()]);
        } else {
            let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
            command.args(["-c", "1", "-W", &secs.to_string()]);
        }
        command
            .arg(hostname)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let deadline = timeout + Duration::from_secs(1);
        match tokio::time::timeout(deadline, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(err)) => {
                tracing::warn!(hostname, error = %err, "unable to run ping");
                false
            }
            Err(_) => false,
        }
    }
}

/// Registry wide request settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPolicy {
    pub response_timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub ping_allowed: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::from(&ShellySettings::default())
    }
}

impl From<&ShellySettings> for RequestPolicy {
    fn from(settings: &ShellySettings) -> Self {
        Self {
            response_timeout: settings.response_timeout,
            retry_count: settings.retry_count,
            retry_delay: settings.retry_delay,
            ping_allowed: settings.ping_allowed,
        }
    }
}

/// Response captured by [`RequestExecutor::execute`].
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

/// Applies the liveness check, timeout and retry policy around one request.
pub struct RequestExecutor {
    client: Client,
    policy: RequestPolicy,
    probe: Arc<dyn LivenessProbe>,
    metrics: Option<TransportMetrics>,
}

impl RequestExecutor {
    pub fn new(policy: RequestPolicy, probe: Arc<dyn LivenessProbe>) -> Result<Self> {
        let client = Client::builder().timeout(policy.response_timeout).build()?;
        Ok(Self {
            client,
            policy,
            probe,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Option<TransportMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    /// Simulated devices and disabled probing always count as online.
    pub async fn is_online(&self, device: &Device) -> bool {
        if device.simulate || !self.policy.ping_allowed {
            return true;
        }
        match device.hostname.as_deref() {
            Some(hostname) => {
                self.probe
                    .is_alive(hostname, self.policy.response_timeout)
                    .await
            }
            None => false,
        }
    }

    /// Send the request produced by `build`, retrying on timeouts only.
    pub async fn execute<F>(&self, device: &Device, build: F) -> Result<TransportOutcome<HttpReply>>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let protocol = device.protocol.as_str();
        let ctx = LogContext::new()
            .with_device(&device.label)
            .with_protocol(protocol)
            .with_mode(device.mode());

        if !self.is_online(device).await {
            if let Some(metrics) = &self.metrics {
                metrics.record_offline(protocol);
            }
            if device.expect_offline {
                sw_debug!(context = ctx, "device is offline, request skipped");
            } else {
                sw_warn!(context = ctx, "device is offline, request skipped");
            }
            return Ok(TransportOutcome::Offline);
        }

        let attempts = self.policy.retry_count + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&build).await {
                Ok(reply) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_request(protocol, "ok");
                    }
                    return Ok(TransportOutcome::Online(reply));
                }
                Err(err) if err.is_timeout() => {
                    if attempt >= attempts {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_request(protocol, "timeout");
                        }
                        return Err(ControlError::Timeout {
                            device: device.label.clone(),
                            protocol,
                            attempts,
                        });
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry(protocol);
                    }
                    sw_debug!(context = ctx, "request timed out, retry #{attempt}");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(err) if err.is_connect() => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_request(protocol, "error");
                    }
                    return Err(ControlError::Connection {
                        device: device.label.clone(),
                        protocol,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_request(protocol, "error");
                    }
                    return Err(ControlError::protocol(format!(
                        "{protocol} request to {} failed: {err}",
                        device.label
                    )));
                }
            }
        }
    }

    async fn send_once<F>(&self, build: &F) -> std::result::Result<HttpReply, reqwest::Error>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = build(&self.client).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(HttpReply { status, body })
    }
}

/// Parse a configured hostname: a DNS name, an IPv4 address or an IPv6
/// address with or without brackets. Ports, paths and schemes are rejected.
pub fn parse_host(hostname: &str) -> Option<Host> {
    let bare = hostname
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(hostname);
    if let Ok(address) = bare.parse::<Ipv6Addr>() {
        return Some(Host::Ipv6(address));
    }
    if hostname.contains(['/', ':', '?', '#', '@', '[', ']']) {
        return None;
    }
    Host::parse(hostname).ok()
}

/// Host part of a request URL, failing for devices without an address.
pub(crate) fn base_url(device: &Device) -> Result<String> {
    let hostname = device.hostname.as_deref().ok_or_else(|| {
        ControlError::invalid_config(format!("device {} has no hostname", device.label))
    })?;
    let host = parse_host(hostname).ok_or_else(|| {
        ControlError::invalid_config(format!(
            "device {} has an invalid hostname: {hostname}",
            device.label
        ))
    })?;
    // `Host` renders IPv6 addresses in brackets.
    Ok(format!("http://{host}:{}", device.port))
}
