//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "Shared fixtures for device control integration tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use r_switch_common::{ComponentConfig, DeviceConfig, ShellySettings};
use r_switch_core::{DeviceRegistry, LivenessProbe};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shape and failure modes of a [`MockDevice`].
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub inputs: usize,
    pub outputs: usize,
    pub meters: usize,
    /// Sleep before answering every request.
    pub delay: Option<Duration>,
    pub unauthorized: bool,
    /// Report Gen-1 meters under `emeters` instead of `meters`.
    pub energy_meters: bool,
    /// Advertise the input toggle webhook events.
    pub supports_toggle: bool,
    /// RPC method answered with an error object.
    pub failing_method: Option<String>,
}

impl MockOptions {
    pub fn channels(inputs: usize, outputs: usize, meters: usize) -> Self {
        Self {
            inputs,
            outputs,
            meters,
            supports_toggle: true,
            ..Self::default()
        }
    }
}

pub struct MockState {
    options: MockOptions,
    hits: AtomicUsize,
    deletes: AtomicUsize,
    relays: Mutex<Vec<bool>>,
    hooks: Mutex<Vec<Value>>,
}

/// HTTP stand-in for a Shelly device speaking both the Gen-1 REST API and
/// the Gen-2 JSON-RPC API.
pub struct MockDevice {
    address: SocketAddr,
    state: Arc<MockState>,
    shutdown: watch::Sender<bool>,
}

impl MockDevice {
    pub async fn spawn(options: MockOptions) -> Self {
        let state = Arc::new(MockState {
            relays: Mutex::new(vec![false; options.outputs]),
            options,
            hits: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            hooks: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .route("/status", get(rest_status))
            .route("/relay/:channel", get(rest_relay))
            .route("/rpc", post(rpc))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await;
        });

        Self {
            address,
            state,
            shutdown,
        }
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }

    pub fn relay(&self, channel: usize) -> bool {
        self.state.relays.lock()[channel]
    }

    pub fn set_relay(&self, channel: usize, on: bool) {
        self.state.relays.lock()[channel] = on;
    }

    pub fn created_hooks(&self) -> Vec<Value> {
        self.state.hooks.lock().clone()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn admit(state: &MockState) -> Option<Response> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = state.options.delay {
        tokio::time::sleep(delay).await;
    }
    state
        .options
        .unauthorized
        .then(|| StatusCode::UNAUTHORIZED.into_response())
}

async fn rest_status(State(state): State<Arc<MockState>>) -> Response {
    if let Some(rejected) = admit(&state).await {
        return rejected;
    }
    let options = &state.options;
    let relays = state.relays.lock().clone();
    let meters: Vec<Value> = (0..options.meters)
        .map(|n| {
            json!({
                "power": 10.0 * (n as f64 + 1.0),
                "voltage": 230.0,
                "total": 1000.0 * (n as f64 + 1.0),
            })
        })
        .collect();
    let (meter_key, other_key) = if options.energy_meters {
        ("emeters", "meters")
    } else {
        ("meters", "emeters")
    };

    let mut body = Map::new();
    body.insert("mac".into(), json!("A8032ABE54DC"));
    body.insert("uptime".into(), json!(3600));
    body.insert("update".into(), json!({"has_update": true}));
    body.insert("temperature".into(), json!(41.5));
    body.insert(
        "inputs".into(),
        Value::Array(
            (0..options.inputs)
                .map(|n| json!({"input": u8::from(n == 0)}))
                .collect(),
        ),
    );
    body.insert(
        "relays".into(),
        Value::Array(relays.iter().map(|on| json!({"ison": on})).collect()),
    );
    body.insert(meter_key.into(), Value::Array(meters));
    body.insert(other_key.into(), json!([]));
    Json(Value::Object(body)).into_response()
}

async fn rest_relay(
    State(state): State<Arc<MockState>>,
    Path(channel): Path<usize>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejected) = admit(&state).await {
        return rejected;
    }
    let mut relays = state.relays.lock();
    let Some(relay) = relays.get_mut(channel) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match query.get("turn").map(String::as_str) {
        Some("on") => *relay = true,
        Some("off") => *relay = false,
        _ => return StatusCode::BAD_REQUEST.into_response(),
    }
    Json(json!({"ison": *relay, "has_timer": false})).into_response()
}

async fn rpc(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    if let Some(rejected) = admit(&state).await {
        return rejected;
    }
    let method = request["method"].as_str().unwrap_or_default().to_owned();
    let params = &request["params"];
    let options = &state.options;

    if options.failing_method.as_deref() == Some(method.as_str()) {
        return Json(json!({
            "id": 0,
            "error": {"code": -103, "message": "Resource unavailable"}
        }))
        .into_response();
    }

    let result = match method.as_str() {
        "Shelly.GetStatus" => {
            let relays = state.relays.lock().clone();
            let mut status = Map::new();
            status.insert(
                "sys".into(),
                json!({"mac": "DCDA0CB4A7F0", "uptime": 7200, "restart_required": false}),
            );
            for n in 0..options.inputs {
                status.insert(format!("input:{n}"), json!({"id": n, "state": n == 0}));
            }
            for (n, on) in relays.iter().enumerate() {
                let scale = n as f64 + 1.0;
                status.insert(
                    format!("switch:{n}"),
                    json!({
                        "id": n,
                        "output": on,
                        "temperature": {"tC": 39.0 + scale},
                        "apower": 5.0 * scale,
                        "voltage": 231.2,
                        "current": 0.1 * scale,
                        "pf": 0.95,
                        "aenergy": {"total": 100.0 * scale},
                    }),
                );
            }
            Value::Object(status)
        }
        "Switch.Set" => {
            let channel = params["id"].as_u64().unwrap_or_default() as usize;
            let on = params["on"].as_bool().unwrap_or_default();
            let mut relays = state.relays.lock();
            let was_on = relays[channel];
            relays[channel] = on;
            json!({"was_on": was_on})
        }
        "EM1.GetStatus" => {
            let scale = params["id"].as_f64().unwrap_or_default() + 1.0;
            json!({
                "id": params["id"],
                "act_power": 100.0 * scale,
                "voltage": 229.5,
                "current": 0.45 * scale,
                "pf": 0.9,
            })
        }
        "EM1Data.GetStatus" => {
            let scale = params["id"].as_f64().unwrap_or_default() + 1.0;
            json!({"id": params["id"], "total_act_energy": 5000.0 * scale})
        }
        "Webhook.ListSupported" => {
            if options.supports_toggle {
                json!({"types": {"input.toggle_on": {}, "input.toggle_off": {}, "input.button_push": {}}})
            } else {
                json!({"types": {"input.button_push": {}}})
            }
        }
        "Webhook.DeleteAll" => {
            state.deletes.fetch_add(1, Ordering::SeqCst);
            state.hooks.lock().clear();
            json!({"rev": 1})
        }
        "Webhook.Create" => {
            let mut hooks = state.hooks.lock();
            hooks.push(params.clone());
            json!({"id": hooks.len(), "rev": hooks.len() + 1})
        }
        other => {
            return Json(json!({
                "id": 0,
                "error": {"code": 404, "message": format!("No handler for {other}")}
            }))
            .into_response();
        }
    };
    Json(json!({"id": 0, "src": "mock", "result": result})).into_response()
}

/// Liveness probe with a fixed answer that counts how often it was asked.
#[derive(Debug, Default)]
pub struct StubProbe {
    alive: bool,
    calls: AtomicUsize,
}

impl StubProbe {
    pub fn alive() -> Arc<Self> {
        Arc::new(Self {
            alive: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn dead() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for StubProbe {
    async fn is_alive(&self, _hostname: &str, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.alive
    }
}

/// Settings tuned for fast tests: short timeout, no retries.
pub fn fast_settings(devices: Vec<DeviceConfig>) -> ShellySettings {
    ShellySettings {
        response_timeout: Duration::from_secs(2),
        retry_count: 0,
        retry_delay: Duration::from_millis(20),
        devices,
        ..ShellySettings::default()
    }
}

pub fn live_device(name: &str, model: &str, port: u16) -> DeviceConfig {
    DeviceConfig {
        name: Some(name.into()),
        model: model.into(),
        hostname: Some("127.0.0.1".into()),
        port: Some(port),
        ..DeviceConfig::default()
    }
}

pub fn simulated_device(name: &str, model: &str) -> DeviceConfig {
    DeviceConfig {
        name: Some(name.into()),
        model: model.into(),
        simulate: Some(true),
        ..DeviceConfig::default()
    }
}

pub fn named(name: &str) -> ComponentConfig {
    ComponentConfig {
        name: Some(name.into()),
        ..ComponentConfig::default()
    }
}

pub async fn registry_with(
    settings: ShellySettings,
    probe: Arc<dyn LivenessProbe>,
) -> DeviceRegistry {
    DeviceRegistry::builder()
        .probe(probe)
        .build(settings)
        .await
        .unwrap()
}
