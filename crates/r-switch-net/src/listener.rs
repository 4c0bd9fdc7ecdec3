//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Network connectivity and edge adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use r_switch_common::WebhookSettings;
use r_switch_core::{WebhookEvent, WebhookQueue};
use r_switch_logging::{sw_debug, sw_info, sw_warn, LogContext};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const METRICS_PATH: &str = "/metrics";

struct ListenerState {
    queue: WebhookQueue,
    registry: Option<Arc<Registry>>,
    received: Option<IntCounterVec>,
}

/// Builder used to configure and spawn the webhook listener.
#[derive(Clone)]
pub struct WebhookListenerBuilder {
    listen: SocketAddr,
    path: String,
    queue: WebhookQueue,
    metrics: Option<Arc<Registry>>,
}

impl WebhookListenerBuilder {
    /// Listen on `listen`, accepting callbacks at `path` and pushing them onto `queue`.
    pub fn new(listen: SocketAddr, path: impl Into<String>, queue: WebhookQueue) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            listen,
            path,
            queue,
            metrics: None,
        }
    }

    /// Listen on all interfaces at the configured port and path.
    pub fn from_settings(settings: &WebhookSettings, queue: WebhookQueue) -> Self {
        Self::new(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.webhook_port)),
            settings.webhook_path.clone(),
            queue,
        )
    }

    /// Count received events and expose the registry at `/metrics`.
    pub fn with_metrics_registry(mut self, registry: Arc<Registry>) -> Self {
        self.metrics = Some(registry);
        self
    }

    pub async fn spawn(self) -> anyhow::Result<WebhookListenerHandle> {
        if self.path == METRICS_PATH {
            anyhow::bail!("webhook path {METRICS_PATH} is reserved for the metrics endpoint");
        }
        let received = match &self.metrics {
            Some(registry) => {
                let counter = IntCounterVec::new(
                    Opts::new(
                        "shelly_webhook_events_total",
                        "Webhook events received from devices",
                    ),
                    &["event"],
                )?;
                registry.register(Box::new(counter.clone()))?;
                Some(counter)
            }
            None => None,
        };

        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        sw_info!("webhook listener on {local_addr}{}", self.path);

        let state = ListenerState {
            queue: self.queue,
            registry: self.metrics,
            received,
        };
        let router = Router::new()
            .route(&self.path, get(receive).post(receive))
            .route(METRICS_PATH, get(get_metrics))
            .with_state(Arc::new(state));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                sw_warn!("webhook listener exited with error: {err}");
            }
        });

        Ok(WebhookListenerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`WebhookListenerBuilder::spawn`].
pub struct WebhookListenerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl WebhookListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

/// Accepts `event` and `component` from the query string or a JSON body
/// (`{"Event": .., "Component": ..}`, lowercase keys also accepted).
async fn receive(
    State(state): State<Arc<ListenerState>>,
    Query(mut fields): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => {
                for (key, alias) in [("event", "Event"), ("component", "Component")] {
                    let value = map.get(key).or_else(|| map.get(alias));
                    if let Some(value) = value.and_then(Value::as_str) {
                        fields.entry(key.to_owned()).or_insert_with(|| value.to_owned());
                    }
                }
            }
            _ => return (StatusCode::BAD_REQUEST, "body must be a JSON object").into_response(),
        }
    }

    let (Some(event), Some(component)) = (fields.remove("event"), fields.remove("component"))
    else {
        return (StatusCode::BAD_REQUEST, "event and component are required").into_response();
    };

    let ctx = LogContext::new().with_component(&component);
    sw_debug!(context = ctx, "webhook {event} received");
    if let Some(counter) = &state.received {
        counter.with_label_values(&[event.as_str()]).inc();
    }
    state.queue.push(WebhookEvent::new(event, component));
    StatusCode::OK.into_response()
}

async fn get_metrics(State(state): State<Arc<ListenerState>>) -> Response {
    let Some(registry) = &state.registry else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            sw_warn!("failed to encode metrics: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use serde_json::json;

    async fn spawn(queue: WebhookQueue, registry: Option<Arc<Registry>>) -> WebhookListenerHandle {
        let mut builder =
            WebhookListenerBuilder::new("127.0.0.1:0".parse().unwrap(), "shelly/webhook", queue);
        if let Some(registry) = registry {
            builder = builder.with_metrics_registry(registry);
        }
        builder.spawn().await.unwrap()
    }

    #[tokio::test]
    async fn query_and_json_callbacks_are_queued_in_order() {
        let queue = WebhookQueue::new();
        let handle = spawn(queue.clone(), None).await;
        let base = format!("http://{}/shelly/webhook", handle.local_addr());
        let client = Client::new();

        let resp = client
            .get(format!("{base}?event=input.toggle_on&component=Porch+Switch"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = client
            .post(&base)
            .json(&json!({"Event": "input.toggle_off", "Component": "Porch Switch"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(
            queue.pop(),
            Some(WebhookEvent::new("input.toggle_on", "Porch Switch"))
        );
        assert_eq!(
            queue.pop(),
            Some(WebhookEvent::new("input.toggle_off", "Porch Switch"))
        );
        assert!(queue.pop().is_none());

        let missing = client.get(format!("{base}?event=x")).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert!(queue.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn metrics_path_cannot_receive_webhooks() {
        let err = WebhookListenerBuilder::new(
            "127.0.0.1:0".parse().unwrap(),
            "metrics",
            WebhookQueue::new(),
        )
        .spawn()
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("reserved"), "{err}");
    }

    #[tokio::test]
    async fn metrics_count_received_events() {
        let registry = Arc::new(Registry::new());
        let queue = WebhookQueue::new();
        let handle = spawn(queue, Some(registry)).await;
        let base = format!("http://{}", handle.local_addr());
        let client = Client::new();

        client
            .get(format!(
                "{base}/shelly/webhook?event=input.toggle_on&component=Gate"
            ))
            .send()
            .await
            .unwrap();
        let metrics = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("shelly_webhook_events_total{event=\"input.toggle_on\"} 1"));

        handle.shutdown().await.unwrap();
    }
}
