//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for operators interacting with Shelly devices."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use prometheus::Registry;
use r_switch_common::{ConfigWatcher, LoadedAppConfig};
use r_switch_core::{DeviceIdentity, DeviceRegistry};
use r_switch_net::WebhookListenerBuilder;
use tokio::signal;
use tracing::{info, warn};

const CONFIG_POLL: Duration = Duration::from_secs(5);

/// Serve webhook callbacks and print each event until Ctrl-C.
///
/// Returns immediately when `WebhooksEnabled` is off. The configuration file
/// is polled; device changes rebuild the registry, anything else only swaps
/// the request settings.
pub async fn run(
    mut registry: DeviceRegistry,
    loaded: &LoadedAppConfig,
    install: bool,
    metrics: Option<Arc<Registry>>,
) -> Result<()> {
    if !registry.settings().webhooks.webhooks_enabled {
        warn!(config_path = %loaded.source.display(), "webhooks are disabled, listener not started");
        println!("webhooks are disabled (WebhooksEnabled: false), nothing to listen for");
        return Ok(());
    }

    let queue = registry.webhook_queue();
    let mut builder =
        WebhookListenerBuilder::from_settings(&registry.settings().webhooks, queue.clone());
    if let Some(metrics) = metrics {
        builder = builder.with_metrics_registry(metrics);
    }
    let handle = builder.spawn().await?;
    println!("listening for webhooks on {}", handle.local_addr());

    if install {
        install_all(&mut registry).await;
    }

    let mut watcher = ConfigWatcher::new(loaded);
    let mut poll = tokio::time::interval(CONFIG_POLL);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = poll.tick() => reload(&mut registry, &mut watcher).await,
            _ = queue.wait(Duration::from_secs(1)) => {}
        }
        while let Some(event) = registry.pull_webhook_event() {
            println!(
                "{} {:<24} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                event.component,
                event.event
            );
        }
    }

    info!("shutting down webhook listener");
    handle.shutdown().await
}

async fn install_all(registry: &mut DeviceRegistry) {
    let webhooks = registry.settings().webhooks.clone();
    let targets: Vec<(DeviceIdentity, String)> = registry
        .devices()
        .iter()
        .map(|device| (DeviceIdentity::from(device), device.label.clone()))
        .collect();
    for (target, label) in targets {
        match registry.install_input_webhooks(target, &webhooks).await {
            Ok(0) => {}
            Ok(count) => println!("{label}: {count} webhook(s) installed"),
            Err(err) => eprintln!("{label}: {err}"),
        }
    }
}

async fn reload(registry: &mut DeviceRegistry, watcher: &mut ConfigWatcher) {
    let config = match watcher.check_for_changes() {
        Ok(Some(config)) => config,
        Ok(None) => return,
        Err(err) => {
            warn!(path = %watcher.path().display(), error = %err, "configuration reload failed");
            return;
        }
    };
    let Some(settings) = config.shelly_devices else {
        warn!(path = %watcher.path().display(), "reloaded configuration has no ShellyDevices section");
        return;
    };
    let rebuild = settings.devices != registry.settings().devices;
    match registry.apply_settings(settings, rebuild).await {
        Ok(()) => info!(rebuild, "configuration reloaded"),
        Err(err) => warn!(
            error = %err,
            devices = registry.devices().len(),
            "reloaded configuration rejected, previous devices kept"
        ),
    }
}
