//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for operators interacting with Shelly devices."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use r_switch_common::{init_tracing, AppConfig, LoadedAppConfig};
use r_switch_core::{ComponentIdentity, DeviceIdentity, DeviceRegistry, TransportMetrics};
use r_switch_logging::{log_fatal_error, log_message, FatalErrorTracker, Verbosity};
use r_switch_models::{DescribeMode, ModelLibrary};
use tracing::info;

mod listen;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Shelly smart-switch control utility",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long = "models-file",
        value_name = "FILE",
        help = "Use this model library instead of the bundled one"
    )]
    models_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the supported Shelly models.
    Models {
        /// Only describe this model.
        #[arg(long)]
        model: Option<String>,
        /// Include component counts and capabilities.
        #[arg(long)]
        detailed: bool,
    },
    /// Refresh and print the status of one or all devices.
    Status {
        /// Device ID or name.
        #[arg(long)]
        device: Option<String>,
    },
    /// Print the full record of a device as JSON.
    Info {
        /// Device ID or name.
        device: String,
        /// Print the last known state instead of querying the device.
        #[arg(long)]
        no_refresh: bool,
    },
    /// Switch an output relay.
    Set {
        /// Output ID or name.
        output: String,
        #[arg(value_enum)]
        state: SwitchState,
    },
    /// Replace the input toggle webhooks on one or all devices.
    InstallWebhooks {
        /// Device ID or name.
        #[arg(long)]
        device: Option<String>,
    },
    /// Receive webhook events and print them until interrupted.
    Listen {
        /// Install input webhooks on every device before listening.
        #[arg(long)]
        install: bool,
        /// Expose Prometheus metrics on the listener's `/metrics` route.
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SwitchState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Models { model, detailed } = &cli.command {
        r_switch_logging::init();
        let library = load_models(cli.models_file.as_ref())?;
        let mode = if *detailed {
            DescribeMode::Detailed
        } else {
            DescribeMode::Brief
        };
        println!("{}", library.describe(mode, model.as_deref()));
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("config.yaml"));
    candidates.push(PathBuf::from("config.toml"));
    let loaded = AppConfig::load_with_source(&candidates)?;
    init_tracing("r-switchctl", &loaded.config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    let tracker = FatalErrorTracker::new(loaded.config.logging.directory.join("r-switchctl.fatal"));
    if tracker.has_fatal_error() {
        log_message(
            "previous r-switchctl run ended with a fatal error",
            Verbosity::Warning,
        );
    }
    match run(cli, &loaded).await {
        Ok(()) => {
            let _ = tracker.clear();
            Ok(())
        }
        Err(err) => {
            log_fatal_error(&format!("{err:#}"), Some(&tracker));
            Err(err)
        }
    }
}

async fn run(cli: Cli, loaded: &LoadedAppConfig) -> Result<()> {
    match cli.command {
        // Answered above without a configuration file.
        Commands::Models { .. } => {}
        Commands::Status { device } => {
            let mut registry = open_registry(loaded, cli.models_file.as_ref(), None).await?;
            let selected = device.as_deref().map(device_identity);
            match &selected {
                Some(identity) => {
                    if let Err(err) = registry.refresh_status(identity).await {
                        eprintln!("{identity}: {err}");
                    }
                }
                None => {
                    for (label, result) in registry.refresh_all().await {
                        if let Err(err) = result {
                            eprintln!("{label}: {err}");
                        }
                    }
                }
            }
            println!("{}", registry.print_device_status(selected)?);
        }
        Commands::Info { device, no_refresh } => {
            let mut registry = open_registry(loaded, cli.models_file.as_ref(), None).await?;
            let info = registry
                .get_device_information(device_identity(&device), !no_refresh)
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Set { output, state } => {
            let mut registry = open_registry(loaded, cli.models_file.as_ref(), None).await?;
            let on = matches!(state, SwitchState::On);
            let (succeeded, changed) = registry
                .change_output(component_identity(&output), on)
                .await?;
            match (succeeded, changed) {
                (false, _) => println!("{output}: device offline, nothing changed"),
                (true, true) => println!("{output}: switched {}", if on { "on" } else { "off" }),
                (true, false) => println!("{output}: already {}", if on { "on" } else { "off" }),
            }
        }
        Commands::InstallWebhooks { device } => {
            let mut registry = open_registry(loaded, cli.models_file.as_ref(), None).await?;
            let targets: Vec<DeviceIdentity> = match device {
                Some(device) => vec![device_identity(&device)],
                None => registry.devices().iter().map(DeviceIdentity::from).collect(),
            };
            let webhooks = registry.settings().webhooks.clone();
            if !webhooks.webhooks_enabled {
                println!("webhooks are disabled (WebhooksEnabled: false), nothing installed");
                return Ok(());
            }
            for target in targets {
                let label = registry.get_device(&target)?.label.clone();
                match registry.install_input_webhooks(&target, &webhooks).await {
                    Ok(count) => println!("{label}: {count} webhook(s) installed"),
                    Err(err) => eprintln!("{label}: {err}"),
                }
            }
        }
        Commands::Listen { install, metrics } => {
            let prometheus = metrics.then(|| Arc::new(prometheus::Registry::new()));
            let transport_metrics = prometheus
                .as_deref()
                .map(TransportMetrics::new)
                .transpose()?;
            let registry =
                open_registry(loaded, cli.models_file.as_ref(), transport_metrics).await?;
            listen::run(registry, loaded, install, prometheus).await?;
        }
    }
    Ok(())
}

fn load_models(path: Option<&PathBuf>) -> Result<ModelLibrary> {
    let library = match path {
        Some(path) => ModelLibrary::from_path(path)?,
        None => ModelLibrary::bundled()?,
    };
    Ok(library)
}

async fn open_registry(
    loaded: &LoadedAppConfig,
    models_file: Option<&PathBuf>,
    metrics: Option<TransportMetrics>,
) -> Result<DeviceRegistry> {
    let settings = loaded
        .config
        .shelly()
        .with_context(|| format!("in {}", loaded.source.display()))?
        .clone();
    let mut builder = DeviceRegistry::builder().models(Arc::new(load_models(models_file)?));
    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }
    Ok(builder.build(settings).await?)
}

/// Numeric arguments are IDs, anything else is a name.
fn device_identity(raw: &str) -> DeviceIdentity {
    raw.parse::<u32>()
        .map(DeviceIdentity::Id)
        .unwrap_or_else(|_| DeviceIdentity::Name(raw.to_owned()))
}

fn component_identity(raw: &str) -> ComponentIdentity {
    raw.parse::<u32>()
        .map(ComponentIdentity::Id)
        .unwrap_or_else(|_| ComponentIdentity::Name(raw.to_owned()))
}
