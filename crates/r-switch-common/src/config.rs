//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use r_switch_logging::Verbosity;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;

fn default_response_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_count() -> u32 {
    1
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_ping_allowed() -> bool {
    true
}

fn default_simulation_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_webhook_port() -> u16 {
    8787
}

fn default_webhook_path() -> String {
    "/shelly/webhook".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_console_verbosity() -> Verbosity {
    Verbosity::Summary
}

fn default_file_verbosity() -> Verbosity {
    Verbosity::Detailed
}

/// Primary configuration object for R-Switch tooling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub shelly_devices: Option<ShellySettings>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

/// On-disk encodings understood by the loader, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(anyhow!("unsupported config format: {}", path.display())),
        }
    }

    pub fn parse(&self, contents: &str) -> Result<AppConfig> {
        let config = match self {
            ConfigFormat::Yaml => serde_yaml::from_str(contents)?,
            ConfigFormat::Toml => toml::from_str(contents)?,
            ConfigFormat::Json => serde_json::from_str(contents)?,
        };
        Ok(config)
    }
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_SWITCH_CONFIG";

    /// Load configuration from disk, respecting the `R_SWITCH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let format = ConfigFormat::from_path(path)?;
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        format
            .parse(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Shelly settings, or an error if the section is absent.
    pub fn shelly(&self) -> Result<&ShellySettings> {
        self.shelly_devices
            .as_ref()
            .ok_or_else(|| anyhow!("configuration has no ShellyDevices section"))
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    /// Parses YAML, the native format of operator config files.
    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        ConfigFormat::Yaml
            .parse(content)
            .with_context(|| "failed to parse configuration")
    }
}

/// Registry-wide device communication settings plus the device list.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ShellySettings {
    #[serde(default = "default_response_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub response_timeout: Duration,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub retry_delay: Duration,
    #[serde(default = "default_ping_allowed")]
    pub ping_allowed: bool,
    #[serde(default = "default_simulation_directory")]
    pub simulation_directory: PathBuf,
    #[serde(flatten)]
    pub webhooks: WebhookSettings,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for ShellySettings {
    fn default() -> Self {
        Self {
            response_timeout: default_response_timeout(),
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            ping_allowed: default_ping_allowed(),
            simulation_directory: default_simulation_directory(),
            webhooks: WebhookSettings::default(),
            devices: Vec::new(),
        }
    }
}

/// Where devices should deliver input webhooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookSettings {
    #[serde(default)]
    pub webhooks_enabled: bool,
    #[serde(default)]
    pub webhook_host: Option<String>,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            webhooks_enabled: false,
            webhook_host: None,
            webhook_port: default_webhook_port(),
            webhook_path: default_webhook_path(),
        }
    }
}

/// One physical device as declared by the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, rename = "ID")]
    pub id: Option<u32>,
    #[serde(default)]
    pub simulate: Option<bool>,
    #[serde(default)]
    pub expect_offline: Option<bool>,
    #[serde(default)]
    pub inputs: Option<Vec<ComponentConfig>>,
    #[serde(default)]
    pub outputs: Option<Vec<ComponentConfig>>,
    #[serde(default)]
    pub meters: Option<Vec<ComponentConfig>>,
}

/// Operator supplied identity for an input, output or meter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "ID")]
    pub id: Option<u32>,
    #[serde(default)]
    pub webhooks: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_console_verbosity")]
    pub console_verbosity: Verbosity,
    #[serde(default = "default_file_verbosity")]
    pub file_verbosity: Verbosity,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            console_verbosity: default_console_verbosity(),
            file_verbosity: default_file_verbosity(),
        }
    }
}

/// Detects edits to a loaded configuration file by modification time.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(loaded: &LoadedAppConfig) -> Self {
        let last_modified = modified_time(&loaded.source);
        Self {
            path: loaded.source.clone(),
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if it is newer than the last load.
    pub fn check_for_changes(&mut self) -> Result<Option<AppConfig>> {
        let current = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("unable to stat config file {}", self.path.display()))?;
        let changed = match self.last_modified {
            Some(previous) => current > previous,
            None => true,
        };
        if !changed {
            return Ok(None);
        }
        let config = AppConfig::from_path(&self.path)?;
        self.last_modified = Some(current);
        debug!(config_path = %self.path.display(), "configuration reloaded");
        Ok(Some(config))
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const SAMPLE: &str = r#"
Logging:
  ConsoleVerbosity: debug
ShellyDevices:
  ResponseTimeout: 0.5
  RetryCount: 3
  PingAllowed: false
  WebhookHost: 192.168.1.20
  Devices:
    - Name: Pool Pump
      Model: ShellyPlus1PM
      Hostname: 192.168.1.50
      Outputs:
        - Name: Pump Relay
          ID: 7
    - Model: Shelly1PM
      Simulate: true
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.logging.console_verbosity, Verbosity::Debug);
        assert_eq!(config.logging.file_verbosity, Verbosity::Detailed);

        let shelly = config.shelly().unwrap();
        assert_eq!(shelly.response_timeout, Duration::from_millis(500));
        assert_eq!(shelly.retry_count, 3);
        assert_eq!(shelly.retry_delay, Duration::from_secs(2));
        assert!(!shelly.ping_allowed);
        assert_eq!(shelly.webhooks.webhook_host.as_deref(), Some("192.168.1.20"));
        assert_eq!(shelly.webhooks.webhook_port, 8787);
        assert_eq!(shelly.devices.len(), 2);

        let pump = &shelly.devices[0];
        assert_eq!(pump.name.as_deref(), Some("Pool Pump"));
        assert_eq!(pump.outputs.as_ref().unwrap()[0].id, Some(7));
        assert!(pump.inputs.is_none());
        assert_eq!(shelly.devices[1].simulate, Some(true));
    }

    #[test]
    fn missing_shelly_section_is_reported() {
        let config: AppConfig = "Logging: {}".parse().unwrap();
        assert!(config.shelly().is_err());
    }

    #[test]
    fn loads_toml_by_extension() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            "[ShellyDevices]\nRetryDelay = 1\n\n[[ShellyDevices.Devices]]\nModel = \"Shelly1\"\nHostname = \"10.0.0.2\"\n"
        )?;
        file.flush()?;
        let config = AppConfig::from_path(file.path())?;
        let shelly = config.shelly()?;
        assert_eq!(shelly.retry_delay, Duration::from_secs(1));
        assert_eq!(shelly.devices[0].model, "Shelly1");
        Ok(())
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = NamedTempFile::new().unwrap();
        assert!(AppConfig::from_path(file.path()).is_err());
    }

    #[test]
    fn load_reports_inspected_candidates() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = AppConfig::load(&[missing]).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn watcher_detects_rewrites() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.yaml");
        fs::write(&path, SAMPLE)?;
        let loaded = LoadedAppConfig {
            config: AppConfig::from_path(&path)?,
            source: path.clone(),
        };
        let mut watcher = ConfigWatcher::new(&loaded);
        assert!(watcher.check_for_changes()?.is_none());

        // Push the timestamp forward explicitly; coarse filesystem clocks
        // would otherwise make the rewrite invisible.
        fs::write(&path, "ShellyDevices:\n  RetryCount: 4\n")?;
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options().write(true).open(&path)?.set_modified(later)?;

        let reloaded = watcher.check_for_changes()?.expect("change detected");
        assert_eq!(reloaded.shelly()?.retry_count, 4);
        assert!(watcher.check_for_changes()?.is_none());
        Ok(())
    }
}
