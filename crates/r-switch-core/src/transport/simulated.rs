//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! File backed stand-in for a device's network interface.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use r_switch_logging::{sw_debug, LogContext};
use serde::Deserialize;
use serde_with::rust::double_option;

use super::{DeviceTransport, TransportOutcome};
use crate::device::DeviceInfo;
use crate::error::{ControlError, Result};
use crate::reconcile::StatusReport;

/// Simulation file location for a device.
///
/// Every character that is not alphanumeric becomes `_`.
pub fn simulation_path(directory: &Path, name: &str, id: u32) -> PathBuf {
    let stem = if name.is_empty() {
        format!("ShellyDevice_{id}")
    } else {
        name.to_owned()
    };
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    directory.join(format!("{sanitized}.json"))
}

// Fields read back from a simulation file. Anything else in the file is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SimulationSnapshot {
    online: Option<bool>,
    mac_address: Option<String>,
    uptime: Option<u64>,
    restart_required: Option<bool>,
    inputs: Vec<SimulatedInput>,
    outputs: Vec<SimulatedOutput>,
    meters: Vec<SimulatedMeter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SimulatedInput {
    component_index: usize,
    #[serde(default)]
    state: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SimulatedOutput {
    component_index: usize,
    #[serde(default)]
    state: Option<bool>,
    #[serde(default)]
    temperature: Option<f64>,
}

// Outer `None` means the key was absent and the live reading is kept;
// `Some(None)` is an explicit `null` and clears it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SimulatedMeter {
    component_index: usize,
    #[serde(default, with = "double_option")]
    power: Option<Option<f64>>,
    #[serde(default, with = "double_option")]
    voltage: Option<Option<f64>>,
    #[serde(default, with = "double_option")]
    current: Option<Option<f64>>,
    #[serde(default, with = "double_option")]
    power_factor: Option<Option<f64>>,
    #[serde(default, with = "double_option")]
    energy: Option<Option<f64>>,
}

impl SimulationSnapshot {
    fn overlay(self, report: &mut StatusReport) {
        if let Some(online) = self.online {
            report.online = online;
        }
        if self.mac_address.is_some() {
            report.mac_address = self.mac_address;
        }
        if self.uptime.is_some() {
            report.uptime = self.uptime;
        }
        if self.restart_required.is_some() {
            report.restart_required = self.restart_required;
        }
        for input in self.inputs {
            if let (Some(slot), Some(state)) =
                (report.inputs.get_mut(input.component_index), input.state)
            {
                slot.state = state;
            }
        }
        for output in self.outputs {
            if let Some(slot) = report.outputs.get_mut(output.component_index) {
                if let Some(state) = output.state {
                    slot.state = state;
                }
                if output.temperature.is_some() {
                    slot.temperature = output.temperature;
                }
            }
        }
        for meter in self.meters {
            if let Some(slot) = report.meters.get_mut(meter.component_index) {
                let fields = [
                    (&mut slot.power, meter.power),
                    (&mut slot.voltage, meter.voltage),
                    (&mut slot.current, meter.current),
                    (&mut slot.power_factor, meter.power_factor),
                    (&mut slot.energy, meter.energy),
                ];
                for (field, value) in fields {
                    if let Some(value) = value {
                        *field = value;
                    }
                }
            }
        }
    }
}

/// Reads and writes device state from a JSON file instead of the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTransport;

impl SimulatedTransport {
    fn path<'a>(&self, info: &'a DeviceInfo) -> Result<&'a Path> {
        info.device.simulation_file.as_deref().ok_or_else(|| {
            ControlError::protocol(format!(
                "no simulation file path available for device {}",
                info.device.label
            ))
        })
    }

    /// Write the full snapshot to the device's simulation file.
    pub async fn export(&self, info: &DeviceInfo) -> Result<()> {
        let path = self.path(info)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ControlError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        let document = serde_json::to_string_pretty(info)?;
        tokio::fs::write(path, document)
            .await
            .map_err(|source| ControlError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let ctx = LogContext::new()
            .with_device(&info.device.label)
            .with_protocol("SIM");
        sw_debug!(context = ctx, "simulation state exported to {}", path.display());
        Ok(())
    }

    /// Build a report from the simulation file, creating it from `info` if
    /// it does not exist yet.
    pub async fn import(&self, info: &DeviceInfo) -> Result<StatusReport> {
        let path = self.path(info)?;
        let mut report = StatusReport::from_info(info);
        let ctx = LogContext::new()
            .with_device(&info.device.label)
            .with_protocol("SIM");

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                sw_debug!(context = ctx, "simulation file {} missing, creating it", path.display());
                self.export(info).await?;
                return Ok(report);
            }
            Err(source) => {
                return Err(ControlError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let snapshot: SimulationSnapshot = serde_json::from_str(&contents).map_err(|err| {
            ControlError::protocol(format!(
                "invalid JSON in simulation file {}: {err}",
                path.display()
            ))
        })?;
        snapshot.overlay(&mut report);
        sw_debug!(context = ctx, "simulation state imported from {}", path.display());
        Ok(report)
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "SIM"
    }

    async fn fetch_status(&self, info: &DeviceInfo) -> Result<TransportOutcome<StatusReport>> {
        self.import(info).await.map(TransportOutcome::Online)
    }

    async fn switch_output(
        &self,
        info: &DeviceInfo,
        channel: usize,
        on: bool,
    ) -> Result<TransportOutcome<()>> {
        let mut updated = info.clone();
        for output in updated
            .outputs
            .iter_mut()
            .filter(|output| output.component_index == channel)
        {
            output.state = on;
        }
        self.export(&updated).await?;
        Ok(TransportOutcome::Online(()))
    }
}
