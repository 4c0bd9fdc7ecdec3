//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Translation of protocol payloads into the device model.
//!
//! Every transport produces a [`StatusReport`]; [`apply_report`] and
//! [`aggregate`] are the only code that writes observed state into the
//! registry's records.

use serde_json::Value;

use crate::device::{Device, DeviceInfo, Input, Meter, Output};
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputReading {
    pub state: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputReading {
    pub state: bool,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterReading {
    pub power: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power_factor: Option<f64>,
    pub energy: Option<f64>,
}

/// Protocol-neutral device status. Channel vectors are indexed by
/// component index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub online: bool,
    pub mac_address: Option<String>,
    pub uptime: Option<u64>,
    pub restart_required: Option<bool>,
    /// Device level temperature, reported by Gen-1 firmware only.
    pub temperature: Option<f64>,
    pub inputs: Vec<InputReading>,
    pub outputs: Vec<OutputReading>,
    pub meters: Vec<MeterReading>,
}

impl StatusReport {
    /// Report reproducing the state already held in `info`.
    pub fn from_info(info: &DeviceInfo) -> Self {
        let device = &info.device;
        let mut report = StatusReport {
            online: device.online,
            mac_address: device.mac_address.clone(),
            uptime: device.uptime,
            restart_required: device.restart_required,
            temperature: None,
            inputs: vec![InputReading::default(); device.input_count],
            outputs: vec![OutputReading::default(); device.output_count],
            meters: vec![MeterReading::default(); device.meter_count],
        };
        for input in &info.inputs {
            if let Some(slot) = report.inputs.get_mut(input.component_index) {
                slot.state = input.state;
            }
        }
        for output in &info.outputs {
            if let Some(slot) = report.outputs.get_mut(output.component_index) {
                *slot = OutputReading {
                    state: output.state,
                    temperature: output.temperature,
                };
            }
        }
        for meter in &info.meters {
            if let Some(slot) = report.meters.get_mut(meter.component_index) {
                *slot = MeterReading {
                    power: meter.power,
                    voltage: meter.voltage,
                    current: meter.current,
                    power_factor: meter.power_factor,
                    energy: meter.energy,
                };
            }
        }
        report
    }
}

/// Booleans arrive as `true/false` from RPC firmware and `0/1` from Gen-1.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Parse a `Shelly.GetStatus` result plus, for separately metered devices,
/// the per-channel `EM1.GetStatus` and `EM1Data.GetStatus` results.
pub fn parse_rpc_status(
    info: &DeviceInfo,
    status: &Value,
    em: &[Value],
    em_data: &[Value],
) -> Result<StatusReport> {
    let device = &info.device;
    let sys = &status["sys"];

    let inputs = (0..device.input_count)
        .map(|n| InputReading {
            state: truthy(&status[format!("input:{n}").as_str()]["state"]),
        })
        .collect();

    let outputs = (0..device.output_count)
        .map(|n| {
            let switch = &status[format!("switch:{n}").as_str()];
            OutputReading {
                state: truthy(&switch["output"]),
                temperature: switch["temperature"]["tC"].as_f64(),
            }
        })
        .collect();

    let meters = if device.meters_seperate {
        if em.len() < device.meter_count || em_data.len() < device.meter_count {
            return Err(ControlError::protocol(format!(
                "device {} is online, but meters are separate and at least one EM1.GetStatus call failed",
                device.label
            )));
        }
        (0..device.meter_count)
            .map(|n| MeterReading {
                power: em[n]["act_power"].as_f64(),
                voltage: em[n]["voltage"].as_f64(),
                current: em[n]["current"].as_f64(),
                power_factor: em[n]["pf"].as_f64(),
                energy: em_data[n]["total_act_energy"].as_f64(),
            })
            .collect()
    } else {
        (0..device.meter_count)
            .map(|n| {
                let switch = &status[format!("switch:{n}").as_str()];
                MeterReading {
                    power: switch["apower"].as_f64(),
                    voltage: switch["voltage"].as_f64(),
                    current: switch["current"].as_f64(),
                    power_factor: switch["pf"].as_f64(),
                    energy: switch["aenergy"]["total"].as_f64(),
                }
            })
            .collect()
    };

    Ok(StatusReport {
        online: true,
        mac_address: sys["mac"].as_str().map(str::to_owned),
        uptime: sys["uptime"].as_u64(),
        restart_required: Some(truthy(&sys["restart_required"])),
        temperature: None,
        inputs,
        outputs,
        meters,
    })
}

/// Parse a Gen-1 `/status` payload.
pub fn parse_rest_status(info: &DeviceInfo, status: &Value) -> Result<StatusReport> {
    let device = &info.device;
    if !device.meters_seperate {
        return Err(ControlError::protocol(format!(
            "Shelly model {} (device {}) is configured with combined meters and switches, which REST devices do not support",
            device.model, device.label
        )));
    }

    let temperature = status["temperature"].as_f64();

    let inputs = (0..device.input_count)
        .map(|n| InputReading {
            state: truthy(&status["inputs"][n]["input"]),
        })
        .collect();

    let outputs = (0..device.output_count)
        .map(|n| OutputReading {
            state: truthy(&status["relays"][n]["ison"]),
            temperature,
        })
        .collect();

    // Switch firmware lists meters under `meters`, energy meters under `emeters`.
    let meter_key = match status["emeters"].as_array() {
        Some(entries) if !entries.is_empty() => "emeters",
        _ => "meters",
    };
    let meters = (0..device.meter_count)
        .map(|n| {
            let entry = status[meter_key].get(n).ok_or_else(|| {
                ControlError::protocol(format!(
                    "status payload for device {} has no {meter_key}[{n}] entry",
                    device.label
                ))
            })?;
            Ok(MeterReading {
                power: entry["power"].as_f64(),
                voltage: entry["voltage"].as_f64(),
                current: None,
                power_factor: None,
                energy: entry["total"].as_f64(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StatusReport {
        online: true,
        mac_address: status["mac"].as_str().map(str::to_owned),
        uptime: status["uptime"].as_u64(),
        restart_required: Some(truthy(&status["update"]["has_update"])),
        temperature,
        inputs,
        outputs,
        meters,
    })
}

/// Write a report into a device and the components that belong to it.
pub fn apply_report<'a>(
    report: &StatusReport,
    device: &mut Device,
    inputs: impl IntoIterator<Item = &'a mut Input>,
    outputs: impl IntoIterator<Item = &'a mut Output>,
    meters: impl IntoIterator<Item = &'a mut Meter>,
) {
    device.online = report.online;
    device.mac_address = report.mac_address.clone();
    device.uptime = report.uptime;
    device.restart_required = report.restart_required;
    if device.temperature_monitoring && report.temperature.is_some() {
        device.temperature = report.temperature;
    }

    for input in inputs {
        if let Some(reading) = report.inputs.get(input.component_index) {
            input.state = reading.state;
        }
    }
    for output in outputs {
        if let Some(reading) = report.outputs.get(output.component_index) {
            output.state = reading.state;
            if device.temperature_monitoring {
                output.temperature = reading.temperature;
            }
        }
    }
    for meter in meters {
        if let Some(reading) = report.meters.get(meter.component_index) {
            meter.power = reading.power;
            meter.voltage = reading.voltage;
            meter.current = reading.current;
            meter.power_factor = reading.power_factor;
            meter.energy = reading.energy;
        }
    }
}

/// Recompute total power, total energy and mean output temperature.
///
/// Unset meter readings count as zero.
pub fn aggregate<'a>(
    device: &mut Device,
    outputs: impl IntoIterator<Item = &'a Output>,
    meters: impl IntoIterator<Item = &'a Meter>,
) {
    if device.meter_count > 0 {
        let (power, energy) = meters.into_iter().fold((0.0, 0.0), |(p, e), meter| {
            (p + meter.power.unwrap_or(0.0), e + meter.energy.unwrap_or(0.0))
        });
        device.total_power = power;
        device.total_energy = energy;
    }

    if device.temperature_monitoring && device.output_count > 0 {
        let temperatures: Vec<f64> = outputs
            .into_iter()
            .filter_map(|output| output.temperature)
            .collect();
        device.temperature = if temperatures.is_empty() {
            None
        } else {
            Some(temperatures.iter().sum::<f64>() / temperatures.len() as f64)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_switch_models::ModelLibrary;
    use serde_json::json;

    fn info_for(model: &str) -> DeviceInfo {
        let library = ModelLibrary::bundled().unwrap();
        let mut device = Device::from_descriptor(0, library.lookup(model).unwrap());
        device.name = "Test".into();
        device.id = 1;
        device.label = Device::label_for("Test", 1);
        let seperate = device.meters_seperate;
        DeviceInfo {
            inputs: (0..device.input_count)
                .map(|n| Input {
                    device_index: 0,
                    component_index: n,
                    id: n as u32 + 1,
                    name: format!("Input {}", n + 1),
                    state: false,
                    webhooks: false,
                })
                .collect(),
            outputs: (0..device.output_count)
                .map(|n| Output {
                    device_index: 0,
                    component_index: n,
                    id: n as u32 + 1,
                    name: format!("Output {}", n + 1),
                    state: false,
                    has_meter: !seperate,
                    temperature: None,
                })
                .collect(),
            meters: (0..device.meter_count)
                .map(|n| Meter {
                    device_index: 0,
                    component_index: n,
                    id: n as u32 + 1,
                    name: format!("Meter {}", n + 1),
                    on_output: !seperate,
                    power: None,
                    voltage: None,
                    current: None,
                    power_factor: None,
                    energy: None,
                })
                .collect(),
            device,
        }
    }

    fn apply(info: &mut DeviceInfo, report: &StatusReport) {
        apply_report(
            report,
            &mut info.device,
            info.inputs.iter_mut(),
            info.outputs.iter_mut(),
            info.meters.iter_mut(),
        );
        aggregate(&mut info.device, info.outputs.iter(), info.meters.iter());
    }

    #[test]
    fn rpc_status_with_combined_meters() {
        let mut info = info_for("ShellyPlus2PM");
        let status = json!({
            "sys": {"mac": "A8032ABE54DC", "uptime": 3600, "restart_required": false},
            "input:0": {"id": 0, "state": true},
            "input:1": {"id": 1, "state": null},
            "switch:0": {"output": true, "apower": 120.5, "voltage": 231.2, "current": 0.52,
                         "pf": 0.98, "aenergy": {"total": 1500.25}, "temperature": {"tC": 40.0}},
            "switch:1": {"output": false, "apower": 0.0, "voltage": 231.0,
                         "aenergy": {"total": 10.0}, "temperature": {"tC": 44.0}}
        });
        let report = parse_rpc_status(&info, &status, &[], &[]).unwrap();
        apply(&mut info, &report);

        assert!(info.device.online);
        assert_eq!(info.device.mac_address.as_deref(), Some("A8032ABE54DC"));
        assert_eq!(info.device.uptime, Some(3600));
        assert_eq!(info.device.restart_required, Some(false));
        assert!(info.inputs[0].state);
        assert!(!info.inputs[1].state);
        assert!(info.outputs[0].state);
        assert_eq!(info.meters[0].current, Some(0.52));
        assert_eq!(info.meters[1].power_factor, None);
        assert_eq!(info.device.total_power, 120.5);
        assert_eq!(info.device.total_energy, 1510.25);
        assert_eq!(info.device.temperature, Some(42.0));
    }

    #[test]
    fn rpc_separate_meters_require_every_channel() {
        let info = info_for("ShellyProEM50");
        let status = json!({"sys": {"mac": "X"}, "switch:0": {"output": false}});
        let em = [json!({"act_power": 10.0})];
        let em_data = [json!({"total_act_energy": 5.0})];
        let err = parse_rpc_status(&info, &status, &em, &em_data).unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));

        let em = [json!({"act_power": 10.0, "pf": 0.9}), json!({"act_power": 2.5})];
        let em_data = [json!({"total_act_energy": 5.0}), json!({"total_act_energy": 1.0})];
        let report = parse_rpc_status(&info, &status, &em, &em_data).unwrap();
        assert_eq!(report.meters[0].power_factor, Some(0.9));
        assert_eq!(report.meters[1].energy, Some(1.0));
    }

    #[test]
    fn rest_status_prefers_emeters_and_copies_temperature() {
        let mut info = info_for("Shelly25");
        let status = json!({
            "mac": "3C6105E2A1B0",
            "uptime": 55,
            "update": {"has_update": true},
            "temperature": 51.3,
            "inputs": [{"input": 1}, {"input": 0}],
            "relays": [{"ison": true}],
            "meters": [{"power": 5.0, "total": 100.0}, {"power": 3.0, "total": 7.0}],
            "emeters": []
        });
        let report = parse_rest_status(&info, &status).unwrap();
        apply(&mut info, &report);

        assert!(info.inputs[0].state);
        assert!(!info.inputs[1].state);
        assert!(info.outputs[0].state);
        // missing relay entry falls back to off
        assert!(!info.outputs[1].state);
        assert_eq!(info.outputs[1].temperature, Some(51.3));
        assert_eq!(info.device.temperature, Some(51.3));
        assert_eq!(info.device.restart_required, Some(true));
        assert_eq!(info.meters[0].current, None);
        assert_eq!(info.device.total_power, 8.0);
        assert_eq!(info.device.total_energy, 107.0);
    }

    #[test]
    fn rest_missing_meter_entry_is_fatal() {
        let info = info_for("ShellyEM");
        let status = json!({"relays": [{"ison": false}], "emeters": [{"power": 1.0}]});
        let err = parse_rest_status(&info, &status).unwrap_err();
        assert!(err.to_string().contains("emeters[1]"));
    }

    #[test]
    fn rest_rejects_combined_metering() {
        let mut info = info_for("Shelly1PM");
        info.device.meters_seperate = false;
        assert!(parse_rest_status(&info, &json!({"mac": "X"})).is_err());
    }

    #[test]
    fn totals_treat_unset_power_as_zero() {
        let mut info = info_for("ShellyPlus2PM");
        info.device.meter_count = 3;
        let template = info.meters[0].clone();
        info.meters = [Some(5.0), Some(3.0), None]
            .into_iter()
            .enumerate()
            .map(|(n, power)| Meter {
                component_index: n,
                power,
                ..template.clone()
            })
            .collect();
        aggregate(&mut info.device, info.outputs.iter(), info.meters.iter());
        assert_eq!(info.device.total_power, 8.0);
        assert_eq!(info.device.total_energy, 0.0);
    }

    #[test]
    fn temperature_unset_when_no_output_reports() {
        let mut info = info_for("ShellyPlus1PM");
        info.device.temperature = Some(30.0);
        aggregate(&mut info.device, info.outputs.iter(), info.meters.iter());
        assert_eq!(info.device.temperature, None);
    }

    #[test]
    fn report_from_info_round_trips_current_state() {
        let mut info = info_for("ShellyPlus1PM");
        info.outputs[0].state = true;
        info.meters[0].power = Some(12.0);
        let report = StatusReport::from_info(&info);
        assert!(report.outputs[0].state);
        assert_eq!(report.meters[0].power, Some(12.0));
        assert_eq!(report.inputs.len(), 1);
    }
}
