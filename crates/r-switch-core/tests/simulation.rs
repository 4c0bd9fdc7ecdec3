//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "File backed simulation of devices."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
mod common;

use std::fs;
use std::path::Path;

use common::{fast_settings, registry_with, simulated_device, StubProbe};
use r_switch_common::{ShellySettings, WebhookSettings};
use r_switch_core::{DeviceInfo, DeviceRegistry};
use serde_json::Value;

fn settings_in(dir: &Path, devices: Vec<r_switch_common::DeviceConfig>) -> ShellySettings {
    ShellySettings {
        simulation_directory: dir.to_path_buf(),
        ..fast_settings(devices)
    }
}

async fn simulated(dir: &Path) -> DeviceRegistry {
    let settings = settings_in(
        dir,
        vec![
            simulated_device("Pool Pump", "ShellyPlus2PM"),
            simulated_device("Sub Board", "ShellyProEM50"),
        ],
    );
    // A dead probe proves simulated devices never ping.
    registry_with(settings, StubProbe::dead()).await
}

fn read(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn initialize_creates_simulation_files() {
    let dir = tempfile::tempdir().unwrap();
    let registry = simulated(dir.path()).await;

    let pump = registry.get_device("Pool Pump").unwrap();
    assert!(pump.online);
    assert!(pump.hostname.is_none());
    let path = dir.path().join("Pool_Pump.json");
    assert_eq!(pump.simulation_file.as_deref(), Some(path.as_path()));
    assert!(dir.path().join("Sub_Board.json").exists());

    let document = read(&path);
    assert_eq!(document["Name"], "Pool Pump");
    assert_eq!(document["Outputs"].as_array().unwrap().len(), 2);
    assert_eq!(document["Meters"][1]["Name"], "Meter 2");

    let info: DeviceInfo = serde_json::from_value(document).unwrap();
    assert_eq!(info.device.model, "ShellyPlus2PM");
}

#[tokio::test]
async fn output_changes_round_trip_through_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = simulated(dir.path()).await;

    assert_eq!(registry.change_output("Output 2", true).await.unwrap(), (true, true));
    assert_eq!(registry.change_output("Output 2", true).await.unwrap(), (true, false));
    let document = read(&dir.path().join("Pool_Pump.json"));
    assert_eq!(document["Outputs"][1]["State"], true);
    assert_eq!(document["Outputs"][0]["State"], false);

    // A fresh registry over the same directory picks the state back up.
    let reloaded = simulated(dir.path()).await;
    assert!(reloaded.get_output("Output 2").unwrap().state);
    assert!(!reloaded.get_output("Output 1").unwrap().state);
}

#[tokio::test]
async fn only_runtime_fields_are_imported() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = simulated(dir.path()).await;
    let path = dir.path().join("Pool_Pump.json");

    let mut document = read(&path);
    document["Model"] = "ShellyPro4PM".into();
    document["Name"] = "Renamed".into();
    document["TotalPower"] = 9999.0.into();
    document["MacAddress"] = "AA:BB:CC:DD:EE:FF".into();
    document["Uptime"] = 120.into();
    document["Inputs"][0]["State"] = true.into();
    document["Outputs"][0]["Name"] = "Hijacked".into();
    document["Outputs"][0]["Temperature"] = 44.0.into();
    document["Outputs"][1]["Temperature"] = 48.0.into();
    document["Meters"][0]["Power"] = 120.5.into();
    document["Meters"][0]["Energy"] = 1000.0.into();
    document["Meters"][1]["Power"] = 79.5.into();
    document["Meters"][1]["Voltage"] = 230.1.into();
    fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();

    assert!(registry.refresh_status("Pool Pump").await.unwrap());
    let pump = registry.get_device("Pool Pump").unwrap();
    assert_eq!(pump.model, "ShellyPlus2PM");
    assert_eq!(pump.mac_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    assert_eq!(pump.uptime, Some(120));
    assert_eq!(pump.total_power, 200.0);
    assert_eq!(pump.total_energy, 1000.0);
    assert_eq!(pump.temperature, Some(46.0));
    assert!(registry.get_input("Input 1").unwrap().state);
    assert_eq!(registry.get_output("Output 1").unwrap().temperature, Some(44.0));
    assert_eq!(registry.get_meter("Meter 2").unwrap().voltage, Some(230.1));
    assert!(registry.get_output("Hijacked").is_err());
}

#[tokio::test]
async fn meter_keys_missing_from_the_file_keep_their_readings() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = simulated(dir.path()).await;
    let path = dir.path().join("Pool_Pump.json");

    let mut document = read(&path);
    document["Meters"][0]["Power"] = 20.0.into();
    document["Meters"][0]["Energy"] = 500.0.into();
    fs::write(&path, document.to_string()).unwrap();
    registry.refresh_status("Pool Pump").await.unwrap();

    document["Meters"][0]
        .as_object_mut()
        .unwrap()
        .remove("Energy");
    document["Meters"][0]["Power"] = 25.0.into();
    fs::write(&path, document.to_string()).unwrap();
    registry.refresh_status("Pool Pump").await.unwrap();

    let meter = registry.get_meter("Meter 1").unwrap();
    assert_eq!(meter.power, Some(25.0));
    assert_eq!(meter.energy, Some(500.0));
    assert_eq!(registry.get_device("Pool Pump").unwrap().total_energy, 500.0);

    // An explicit null still clears the reading.
    document["Meters"][0]["Energy"] = Value::Null;
    fs::write(&path, document.to_string()).unwrap();
    registry.refresh_status("Pool Pump").await.unwrap();
    assert_eq!(registry.get_meter("Meter 1").unwrap().energy, None);
    assert_eq!(registry.get_device("Pool Pump").unwrap().total_energy, 0.0);
}

#[tokio::test]
async fn simulated_offline_flag_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = simulated(dir.path()).await;
    let path = dir.path().join("Sub_Board.json");

    let mut document = read(&path);
    document["Online"] = false.into();
    fs::write(&path, document.to_string()).unwrap();

    assert!(registry.refresh_status("Sub Board").await.unwrap());
    assert!(!registry.get_device("Sub Board").unwrap().online);
}

#[tokio::test]
async fn corrupt_simulation_file_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = simulated(dir.path()).await;
    fs::write(dir.path().join("Pool_Pump.json"), "{ not json").unwrap();

    let err = registry.refresh_status("Pool Pump").await.unwrap_err();
    assert!(err.to_string().contains("invalid JSON"), "{err}");
}

#[tokio::test]
async fn simulated_devices_skip_webhook_installation() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = simulated(dir.path()).await;
    let webhooks = WebhookSettings {
        webhooks_enabled: true,
        webhook_host: Some("127.0.0.1".into()),
        ..WebhookSettings::default()
    };
    assert_eq!(
        registry
            .install_input_webhooks("Pool Pump", &webhooks)
            .await
            .unwrap(),
        0
    );
    assert!(registry.is_device_online(None).await.unwrap());
}
