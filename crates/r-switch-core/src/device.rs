//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Runtime records for devices and their components.
//!
//! Components never own their device. They carry the device's position in
//! the registry (`device_index`) and the channel number used on the wire
//! (`component_index`).

use std::fmt;
use std::path::PathBuf;

use r_switch_models::{ModelDescriptor, Protocol};
use serde::{Deserialize, Serialize};

/// One configured physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Device {
    pub index: usize,
    pub model: String,
    pub name: String,
    #[serde(rename = "ID")]
    pub id: u32,
    pub label: String,
    pub simulate: bool,
    pub expect_offline: bool,
    pub simulation_file: Option<PathBuf>,
    pub model_name: String,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    pub hostname: Option<String>,
    pub port: u16,
    pub generation: u8,
    pub protocol: Protocol,
    pub input_count: usize,
    pub output_count: usize,
    pub meter_count: usize,
    pub meters_seperate: bool,
    pub temperature_monitoring: bool,
    pub online: bool,
    pub mac_address: Option<String>,
    pub temperature: Option<f64>,
    pub uptime: Option<u64>,
    pub restart_required: Option<bool>,
    pub total_power: f64,
    pub total_energy: f64,
}

impl Device {
    /// Device with capabilities copied from `descriptor` and no runtime state.
    pub fn from_descriptor(index: usize, descriptor: &ModelDescriptor) -> Self {
        Self {
            index,
            model: descriptor.model.clone(),
            name: String::new(),
            id: 0,
            label: String::new(),
            simulate: false,
            expect_offline: false,
            simulation_file: None,
            model_name: descriptor.name.clone(),
            url: descriptor.url.clone(),
            hostname: None,
            port: 80,
            generation: descriptor.generation,
            protocol: descriptor.protocol,
            input_count: descriptor.inputs,
            output_count: descriptor.outputs,
            meter_count: descriptor.meters,
            meters_seperate: descriptor.meters_seperate,
            temperature_monitoring: descriptor.temperature_monitoring,
            online: false,
            mac_address: None,
            temperature: None,
            uptime: None,
            restart_required: None,
            total_power: 0.0,
            total_energy: 0.0,
        }
    }

    pub fn label_for(name: &str, id: u32) -> String {
        format!("{name} (ID: {id})")
    }

    pub fn count(&self, kind: ComponentKind) -> usize {
        match kind {
            ComponentKind::Input => self.input_count,
            ComponentKind::Output => self.output_count,
            ComponentKind::Meter => self.meter_count,
        }
    }

    /// Tag used in log context.
    pub fn mode(&self) -> &'static str {
        if self.simulate {
            "simulate"
        } else {
            "live"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Input {
    pub device_index: usize,
    pub component_index: usize,
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    pub state: bool,
    /// Install input webhooks for this channel.
    pub webhooks: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub device_index: usize,
    pub component_index: usize,
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    pub state: bool,
    pub has_meter: bool,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Meter {
    pub device_index: usize,
    pub component_index: usize,
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    pub on_output: bool,
    pub power: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power_factor: Option<f64>,
    pub energy: Option<f64>,
}

/// Consolidated view of a device and its components.
///
/// This is also the document stored in a simulation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    #[serde(flatten)]
    pub device: Device,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub meters: Vec<Meter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Input,
    Output,
    Meter,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Input => "input",
            ComponentKind::Output => "output",
            ComponentKind::Meter => "meter",
        }
    }

    /// Prefix of synthesized component names, e.g. `Output 2`.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            ComponentKind::Input => "Input",
            ComponentKind::Output => "Output",
            ComponentKind::Meter => "Meter",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "input" | "inputs" => Ok(ComponentKind::Input),
            "output" | "outputs" => Ok(ComponentKind::Output),
            "meter" | "meters" => Ok(ComponentKind::Meter),
            other => Err(format!(
                "invalid component type '{other}', expected input, output or meter"
            )),
        }
    }
}

/// Ways a caller can name a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdentity {
    /// Registry position, as held by an already resolved [`Device`].
    Index(usize),
    Id(u32),
    Name(String),
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdentity::Index(index) => write!(f, "#{index}"),
            DeviceIdentity::Id(id) => write!(f, "{id}"),
            DeviceIdentity::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for DeviceIdentity {
    fn from(id: u32) -> Self {
        DeviceIdentity::Id(id)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(name: &str) -> Self {
        DeviceIdentity::Name(name.to_owned())
    }
}

impl From<String> for DeviceIdentity {
    fn from(name: String) -> Self {
        DeviceIdentity::Name(name)
    }
}

impl From<&Device> for DeviceIdentity {
    fn from(device: &Device) -> Self {
        DeviceIdentity::Index(device.index)
    }
}

impl From<&DeviceIdentity> for DeviceIdentity {
    fn from(identity: &DeviceIdentity) -> Self {
        identity.clone()
    }
}

/// Ways a caller can name a component within one component type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentIdentity {
    /// Owning device position plus channel, as held by a resolved component.
    Channel {
        device_index: usize,
        component_index: usize,
    },
    Id(u32),
    Name(String),
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentIdentity::Channel {
                device_index,
                component_index,
            } => write!(f, "#{device_index}:{component_index}"),
            ComponentIdentity::Id(id) => write!(f, "{id}"),
            ComponentIdentity::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for ComponentIdentity {
    fn from(id: u32) -> Self {
        ComponentIdentity::Id(id)
    }
}

impl From<&str> for ComponentIdentity {
    fn from(name: &str) -> Self {
        ComponentIdentity::Name(name.to_owned())
    }
}

impl From<String> for ComponentIdentity {
    fn from(name: String) -> Self {
        ComponentIdentity::Name(name)
    }
}

impl From<&ComponentIdentity> for ComponentIdentity {
    fn from(identity: &ComponentIdentity) -> Self {
        identity.clone()
    }
}

macro_rules! channel_identity {
    ($($ty:ty),+) => {
        $(
            impl From<&$ty> for ComponentIdentity {
                fn from(component: &$ty) -> Self {
                    ComponentIdentity::Channel {
                        device_index: component.device_index,
                        component_index: component.component_index,
                    }
                }
            }
        )+
    };
}

channel_identity!(Input, Output, Meter);

/// A resolved component of any type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component<'a> {
    Input(&'a Input),
    Output(&'a Output),
    Meter(&'a Meter),
}

impl Component<'_> {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Input(_) => ComponentKind::Input,
            Component::Output(_) => ComponentKind::Output,
            Component::Meter(_) => ComponentKind::Meter,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Component::Input(input) => &input.name,
            Component::Output(output) => &output.name,
            Component::Meter(meter) => &meter.name,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Component::Input(input) => input.id,
            Component::Output(output) => output.id,
            Component::Meter(meter) => meter.id,
        }
    }

    pub fn device_index(&self) -> usize {
        match self {
            Component::Input(input) => input.device_index,
            Component::Output(output) => output.device_index,
            Component::Meter(meter) => meter.device_index,
        }
    }
}
