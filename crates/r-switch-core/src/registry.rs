//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-memory model of the configured devices and the operations on them.
//!
//! The registry is an arena: devices live in one vector and every input,
//! output and meter lives in a per-type vector holding the index of its
//! device. Operations run sequentially; callers that want concurrency must
//! wrap the registry in their own lock.

use std::fmt::Write as _;
use std::sync::Arc;

use r_switch_common::{ComponentConfig, DeviceConfig, ShellySettings, WebhookSettings};
use r_switch_logging::{sw_debug, sw_error, sw_info, sw_warn, LogContext};
use r_switch_models::{ModelLibrary, Protocol};
use serde_json::{json, Value};
use url::Host;

use crate::device::{
    Component, ComponentIdentity, ComponentKind, Device, DeviceIdentity, DeviceInfo, Input, Meter,
    Output,
};
use crate::error::{ControlError, Result};
use crate::metrics::TransportMetrics;
use crate::reconcile::{aggregate, apply_report, StatusReport};
use crate::transport::simulated::simulation_path;
use crate::transport::{
    parse_host, DeviceTransport, LivenessProbe, PingProbe, RequestExecutor, RequestPolicy,
    RestAdapter, RpcAdapter, SimulatedTransport, TransportOutcome,
};
use crate::webhook::{hook_url, WebhookEvent, WebhookQueue, TOGGLE_OFF, TOGGLE_ON};

/// Builder for [`DeviceRegistry`].
pub struct DeviceRegistryBuilder {
    models: Option<Arc<ModelLibrary>>,
    probe: Arc<dyn LivenessProbe>,
    metrics: Option<TransportMetrics>,
    webhooks: WebhookQueue,
}

impl Default for DeviceRegistryBuilder {
    fn default() -> Self {
        Self {
            models: None,
            probe: Arc::new(PingProbe),
            metrics: None,
            webhooks: WebhookQueue::new(),
        }
    }
}

impl DeviceRegistryBuilder {
    /// Use a model library other than the bundled one.
    pub fn models(mut self, models: Arc<ModelLibrary>) -> Self {
        self.models = Some(models);
        self
    }

    /// Replace the ICMP liveness probe.
    pub fn probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn metrics(mut self, metrics: TransportMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share an existing webhook queue, e.g. one already fed by a listener.
    pub fn webhook_queue(mut self, queue: WebhookQueue) -> Self {
        self.webhooks = queue;
        self
    }

    /// Load the model library and build the device graph from `settings`.
    pub async fn build(self, settings: ShellySettings) -> Result<DeviceRegistry> {
        let models = match self.models {
            Some(models) => models,
            None => Arc::new(ModelLibrary::bundled().inspect_err(|err| {
                sw_error!("unable to load the Shelly model library: {err}");
            })?),
        };
        let executor = Arc::new(
            RequestExecutor::new(RequestPolicy::from(&settings), self.probe.clone())?
                .with_metrics(self.metrics.clone()),
        );
        let mut registry = DeviceRegistry {
            models,
            settings: ShellySettings::default(),
            probe: self.probe,
            metrics: self.metrics,
            rest: RestAdapter::new(executor.clone()),
            rpc: RpcAdapter::new(executor.clone()),
            simulated: SimulatedTransport,
            executor,
            devices: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            meters: Vec::new(),
            webhooks: self.webhooks,
        };
        registry.initialize(settings).await?;
        Ok(registry)
    }
}

pub struct DeviceRegistry {
    models: Arc<ModelLibrary>,
    settings: ShellySettings,
    probe: Arc<dyn LivenessProbe>,
    metrics: Option<TransportMetrics>,
    executor: Arc<RequestExecutor>,
    rest: RestAdapter,
    rpc: RpcAdapter,
    simulated: SimulatedTransport,
    devices: Vec<Device>,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    meters: Vec<Meter>,
    webhooks: WebhookQueue,
}

impl DeviceRegistry {
    pub fn builder() -> DeviceRegistryBuilder {
        DeviceRegistryBuilder::default()
    }

    /// Registry using the bundled models and the ICMP probe.
    pub async fn new(settings: ShellySettings) -> Result<Self> {
        Self::builder().build(settings).await
    }

    /// Replace every device and component with those described by `settings`.
    ///
    /// On failure the registry is left empty.
    pub async fn initialize(&mut self, settings: ShellySettings) -> Result<()> {
        self.set_settings(settings)?;
        self.devices.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.meters.clear();

        let configs = self.settings.devices.clone();
        for (position, config) in configs.iter().enumerate() {
            if let Err(err) = self.add_device(position, config).await {
                sw_error!("unable to add Shelly device #{}: {err}", position + 1);
                self.devices.clear();
                self.inputs.clear();
                self.outputs.clear();
                self.meters.clear();
                return Err(err);
            }
        }
        sw_info!("device registry initialised with {} device(s)", self.devices.len());
        Ok(())
    }

    /// Swap in reloaded settings, rebuilding the device graph only when asked.
    ///
    /// A rebuild is staged on a fresh registry sharing this one's models,
    /// probe, metrics and webhook queue; on failure the current devices and
    /// settings stay in place.
    pub async fn apply_settings(
        &mut self,
        settings: ShellySettings,
        rebuild_devices: bool,
    ) -> Result<()> {
        if rebuild_devices {
            let staged = DeviceRegistryBuilder {
                models: Some(self.models.clone()),
                probe: self.probe.clone(),
                metrics: self.metrics.clone(),
                webhooks: self.webhooks.clone(),
            }
            .build(settings)
            .await
            .inspect_err(|err| {
                sw_warn!("reloaded device list rejected, keeping current devices: {err}")
            })?;
            *self = staged;
            sw_info!("device registry rebuilt from reloaded settings");
            return Ok(());
        }
        self.set_settings(settings)?;
        sw_info!("device registry settings reloaded");
        Ok(())
    }

    fn set_settings(&mut self, settings: ShellySettings) -> Result<()> {
        let executor = Arc::new(
            RequestExecutor::new(RequestPolicy::from(&settings), self.probe.clone())?
                .with_metrics(self.metrics.clone()),
        );
        self.rest = RestAdapter::new(executor.clone());
        self.rpc = RpcAdapter::new(executor.clone());
        self.executor = executor;
        self.settings = settings;
        Ok(())
    }

    pub fn settings(&self) -> &ShellySettings {
        &self.settings
    }

    pub fn policy(&self) -> &RequestPolicy {
        self.executor.policy()
    }

    pub fn models(&self) -> &ModelLibrary {
        &self.models
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn meters(&self) -> &[Meter] {
        &self.meters
    }

    async fn add_device(&mut self, position: usize, config: &DeviceConfig) -> Result<()> {
        let descriptor = self.models.lookup(&config.model)?;
        let mut device = Device::from_descriptor(position, descriptor);
        device.name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("Shelly Device {}", position + 1));
        device.id = config.id.unwrap_or(position as u32 + 1);
        device.label = Device::label_for(&device.name, device.id);
        device.simulate = config.simulate.unwrap_or(false);
        device.expect_offline = config.expect_offline.unwrap_or(false);
        device.hostname = config
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned);
        device.port = config.port.unwrap_or(80);
        // Simulated devices are always reachable.
        device.online = device.simulate;

        if !device.meters_seperate && device.meter_count != device.output_count {
            return Err(ControlError::invalid_config(format!(
                "device {} has {} outputs but {} meters while meters are not separate",
                device.label, device.output_count, device.meter_count
            )));
        }
        if !device.simulate && device.hostname.is_none() {
            return Err(ControlError::invalid_config(format!(
                "device {} does not have a hostname configured",
                device.label
            )));
        }
        if let Some(hostname) = device.hostname.take() {
            match parse_host(&hostname) {
                // Stored without brackets so the liveness probe gets a bare address.
                Some(Host::Ipv6(address)) => device.hostname = Some(address.to_string()),
                Some(_) => device.hostname = Some(hostname),
                None => {
                    return Err(ControlError::invalid_config(format!(
                        "device {} has an invalid hostname: {hostname}",
                        device.label
                    )))
                }
            }
        }
        if self.devices.iter().any(|existing| existing.name == device.name) {
            return Err(ControlError::invalid_config(format!(
                "device name {} must be unique",
                device.name
            )));
        }
        if self.devices.iter().any(|existing| existing.id == device.id) {
            return Err(ControlError::invalid_config(format!(
                "device ID {} must be unique",
                device.id
            )));
        }
        if device.id == 0 && device.name.is_empty() {
            return Err(ControlError::invalid_config(
                "device must have either an ID or a Name",
            ));
        }
        if device.simulate {
            device.simulation_file = Some(simulation_path(
                &self.settings.simulation_directory,
                &device.name,
                device.id,
            ));
        }

        let label = device.label.clone();
        self.devices.push(device);
        self.add_components(position, ComponentKind::Input, config.inputs.as_deref())?;
        self.add_components(position, ComponentKind::Output, config.outputs.as_deref())?;
        self.add_components(position, ComponentKind::Meter, config.meters.as_deref())?;

        if self.devices[position].simulate {
            self.refresh_status(DeviceIdentity::Index(position)).await?;
        }

        let ctx = LogContext::new().with_device(&label);
        sw_debug!(context = ctx, "added Shelly device");
        Ok(())
    }

    fn add_components(
        &mut self,
        device_index: usize,
        kind: ComponentKind,
        configs: Option<&[ComponentConfig]>,
    ) -> Result<()> {
        let device = &self.devices[device_index];
        let expected = device.count(kind);
        if let Some(configs) = configs {
            if configs.len() != expected {
                return Err(ControlError::invalid_config(format!(
                    "invalid {kind} configuration for device {}: expected {expected}, got {}",
                    device.label,
                    configs.len()
                )));
            }
        }
        let seperate = device.meters_seperate;

        for component_index in 0..expected {
            let config = configs.and_then(|configs| configs.get(component_index));
            let next = self.component_count(kind) + 1;
            let id = config.and_then(|c| c.id).unwrap_or(next as u32);
            let name = config
                .and_then(|c| c.name.clone())
                .unwrap_or_else(|| format!("{} {next}", kind.name_prefix()));

            if self.component_names(kind).any(|existing| existing == name) {
                return Err(ControlError::invalid_config(format!(
                    "{} name {name} must be unique",
                    kind.name_prefix()
                )));
            }
            if self.component_ids(kind).any(|existing| existing == id) {
                return Err(ControlError::invalid_config(format!(
                    "{} ID {id} must be unique",
                    kind.name_prefix()
                )));
            }
            if id == 0 && name.is_empty() {
                return Err(ControlError::invalid_config(format!(
                    "{} {next} must have either an ID or a Name",
                    kind.name_prefix()
                )));
            }

            match kind {
                ComponentKind::Input => self.inputs.push(Input {
                    device_index,
                    component_index,
                    id,
                    name,
                    state: false,
                    webhooks: config.and_then(|c| c.webhooks).unwrap_or(false),
                }),
                ComponentKind::Output => self.outputs.push(Output {
                    device_index,
                    component_index,
                    id,
                    name,
                    state: false,
                    has_meter: !seperate,
                    temperature: None,
                }),
                ComponentKind::Meter => self.meters.push(Meter {
                    device_index,
                    component_index,
                    id,
                    name,
                    on_output: !seperate,
                    power: None,
                    voltage: None,
                    current: None,
                    power_factor: None,
                    energy: None,
                }),
            }
        }
        Ok(())
    }

    fn component_count(&self, kind: ComponentKind) -> usize {
        match kind {
            ComponentKind::Input => self.inputs.len(),
            ComponentKind::Output => self.outputs.len(),
            ComponentKind::Meter => self.meters.len(),
        }
    }

    fn component_names(&self, kind: ComponentKind) -> Box<dyn Iterator<Item = &str> + '_> {
        match kind {
            ComponentKind::Input => Box::new(self.inputs.iter().map(|c| c.name.as_str())),
            ComponentKind::Output => Box::new(self.outputs.iter().map(|c| c.name.as_str())),
            ComponentKind::Meter => Box::new(self.meters.iter().map(|c| c.name.as_str())),
        }
    }

    fn component_ids(&self, kind: ComponentKind) -> Box<dyn Iterator<Item = u32> + '_> {
        match kind {
            ComponentKind::Input => Box::new(self.inputs.iter().map(|c| c.id)),
            ComponentKind::Output => Box::new(self.outputs.iter().map(|c| c.id)),
            ComponentKind::Meter => Box::new(self.meters.iter().map(|c| c.id)),
        }
    }

    fn device_index(&self, identity: &DeviceIdentity) -> Result<usize> {
        let found = match identity {
            DeviceIdentity::Index(index) => (*index < self.devices.len()).then_some(*index),
            DeviceIdentity::Id(id) => self.devices.iter().position(|d| d.id == *id),
            DeviceIdentity::Name(name) => self.devices.iter().position(|d| &d.name == name),
        };
        found.ok_or_else(|| {
            let err = ControlError::NotFound {
                kind: "device",
                identity: identity.to_string(),
            };
            sw_error!("{err}");
            err
        })
    }

    fn component_position(&self, kind: ComponentKind, identity: &ComponentIdentity) -> Result<usize> {
        fn find<T>(
            items: &[T],
            identity: &ComponentIdentity,
            key: impl Fn(&T) -> (usize, usize, u32, &str),
        ) -> Option<usize> {
            items.iter().position(|item| {
                let (device_index, component_index, id, name) = key(item);
                match identity {
                    ComponentIdentity::Channel {
                        device_index: d,
                        component_index: c,
                    } => device_index == *d && component_index == *c,
                    ComponentIdentity::Id(wanted) => id == *wanted,
                    ComponentIdentity::Name(wanted) => name == wanted,
                }
            })
        }

        let found = match kind {
            ComponentKind::Input => find(&self.inputs, identity, |c| {
                (c.device_index, c.component_index, c.id, c.name.as_str())
            }),
            ComponentKind::Output => find(&self.outputs, identity, |c| {
                (c.device_index, c.component_index, c.id, c.name.as_str())
            }),
            ComponentKind::Meter => find(&self.meters, identity, |c| {
                (c.device_index, c.component_index, c.id, c.name.as_str())
            }),
        };
        found.ok_or_else(|| {
            let err = ControlError::NotFound {
                kind: kind.as_str(),
                identity: identity.to_string(),
            };
            sw_error!("{err}");
            err
        })
    }

    /// Resolve a device by registry position, ID or name.
    pub fn get_device(&self, identity: impl Into<DeviceIdentity>) -> Result<&Device> {
        let index = self.device_index(&identity.into())?;
        Ok(&self.devices[index])
    }

    /// Resolve a component of one type by channel, ID or name.
    pub fn get_component(
        &self,
        kind: ComponentKind,
        identity: impl Into<ComponentIdentity>,
    ) -> Result<Component<'_>> {
        let position = self.component_position(kind, &identity.into())?;
        Ok(match kind {
            ComponentKind::Input => Component::Input(&self.inputs[position]),
            ComponentKind::Output => Component::Output(&self.outputs[position]),
            ComponentKind::Meter => Component::Meter(&self.meters[position]),
        })
    }

    pub fn get_input(&self, identity: impl Into<ComponentIdentity>) -> Result<&Input> {
        let position = self.component_position(ComponentKind::Input, &identity.into())?;
        Ok(&self.inputs[position])
    }

    pub fn get_output(&self, identity: impl Into<ComponentIdentity>) -> Result<&Output> {
        let position = self.component_position(ComponentKind::Output, &identity.into())?;
        Ok(&self.outputs[position])
    }

    pub fn get_meter(&self, identity: impl Into<ComponentIdentity>) -> Result<&Meter> {
        let position = self.component_position(ComponentKind::Meter, &identity.into())?;
        Ok(&self.meters[position])
    }

    fn info_at(&self, index: usize) -> DeviceInfo {
        DeviceInfo {
            device: self.devices[index].clone(),
            inputs: self
                .inputs
                .iter()
                .filter(|c| c.device_index == index)
                .cloned()
                .collect(),
            outputs: self
                .outputs
                .iter()
                .filter(|c| c.device_index == index)
                .cloned()
                .collect(),
            meters: self
                .meters
                .iter()
                .filter(|c| c.device_index == index)
                .cloned()
                .collect(),
        }
    }

    fn transport_for(&self, device: &Device) -> &dyn DeviceTransport {
        if device.simulate {
            return &self.simulated;
        }
        match device.protocol {
            Protocol::Rest => &self.rest,
            Protocol::Rpc => &self.rpc,
        }
    }

    fn apply_at(&mut self, index: usize, report: &StatusReport) {
        let device = &mut self.devices[index];
        apply_report(
            report,
            device,
            self.inputs.iter_mut().filter(|c| c.device_index == index),
            self.outputs.iter_mut().filter(|c| c.device_index == index),
            self.meters.iter_mut().filter(|c| c.device_index == index),
        );
        aggregate(
            device,
            self.outputs.iter().filter(|c| c.device_index == index),
            self.meters.iter().filter(|c| c.device_index == index),
        );
    }

    /// Probe one device, or every device when `identity` is `None`, and
    /// record the result in each device's online flag.
    ///
    /// Returns true only if every probed device answered.
    pub async fn is_device_online(&mut self, identity: Option<DeviceIdentity>) -> Result<bool> {
        let selected = match identity {
            Some(identity) => Some(self.device_index(&identity)?),
            None => None,
        };

        let mut all_online = true;
        for index in 0..self.devices.len() {
            if selected.is_some_and(|s| s != index) {
                continue;
            }
            let device = &self.devices[index];
            let online = self.executor.is_online(device).await;
            let ctx = LogContext::new()
                .with_device(&device.label)
                .with_mode(device.mode());
            sw_debug!(
                context = ctx,
                "device is {}",
                if online { "online" } else { "offline" }
            );
            self.devices[index].online = online;
            all_online &= online;
        }
        Ok(all_online)
    }

    /// Query a device and reconcile the response into the model.
    ///
    /// Returns `Ok(false)` when the device is offline.
    pub async fn refresh_status(&mut self, identity: impl Into<DeviceIdentity>) -> Result<bool> {
        let identity = identity.into();
        let index = self.device_index(&identity)?;
        let info = self.info_at(index);
        let transport = self.transport_for(&info.device);
        let ctx = LogContext::new()
            .with_device(&info.device.label)
            .with_protocol(transport.name())
            .with_mode(info.device.mode());

        let outcome = transport.fetch_status(&info).await.inspect_err(|err| {
            sw_error!(context = ctx, "error getting device status: {err}");
        })?;
        match outcome {
            TransportOutcome::Online(report) => {
                self.apply_at(index, &report);
                sw_debug!(context = ctx, "device status retrieved");
                Ok(true)
            }
            TransportOutcome::Offline => {
                self.devices[index].online = false;
                Ok(false)
            }
        }
    }

    /// Refresh every device in order. One failure does not stop the sweep.
    pub async fn refresh_all(&mut self) -> Vec<(String, Result<bool>)> {
        let mut results = Vec::with_capacity(self.devices.len());
        for index in 0..self.devices.len() {
            let label = self.devices[index].label.clone();
            let result = self.refresh_status(DeviceIdentity::Index(index)).await;
            results.push((label, result));
        }
        results
    }

    /// Switch an output on or off.
    ///
    /// Returns `(succeeded, changed)`. An offline device yields
    /// `(false, false)` and leaves the model untouched; asking for the state
    /// the output already has yields `(true, false)`.
    pub async fn change_output(
        &mut self,
        identity: impl Into<ComponentIdentity>,
        on: bool,
    ) -> Result<(bool, bool)> {
        let identity = identity.into();
        let position = self.component_position(ComponentKind::Output, &identity)?;
        let device_index = self.outputs[position].device_index;
        let channel = self.outputs[position].component_index;

        if !self.devices[device_index].simulate
            && !self.refresh_status(DeviceIdentity::Index(device_index)).await?
        {
            let ctx = LogContext::new().with_device(&self.devices[device_index].label);
            sw_warn!(context = ctx, "device is offline, cannot change output {identity}");
            return Ok((false, false));
        }

        let previous = self.outputs[position].state;
        let output_name = self.outputs[position].name.clone();
        let info = self.info_at(device_index);
        let transport = self.transport_for(&info.device);
        let ctx = LogContext::new()
            .with_device(&info.device.label)
            .with_component(&output_name)
            .with_protocol(transport.name())
            .with_mode(info.device.mode());

        let outcome = transport
            .switch_output(&info, channel, on)
            .await
            .inspect_err(|err| sw_error!(context = ctx, "error changing device output: {err}"))?;
        if !outcome.is_online() {
            return Ok((false, false));
        }

        self.outputs[position].state = on;
        let state = if on { "on" } else { "off" };
        if previous != on {
            sw_debug!(context = ctx, "output changed to {state}");
            Ok((true, true))
        } else {
            sw_debug!(context = ctx, "output already {state}, no change made");
            Ok((true, false))
        }
    }

    /// Consolidated snapshot of a device and its components.
    pub async fn get_device_information(
        &mut self,
        identity: impl Into<DeviceIdentity>,
        refresh: bool,
    ) -> Result<DeviceInfo> {
        let identity = identity.into();
        let index = self.device_index(&identity)?;
        if refresh {
            self.refresh_status(DeviceIdentity::Index(index)).await?;
        }
        Ok(self.info_at(index))
    }

    /// Human readable report for one device, or all when `identity` is `None`.
    pub fn print_device_status(&self, identity: Option<DeviceIdentity>) -> Result<String> {
        let selected = match identity {
            Some(identity) => Some(self.device_index(&identity)?),
            None => None,
        };

        let mut out = String::new();
        for device in &self.devices {
            if selected.is_some_and(|s| s != device.index) {
                continue;
            }
            let index = device.index;
            let _ = writeln!(
                out,
                "{} is {}.",
                device.label,
                if device.online { "online" } else { "offline" }
            );
            let _ = writeln!(out, "  Model: {}", device.model_name);
            let _ = writeln!(out, "  Simulation Mode: {}", device.simulate);
            let _ = writeln!(
                out,
                "  Hostname: {}:{}",
                device.hostname.as_deref().unwrap_or("-"),
                device.port
            );
            let _ = writeln!(out, "  Generation: {}", device.generation);
            let _ = writeln!(out, "  Protocol: {}", device.protocol);
            let _ = writeln!(out, "  Number of Inputs: {}", device.input_count);
            for input in self.inputs.iter().filter(|c| c.device_index == index) {
                let _ = writeln!(
                    out,
                    "    - Index: {}, ID: {}, Name: {}, State: {}",
                    input.component_index, input.id, input.name, input.state
                );
            }
            let _ = writeln!(out, "  Number of Output Relays: {}", device.output_count);
            for output in self.outputs.iter().filter(|c| c.device_index == index) {
                let _ = writeln!(
                    out,
                    "    - Index: {}, ID: {}, Name: {}, Has Metering: {}, State: {}, Temp.: {}",
                    output.component_index,
                    output.id,
                    output.name,
                    output.has_meter,
                    output.state,
                    display_opt(output.temperature)
                );
            }
            let _ = writeln!(out, "  Number of Meters: {}", device.meter_count);
            for meter in self.meters.iter().filter(|c| c.device_index == index) {
                let _ = writeln!(
                    out,
                    "    - Index: {}, ID: {}, Name: {}, On Output: {}, Power: {}, Voltage: {}, Current: {}, Power Factor: {}, Energy: {}",
                    meter.component_index,
                    meter.id,
                    meter.name,
                    meter.on_output,
                    display_opt(meter.power),
                    display_opt(meter.voltage),
                    display_opt(meter.current),
                    display_opt(meter.power_factor),
                    display_opt(meter.energy)
                );
            }
            let _ = writeln!(out, "  Meters Separate: {}", device.meters_seperate);
            let _ = writeln!(
                out,
                "  Temperature Monitoring: {}",
                device.temperature_monitoring
            );
            let _ = writeln!(
                out,
                "  MAC Address: {}",
                device.mac_address.as_deref().unwrap_or("-")
            );
            let _ = writeln!(out, "  Temperature: {}°C", display_opt(device.temperature));
            let _ = writeln!(out, "  Total Power: {} W", device.total_power);
            let _ = writeln!(out, "  Total Energy: {} Wh", device.total_energy);
            let _ = writeln!(
                out,
                "  Uptime: {} seconds",
                device.uptime.map_or_else(|| "-".to_owned(), |u| u.to_string())
            );
            let _ = writeln!(
                out,
                "  Restart Required: {}",
                device
                    .restart_required
                    .map_or_else(|| "-".to_owned(), |r| r.to_string())
            );
        }
        Ok(out.trim_end().to_owned())
    }

    /// Handle to the queue fed by the webhook listener.
    pub fn webhook_queue(&self) -> WebhookQueue {
        self.webhooks.clone()
    }

    /// Oldest queued webhook event, or `None`. Never blocks.
    pub fn pull_webhook_event(&self) -> Option<WebhookEvent> {
        self.webhooks.pop()
    }

    /// Replace the device's webhooks with toggle hooks for every input
    /// flagged `Webhooks: true`. Returns the number of hooks created, zero
    /// when `WebhooksEnabled` is off.
    pub async fn install_input_webhooks(
        &mut self,
        identity: impl Into<DeviceIdentity>,
        webhooks: &WebhookSettings,
    ) -> Result<usize> {
        let identity = identity.into();
        let index = self.device_index(&identity)?;
        let device = self.devices[index].clone();
        let ctx = LogContext::new()
            .with_device(&device.label)
            .with_protocol(device.protocol.as_str())
            .with_mode(device.mode());

        if !webhooks.webhooks_enabled {
            sw_debug!(context = ctx, "webhooks disabled, device left untouched");
            return Ok(0);
        }
        if device.simulate {
            sw_debug!(context = ctx, "simulated device, no webhooks installed");
            return Ok(0);
        }
        if device.protocol != Protocol::Rpc {
            let err = ControlError::protocol(format!(
                "device {} uses {}; webhooks can only be installed on RPC devices",
                device.label, device.protocol
            ));
            sw_error!(context = ctx, "{err}");
            return Err(err);
        }

        let inputs: Vec<Input> = self
            .inputs
            .iter()
            .filter(|c| c.device_index == index && c.webhooks)
            .cloned()
            .collect();
        if inputs.is_empty() {
            sw_debug!(context = ctx, "no inputs flagged for webhooks");
            return Ok(0);
        }

        let result = self.install_hooks(&device, &inputs, webhooks).await;
        result.inspect_err(|err| sw_error!(context = ctx, "error installing webhooks: {err}"))
    }

    async fn install_hooks(
        &self,
        device: &Device,
        inputs: &[Input],
        webhooks: &WebhookSettings,
    ) -> Result<usize> {
        let ctx = LogContext::new().with_device(&device.label).with_protocol("RPC");

        let Some(supported) = self
            .rpc
            .call(device, "Webhook.ListSupported", None)
            .await?
            .online()
        else {
            sw_warn!(context = ctx, "device is offline, no webhooks installed");
            return Ok(0);
        };
        let types = &supported["types"];
        let supports = |event: &str| match types {
            Value::Object(map) => map.contains_key(event),
            Value::Array(items) => items.iter().any(|item| item.as_str() == Some(event)),
            _ => false,
        };
        if !supports(TOGGLE_ON) || !supports(TOGGLE_OFF) {
            return Err(ControlError::protocol(format!(
                "device {} does not support the {TOGGLE_ON} and {TOGGLE_OFF} webhooks",
                device.label
            )));
        }

        if self
            .rpc
            .call(device, "Webhook.DeleteAll", None)
            .await?
            .online()
            .is_none()
        {
            return Ok(0);
        }

        let mut created = 0;
        for input in inputs {
            for (event, title) in [(TOGGLE_ON, "Toggle On"), (TOGGLE_OFF, "Toggle Off")] {
                let url = hook_url(webhooks, event, &input.name)?;
                let params = json!({
                    "cid": input.component_index,
                    "enable": true,
                    "event": event,
                    "name": format!("{title}: {}", input.component_index),
                    "urls": [url],
                });
                if let Some(reply) = self
                    .rpc
                    .call(device, "Webhook.Create", Some(params))
                    .await?
                    .online()
                {
                    created += 1;
                    let ictx = ctx.clone().with_component(&input.name);
                    sw_debug!(context = ictx, "installed {event} webhook rev {}", reply["rev"]);
                }
            }
        }
        sw_info!(context = ctx, "installed {created} webhook(s)");
        Ok(created)
    }
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| v.to_string())
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.len())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("meters", &self.meters.len())
            .finish_non_exhaustive()
    }
}
