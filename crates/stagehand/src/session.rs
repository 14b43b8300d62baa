//! The session coordinator.
//!
//! One `Session` owns the mutable pedalboard state and keeps three peers
//! consistent: the audio engine (via [`EngineLink`]), the hardware control
//! surface (via [`HmiSurface`]) and the browser editor (via
//! [`Broadcaster`]). Everything runs on one task; engine commands are
//! strictly serialized because every operation awaits its reply before the
//! next command is issued.
//!
//! Addressing, pedalboard IO, MIDI-port reconciliation and HMI dispatch are
//! further `impl Session` blocks in their own modules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use stageproto::{
    EngineCommand, EngineEvent, EngineLink, HmiSurface, LinkError, LinkEvent, PedalboardEntry,
    Resp,
};

use crate::addressing::{default_hardware, AddressingEngine};
use crate::banks::{self, Bank};
use crate::broadcast::Broadcaster;
use crate::catalog::{CatalogError, PluginCatalog, PortDesignation};
use crate::mapper::{InstanceIdMapper, MapperError};
use crate::pedalboard::BundleError;
use crate::router::AudioRouter;
use crate::state::{Designations, MidiCc, MidiCcRange, MidiPortRecord, PedalboardPreset, Plugin};
use crate::{stats, tuner};

/// Graph node path prefix used by the editor protocol.
pub const GRAPH_PREFIX: &str = "/graph/";

/// JACK client name of the audio engine.
pub const ENGINE_JACK_CLIENT: &str = "engine";

/// Reserved instance id for the built-in tuner.
pub const TUNER_INSTANCE_ID: i32 = 9994;
pub const TUNER_URI: &str = "http://gareus.org/oss/lv2/tuna#one";
pub const TUNER_INPUT_PORT: &str = "in";
pub const TUNER_MONITOR_PORT: &str = "freq_out";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Mapper(#[from] MapperError),
    #[error("no plugin loaded with id {0}")]
    NoSuchPlugin(i32),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error("bundle already loaded: {0}")]
    BundleAlreadyLoaded(PathBuf),
    #[error("bundle not loaded: {0}")]
    BundleNotLoaded(PathBuf),
    #[error("plugin {0} is currently in use, cannot remove bundle")]
    BundleInUse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem roots the session works against.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Saved pedalboard bundles (`<sym>.pedalboard/`).
    pub pedalboards_dir: PathBuf,
    /// Banks file and last-session state.
    pub data_dir: PathBuf,
    /// Where new plugin-preset bundles are written.
    pub presets_dir: PathBuf,
}

impl SessionOptions {
    pub fn banks_file(&self) -> PathBuf {
        self.data_dir.join("banks.json")
    }

    pub fn last_state_file(&self) -> PathBuf {
        self.data_dir.join("last.json")
    }
}

/// Result of saving a plugin preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetSaved {
    pub bundle: PathBuf,
    pub uri: String,
}

pub struct Session {
    pub(crate) options: SessionOptions,
    pub(crate) link: Option<EngineLink>,
    pub(crate) crashed: bool,

    pub(crate) mapper: InstanceIdMapper,
    pub(crate) plugins: HashMap<i32, Plugin>,
    pub(crate) connections: Vec<(String, String)>,
    pub(crate) midiports: Vec<MidiPortRecord>,
    pub(crate) audioports_in: Vec<String>,
    pub(crate) audioports_out: Vec<String>,
    pub(crate) has_serial_midi_in: bool,
    pub(crate) has_serial_midi_out: bool,

    pub(crate) addressings: AddressingEngine,

    pub(crate) banks: Vec<Bank>,
    pub(crate) all_pedalboards: Vec<PedalboardEntry>,
    pub(crate) bank_id: usize,

    pub(crate) pedalboard_empty: bool,
    pub(crate) pedalboard_modified: bool,
    pub(crate) pedalboard_name: String,
    pub(crate) pedalboard_path: Option<PathBuf>,
    pub(crate) pedalboard_size: (i32, i32),
    pub(crate) pedalboard_presets: Vec<PedalboardPreset>,
    pub(crate) next_hmi_pedalboard: Option<(usize, usize)>,

    pub(crate) current_tuner_port: u8,

    pub(crate) catalog: Arc<dyn PluginCatalog>,
    pub(crate) router: Arc<dyn AudioRouter>,
    pub(crate) hmi: Box<dyn HmiSurface>,
    pub(crate) broadcaster: Broadcaster,
}

impl Session {
    pub fn new(
        options: SessionOptions,
        catalog: Arc<dyn PluginCatalog>,
        router: Arc<dyn AudioRouter>,
        hmi: Box<dyn HmiSurface>,
        broadcaster: Broadcaster,
    ) -> Self {
        let banks = banks::list_banks(&options.banks_file());
        let all_pedalboards = crate::pedalboard::list_pedalboards(&options.pedalboards_dir);

        let mut session = Self {
            options,
            link: None,
            crashed: false,
            mapper: InstanceIdMapper::new(),
            plugins: HashMap::new(),
            connections: Vec::new(),
            midiports: Vec::new(),
            audioports_in: Vec::new(),
            audioports_out: Vec::new(),
            has_serial_midi_in: false,
            has_serial_midi_out: false,
            addressings: AddressingEngine::new(&default_hardware()),
            banks,
            all_pedalboards,
            bank_id: 0,
            pedalboard_empty: true,
            pedalboard_modified: false,
            pedalboard_name: String::new(),
            pedalboard_path: None,
            pedalboard_size: (0, 0),
            pedalboard_presets: Vec::new(),
            next_hmi_pedalboard: None,
            current_tuner_port: 1,
            catalog,
            router,
            hmi,
            broadcaster,
        };
        session.refresh_hardware_ports();
        session
    }

    /// Re-read the physical audio port inventory from the router.
    pub fn refresh_hardware_ports(&mut self) {
        self.audioports_in = self
            .router
            .hardware_ports(true, false)
            .iter()
            .map(|p| short_port_name(p).to_string())
            .collect();
        self.audioports_out = self
            .router
            .hardware_ports(true, true)
            .iter()
            .map(|p| short_port_name(p).to_string())
            .collect();
        self.has_serial_midi_in = self.router.has_serial_midi_input();
        self.has_serial_midi_out = self.router.has_serial_midi_output();
    }

    // -- engine plumbing ---------------------------------------------------

    fn link(&self) -> Result<&EngineLink, SessionError> {
        self.link.as_ref().ok_or(SessionError::Link(LinkError::Closed))
    }

    /// Send one engine command and surface its reply. `modified` marks the
    /// pedalboard dirty the moment the command is queued.
    pub(crate) async fn engine_cmd(
        &mut self,
        cmd: EngineCommand,
        modified: bool,
    ) -> Result<Resp, SessionError> {
        if modified {
            self.pedalboard_modified = true;
        }
        let link = self.link()?.clone();
        Ok(link.send(cmd).await?)
    }

    /// Like [`Self::engine_cmd`], collapsed to a success flag: protocol and
    /// transport failures become `false` after logging.
    pub(crate) async fn engine_ok(&mut self, cmd: EngineCommand, modified: bool) -> bool {
        match self.engine_cmd(cmd, modified).await {
            Ok(resp) => resp.is_ok(),
            Err(SessionError::Link(LinkError::Protocol(err))) => {
                error!(%err, "engine protocol error");
                false
            }
            Err(err) => {
                warn!(%err, "engine command failed");
                false
            }
        }
    }

    /// Attach a fresh link after a crash (or at boot). With a non-empty
    /// session the engine is re-seeded by replaying the current state.
    pub async fn reconnect(&mut self, link: EngineLink) -> Result<(), SessionError> {
        self.link = Some(link);
        let was_crashed = std::mem::take(&mut self.crashed);

        if was_crashed {
            self.refresh_hardware_ports();
        }
        if !self.plugins.is_empty() {
            self.replay_engine_state().await?;
        }
        Ok(())
    }

    pub fn crashed(&self) -> bool {
        self.crashed
    }

    // -- read-channel events ----------------------------------------------

    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Event(ev) => self.apply_engine_event(ev).await,
            LinkEvent::WriteClosed => {
                warn!("engine write socket closed, session marked crashed");
                self.crashed = true;
                self.link = None;
                self.broadcaster.send("stop");
            }
            LinkEvent::ReadClosed => {
                warn!("engine read socket closed");
            }
        }
    }

    pub async fn apply_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ParamSet { instance_id, symbol, value } => {
                let Some(plugin) = self.plugins.get_mut(&instance_id) else {
                    return;
                };
                if symbol == ":bypass" {
                    plugin.bypassed = value != 0.0;
                } else {
                    plugin.ports.insert(symbol.clone(), value);
                }
                let instance = plugin.instance.clone();
                self.pedalboard_modified = true;
                self.broadcaster
                    .send(format!("param_set {} {} {}", instance, symbol, value));
            }
            EngineEvent::OutputSet { instance_id, symbol, value } => {
                if instance_id == TUNER_INSTANCE_ID {
                    self.push_tuner_value(value).await;
                    return;
                }
                let Some(plugin) = self.plugins.get_mut(&instance_id) else {
                    return;
                };
                plugin.outputs.insert(symbol.clone(), Some(value));
                let instance = plugin.instance.clone();
                self.broadcaster
                    .send(format!("output_set {} {} {}", instance, symbol, value));
            }
            EngineEvent::MidiMapped {
                instance_id,
                symbol,
                channel,
                controller,
                value,
                minimum,
                maximum,
            } => {
                let Some(plugin) = self.plugins.get_mut(&instance_id) else {
                    warn!(instance_id, "midi_mapped for unknown instance");
                    return;
                };
                if symbol == ":bypass" {
                    plugin.bypass_cc = MidiCc { channel, controller };
                    plugin.bypassed = value != 0.0;
                } else {
                    plugin.midi_ccs.insert(
                        symbol.clone(),
                        MidiCcRange { channel, controller, minimum, maximum },
                    );
                    plugin.ports.insert(symbol.clone(), value);
                }
                let instance = plugin.instance.clone();
                self.pedalboard_modified = true;
                self.broadcaster.send(format!(
                    "midi_map {} {} {} {} {} {}",
                    instance, symbol, channel, controller, minimum, maximum
                ));
                self.broadcaster
                    .send(format!("param_set {} {} {}", instance, symbol, value));
            }
            EngineEvent::MidiProgram { program } => {
                self.handle_midi_program(program).await;
            }
            EngineEvent::DataFinish => {
                let _ = self
                    .engine_cmd(EngineCommand::OutputDataReady, false)
                    .await;
            }
        }
    }

    async fn handle_midi_program(&mut self, program: i32) {
        let bank_id = self.bank_id;
        let pedalboards = if bank_id > 0 && bank_id <= self.banks.len() {
            self.banks[bank_id - 1].pedalboards.clone()
        } else {
            self.all_pedalboards.clone()
        };

        if program < 0 || program as usize >= pedalboards.len() {
            return;
        }
        let bundle = PathBuf::from(&pedalboards[program as usize].bundle);

        if self.reset().await.is_err() {
            return;
        }
        self.hmi.clear().await;
        self.bank_id = bank_id;
        if let Err(err) = self.load(&bundle, false).await {
            error!(%err, bundle = %bundle.display(), "midi_program load failed");
        }
    }

    async fn push_tuner_value(&mut self, freq: f32) {
        if freq == 0.0 {
            return;
        }
        if let Some((note, cents)) = tuner::freq_to_note_cents(freq) {
            self.hmi.tuner(freq, &note, cents).await;
        }
    }

    // -- plugins -----------------------------------------------------------

    pub async fn add_plugin(
        &mut self,
        instance: &str,
        uri: &str,
        x: f32,
        y: f32,
    ) -> Result<bool, SessionError> {
        self.pedalboard_presets.clear();

        let controls = self.catalog.control_ports(uri)?;
        let instance_id = self.mapper.get_id(instance);

        let resp = self
            .engine_cmd(
                EngineCommand::Add { uri: uri.to_string(), instance_id },
                true,
            )
            .await?;
        if resp.as_int().unwrap_or(-1) < 0 {
            return Ok(false);
        }

        let bypassed = false;
        let mut plugin = Plugin {
            instance: instance.to_string(),
            uri: uri.to_string(),
            x,
            y,
            bypassed,
            bypass_cc: MidiCc::UNMAPPED,
            ports: Default::default(),
            outputs: controls
                .monitored_outputs
                .iter()
                .map(|symbol| (symbol.clone(), None))
                .collect(),
            midi_ccs: controls
                .inputs
                .iter()
                .map(|port| (port.symbol.clone(), MidiCcRange::UNMAPPED))
                .collect(),
            badports: Default::default(),
            designations: Designations::default(),
            preset: String::new(),
            map_presets: Vec::new(),
            addressings: HashMap::new(),
        };

        for port in &controls.inputs {
            let mut value = port.default;
            if port.properties.contains("notOnGUI") {
                plugin.badports.insert(port.symbol.clone());
            } else {
                match port.designation {
                    Some(PortDesignation::Enabled) => {
                        plugin.designations.enabled = Some(port.symbol.clone());
                        plugin.badports.insert(port.symbol.clone());
                        value = if bypassed { 0.0 } else { 1.0 };
                    }
                    Some(PortDesignation::Freewheel) => {
                        plugin.designations.freewheel = Some(port.symbol.clone());
                        plugin.badports.insert(port.symbol.clone());
                        value = 0.0;
                    }
                    None => {}
                }
            }
            plugin.ports.insert(port.symbol.clone(), value);
        }

        self.plugins.insert(instance_id, plugin);

        for symbol in &controls.monitored_outputs {
            let link = self.link()?.clone();
            let _ = link
                .send(EngineCommand::MonitorOutput {
                    instance_id,
                    symbol: symbol.clone(),
                })
                .await;
        }

        self.broadcaster.send(format!(
            "add {} {} {:.1} {:.1} {}",
            instance,
            uri,
            x,
            y,
            i32::from(bypassed)
        ));
        Ok(true)
    }

    pub async fn remove_plugin(&mut self, instance: &str) -> Result<bool, SessionError> {
        self.pedalboard_presets.clear();

        let instance_id = self.mapper.get_id_without_creating(instance)?;
        let Some(plugin) = self.plugins.remove(&instance_id) else {
            return Ok(false);
        };

        // cascade: drop every addressing, then advance each touched ring once
        let mut used_actuators = Vec::new();
        for id in plugin.addressings.values() {
            if let Some(addressing) = self.addressings.remove(*id) {
                if !used_actuators.contains(&addressing.actuator_uri) {
                    used_actuators.push(addressing.actuator_uri);
                }
            }
        }
        for actuator_uri in used_actuators {
            self.address_next_uri(&actuator_uri).await;
        }

        if self.hmi.initialized() {
            self.hmi.control_rm(instance_id, ":all").await;
        }

        let ok = self
            .engine_ok(EngineCommand::Remove { instance_id }, true)
            .await;

        let removed: Vec<_> = self
            .connections
            .iter()
            .filter(|(a, b)| {
                a.rsplit_once('/').map(|(head, _)| head) == Some(instance)
                    || b.rsplit_once('/').map(|(head, _)| head) == Some(instance)
            })
            .cloned()
            .collect();
        for edge in removed {
            self.connections.retain(|entry| *entry != edge);
            self.broadcaster
                .send(format!("disconnect {} {}", edge.0, edge.1));
        }

        self.broadcaster.send(format!("remove {}", instance));
        Ok(ok)
    }

    pub async fn bypass(&mut self, instance: &str, bypassed: bool) -> Result<bool, SessionError> {
        let instance_id = self.mapper.get_id_without_creating(instance)?;
        let enabled_symbol = {
            let plugin = self
                .plugins
                .get_mut(&instance_id)
                .ok_or(SessionError::NoSuchPlugin(instance_id))?;
            plugin.bypassed = bypassed;
            plugin.designations.enabled.clone()
        };

        let ok = self
            .engine_ok(EngineCommand::Bypass { instance_id, bypassed }, true)
            .await;
        self.broadcaster.send(format!(
            "param_set {} :bypass {}",
            instance,
            if bypassed { 1.0 } else { 0.0 }
        ));

        if let Some(symbol) = enabled_symbol {
            let value = if bypassed { 0.0 } else { 1.0 };
            if let Some(plugin) = self.plugins.get_mut(&instance_id) {
                plugin.ports.insert(symbol.clone(), value);
            }
            self.engine_ok(
                EngineCommand::ParamSet { instance_id, symbol, value },
                true,
            )
            .await;
        }
        Ok(ok)
    }

    /// Set one control port; `port` is the full `/graph/<node>/<symbol>` path.
    pub async fn param_set(&mut self, port: &str, value: f32) -> Result<bool, SessionError> {
        let Some((instance, symbol)) = port.rsplit_once('/') else {
            warn!(port, "malformed port path");
            return Ok(false);
        };
        let instance_id = self.mapper.get_id_without_creating(instance)?;

        {
            let plugin = self
                .plugins
                .get_mut(&instance_id)
                .ok_or(SessionError::NoSuchPlugin(instance_id))?;
            if plugin.designations.contains(symbol) {
                error!(symbol, "refusing to write a designated port");
                return Ok(false);
            }
            plugin.ports.insert(symbol.to_string(), value);
        }

        let ok = self
            .engine_ok(
                EngineCommand::ParamSet {
                    instance_id,
                    symbol: symbol.to_string(),
                    value,
                },
                true,
            )
            .await;
        self.broadcaster
            .send(format!("param_set {} {} {}", instance, symbol, value));
        Ok(ok)
    }

    pub async fn preset_load(&mut self, instance: &str, uri: &str) -> Result<bool, SessionError> {
        let instance_id = self.mapper.get_id_without_creating(instance)?;
        if !self.plugins.contains_key(&instance_id) {
            return Err(SessionError::NoSuchPlugin(instance_id));
        }

        let ok = self
            .engine_ok(
                EngineCommand::PresetLoad { instance_id, uri: uri.to_string() },
                true,
            )
            .await;
        if !ok {
            return Ok(false);
        }

        let state = match self
            .engine_cmd(EngineCommand::PresetShow { uri: uri.to_string() }, false)
            .await?
        {
            Resp::Text(state) if !state.is_empty() => state,
            _ => return Ok(false),
        };
        let port_values = self.catalog.state_port_values(&state);

        let (broadcasts, used_actuators) = {
            let plugin = self
                .plugins
                .get_mut(&instance_id)
                .ok_or(SessionError::NoSuchPlugin(instance_id))?;

            plugin.preset = uri.to_string();
            plugin.ports.extend(port_values);

            // designated ports track bypass, never the preset
            let enabled_value = if plugin.bypassed { 0.0 } else { 1.0 };
            if let Some(symbol) = plugin.designations.enabled.clone() {
                plugin.ports.insert(symbol, enabled_value);
            }
            if let Some(symbol) = plugin.designations.freewheel.clone() {
                plugin.ports.insert(symbol, 0.0);
            }

            let mut broadcasts = vec![format!("preset {} {}", instance, uri)];
            let mut used_actuators: Vec<String> = Vec::new();
            for (symbol, value) in &plugin.ports {
                broadcasts.push(format!("param_set {} {} {}", instance, symbol, value));
                if let Some(id) = plugin.addressings.get(symbol) {
                    if let Some(addressing) = self.addressings.get(*id) {
                        if !used_actuators.contains(&addressing.actuator_uri) {
                            used_actuators.push(addressing.actuator_uri.clone());
                        }
                    }
                }
            }
            (broadcasts, used_actuators)
        };

        for msg in broadcasts {
            self.broadcaster.send(msg);
        }
        for actuator_uri in used_actuators {
            self.addressing_load(&actuator_uri, None, true).await;
        }
        Ok(true)
    }

    pub async fn preset_save_new(
        &mut self,
        instance: &str,
        name: &str,
    ) -> Result<Option<PresetSaved>, SessionError> {
        let instance_id = self.mapper.get_id_without_creating(instance)?;
        let plugin_uri = self
            .plugins
            .get(&instance_id)
            .ok_or(SessionError::NoSuchPlugin(instance_id))?
            .uri
            .clone();

        let symbol = crate::pedalboard::symbolify(name, 32);
        let short = instance.strip_prefix(GRAPH_PREFIX).unwrap_or(instance);

        let mut bundle = self
            .options
            .presets_dir
            .join(format!("{}-{}.lv2", short, symbol));
        while bundle.exists() {
            bundle = self.options.presets_dir.join(format!(
                "{}-{}-{}.lv2",
                short,
                symbol,
                fastrand::u32(1..=99999)
            ));
        }

        let ok = self
            .engine_ok(
                EngineCommand::PresetSave {
                    instance_id,
                    name: name.to_string(),
                    bundle: bundle.display().to_string(),
                    file: format!("{}.ttl", symbol),
                },
                false,
            )
            .await;
        if !ok {
            return Ok(None);
        }

        self.catalog.rescan_presets(&plugin_uri);
        self.add_bundle(&bundle).await?;

        let uri = format!("file://{}.ttl", bundle.join(&symbol).display());
        if let Some(plugin) = self.plugins.get_mut(&instance_id) {
            plugin.preset = uri.clone();
        }
        info!(%uri, "preset saved");
        Ok(Some(PresetSaved { bundle, uri }))
    }

    pub async fn preset_save_replace(
        &mut self,
        instance: &str,
        uri: &str,
        bundle: &Path,
        name: &str,
    ) -> Result<Option<PresetSaved>, SessionError> {
        let instance_id = self.mapper.get_id_without_creating(instance)?;
        let plugin_uri = {
            let plugin = self
                .plugins
                .get(&instance_id)
                .ok_or(SessionError::NoSuchPlugin(instance_id))?;
            if plugin.preset != uri || !bundle.exists() {
                return Ok(None);
            }
            plugin.uri.clone()
        };

        self.remove_bundle(bundle, false).await?;
        std::fs::remove_dir_all(bundle)?;
        self.catalog.rescan_presets(&plugin_uri);
        if let Some(plugin) = self.plugins.get_mut(&instance_id) {
            plugin.preset.clear();
        }

        let symbol = crate::pedalboard::symbolify(name, 32);
        let ok = self
            .engine_ok(
                EngineCommand::PresetSave {
                    instance_id,
                    name: name.to_string(),
                    bundle: bundle.display().to_string(),
                    file: format!("{}.ttl", symbol),
                },
                false,
            )
            .await;
        if !ok {
            return Ok(None);
        }

        self.add_bundle(bundle).await?;

        let preset_uri = format!("file://{}.ttl", bundle.join(&symbol).display());
        if let Some(plugin) = self.plugins.get_mut(&instance_id) {
            plugin.preset = preset_uri.clone();
        }
        Ok(Some(PresetSaved {
            bundle: bundle.to_path_buf(),
            uri: preset_uri,
        }))
    }

    pub async fn preset_delete(
        &mut self,
        instance: &str,
        uri: &str,
        bundle: &Path,
    ) -> Result<bool, SessionError> {
        let instance_id = self.mapper.get_id_without_creating(instance)?;
        let plugin_uri = {
            let plugin = self
                .plugins
                .get(&instance_id)
                .ok_or(SessionError::NoSuchPlugin(instance_id))?;
            if plugin.preset != uri || !bundle.exists() {
                return Ok(false);
            }
            plugin.uri.clone()
        };

        self.remove_bundle(bundle, false).await?;
        std::fs::remove_dir_all(bundle)?;
        self.catalog.rescan_presets(&plugin_uri);
        if let Some(plugin) = self.plugins.get_mut(&instance_id) {
            plugin.preset.clear();
        }
        self.broadcaster.send(format!("preset {} null", instance));
        Ok(true)
    }

    pub fn set_position(&mut self, instance: &str, x: f32, y: f32) -> Result<(), SessionError> {
        let instance_id = self.mapper.get_id_without_creating(instance)?;
        let plugin = self
            .plugins
            .get_mut(&instance_id)
            .ok_or(SessionError::NoSuchPlugin(instance_id))?;
        plugin.x = x;
        plugin.y = y;
        self.pedalboard_modified = true;
        Ok(())
    }

    pub fn set_pedalboard_size(&mut self, width: i32, height: i32) {
        self.pedalboard_size = (width, height);
        self.pedalboard_modified = true;
    }

    // -- bundles -----------------------------------------------------------

    pub async fn add_bundle(&mut self, bundle: &Path) -> Result<Vec<String>, SessionError> {
        if self.catalog.is_bundle_loaded(bundle) {
            return Err(SessionError::BundleAlreadyLoaded(bundle.to_path_buf()));
        }
        self.engine_cmd(
            EngineCommand::BundleAdd { path: bundle.display().to_string() },
            false,
        )
        .await?;
        Ok(self.catalog.add_bundle(bundle))
    }

    pub async fn remove_bundle(
        &mut self,
        bundle: &Path,
        is_plugin_bundle: bool,
    ) -> Result<Vec<String>, SessionError> {
        if !self.catalog.is_bundle_loaded(bundle) {
            return Err(SessionError::BundleNotLoaded(bundle.to_path_buf()));
        }

        if is_plugin_bundle && !self.plugins.is_empty() {
            let bundled = self.catalog.plugins_in_bundle(bundle);
            for plugin in self.plugins.values() {
                if bundled.contains(&plugin.uri) {
                    return Err(SessionError::BundleInUse(plugin.uri.clone()));
                }
            }
        }

        self.engine_cmd(
            EngineCommand::BundleRemove { path: bundle.display().to_string() },
            false,
        )
        .await?;
        Ok(self.catalog.remove_bundle(bundle))
    }

    // -- connections -------------------------------------------------------

    /// Translate a `/graph/...` path into the engine's port naming.
    pub(crate) fn fix_engine_port(&self, port: &str) -> Result<String, SessionError> {
        let parts: Vec<&str> = port.split('/').collect();

        if parts.len() < 3 || parts.len() > 4 {
            return Err(SessionError::Mapper(MapperError::UnknownInstance(
                port.to_string(),
            )));
        }

        if parts.len() == 3 {
            // hardware port: /graph/<port>
            let name = parts[2];
            if name == "serial_midi_in" {
                return Ok("ttymidi:MIDI_in".to_string());
            }
            if name == "serial_midi_out" {
                return Ok("ttymidi:MIDI_out".to_string());
            }
            if let Some(num) = name.strip_prefix("playback_") {
                if num == "1" || num == "2" {
                    return Ok(format!("{}:monitor-in_{}", ENGINE_JACK_CLIENT, num));
                }
            }
            return Ok(format!("system:{}", name));
        }

        // plugin port: /graph/<node>/<symbol>
        let instance = format!("{}{}", GRAPH_PREFIX, parts[2]);
        let symbol = parts[3];
        let instance_id = self.mapper.get_id_without_creating(&instance)?;
        Ok(format!("effect_{}:{}", instance_id, symbol))
    }

    pub async fn connect(&mut self, source: &str, target: &str) -> Result<bool, SessionError> {
        self.pedalboard_presets.clear();

        let edge = (source.to_string(), target.to_string());
        if self.connections.contains(&edge) {
            info!(source, target, "connection already exists");
            return Ok(true);
        }

        let fixed_source = self.fix_engine_port(source)?;
        let fixed_target = self.fix_engine_port(target)?;

        let ok = self
            .engine_ok(
                EngineCommand::Connect { source: fixed_source, target: fixed_target },
                true,
            )
            .await;
        if ok {
            self.connections.push(edge);
            self.broadcaster.send(format!("connect {} {}", source, target));
        } else {
            error!(source, target, "engine failed to connect ports");
        }
        Ok(ok)
    }

    /// Best-effort: the edge leaves the session state even when the engine
    /// reports failure.
    pub async fn disconnect(&mut self, source: &str, target: &str) -> Result<bool, SessionError> {
        self.pedalboard_presets.clear();

        let edge = (source.to_string(), target.to_string());
        let known = self.connections.contains(&edge);

        let ok = if !known {
            false
        } else {
            match (self.fix_engine_port(source), self.fix_engine_port(target)) {
                (Ok(fixed_source), Ok(fixed_target)) => {
                    self.engine_ok(
                        EngineCommand::Disconnect { source: fixed_source, target: fixed_target },
                        false,
                    )
                    .await
                }
                // one endpoint no longer resolves: treat as disconnected
                _ => true,
            }
        };

        if ok {
            self.pedalboard_modified = true;
        } else {
            warn!(source, target, "disconnect reported failure, dropping edge anyway");
        }

        self.connections.retain(|entry| *entry != edge);
        self.broadcaster
            .send(format!("disconnect {} {}", source, target));
        Ok(true)
    }

    // -- reset & replay ----------------------------------------------------

    /// Drop every plugin and connection, returning to an empty board.
    pub async fn reset(&mut self) -> Result<bool, SessionError> {
        self.bank_id = 0;
        self.plugins.clear();
        self.connections.clear();
        self.mapper.clear();
        self.addressings.clear();

        self.pedalboard_empty = true;
        self.pedalboard_modified = false;
        self.pedalboard_name.clear();
        self.pedalboard_path = None;
        self.pedalboard_size = (0, 0);
        self.pedalboard_presets.clear();

        banks::save_last_bank_and_pedalboard(&self.options.last_state_file(), 0, "");

        let ok = self.engine_ok(EngineCommand::RemoveAll, false).await;
        self.broadcaster.send("remove :all");
        Ok(ok)
    }

    /// Re-seed a freshly reconnected engine from the in-memory state.
    pub async fn replay_engine_state(&mut self) -> Result<(), SessionError> {
        let link = self.link()?.clone();

        let mut ids: Vec<i32> = self.plugins.keys().copied().collect();
        ids.sort_unstable();

        for instance_id in ids {
            let plugin = self.plugins[&instance_id].clone();

            link.send(EngineCommand::Add { uri: plugin.uri.clone(), instance_id })
                .await?;
            if plugin.bypassed {
                link.send(EngineCommand::Bypass { instance_id, bypassed: true })
                    .await?;
            }
            if plugin.bypass_cc.is_mapped() {
                link.send(EngineCommand::MidiMap {
                    instance_id,
                    symbol: ":bypass".to_string(),
                    channel: plugin.bypass_cc.channel,
                    controller: plugin.bypass_cc.controller,
                    minimum: 0.0,
                    maximum: 1.0,
                })
                .await?;
            }
            if !plugin.preset.is_empty() {
                link.send(EngineCommand::PresetLoad {
                    instance_id,
                    uri: plugin.preset.clone(),
                })
                .await?;
            }
            for (symbol, value) in &plugin.ports {
                link.send(EngineCommand::ParamSet {
                    instance_id,
                    symbol: symbol.clone(),
                    value: *value,
                })
                .await?;
            }
            for symbol in plugin.outputs.keys() {
                link.send(EngineCommand::MonitorOutput {
                    instance_id,
                    symbol: symbol.clone(),
                })
                .await?;
            }
            for (symbol, cc) in &plugin.midi_ccs {
                if !cc.is_mapped() || plugin.badports.contains(symbol) {
                    continue;
                }
                link.send(EngineCommand::MidiMap {
                    instance_id,
                    symbol: symbol.clone(),
                    channel: cc.channel,
                    controller: cc.controller,
                    minimum: cc.minimum,
                    maximum: cc.maximum,
                })
                .await?;
            }
        }

        for (source, target) in self.connections.clone() {
            let fixed_source = self.fix_engine_port(&source)?;
            let fixed_target = self.fix_engine_port(&target)?;
            link.send(EngineCommand::Connect { source: fixed_source, target: fixed_target })
                .await?;
        }
        Ok(())
    }

    // -- editor snapshot ---------------------------------------------------

    /// The full state mirror pushed to a newly connected editor.
    pub fn snapshot_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();

        if let Some(pct) = stats::memory_used_percent() {
            messages.push(format!("mem_load {:.1}", pct));
        }
        let stats = self.router.stats();
        messages.push(format!("stats {:.1} {}", stats.cpu_load, stats.xruns));
        let (left, right) = self.router.truebypass();
        messages.push(format!(
            "truebypass {} {}",
            i32::from(left),
            i32::from(right)
        ));
        messages.push(format!(
            "loading_start {} {}",
            i32::from(self.pedalboard_empty),
            i32::from(self.pedalboard_modified)
        ));
        messages.push(format!(
            "size {} {}",
            self.pedalboard_size.0, self.pedalboard_size.1
        ));

        for (index, name) in self.audioports_in.iter().enumerate() {
            messages.push(format!(
                "add_hw_port /graph/{} audio 0 {} {}",
                name,
                title_case(name),
                index + 1
            ));
        }
        for (index, name) in self.audioports_out.iter().enumerate() {
            messages.push(format!(
                "add_hw_port /graph/{} audio 1 {} {}",
                name,
                title_case(name),
                index + 1
            ));
        }

        if self.has_serial_midi_in {
            messages.push("add_hw_port /graph/serial_midi_in midi 0 Serial_MIDI_In 0".to_string());
        }
        if self.has_serial_midi_out {
            messages
                .push("add_hw_port /graph/serial_midi_out midi 1 Serial_MIDI_Out 0".to_string());
        }

        let tracked: Vec<String> = self
            .midiports
            .iter()
            .flat_map(|record| record.jack_ports().into_iter().map(str::to_string))
            .collect();
        for output in [false, true] {
            let ports = self.router.hardware_ports(false, output);
            for (index, name) in ports.iter().enumerate() {
                if !tracked.contains(name) {
                    continue;
                }
                let title = match self.router.port_alias(name) {
                    Some(alias) => crate::router::alias_title(&alias),
                    None => title_case(short_port_name(name)),
                };
                messages.push(format!(
                    "add_hw_port /graph/{} midi {} {} {}",
                    short_port_name(name),
                    i32::from(output),
                    title,
                    index + 1
                ));
            }
        }

        let mut ids: Vec<i32> = self.plugins.keys().copied().collect();
        ids.sort_unstable();
        for instance_id in ids {
            let plugin = &self.plugins[&instance_id];
            messages.push(format!(
                "add {} {} {:.1} {:.1} {}",
                plugin.instance,
                plugin.uri,
                plugin.x,
                plugin.y,
                i32::from(plugin.bypassed)
            ));
            if plugin.bypass_cc.is_mapped() {
                messages.push(format!(
                    "midi_map {} :bypass {} {} 0.0 1.0",
                    plugin.instance, plugin.bypass_cc.channel, plugin.bypass_cc.controller
                ));
            }
            if !plugin.preset.is_empty() {
                messages.push(format!("preset {} {}", plugin.instance, plugin.preset));
            }
            for (symbol, value) in &plugin.ports {
                messages.push(format!("param_set {} {} {}", plugin.instance, symbol, value));
            }
            for (symbol, value) in &plugin.outputs {
                if let Some(value) = value {
                    messages.push(format!(
                        "output_set {} {} {}",
                        plugin.instance, symbol, value
                    ));
                }
            }
            for (symbol, cc) in &plugin.midi_ccs {
                if !cc.is_mapped() || plugin.badports.contains(symbol) {
                    continue;
                }
                messages.push(format!(
                    "midi_map {} {} {} {} {} {}",
                    plugin.instance, symbol, cc.channel, cc.controller, cc.minimum, cc.maximum
                ));
            }
        }

        for (source, target) in &self.connections {
            messages.push(format!("connect {} {}", source, target));
        }

        messages.push("loading_end".to_string());
        messages
    }

    /// One tick of the CPU/xrun stats timer.
    pub fn stats_message(&self) -> String {
        let stats = self.router.stats();
        format!("stats {:.1} {}", stats.cpu_load, stats.xruns)
    }

    // -- tuner & monitor muting --------------------------------------------

    pub(crate) fn mute_monitors(&self) {
        for channel in ["1", "2"] {
            self.router.disconnect_ports(
                &format!("{}:monitor-out_{}", ENGINE_JACK_CLIENT, channel),
                &format!("system:playback_{}", channel),
            );
        }
    }

    pub(crate) fn unmute_monitors(&self) {
        for channel in ["1", "2"] {
            self.router.connect_ports(
                &format!("{}:monitor-out_{}", ENGINE_JACK_CLIENT, channel),
                &format!("system:playback_{}", channel),
            );
        }
    }

    // -- accessors (used by the daemon and the tests) ----------------------

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn plugins(&self) -> &HashMap<i32, Plugin> {
        &self.plugins
    }

    pub fn plugin_by_instance(&self, instance: &str) -> Option<&Plugin> {
        let id = self.mapper.get_id_without_creating(instance).ok()?;
        self.plugins.get(&id)
    }

    pub fn connections(&self) -> &[(String, String)] {
        &self.connections
    }

    pub fn addressings(&self) -> &AddressingEngine {
        &self.addressings
    }

    pub fn midiports(&self) -> &[MidiPortRecord] {
        &self.midiports
    }

    pub fn pedalboard_modified(&self) -> bool {
        self.pedalboard_modified
    }

    pub fn pedalboard_name(&self) -> &str {
        &self.pedalboard_name
    }

    pub fn pedalboard_path(&self) -> Option<&Path> {
        self.pedalboard_path.as_deref()
    }

    pub fn pedalboard_presets(&self) -> &[PedalboardPreset] {
        &self.pedalboard_presets
    }

    pub fn bank_id(&self) -> usize {
        self.bank_id
    }

    pub fn set_banks(&mut self, banks: Vec<Bank>) {
        self.banks = banks;
    }

    pub fn set_all_pedalboards(&mut self, pedalboards: Vec<PedalboardEntry>) {
        self.all_pedalboards = pedalboards;
    }
}

/// `system:capture_1` -> `capture_1`
pub(crate) fn short_port_name(port: &str) -> &str {
    match port.split_once(':') {
        Some((_, name)) => name,
        None => port,
    }
}

/// `capture_1` -> `Capture_1`, the editor's display convention.
pub(crate) fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for ch in name.chars() {
        if upper_next && ch.is_ascii_alphabetic() {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
            upper_next = !ch.is_ascii_alphanumeric();
        }
        if ch == ' ' {
            out.pop();
            out.push('_');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_port_name() {
        assert_eq!(short_port_name("system:capture_1"), "capture_1");
        assert_eq!(short_port_name("capture_1"), "capture_1");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("capture_1"), "Capture_1");
        assert_eq!(title_case("midi in"), "Midi_In");
    }
}
