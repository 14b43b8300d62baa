//! Inbound HMI command dispatch.
//!
//! The serial framing lives outside this crate; what arrives here is one
//! text line per command, dispatched on its first token. Replies carry an
//! ok flag plus an optional payload line.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use stageproto::{
    ActuatorAddr, ActuatorType, BankConfigAction, EngineCommand, HardwareType, HmiSurface,
};

use crate::banks;
use crate::pedalboard::read_plugin_values;
use crate::router::AudioRouter;
use crate::session::{
    Session, GRAPH_PREFIX, TUNER_INPUT_PORT, TUNER_INSTANCE_ID, TUNER_MONITOR_PORT, TUNER_URI,
};

/// Surface stand-in for sessions without connected hardware: never
/// initialized, every push is dropped.
#[derive(Debug, Default)]
pub struct NullHmi;

#[async_trait::async_trait]
impl stageproto::HmiSurface for NullHmi {
    fn initialized(&self) -> bool {
        false
    }

    async fn initial_state(
        &mut self,
        _bank_id: usize,
        _pedalboard_id: usize,
        _pedalboards: &[stageproto::PedalboardEntry],
    ) -> bool {
        false
    }

    async fn bank_config(&mut self, _actuator: ActuatorAddr, _action: BankConfigAction) -> bool {
        false
    }

    async fn control_add(&mut self, _control: stageproto::ControlAdd) -> bool {
        false
    }

    async fn control_rm(&mut self, _instance_id: i32, _symbol: &str) -> bool {
        false
    }

    async fn control_clean(&mut self, _actuator: ActuatorAddr) -> bool {
        false
    }

    async fn clear(&mut self) -> bool {
        false
    }

    async fn tuner(&mut self, _freq: f32, _note: &str, _cents: i32) -> bool {
        false
    }

    async fn ui_connected(&mut self) -> bool {
        false
    }

    async fn ui_disconnected(&mut self) -> bool {
        false
    }
}

/// A parsed HMI command.
#[derive(Debug, Clone, PartialEq)]
pub enum HmiRequest {
    HardwareConnected { hardware_type: u8, hardware_id: u8 },
    HardwareDisconnected { hardware_type: u8, hardware_id: u8 },
    ListBanks,
    ListBankPedalboards { bank_id: i32 },
    LoadBankPedalboard { bank_id: i32, pedalboard_id: i32 },
    ControlGet { instance_id: i32, symbol: String },
    ControlSet { instance_id: i32, symbol: String, value: f32 },
    ControlNext { actuator: ActuatorAddr },
    ControlPrev { actuator: ActuatorAddr },
    SavePedalboard,
    ResetPedalboard,
    Tuner { on: bool },
    TunerInput { port: i32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HmiParseError {
    #[error("empty command line")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("command {cmd} missing an argument")]
    MissingArgument { cmd: &'static str },
    #[error("command {cmd} has a malformed argument: {value:?}")]
    BadArgument { cmd: &'static str, value: String },
}

fn arg<'a, I>(tokens: &mut I, cmd: &'static str) -> Result<&'a str, HmiParseError>
where
    I: Iterator<Item = &'a str>,
{
    tokens.next().ok_or(HmiParseError::MissingArgument { cmd })
}

fn num<T: std::str::FromStr>(raw: &str, cmd: &'static str) -> Result<T, HmiParseError> {
    raw.parse().map_err(|_| HmiParseError::BadArgument {
        cmd,
        value: raw.to_string(),
    })
}

fn actuator<'a, I>(tokens: &mut I, cmd: &'static str) -> Result<ActuatorAddr, HmiParseError>
where
    I: Iterator<Item = &'a str>,
{
    let hardware_type: u8 = num(arg(tokens, cmd)?, cmd)?;
    let hardware_id: u8 = num(arg(tokens, cmd)?, cmd)?;
    let actuator_type: u8 = num(arg(tokens, cmd)?, cmd)?;
    let actuator_index: u8 = num(arg(tokens, cmd)?, cmd)?;

    let hardware_type = HardwareType::from_id(hardware_type).ok_or(HmiParseError::BadArgument {
        cmd,
        value: hardware_type.to_string(),
    })?;
    let actuator_type = ActuatorType::from_id(actuator_type).ok_or(HmiParseError::BadArgument {
        cmd,
        value: actuator_type.to_string(),
    })?;
    Ok(ActuatorAddr::new(
        hardware_type,
        hardware_id,
        actuator_type,
        actuator_index,
    ))
}

impl HmiRequest {
    pub fn parse(line: &str) -> Result<Self, HmiParseError> {
        let mut tokens = line.split_whitespace();
        let cmd = tokens.next().ok_or(HmiParseError::Empty)?;

        match cmd {
            "hw_con" => Ok(HmiRequest::HardwareConnected {
                hardware_type: num(arg(&mut tokens, "hw_con")?, "hw_con")?,
                hardware_id: num(arg(&mut tokens, "hw_con")?, "hw_con")?,
            }),
            "hw_dis" => Ok(HmiRequest::HardwareDisconnected {
                hardware_type: num(arg(&mut tokens, "hw_dis")?, "hw_dis")?,
                hardware_id: num(arg(&mut tokens, "hw_dis")?, "hw_dis")?,
            }),
            "banks" => Ok(HmiRequest::ListBanks),
            "pedalboards" => Ok(HmiRequest::ListBankPedalboards {
                bank_id: num(arg(&mut tokens, "pedalboards")?, "pedalboards")?,
            }),
            "pedalboard" => Ok(HmiRequest::LoadBankPedalboard {
                bank_id: num(arg(&mut tokens, "pedalboard")?, "pedalboard")?,
                pedalboard_id: num(arg(&mut tokens, "pedalboard")?, "pedalboard")?,
            }),
            "control_get" => Ok(HmiRequest::ControlGet {
                instance_id: num(arg(&mut tokens, "control_get")?, "control_get")?,
                symbol: arg(&mut tokens, "control_get")?.to_string(),
            }),
            "control_set" => Ok(HmiRequest::ControlSet {
                instance_id: num(arg(&mut tokens, "control_set")?, "control_set")?,
                symbol: arg(&mut tokens, "control_set")?.to_string(),
                value: num(arg(&mut tokens, "control_set")?, "control_set")?,
            }),
            "control_next" => Ok(HmiRequest::ControlNext {
                actuator: actuator(&mut tokens, "control_next")?,
            }),
            "control_prev" => Ok(HmiRequest::ControlPrev {
                actuator: actuator(&mut tokens, "control_prev")?,
            }),
            "pedalboard_save" => Ok(HmiRequest::SavePedalboard),
            "pedalboard_reset" => Ok(HmiRequest::ResetPedalboard),
            "tuner" => {
                let state = arg(&mut tokens, "tuner")?;
                Ok(HmiRequest::Tuner { on: state == "on" })
            }
            "tuner_input" => Ok(HmiRequest::TunerInput {
                port: num(arg(&mut tokens, "tuner_input")?, "tuner_input")?,
            }),
            other => Err(HmiParseError::UnknownCommand(other.to_string())),
        }
    }
}

/// Acknowledgement sent back over the serial protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct HmiReply {
    pub ok: bool,
    pub payload: String,
}

impl HmiReply {
    fn ok() -> Self {
        Self { ok: true, payload: String::new() }
    }

    fn fail() -> Self {
        Self { ok: false, payload: String::new() }
    }

    fn with_payload(payload: String) -> Self {
        Self { ok: true, payload }
    }

    fn from_flag(ok: bool) -> Self {
        Self { ok, payload: String::new() }
    }
}

impl Session {
    /// Handle one HMI command. Deferred work (a queued pedalboard load) is
    /// executed by [`Session::run_pending_pedalboard_loads`] after the
    /// reply went out.
    pub async fn dispatch_hmi(&mut self, request: HmiRequest) -> HmiReply {
        match request {
            HmiRequest::HardwareConnected { .. } => {
                info!("hmi hardware connected");
                HmiReply::ok()
            }
            HmiRequest::HardwareDisconnected { .. } => {
                info!("hmi hardware disconnected");
                HmiReply::ok()
            }
            HmiRequest::ListBanks => self.hmi_list_banks(),
            HmiRequest::ListBankPedalboards { bank_id } => {
                self.hmi_list_bank_pedalboards(bank_id)
            }
            HmiRequest::LoadBankPedalboard { bank_id, pedalboard_id } => {
                HmiReply::from_flag(self.hmi_load_bank_pedalboard(bank_id, pedalboard_id))
            }
            HmiRequest::ControlGet { instance_id, symbol } => {
                self.hmi_parameter_get(instance_id, &symbol)
            }
            HmiRequest::ControlSet { instance_id, symbol, value } => {
                HmiReply::from_flag(self.hmi_parameter_set(instance_id, &symbol, value).await)
            }
            HmiRequest::ControlNext { actuator } => {
                HmiReply::from_flag(self.address_next(actuator).await)
            }
            HmiRequest::ControlPrev { actuator } => {
                HmiReply::from_flag(self.address_prev(actuator).await)
            }
            HmiRequest::SavePedalboard => {
                HmiReply::from_flag(self.save_main_graph_only().unwrap_or(false))
            }
            HmiRequest::ResetPedalboard => {
                HmiReply::from_flag(self.hmi_reset_current_pedalboard().await)
            }
            HmiRequest::Tuner { on } => {
                let ok = if on {
                    self.hmi_tuner_on().await
                } else {
                    self.hmi_tuner_off().await
                };
                HmiReply::from_flag(ok)
            }
            HmiRequest::TunerInput { port } => {
                HmiReply::from_flag(self.hmi_tuner_input(port))
            }
        }
    }

    // -- banks -------------------------------------------------------------

    fn hmi_list_banks(&self) -> HmiReply {
        info!("hmi list banks");

        if self.all_pedalboards.is_empty() {
            return HmiReply::with_payload(String::new());
        }

        let mut payload = "All 0".to_string();
        for (index, bank) in self.banks.iter().enumerate() {
            payload.push_str(&format!(" \"{}\" {}", bank.title, index + 1));
        }
        HmiReply::with_payload(payload)
    }

    fn hmi_list_bank_pedalboards(&self, bank_id: i32) -> HmiReply {
        info!(bank_id, "hmi list bank pedalboards");

        if bank_id < 0 || bank_id as usize > self.banks.len() {
            warn!(bank_id, "out of bounds bank id");
            return HmiReply::fail();
        }

        let pedalboards = if bank_id == 0 {
            &self.all_pedalboards
        } else {
            &self.banks[bank_id as usize - 1].pedalboards
        };

        // the surface has a tiny receive buffer; stop before overflowing it
        let mut bytes_free: i64 = 1024 - 64;
        let mut payload = String::new();

        for (num, board) in pedalboards.iter().take(50).enumerate() {
            let title: String = board
                .title
                .replace('"', "")
                .to_uppercase()
                .chars()
                .take(31)
                .collect();
            let entry = format!("\"{}\" {}", title, num);

            if bytes_free - entry.len() as i64 - 2 < 0 {
                warn!(num, "surface out of memory while listing pedalboards");
                break;
            }
            bytes_free -= entry.len() as i64 + 1;

            if !payload.is_empty() {
                payload.push(' ');
            }
            payload.push_str(&entry);
        }

        HmiReply::with_payload(payload)
    }

    /// Queue a pedalboard load. While a load is pending or in progress a
    /// newer request replaces the queued target and is rejected; the
    /// running load chains into the latest target when it finishes.
    pub fn hmi_load_bank_pedalboard(&mut self, bank_id: i32, pedalboard_id: i32) -> bool {
        if bank_id < 0 || bank_id as usize > self.banks.len() {
            warn!(bank_id, "out of bounds bank id");
            return false;
        }

        if self.next_hmi_pedalboard.is_some() {
            info!(bank_id, pedalboard_id, "load in flight, replacing queued target");
            self.next_hmi_pedalboard = Some((bank_id as usize, pedalboard_id.max(0) as usize));
            return false;
        }

        let count = if bank_id == 0 {
            self.all_pedalboards.len()
        } else {
            self.banks[bank_id as usize - 1].pedalboards.len()
        };
        if pedalboard_id < 0 || pedalboard_id as usize >= count {
            warn!(pedalboard_id, "out of bounds pedalboard id");
            return false;
        }

        self.next_hmi_pedalboard = Some((bank_id as usize, pedalboard_id as usize));
        true
    }

    fn resolve_hmi_target(
        &self,
        bank_id: usize,
        pedalboard_id: usize,
    ) -> Option<(PathBuf, bool, i32)> {
        let (pedalboards, footswitches, channel) = if bank_id == 0 {
            (&self.all_pedalboards, false, 15)
        } else {
            let bank = self.banks.get(bank_id - 1)?;
            (
                &bank.pedalboards,
                bank.navigate_footswitches,
                bank.program_channel(),
            )
        };
        let bundle = PathBuf::from(&pedalboards.get(pedalboard_id)?.bundle);
        Some((bundle, footswitches, channel))
    }

    /// Execute queued pedalboard loads, chaining into any target that was
    /// stashed while a load was running. Only the most recent target wins.
    pub async fn run_pending_pedalboard_loads(&mut self) {
        loop {
            let Some(target) = self.next_hmi_pedalboard else {
                return;
            };
            let (bank_id, pedalboard_id) = target;

            let Some((bundle, footswitches, channel)) =
                self.resolve_hmi_target(bank_id, pedalboard_id)
            else {
                warn!(bank_id, pedalboard_id, "queued pedalboard target vanished");
                self.next_hmi_pedalboard = None;
                return;
            };

            let _ = self.reset().await;
            self.hmi.clear().await;
            self.set_navigate_footswitches(footswitches).await;
            self.bank_id = bank_id;
            if let Err(err) = self.load(&bundle, false).await {
                warn!(%err, bundle = %bundle.display(), "queued pedalboard load failed");
            }
            let _ = self
                .engine_cmd(
                    EngineCommand::MidiProgramListen { enable: !footswitches, channel },
                    false,
                )
                .await;
            info!(bank_id, pedalboard_id, "pedalboard load finished");

            if self.next_hmi_pedalboard == Some(target) {
                self.next_hmi_pedalboard = None;
                return;
            }
            // a newer target arrived while loading; chain into it
        }
    }

    pub(crate) async fn set_navigate_footswitches(&mut self, enabled: bool) {
        let down = if enabled {
            BankConfigAction::PedalboardDown
        } else {
            BankConfigAction::Nothing
        };
        let up = if enabled {
            BankConfigAction::PedalboardUp
        } else {
            BankConfigAction::Nothing
        };

        if let Some(actuator) = self.addressings.hw_for_uri("/hmi/footswitch1") {
            self.hmi.bank_config(actuator, down).await;
        }
        if let Some(actuator) = self.addressings.hw_for_uri("/hmi/footswitch2") {
            self.hmi.bank_config(actuator, up).await;
        }
    }

    // -- parameters --------------------------------------------------------

    fn hmi_parameter_get(&self, instance_id: i32, symbol: &str) -> HmiReply {
        match self
            .plugins
            .get(&instance_id)
            .and_then(|plugin| plugin.ports.get(symbol))
        {
            Some(value) => HmiReply::with_payload(format!("{}", value)),
            None => HmiReply::fail(),
        }
    }

    async fn hmi_parameter_set(&mut self, instance_id: i32, symbol: &str, value: f32) -> bool {
        let Ok(instance) = self.mapper.get_instance(instance_id).map(str::to_string) else {
            return false;
        };
        if !self.plugins.contains_key(&instance_id) {
            return false;
        }

        if symbol == ":bypass" {
            let bypassed = value != 0.0;
            let enabled_symbol = {
                let plugin = self.plugins.get_mut(&instance_id).unwrap();
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

            if let Some(enabled) = enabled_symbol {
                let enabled_value = if bypassed { 0.0 } else { 1.0 };
                if let Some(plugin) = self.plugins.get_mut(&instance_id) {
                    plugin.ports.insert(enabled.clone(), enabled_value);
                }
                self.broadcaster.send(format!(
                    "param_set {} {} {}",
                    instance, enabled, enabled_value
                ));
            }
            return ok;
        }

        if symbol == ":presets" {
            let index = value as usize;
            let preset = {
                let plugin = self.plugins.get(&instance_id).unwrap();
                if value < 0.0 || index >= plugin.map_presets.len() {
                    return false;
                }
                plugin.map_presets[index].clone()
            };
            return self.preset_load(&instance, &preset).await.unwrap_or(false);
        }

        if let Some(plugin) = self.plugins.get_mut(&instance_id) {
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
        ok
    }

    // -- reset -------------------------------------------------------------

    async fn hmi_reset_current_pedalboard(&mut self) -> bool {
        info!("hmi reset current pedalboard");

        let Some(bundle) = self.pedalboard_path.clone() else {
            return false;
        };
        let values = match read_plugin_values(&bundle) {
            Ok(values) => values,
            Err(err) => {
                warn!(%err, "cannot re-read current pedalboard");
                return false;
            }
        };

        let mut used_actuators: Vec<String> = Vec::new();
        let note_actuator = |addressings: &crate::addressing::AddressingEngine,
                                 used: &mut Vec<String>,
                                 id: Option<&crate::addressing::AddressingId>| {
            if let Some(addressing) = id.and_then(|id| addressings.get(*id)) {
                if !used.contains(&addressing.actuator_uri) {
                    used.push(addressing.actuator_uri.clone());
                }
            }
        };

        for stored in values {
            let instance = format!("{}{}", GRAPH_PREFIX, stored.instance);
            let Ok(instance_id) = self.mapper.get_id_without_creating(&instance) else {
                continue;
            };
            if !self.plugins.contains_key(&instance_id) {
                continue;
            }

            {
                let plugin = self.plugins.get_mut(&instance_id).unwrap();
                plugin.bypassed = stored.bypassed;
                note_actuator(
                    &self.addressings,
                    &mut used_actuators,
                    plugin.addressings.get(":bypass"),
                );
                note_actuator(
                    &self.addressings,
                    &mut used_actuators,
                    plugin.addressings.get(":presets"),
                );
            }
            let _ = self
                .engine_cmd(
                    EngineCommand::Bypass { instance_id, bypassed: stored.bypassed },
                    false,
                )
                .await;

            if !stored.preset.is_empty() {
                if let Some(plugin) = self.plugins.get_mut(&instance_id) {
                    plugin.preset = stored.preset.clone();
                }
                let _ = self
                    .engine_cmd(
                        EngineCommand::PresetLoad {
                            instance_id,
                            uri: stored.preset.clone(),
                        },
                        false,
                    )
                    .await;
            }

            for (symbol, value) in stored.ports {
                {
                    let plugin = self.plugins.get_mut(&instance_id).unwrap();
                    plugin.ports.insert(symbol.clone(), value);
                    note_actuator(
                        &self.addressings,
                        &mut used_actuators,
                        plugin.addressings.get(&symbol),
                    );
                }
                let _ = self
                    .engine_cmd(
                        EngineCommand::ParamSet { instance_id, symbol, value },
                        false,
                    )
                    .await;
            }
        }

        self.pedalboard_modified = false;

        for actuator_uri in used_actuators {
            self.addressing_load(&actuator_uri, None, false).await;
        }
        true
    }

    // -- tuner -------------------------------------------------------------

    async fn hmi_tuner_on(&mut self) -> bool {
        info!("hmi tuner on");

        let added = self
            .engine_ok(
                EngineCommand::Add {
                    uri: TUNER_URI.to_string(),
                    instance_id: TUNER_INSTANCE_ID,
                },
                false,
            )
            .await;
        if !added {
            return false;
        }

        let monitored = self
            .engine_ok(
                EngineCommand::MonitorOutput {
                    instance_id: TUNER_INSTANCE_ID,
                    symbol: TUNER_MONITOR_PORT.to_string(),
                },
                false,
            )
            .await;
        let wired = monitored
            && self.router.connect_ports(
                &format!("system:capture_{}", self.current_tuner_port),
                &format!("effect_{}:{}", TUNER_INSTANCE_ID, TUNER_INPUT_PORT),
            );

        if !wired {
            let _ = self
                .engine_cmd(EngineCommand::Remove { instance_id: TUNER_INSTANCE_ID }, false)
                .await;
            return false;
        }

        self.mute_monitors();
        true
    }

    async fn hmi_tuner_off(&mut self) -> bool {
        info!("hmi tuner off");

        let _ = self
            .engine_cmd(EngineCommand::Remove { instance_id: TUNER_INSTANCE_ID }, false)
            .await;
        self.unmute_monitors();
        true
    }

    fn hmi_tuner_input(&mut self, port: i32) -> bool {
        if !(1..=2).contains(&port) {
            return false;
        }

        self.router.disconnect_ports(
            &format!("system:capture_{}", self.current_tuner_port),
            &format!("effect_{}:{}", TUNER_INSTANCE_ID, TUNER_INPUT_PORT),
        );
        self.router.connect_ports(
            &format!("system:capture_{}", port),
            &format!("effect_{}:{}", TUNER_INSTANCE_ID, TUNER_INPUT_PORT),
        );

        self.current_tuner_port = port as u8;
        true
    }

    // -- web editor session boundaries --------------------------------------

    /// The web editor connected: the surface yields bank navigation, and
    /// rings on the bank footswitches resume showing addressings.
    pub async fn ui_connected(&mut self) {
        if !self.hmi.initialized() {
            return;
        }

        let _ = self
            .engine_cmd(
                EngineCommand::MidiProgramListen { enable: false, channel: -1 },
                false,
            )
            .await;

        self.banks = Vec::new();
        self.all_pedalboards = Vec::new();

        self.hmi.ui_connected().await;
        self.set_navigate_footswitches(false).await;
        self.address_next_uri("/hmi/footswitch1").await;
        self.address_next_uri("/hmi/footswitch2").await;
    }

    /// The web editor disconnected: surface regains navigation.
    pub async fn ui_disconnected(&mut self) {
        if !self.hmi.initialized() {
            return;
        }

        self.banks = banks::list_banks(&self.options.banks_file());
        self.all_pedalboards = crate::pedalboard::list_pedalboards(&self.options.pedalboards_dir);

        self.hmi.ui_disconnected().await;
        self.initialize_hmi().await;
    }

    /// Seed the surface with bank/pedalboard navigation state after boot or
    /// editor disconnect.
    pub async fn initialize_hmi(&mut self) {
        let (last_bank, last_pedalboard) =
            banks::last_bank_and_pedalboard(&self.options.last_state_file());

        let (bank_id, pedalboards) = if last_bank > 0
            && !last_pedalboard.is_empty()
            && last_bank <= self.banks.len()
        {
            (last_bank, self.banks[last_bank - 1].pedalboards.clone())
        } else {
            (0, self.all_pedalboards.clone())
        };
        let (footswitches, channel) = if bank_id > 0 {
            let bank = &self.banks[bank_id - 1];
            (bank.navigate_footswitches, bank.program_channel())
        } else {
            (false, 15)
        };

        let (bank_id, pedalboard_id, pedalboards) = match pedalboards
            .iter()
            .position(|board| board.bundle == last_pedalboard)
        {
            Some(index) => (bank_id, index, pedalboards),
            None => (0, 0, Vec::new()),
        };

        self.set_navigate_footswitches(false).await;
        self.hmi
            .initial_state(bank_id, pedalboard_id, &pedalboards)
            .await;

        if footswitches {
            self.set_navigate_footswitches(true).await;
        } else {
            let _ = self
                .engine_cmd(
                    EngineCommand::MidiProgramListen { enable: true, channel },
                    false,
                )
                .await;
        }
    }

    /// Boot sequence: wipe the engine, restore the last pedalboard (or the
    /// default), then arm navigation and output monitoring.
    pub async fn bootstrap(&mut self, default_pedalboard: Option<&std::path::Path>) {
        let _ = self.engine_cmd(EngineCommand::RemoveAll, false).await;

        let (last_bank, last_pedalboard) =
            banks::last_bank_and_pedalboard(&self.options.last_state_file());

        if !last_pedalboard.is_empty() {
            self.bank_id = last_bank;
            let bundle = PathBuf::from(&last_pedalboard);
            if let Err(err) = self.load(&bundle, false).await {
                warn!(%err, "cannot restore last pedalboard");
            }
        } else {
            self.bank_id = 0;
            if let Some(default) = default_pedalboard {
                if default.exists() {
                    if let Err(err) = self.load(default, true).await {
                        warn!(%err, "cannot load default pedalboard");
                    }
                }
            }
        }

        let (footswitches, channel) = if self.bank_id > 0
            && !last_pedalboard.is_empty()
            && self.bank_id <= self.banks.len()
        {
            let bank = &self.banks[self.bank_id - 1];
            (bank.navigate_footswitches, bank.program_channel())
        } else {
            (false, 15)
        };

        let _ = self
            .engine_cmd(
                EngineCommand::MidiProgramListen { enable: !footswitches, channel },
                false,
            )
            .await;
        let _ = self.engine_cmd(EngineCommand::OutputDataReady, false).await;
    }
}
