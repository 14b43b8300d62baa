//! Shared fixtures: a scripted fake engine over loopback TCP, a recording
//! control surface, and a configurable audio router.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;

use stageproto::{
    ActuatorAddr, BankConfigAction, ControlAdd, EngineLink, HmiSurface, LinkEvent, PedalboardEntry,
};

use stagehand::{
    Broadcaster, CatalogEntry, ControlInput, JsonCatalog, PluginControls, PluginInfo,
    PortDesignation, PortLists, PresetInfo, RouterStats, ScalePoint, Session, SessionOptions,
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ---------------------------------------------------------------------------
// fake engine

pub struct FakeEngine {
    write_addr: (IpAddr, u16),
    read_addr: (IpAddr, u16),
    commands: Arc<Mutex<Vec<String>>>,
    overrides: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeEngine {
    /// Bind both channel listeners and serve clients forever: commands are
    /// recorded and answered (`add` echoes the requested instance id, the
    /// rest get `resp 0` unless overridden by first token).
    pub async fn spawn() -> Self {
        let write_listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let read_listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let write_addr = write_listener.local_addr().unwrap();
        let read_addr = read_listener.local_addr().unwrap();

        let commands = Arc::new(Mutex::new(Vec::new()));
        let overrides: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let recorded = Arc::clone(&commands);
        let replies = Arc::clone(&overrides);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = write_listener.accept().await else {
                    return;
                };
                let recorded = Arc::clone(&recorded);
                let replies = Arc::clone(&replies);
                tokio::spawn(async move {
                    let (rx, mut tx) = socket.into_split();
                    let mut reader = BufReader::new(rx);
                    loop {
                        let mut buf = Vec::new();
                        match reader.read_until(0, &mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                        buf.pop();
                        let cmd = String::from_utf8_lossy(&buf).into_owned();
                        recorded.lock().unwrap().push(cmd.clone());

                        let first = cmd.split_whitespace().next().unwrap_or("");
                        let reply = {
                            let replies = replies.lock().unwrap();
                            match replies.get(first) {
                                Some(reply) => reply.clone(),
                                None if first == "add" => format!(
                                    "resp {}",
                                    cmd.split_whitespace().last().unwrap_or("0")
                                ),
                                None => "resp 0".to_string(),
                            }
                        };
                        let mut framed = reply.into_bytes();
                        framed.push(0);
                        if tx.write_all(&framed).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let Ok((socket, _)) = read_listener.accept().await else {
                    return;
                };
                held.push(socket);
            }
        });

        Self {
            write_addr: (write_addr.ip(), write_addr.port()),
            read_addr: (read_addr.ip(), read_addr.port()),
            commands,
            overrides,
        }
    }

    pub async fn connect(&self) -> (EngineLink, ReceiverStream<LinkEvent>) {
        EngineLink::connect_pair(self.write_addr, self.read_addr)
            .await
            .unwrap()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Override the reply for commands whose first token matches.
    pub fn set_response(&self, first_token: &str, reply: &str) {
        self.overrides
            .lock()
            .unwrap()
            .insert(first_token.to_string(), reply.to_string());
    }
}

// ---------------------------------------------------------------------------
// recording control surface

pub type HmiLog = Arc<Mutex<Vec<String>>>;

pub struct MockHmi {
    pub log: HmiLog,
    pub initialized: bool,
}

impl MockHmi {
    pub fn new(initialized: bool) -> (Self, HmiLog) {
        let log: HmiLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: Arc::clone(&log),
                initialized,
            },
            log,
        )
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

fn actuator_label(actuator: ActuatorAddr) -> String {
    format!(
        "{:?}:{}:{:?}:{}",
        actuator.hardware_type, actuator.hardware_id, actuator.actuator_type,
        actuator.actuator_index
    )
}

#[async_trait]
impl HmiSurface for MockHmi {
    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn initial_state(
        &mut self,
        bank_id: usize,
        pedalboard_id: usize,
        pedalboards: &[PedalboardEntry],
    ) -> bool {
        self.record(format!(
            "initial_state {} {} ({} boards)",
            bank_id,
            pedalboard_id,
            pedalboards.len()
        ));
        true
    }

    async fn bank_config(&mut self, actuator: ActuatorAddr, action: BankConfigAction) -> bool {
        self.record(format!("bank_config {} {:?}", actuator_label(actuator), action));
        true
    }

    async fn control_add(&mut self, control: ControlAdd) -> bool {
        self.record(format!(
            "control_add {} {} value={} ring={}/{}",
            control.instance_id,
            control.symbol,
            control.value,
            control.index,
            control.num_controllers
        ));
        true
    }

    async fn control_rm(&mut self, instance_id: i32, symbol: &str) -> bool {
        self.record(format!("control_rm {} {}", instance_id, symbol));
        true
    }

    async fn control_clean(&mut self, actuator: ActuatorAddr) -> bool {
        self.record(format!("control_clean {}", actuator_label(actuator)));
        true
    }

    async fn clear(&mut self) -> bool {
        self.record("clear".to_string());
        true
    }

    async fn tuner(&mut self, freq: f32, note: &str, cents: i32) -> bool {
        self.record(format!("tuner {} {} {}", freq, note, cents));
        true
    }

    async fn ui_connected(&mut self) -> bool {
        self.record("ui_con".to_string());
        true
    }

    async fn ui_disconnected(&mut self) -> bool {
        self.record("ui_dis".to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// configurable router

#[derive(Default)]
pub struct MockRouter {
    /// (jack name, is_audio, is_output)
    pub ports: Mutex<Vec<(String, bool, bool)>>,
    pub aliases: Mutex<BTreeMap<String, String>>,
    pub connected: Mutex<Vec<(String, String)>>,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_midi_port(&self, name: &str, alias: &str, output: bool) {
        self.ports
            .lock()
            .unwrap()
            .push((name.to_string(), false, output));
        self.aliases
            .lock()
            .unwrap()
            .insert(name.to_string(), alias.to_string());
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.connected.lock().unwrap().clone()
    }
}

impl stagehand::AudioRouter for MockRouter {
    fn connect_ports(&self, source: &str, target: &str) -> bool {
        self.connected
            .lock()
            .unwrap()
            .push((source.to_string(), target.to_string()));
        true
    }

    fn disconnect_ports(&self, source: &str, target: &str) -> bool {
        let mut connected = self.connected.lock().unwrap();
        let before = connected.len();
        connected.retain(|(a, b)| !(a == source && b == target));
        connected.len() != before
    }

    fn hardware_ports(&self, audio: bool, output: bool) -> Vec<String> {
        self.ports
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, is_audio, is_output)| *is_audio == audio && *is_output == output)
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    fn port_alias(&self, port: &str) -> Option<String> {
        self.aliases.lock().unwrap().get(port).cloned()
    }

    fn has_serial_midi_input(&self) -> bool {
        false
    }

    fn has_serial_midi_output(&self) -> bool {
        false
    }

    fn stats(&self) -> RouterStats {
        RouterStats::default()
    }

    fn truebypass(&self) -> (bool, bool) {
        (false, false)
    }
}

// ---------------------------------------------------------------------------
// catalog fixtures

fn control(symbol: &str, default: f32, minimum: f32, maximum: f32) -> ControlInput {
    ControlInput {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        designation: None,
        properties: HashSet::new(),
        default,
        minimum,
        maximum,
        unit: None,
        scale_points: Vec::new(),
    }
}

/// A gain-style plugin: one addressable control, an enabled designation,
/// a monitored output and three presets.
pub fn gain_entry() -> CatalogEntry {
    let mut enabled = control("enabled", 1.0, 0.0, 1.0);
    enabled.designation = Some(PortDesignation::Enabled);

    CatalogEntry {
        controls: PluginControls {
            inputs: vec![control("gain", 0.0, -24.0, 24.0), enabled],
            monitored_outputs: vec!["level".to_string()],
        },
        info: PluginInfo {
            micro_version: 2,
            minor_version: 1,
            builder: 0,
            release: 3,
            ports: PortLists {
                audio_inputs: vec!["in".to_string()],
                audio_outputs: vec!["out".to_string()],
                control_inputs: vec!["gain".to_string(), "enabled".to_string()],
                ..PortLists::default()
            },
            presets: vec![
                PresetInfo {
                    uri: "urn:ex:gain:soft".to_string(),
                    label: "Soft".to_string(),
                },
                PresetInfo {
                    uri: "urn:ex:gain:mid".to_string(),
                    label: "Mid".to_string(),
                },
                PresetInfo {
                    uri: "urn:ex:gain:loud".to_string(),
                    label: "Loud".to_string(),
                },
            ],
        },
    }
}

/// A mono delay with a toggled sync switch and enumerated divisions.
pub fn delay_entry() -> CatalogEntry {
    let mut sync = control("sync", 0.0, 0.0, 1.0);
    sync.properties.insert("toggled".to_string());
    let mut division = control("division", 4.0, 1.0, 16.0);
    division.properties.insert("integer".to_string());
    division.properties.insert("enumeration".to_string());
    division.scale_points = vec![
        ScalePoint { value: 4.0, label: "1/4".to_string() },
        ScalePoint { value: 8.0, label: "1/8".to_string() },
        ScalePoint { value: 16.0, label: "1/16".to_string() },
    ];

    CatalogEntry {
        controls: PluginControls {
            inputs: vec![control("time", 250.0, 10.0, 1000.0), sync, division],
            monitored_outputs: Vec::new(),
        },
        info: PluginInfo {
            ports: PortLists {
                audio_inputs: vec!["in".to_string()],
                audio_outputs: vec!["out".to_string()],
                control_inputs: vec![
                    "time".to_string(),
                    "sync".to_string(),
                    "division".to_string(),
                ],
                ..PortLists::default()
            },
            ..PluginInfo::default()
        },
    }
}

pub fn test_catalog() -> Arc<JsonCatalog> {
    let catalog = JsonCatalog::empty();
    catalog.insert("urn:ex:gain", gain_entry());
    catalog.insert("urn:ex:delay", delay_entry());
    Arc::new(catalog)
}

// ---------------------------------------------------------------------------
// session assembly

pub struct TestRig {
    pub session: Session,
    pub engine: FakeEngine,
    pub hmi_log: HmiLog,
    pub router: Arc<MockRouter>,
    pub catalog: Arc<JsonCatalog>,
    // keeps the reader task alive for the duration of the test
    pub events: ReceiverStream<LinkEvent>,
}

pub async fn rig_with_router(dir: &Path, router: Arc<MockRouter>) -> TestRig {
    let engine = FakeEngine::spawn().await;
    let catalog = test_catalog();
    let (hmi, hmi_log) = MockHmi::new(true);

    let options = SessionOptions {
        pedalboards_dir: dir.join("pedalboards"),
        data_dir: dir.join("data"),
        presets_dir: dir.join("lv2"),
    };

    let mut session = Session::new(
        options,
        catalog.clone(),
        router.clone(),
        Box::new(hmi),
        Broadcaster::new(),
    );

    let (link, events) = engine.connect().await;
    session.reconnect(link).await.unwrap();
    engine.clear_commands();

    TestRig {
        session,
        engine,
        hmi_log,
        router,
        catalog,
        events,
    }
}

pub async fn rig(dir: &Path) -> TestRig {
    rig_with_router(dir, Arc::new(MockRouter::new())).await
}

/// Sorted copy for multiset comparison of command traces.
pub fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}
