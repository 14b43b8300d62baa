//! Stagehand: session coordinator for a live audio-plugin host.
//!
//! Sits between the realtime audio engine (which loads the plugins and
//! routes audio/MIDI), the hardware control surface (knobs and
//! footswitches) and the browser editor. Owns the mutable pedalboard
//! state — which plugins exist, how they are wired, what their parameters
//! hold, which actuator drives which parameter — and keeps all three peers
//! consistent as any of them issues changes.
//!
//! The wire protocols live in the `stageproto` crate; this crate owns the
//! state model and the coordination logic:
//!
//! - [`mapper::InstanceIdMapper`]: string instance names <-> engine ids
//! - [`session::Session`]: the state owner and mutation entry points
//! - [`addressing::AddressingEngine`]: per-actuator rings of bindings
//! - [`pedalboard`]: bundle load/save (graph TTL + JSON sidecars)
//! - [`hmi`]: control-surface command dispatch
//! - [`broadcast::Broadcaster`]: text mirror of every mutation

pub mod address;
pub mod addressing;
pub mod banks;
pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod hmi;
pub mod mapper;
pub mod pedalboard;
pub mod reconciler;
pub mod router;
pub mod session;
pub mod state;
pub mod stats;
pub mod tuner;

pub use address::{SavedAddressing, SavedAddressings};
pub use addressing::{default_hardware, ActuatorDesc, Addressing, AddressingEngine, AddressingId, Ring};
pub use banks::Bank;
pub use broadcast::Broadcaster;
pub use catalog::{
    CatalogEntry, CatalogError, ControlInput, JsonCatalog, PluginCatalog, PluginControls,
    PluginInfo, PortDesignation, PortLists, PresetInfo, ScalePoint,
};
pub use config::{ConfigError, EngineConfig, PathsConfig, StagehandConfig};
pub use hmi::{HmiParseError, HmiReply, HmiRequest};
pub use mapper::{InstanceIdMapper, MapperError};
pub use pedalboard::{
    list_pedalboards, read_bundle, symbolify, BundleError, BundleInfo, HardwarePort, StoredPlugin,
    StoredPort,
};
pub use router::{AudioRouter, NullRouter, RouterStats};
pub use session::{Session, SessionError, SessionOptions};
pub use state::{
    Designations, MidiCc, MidiCcRange, MidiPortRecord, PedalboardPreset, Plugin, PluginSnapshot,
};
