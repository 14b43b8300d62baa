//! Protocol types for the stagehand session coordinator.
//!
//! Stagehand sits between three peers and this crate owns the wire-level
//! vocabulary for two of them:
//!
//! - **Audio engine**: a dual-socket text protocol. The write socket carries
//!   strictly serialized command/response pairs, the read socket carries
//!   unsolicited events. Both streams are NUL-terminated. See [`command`],
//!   [`event`] and the [`link::EngineLink`] transport.
//! - **Control surface (HMI)**: knobs and footswitches addressed by URI and
//!   by `(hardware, actuator)` tuples. See [`hmi`].
//!
//! The third peer (the browser editor) receives plain text mirrors of state
//! mutations and needs no types of its own.

pub mod command;
pub mod event;
pub mod hmi;
pub mod link;

pub use command::{EngineCommand, ProtocolError, Resp, ResponseKind};
pub use event::{EngineEvent, EventParseError};
pub use hmi::{
    ActuatorAddr, ActuatorType, BankConfigAction, ControlAdd, ControlFlags, ControlOption,
    HardwareType, HmiSurface, PedalboardEntry,
};
pub use link::{EngineLink, LinkError, LinkEvent};

/// Special addressing URI meaning "unaddress only".
pub const NULL_ADDRESS_URI: &str = "null";

/// Special addressing URI that triggers engine-side MIDI learn.
pub const MIDI_LEARN_URI: &str = "/midi-learn";

/// Special addressing URI that removes an existing MIDI mapping.
pub const MIDI_UNMAP_URI: &str = "/midi-unmap";

/// Prefix used to display an existing MIDI mapping as a pseudo-actuator.
pub const MIDI_CUSTOM_PREFIX_URI: &str = "/midi-custom_";

/// Hard limit on enumerated scale points pushed to the control surface.
pub const MAX_ADDRESSABLE_SCALEPOINTS: usize = 50;
