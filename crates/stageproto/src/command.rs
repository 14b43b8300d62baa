//! Write-channel commands and response parsing.
//!
//! Every request is rendered as a single text line (the link appends the NUL
//! terminator). Responses come back in request order and normally start with
//! `resp `; commands that declare [`ResponseKind::Text`] receive the raw
//! reply instead (used by `preset_show`, which answers with a state
//! document).

use std::fmt;

use thiserror::Error;

/// How the reply to a command is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `resp <int>`, negative means failure.
    Int,
    /// `resp <float>`.
    Float,
    /// `resp <int>` collapsed to a success flag (`>= 0`).
    Boolean,
    /// Opaque reply, no `resp` prefix required.
    Text,
}

/// A parsed engine reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Resp {
    Int(i32),
    Float(f32),
    Ok(bool),
    Text(String),
}

impl Resp {
    /// Collapse any reply into a success flag.
    pub fn is_ok(&self) -> bool {
        match self {
            Resp::Int(v) => *v >= 0,
            Resp::Float(_) => true,
            Resp::Ok(ok) => *ok,
            Resp::Text(_) => true,
        }
    }

    /// The integer payload, if this was an integer reply.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Resp::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Malformed reply on the write channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("reply does not start with 'resp': {0:?}")]
    NotResp(String),
    #[error("bad {kind} payload in reply {raw:?}")]
    BadPayload { kind: &'static str, raw: String },
}

/// Parse a raw (already NUL-stripped) reply according to the expected kind.
pub fn parse_response(raw: &str, kind: ResponseKind) -> Result<Resp, ProtocolError> {
    if kind == ResponseKind::Text {
        return Ok(Resp::Text(raw.to_string()));
    }

    let Some(rest) = raw.strip_prefix("resp") else {
        return Err(ProtocolError::NotResp(raw.to_string()));
    };
    let rest = rest.trim();

    match kind {
        ResponseKind::Int => rest
            .parse::<i32>()
            .map(Resp::Int)
            .map_err(|_| ProtocolError::BadPayload {
                kind: "int",
                raw: raw.to_string(),
            }),
        ResponseKind::Float => rest
            .parse::<f32>()
            .map(Resp::Float)
            .map_err(|_| ProtocolError::BadPayload {
                kind: "float",
                raw: raw.to_string(),
            }),
        ResponseKind::Boolean => rest
            .parse::<i32>()
            .map(|v| Resp::Ok(v >= 0))
            .map_err(|_| ProtocolError::BadPayload {
                kind: "boolean",
                raw: raw.to_string(),
            }),
        ResponseKind::Text => unreachable!(),
    }
}

/// A command for the engine write channel.
///
/// `Display` renders the exact wire text, without the trailing NUL.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Add { uri: String, instance_id: i32 },
    Remove { instance_id: i32 },
    /// `remove -1`: drop every loaded plugin (session reset).
    RemoveAll,
    Bypass { instance_id: i32, bypassed: bool },
    ParamSet { instance_id: i32, symbol: String, value: f32 },
    MonitorOutput { instance_id: i32, symbol: String },
    PresetLoad { instance_id: i32, uri: String },
    PresetSave { instance_id: i32, name: String, bundle: String, file: String },
    PresetShow { uri: String },
    MidiMap { instance_id: i32, symbol: String, channel: i32, controller: i32, minimum: f32, maximum: f32 },
    MidiUnmap { instance_id: i32, symbol: String },
    MidiLearn { instance_id: i32, symbol: String, minimum: f32, maximum: f32 },
    MidiProgramListen { enable: bool, channel: i32 },
    Connect { source: String, target: String },
    Disconnect { source: String, target: String },
    BundleAdd { path: String },
    BundleRemove { path: String },
    OutputDataReady,
}

impl EngineCommand {
    /// The reply interpretation this command expects.
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            EngineCommand::Add { .. } => ResponseKind::Int,
            EngineCommand::PresetShow { .. } => ResponseKind::Text,
            _ => ResponseKind::Boolean,
        }
    }
}

fn quote(s: &str) -> String {
    s.replace('"', "\\\"")
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Add { uri, instance_id } => write!(f, "add {} {}", uri, instance_id),
            EngineCommand::Remove { instance_id } => write!(f, "remove {}", instance_id),
            EngineCommand::RemoveAll => write!(f, "remove -1"),
            EngineCommand::Bypass { instance_id, bypassed } => {
                write!(f, "bypass {} {}", instance_id, i32::from(*bypassed))
            }
            EngineCommand::ParamSet { instance_id, symbol, value } => {
                write!(f, "param_set {} {} {}", instance_id, symbol, value)
            }
            EngineCommand::MonitorOutput { instance_id, symbol } => {
                write!(f, "monitor_output {} {}", instance_id, symbol)
            }
            EngineCommand::PresetLoad { instance_id, uri } => {
                write!(f, "preset_load {} {}", instance_id, uri)
            }
            EngineCommand::PresetSave { instance_id, name, bundle, file } => {
                write!(f, "preset_save {} \"{}\" {} {}", instance_id, quote(name), bundle, file)
            }
            EngineCommand::PresetShow { uri } => write!(f, "preset_show {}", uri),
            EngineCommand::MidiMap { instance_id, symbol, channel, controller, minimum, maximum } => {
                write!(
                    f,
                    "midi_map {} {} {} {} {} {}",
                    instance_id, symbol, channel, controller, minimum, maximum
                )
            }
            EngineCommand::MidiUnmap { instance_id, symbol } => {
                write!(f, "midi_unmap {} {}", instance_id, symbol)
            }
            EngineCommand::MidiLearn { instance_id, symbol, minimum, maximum } => {
                write!(f, "midi_learn {} {} {} {}", instance_id, symbol, minimum, maximum)
            }
            EngineCommand::MidiProgramListen { enable, channel } => {
                write!(f, "midi_program_listen {} {}", i32::from(*enable), channel)
            }
            EngineCommand::Connect { source, target } => {
                write!(f, "connect {} {}", source, target)
            }
            EngineCommand::Disconnect { source, target } => {
                write!(f, "disconnect {} {}", source, target)
            }
            EngineCommand::BundleAdd { path } => write!(f, "bundle_add \"{}\"", quote(path)),
            EngineCommand::BundleRemove { path } => write!(f, "bundle_remove \"{}\"", quote(path)),
            EngineCommand::OutputDataReady => write!(f, "output_data_ready"),
        }
    }
}
