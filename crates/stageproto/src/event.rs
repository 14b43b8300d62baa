//! Unsolicited events arriving on the engine read channel.
//!
//! Events are NUL-terminated text lines dispatched on their first token.
//! Unknown tokens parse to an error; the session logs and drops them.

use std::str::FromStr;

use thiserror::Error;

/// An event pushed by the engine outside the request/response flow.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ParamSet { instance_id: i32, symbol: String, value: f32 },
    OutputSet { instance_id: i32, symbol: String, value: f32 },
    MidiMapped {
        instance_id: i32,
        symbol: String,
        channel: i32,
        controller: i32,
        value: f32,
        minimum: f32,
        maximum: f32,
    },
    MidiProgram { program: i32 },
    /// Monitored-output batch done; the session answers with `output_data_ready`.
    DataFinish,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("empty event line")]
    Empty,
    #[error("unknown event command: {0}")]
    UnknownCommand(String),
    #[error("event {cmd} missing field {field}")]
    MissingField { cmd: &'static str, field: &'static str },
    #[error("event {cmd} has malformed field {field}: {value:?}")]
    BadField { cmd: &'static str, field: &'static str, value: String },
}

fn field<'a, I>(tokens: &mut I, cmd: &'static str, name: &'static str) -> Result<&'a str, EventParseError>
where
    I: Iterator<Item = &'a str>,
{
    tokens
        .next()
        .ok_or(EventParseError::MissingField { cmd, field: name })
}

fn num<T: FromStr>(raw: &str, cmd: &'static str, name: &'static str) -> Result<T, EventParseError> {
    raw.parse().map_err(|_| EventParseError::BadField {
        cmd,
        field: name,
        value: raw.to_string(),
    })
}

impl FromStr for EngineEvent {
    type Err = EventParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let cmd = tokens.next().ok_or(EventParseError::Empty)?;

        match cmd {
            "param_set" => {
                let instance_id = num(field(&mut tokens, "param_set", "instance")?, "param_set", "instance")?;
                let symbol = field(&mut tokens, "param_set", "symbol")?.to_string();
                let value = num(field(&mut tokens, "param_set", "value")?, "param_set", "value")?;
                Ok(EngineEvent::ParamSet { instance_id, symbol, value })
            }
            "output_set" => {
                let instance_id = num(field(&mut tokens, "output_set", "instance")?, "output_set", "instance")?;
                let symbol = field(&mut tokens, "output_set", "symbol")?.to_string();
                let value = num(field(&mut tokens, "output_set", "value")?, "output_set", "value")?;
                Ok(EngineEvent::OutputSet { instance_id, symbol, value })
            }
            "midi_mapped" => {
                let instance_id = num(field(&mut tokens, "midi_mapped", "instance")?, "midi_mapped", "instance")?;
                let symbol = field(&mut tokens, "midi_mapped", "symbol")?.to_string();
                let channel = num(field(&mut tokens, "midi_mapped", "channel")?, "midi_mapped", "channel")?;
                let controller = num(field(&mut tokens, "midi_mapped", "controller")?, "midi_mapped", "controller")?;
                let value = num(field(&mut tokens, "midi_mapped", "value")?, "midi_mapped", "value")?;
                let minimum = num(field(&mut tokens, "midi_mapped", "minimum")?, "midi_mapped", "minimum")?;
                let maximum = num(field(&mut tokens, "midi_mapped", "maximum")?, "midi_mapped", "maximum")?;
                Ok(EngineEvent::MidiMapped {
                    instance_id,
                    symbol,
                    channel,
                    controller,
                    value,
                    minimum,
                    maximum,
                })
            }
            "midi_program" => {
                let program = num(field(&mut tokens, "midi_program", "program")?, "midi_program", "program")?;
                Ok(EngineEvent::MidiProgram { program })
            }
            "data_finish" => Ok(EngineEvent::DataFinish),
            other => Err(EventParseError::UnknownCommand(other.to_string())),
        }
    }
}
