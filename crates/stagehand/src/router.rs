//! Audio-graph (JACK) interface.
//!
//! The session never touches the audio server directly; everything it needs
//! from the routing layer is behind this trait. [`NullRouter`] stands in
//! when no server is available (tests, cold starts).

/// CPU and xrun counters sampled from the audio server.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouterStats {
    pub cpu_load: f32,
    pub xruns: u32,
}

/// Queries and port commands against the audio server.
pub trait AudioRouter: Send + Sync {
    /// Connect two JACK ports; `true` when the edge now exists.
    fn connect_ports(&self, source: &str, target: &str) -> bool;

    /// Disconnect two JACK ports; `true` when the edge was removed.
    fn disconnect_ports(&self, source: &str, target: &str) -> bool;

    /// Physical ports: `audio` selects audio vs MIDI, `output` the direction.
    fn hardware_ports(&self, audio: bool, output: bool) -> Vec<String>;

    /// The server-assigned alias of a port, if any.
    fn port_alias(&self, port: &str) -> Option<String>;

    fn has_serial_midi_input(&self) -> bool;

    fn has_serial_midi_output(&self) -> bool;

    fn stats(&self) -> RouterStats;

    /// Hardware true-bypass state, left and right channel.
    fn truebypass(&self) -> (bool, bool);
}

/// Router for sessions without an audio server: every command succeeds,
/// every query is empty.
#[derive(Debug, Default)]
pub struct NullRouter;

impl AudioRouter for NullRouter {
    fn connect_ports(&self, _source: &str, _target: &str) -> bool {
        true
    }

    fn disconnect_ports(&self, _source: &str, _target: &str) -> bool {
        true
    }

    fn hardware_ports(&self, _audio: bool, _output: bool) -> Vec<String> {
        Vec::new()
    }

    fn port_alias(&self, _port: &str) -> Option<String> {
        None
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

/// Derive the human alias for a hardware port from its server alias:
/// last segment of the dash-split, dashes to spaces, `;` to `.`.
pub fn humanize_alias(alias: &str) -> String {
    alias
        .splitn(6, '-')
        .last()
        .unwrap_or(alias)
        .replace('-', " ")
        .replace(';', ".")
}

/// Same derivation but underscore-joined, for graph node titles.
pub fn alias_title(alias: &str) -> String {
    alias
        .splitn(6, '-')
        .last()
        .unwrap_or(alias)
        .replace('-', "_")
        .replace(' ', "_")
        .replace(';', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_alias() {
        assert_eq!(
            humanize_alias("alsa_pcm:in-hw-1-0-0-Keystation-Mini-32"),
            "Keystation Mini 32"
        );
        assert_eq!(humanize_alias("plain"), "plain");
    }

    #[test]
    fn test_alias_title_joins_with_underscores() {
        assert_eq!(
            alias_title("alsa_pcm:in-hw-1-0-0-Keystation-Mini-32"),
            "Keystation_Mini_32"
        );
    }
}
