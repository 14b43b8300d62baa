//! Hardware MIDI port reconciliation.
//!
//! MIDI devices may change their JACK port names across reboots and
//! hot-plugs; only the human alias is stable. Tracked devices are matched
//! by alias when a port (re)appears, the fresh port name is substituted
//! into the stored record, and edges parked in `pending_connections` are
//! materialized once both endpoints exist again.

use tracing::info;

use crate::router::{alias_title, humanize_alias, AudioRouter};
use crate::session::{short_port_name, Session, ENGINE_JACK_CLIENT, GRAPH_PREFIX};
use crate::state::MidiPortRecord;

impl Session {
    /// A hardware MIDI port appeared on the audio server.
    pub fn midi_port_appeared(&mut self, name: &str, is_output: bool) {
        let Some(raw_alias) = self.router.port_alias(name) else {
            return;
        };
        let alias = humanize_alias(&raw_alias);

        if !is_output {
            self.router
                .connect_ports(name, &format!("{}:midi_in", ENGINE_JACK_CLIENT));
        }

        // match against a tracked device and swap the fresh port name in
        let mut old_node = None;
        for record in &mut self.midiports {
            if !record.matches_alias(&alias) {
                continue;
            }

            let halves: Vec<String> = record.symbol.splitn(2, ';').map(str::to_string).collect();
            if halves.len() == 1 {
                old_node = Some(format!("{}{}", GRAPH_PREFIX, short_port_name(&halves[0])));
                record.symbol = name.to_string();
            } else if is_output {
                old_node = Some(format!("{}{}", GRAPH_PREFIX, short_port_name(&halves[1])));
                record.symbol = format!("{};{}", halves[0], name);
            } else {
                old_node = Some(format!("{}{}", GRAPH_PREFIX, short_port_name(&halves[0])));
                record.symbol = format!("{};{}", name, halves[1]);
            }
            break;
        }
        let Some(old_node) = old_node else {
            return;
        };

        let index: u32 = name
            .chars()
            .last()
            .and_then(|ch| ch.to_digit(10))
            .unwrap_or(0);
        let title = alias_title(&raw_alias);
        let new_node = format!("{}{}", GRAPH_PREFIX, short_port_name(name));

        self.broadcaster.send(format!(
            "add_hw_port {} midi {} {} {}",
            new_node,
            i32::from(is_output),
            title,
            index
        ));

        // rewrite parked edges onto the new node and connect the resolvable ones
        let record = self
            .midiports
            .iter_mut()
            .find(|record| record.matches_alias(&alias));
        let Some(record) = record else { return };

        let mut pending = std::mem::take(&mut record.pending_connections);
        let mut still_pending = Vec::new();
        let mut connected = Vec::new();

        for mut edge in pending.drain(..) {
            if edge.0 == old_node {
                edge.0 = new_node.clone();
            } else if edge.1 == old_node {
                edge.1 = new_node.clone();
            }

            if edge.0 != new_node && edge.1 != new_node {
                still_pending.push(edge);
                continue;
            }

            let (Ok(source), Ok(target)) =
                (self.fix_engine_port(&edge.0), self.fix_engine_port(&edge.1))
            else {
                still_pending.push(edge);
                continue;
            };
            if self.router.connect_ports(&source, &target) {
                connected.push(edge);
            } else {
                still_pending.push(edge);
            }
        }

        if let Some(record) = self
            .midiports
            .iter_mut()
            .find(|record| record.matches_alias(&alias))
        {
            record.pending_connections = still_pending;
        }

        for edge in connected {
            info!(source = %edge.0, target = %edge.1, "pending MIDI connection restored");
            self.broadcaster
                .send(format!("connect {} {}", edge.0, edge.1));
            self.connections.push(edge);
        }
    }

    /// A hardware MIDI port disappeared: drop its edges but park them on
    /// the owning record so a reappearance can restore them.
    pub fn midi_port_deleted(&mut self, name: &str) {
        let mut removed = Vec::new();

        for edge in self.connections.clone() {
            let (Ok(source), Ok(target)) =
                (self.fix_engine_port(&edge.0), self.fix_engine_port(&edge.1))
            else {
                continue;
            };
            if source != name && target != name {
                continue;
            }
            self.router.disconnect_ports(&source, &target);
            removed.push(edge);
        }

        for edge in &removed {
            self.connections.retain(|entry| entry != edge);
        }

        for record in &mut self.midiports {
            let is_ours =
                record.symbol == name || record.jack_ports().iter().any(|port| *port == name);
            if is_ours {
                record.pending_connections.extend(removed);
                break;
            }
        }

        self.broadcaster.send(format!(
            "remove_hw_port {}{}",
            GRAPH_PREFIX,
            short_port_name(name)
        ));
    }

    /// Apply a new MIDI device selection: diff by stored symbol, dropping
    /// deselected devices (and their edges) and announcing added ones.
    pub fn set_midi_devices(&mut self, new_devices: &[String]) {
        let current: Vec<String> = self
            .midiports
            .iter()
            .map(|record| record.symbol.clone())
            .collect();

        // removed devices
        for index in (0..self.midiports.len()).rev() {
            let symbol = self.midiports[index].symbol.clone();
            if new_devices.contains(&symbol) {
                continue;
            }

            for port in symbol.split(';') {
                self.remove_hw_port(port);
            }
            self.midiports.remove(index);
        }

        // added devices
        for symbol in new_devices {
            if current.contains(symbol) {
                continue;
            }

            let title = if let Some((input, output)) = symbol.split_once(';') {
                let title_in = self.port_display_name(input);
                let title_out = self.port_display_name(output);
                self.add_hw_port(input, &title_in, false);
                self.add_hw_port(output, &title_out, true);
                format!("{};{}", title_in, title_out)
            } else {
                let title = self.port_display_name(symbol);
                self.add_hw_port(symbol, &title, false);
                title
            };

            self.midiports.push(MidiPortRecord::new(symbol.clone(), title));
        }
    }

    fn port_display_name(&self, port: &str) -> String {
        match self.router.port_alias(port) {
            Some(alias) => humanize_alias(&alias),
            None => crate::session::title_case(short_port_name(port)),
        }
    }

    fn add_hw_port(&mut self, name: &str, title: &str, is_output: bool) {
        let index: u32 = name
            .chars()
            .last()
            .and_then(|ch| ch.to_digit(10))
            .unwrap_or(0);
        self.broadcaster.send(format!(
            "add_hw_port {}{} midi {} {} {}",
            GRAPH_PREFIX,
            short_port_name(name),
            i32::from(is_output),
            title.replace(' ', "_"),
            index
        ));
    }

    fn remove_hw_port(&mut self, name: &str) {
        let mut removed = Vec::new();
        for edge in self.connections.clone() {
            let (Ok(source), Ok(target)) =
                (self.fix_engine_port(&edge.0), self.fix_engine_port(&edge.1))
            else {
                continue;
            };
            if source != name && target != name {
                continue;
            }
            self.router.disconnect_ports(&source, &target);
            removed.push(edge);
        }

        for edge in removed {
            self.connections.retain(|entry| *entry != edge);
            self.broadcaster
                .send(format!("disconnect {} {}", edge.0, edge.1));
        }

        self.broadcaster.send(format!(
            "remove_hw_port {}{}",
            GRAPH_PREFIX,
            short_port_name(name)
        ));
    }
}
