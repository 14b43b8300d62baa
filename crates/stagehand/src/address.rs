//! Addressing operations: binding plugin ports to hardware actuators.
//!
//! `address` is the single entry point. Three special URIs are side
//! channels rather than real actuators: `null` unaddresses only,
//! `/midi-learn` arms engine-side MIDI learn, `/midi-unmap` clears an
//! existing mapping. Everything else lands in the actuator's ring and is
//! pushed to the surface via `control_add`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use stageproto::{
    ActuatorAddr, ControlAdd, ControlFlags, ControlOption, EngineCommand, HmiSurface,
    MAX_ADDRESSABLE_SCALEPOINTS, MIDI_LEARN_URI, MIDI_UNMAP_URI, NULL_ADDRESS_URI,
};

use crate::addressing::Addressing;
use crate::catalog::PluginCatalog;
use crate::session::{Session, SessionError};
use crate::state::{MidiCc, MidiCcRange};

/// One addressing as stored in `addressings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAddressing {
    pub instance: String,
    pub port: String,
    pub label: String,
    pub minimum: f32,
    pub maximum: f32,
    pub steps: i32,
}

/// The full `addressings.json` shape: actuator URI to its bindings.
pub type SavedAddressings = BTreeMap<String, Vec<SavedAddressing>>;

impl Session {
    /// Bind `instance/port` to an actuator. Any previous binding of the
    /// port is dropped first; the previously bound actuator's ring advances
    /// so its display stays meaningful. With `skip_load` the binding is
    /// recorded but nothing is pushed to surface or engine (bulk loads push
    /// once per actuator afterwards).
    #[allow(clippy::too_many_arguments)]
    pub async fn address(
        &mut self,
        instance: &str,
        port: &str,
        actuator_uri: &str,
        label: &str,
        minimum: f32,
        maximum: f32,
        value: f32,
        steps: i32,
        skip_load: bool,
    ) -> Result<bool, SessionError> {
        let Ok(instance_id) = self.mapper.get_id_without_creating(instance) else {
            error!(instance, "trying to address a non-existing plugin");
            return Ok(false);
        };
        if !self.plugins.contains_key(&instance_id) {
            error!(instance, "trying to address a non-loaded plugin");
            return Ok(false);
        }

        let old_actuator = self.unaddress(instance_id, port);

        let special = actuator_uri.is_empty()
            || actuator_uri == NULL_ADDRESS_URI
            || actuator_uri == MIDI_LEARN_URI
            || actuator_uri == MIDI_UNMAP_URI;
        let designated = self.plugins[&instance_id].designations.contains(port);

        if special || designated {
            if skip_load {
                return Ok(true);
            }
            if let Some(old_uri) = old_actuator {
                self.hmi.control_rm(instance_id, port).await;
                self.address_next_uri(&old_uri).await;
            }

            return match actuator_uri {
                MIDI_LEARN_URI => Ok(self
                    .engine_ok(
                        EngineCommand::MidiLearn {
                            instance_id,
                            symbol: port.to_string(),
                            minimum,
                            maximum,
                        },
                        false,
                    )
                    .await),
                MIDI_UNMAP_URI => {
                    if let Some(plugin) = self.plugins.get_mut(&instance_id) {
                        if port == ":bypass" {
                            plugin.bypass_cc = MidiCc::UNMAPPED;
                        } else {
                            plugin
                                .midi_ccs
                                .insert(port.to_string(), MidiCcRange::UNMAPPED);
                        }
                    }
                    Ok(self
                        .engine_ok(
                            EngineCommand::MidiUnmap {
                                instance_id,
                                symbol: port.to_string(),
                            },
                            true,
                        )
                        .await)
                }
                _ => Ok(true),
            };
        }

        if !self.addressings.has_actuator(actuator_uri) {
            warn!(actuator_uri, "unknown actuator, skipping addressing");
            return Ok(false);
        }

        let mut minimum = minimum;
        let mut maximum = maximum;
        let mut value = value;
        let mut options: Vec<ControlOption> = Vec::new();
        let mut unit = "none".to_string();
        let mut load_preset = String::new();
        let flags;

        if port == ":bypass" {
            flags = ControlFlags::BYPASS;
        } else if port == ":presets" {
            flags = ControlFlags::SCALE_POINTS | ControlFlags::ENUMERATION | ControlFlags::INTEGER;

            let plugin_uri = self.plugins[&instance_id].uri.clone();
            let presets = self.catalog.plugin_info(&plugin_uri)?.presets;
            minimum = 0.0;

            let cap = presets.len().min(MAX_ADDRESSABLE_SCALEPOINTS);
            let plugin = self
                .plugins
                .get_mut(&instance_id)
                .ok_or(SessionError::NoSuchPlugin(instance_id))?;
            plugin.map_presets.clear();

            if presets.is_empty() {
                plugin.preset.clear();
                return Ok(false);
            }

            let mut handled = false;
            if plugin.preset.is_empty() {
                plugin.preset = presets[0].uri.clone();
                value = 0.0;
                handled = true;
            }

            for (index, preset) in presets.iter().take(cap).enumerate() {
                plugin.map_presets.push(preset.uri.clone());
                options.push(ControlOption {
                    value: index as f32,
                    label: preset.label.clone(),
                });
                if !handled && plugin.preset == preset.uri {
                    value = index as f32;
                    handled = true;
                }
            }

            if !handled {
                // selected preset sits beyond the cap: expose it as one
                // extra option, unless the stored selection is stale
                match presets.iter().skip(cap).find(|p| p.uri == plugin.preset) {
                    Some(found) => {
                        value = cap as f32;
                        plugin.map_presets.push(found.uri.clone());
                        options.push(ControlOption {
                            value: cap as f32,
                            label: found.label.clone(),
                        });
                    }
                    None => {
                        plugin.map_presets.clear();
                        plugin.preset.clear();
                        return Ok(false);
                    }
                }
            }

            maximum = plugin.map_presets.len() as f32;
            load_preset = plugin.preset.clone();
        } else {
            let plugin_uri = self.plugins[&instance_id].uri.clone();
            let controls = self.catalog.control_ports(&plugin_uri)?;
            let Some(info) = controls.inputs.iter().find(|p| p.symbol == port) else {
                error!(port, "trying to address a non-existing control port");
                return Ok(false);
            };

            if let Some(symbol) = &info.unit {
                unit = symbol.clone();
            }

            let props = &info.properties;
            let mut ctype = if props.contains("toggled") {
                ControlFlags::TOGGLED
            } else if props.contains("integer") {
                ControlFlags::INTEGER
            } else {
                ControlFlags::LINEAR
            };
            if props.contains("logarithmic") {
                ctype |= ControlFlags::LOGARITHMIC;
            }
            if props.contains("trigger") {
                ctype |= ControlFlags::TRIGGER;
            }
            if props.contains("tapTempo") && actuator_uri.starts_with("/hmi/footswitch") {
                ctype |= ControlFlags::TAP_TEMPO;
            }
            if !info.scale_points.is_empty() && props.contains("enumeration") {
                ctype |= ControlFlags::SCALE_POINTS | ControlFlags::ENUMERATION;
                for point in &info.scale_points {
                    options.push(ControlOption {
                        value: point.value,
                        label: point.label.clone(),
                    });
                }
            }
            flags = ctype;
        }

        let addressing = Addressing {
            actuator_uri: actuator_uri.to_string(),
            instance_id,
            port: port.to_string(),
            label: label.to_string(),
            flags,
            unit,
            minimum,
            maximum,
            steps,
            options,
        };
        let Some(id) = self.addressings.insert(addressing) else {
            return Ok(false);
        };
        if let Some(plugin) = self.plugins.get_mut(&instance_id) {
            plugin.addressings.insert(port.to_string(), id);
        }

        if skip_load {
            return Ok(true);
        }

        if let Some(old_uri) = old_actuator {
            self.hmi.control_rm(instance_id, port).await;
            self.address_next_uri(&old_uri).await;
        }

        if !load_preset.is_empty() {
            self.preset_load(instance, &load_preset.clone()).await?;
        }

        let _ = value; // current value is re-read from state at push time
        Ok(self.addressing_load(actuator_uri, None, false).await)
    }

    /// Drop a port's binding, returning the actuator URI it was on.
    pub(crate) fn unaddress(&mut self, instance_id: i32, port: &str) -> Option<String> {
        let plugin = self.plugins.get_mut(&instance_id)?;
        let id = plugin.addressings.remove(port)?;
        let addressing = self.addressings.remove(id)?;
        Some(addressing.actuator_uri)
    }

    /// Push the currently visible binding of an actuator to the surface.
    pub(crate) async fn addressing_load(
        &mut self,
        actuator_uri: &str,
        value: Option<f32>,
        skip_presets: bool,
    ) -> bool {
        let Some(id) = self.addressings.current(actuator_uri) else {
            warn!(actuator_uri, "no addressing to load");
            return false;
        };
        let Some(addressing) = self.addressings.get(id).cloned() else {
            return false;
        };
        let Some(actuator) = self.addressings.hw_for_uri(actuator_uri) else {
            return false;
        };
        let Some(plugin) = self.plugins.get(&addressing.instance_id) else {
            warn!(actuator_uri, "addressing points at a missing plugin");
            return false;
        };

        let current = match value {
            Some(value) => value,
            None if addressing.port == ":bypass" => {
                if plugin.bypassed {
                    1.0
                } else {
                    0.0
                }
            }
            None if addressing.port == ":presets" => {
                if skip_presets {
                    // re-addressing presets here would feed back into the
                    // preset load that triggered us
                    return true;
                }
                plugin
                    .map_presets
                    .iter()
                    .position(|uri| *uri == plugin.preset)
                    .unwrap_or(0) as f32
            }
            None => plugin.ports.get(&addressing.port).copied().unwrap_or(0.0),
        };

        let ring = match self.addressings.ring(actuator_uri) {
            Some(ring) => ring,
            None => return false,
        };
        let control = ControlAdd {
            instance_id: addressing.instance_id,
            symbol: addressing.port.clone(),
            label: addressing.label.clone(),
            flags: addressing.flags,
            unit: addressing.unit.clone(),
            value: current,
            minimum: addressing.minimum,
            maximum: addressing.maximum,
            steps: addressing.steps,
            actuator,
            num_controllers: ring.addrs.len(),
            index: ring.idx + 1,
            options: addressing.options.clone(),
        };
        self.hmi.control_add(control).await
    }

    /// Rotate an actuator's ring forward and refresh the surface; an empty
    /// ring blanks the slot instead.
    pub(crate) async fn address_next_uri(&mut self, actuator_uri: &str) -> bool {
        match self.addressings.advance_next(actuator_uri) {
            Some(_) => self.addressing_load(actuator_uri, None, false).await,
            None => match self.addressings.hw_for_uri(actuator_uri) {
                Some(actuator) => self.hmi.control_clean(actuator).await,
                None => false,
            },
        }
    }

    pub(crate) async fn address_prev_uri(&mut self, actuator_uri: &str) -> bool {
        match self.addressings.advance_prev(actuator_uri) {
            Some(_) => self.addressing_load(actuator_uri, None, false).await,
            None => match self.addressings.hw_for_uri(actuator_uri) {
                Some(actuator) => self.hmi.control_clean(actuator).await,
                None => false,
            },
        }
    }

    pub(crate) async fn address_next(&mut self, actuator: ActuatorAddr) -> bool {
        let Some(uri) = self.addressings.uri_for_hw(actuator).map(str::to_string) else {
            return false;
        };
        self.address_next_uri(&uri).await
    }

    pub(crate) async fn address_prev(&mut self, actuator: ActuatorAddr) -> bool {
        let Some(uri) = self.addressings.uri_for_hw(actuator).map(str::to_string) else {
            return false;
        };
        self.address_prev_uri(&uri).await
    }

    /// Serialize every ring into the `addressings.json` shape.
    pub fn saved_addressings(&self) -> SavedAddressings {
        let mut saved = SavedAddressings::new();
        for uri in self.addressings.actuator_uris() {
            let Some(ring) = self.addressings.ring(&uri) else {
                continue;
            };
            let mut addrs = Vec::with_capacity(ring.addrs.len());
            for id in &ring.addrs {
                let Some(addressing) = self.addressings.get(*id) else {
                    continue;
                };
                let Ok(instance) = self.mapper.get_instance(addressing.instance_id) else {
                    continue;
                };
                addrs.push(SavedAddressing {
                    instance: instance.to_string(),
                    port: addressing.port.clone(),
                    label: addressing.label.clone(),
                    minimum: addressing.minimum,
                    maximum: addressing.maximum,
                    steps: addressing.steps,
                });
            }
            if !addrs.is_empty() {
                saved.insert(uri, addrs);
            }
        }
        saved
    }

    /// Re-issue every binding stored in a bundle's `addressings.json`, then
    /// advance each touched actuator once so the surface shows it.
    pub(crate) async fn load_saved_addressings(&mut self, bundle: &Path) {
        let path = bundle.join("addressings.json");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return;
        };
        let data: SavedAddressings = match serde_json::from_str(&text) {
            Ok(data) => data,
            Err(err) => {
                warn!(%err, path = %path.display(), "ignoring malformed addressings file");
                return;
            }
        };

        let mut used_actuators: Vec<String> = Vec::new();

        for (actuator_uri, addrs) in data {
            if !self.addressings.has_actuator(&actuator_uri) {
                warn!(actuator_uri, "bundle cites a missing actuator, skipping");
                continue;
            }
            for addr in addrs {
                let Ok(instance_id) = self.mapper.get_id_without_creating(&addr.instance) else {
                    continue;
                };
                let Some(plugin) = self.plugins.get(&instance_id) else {
                    continue;
                };

                let value = match addr.port.as_str() {
                    ":bypass" => {
                        if plugin.bypassed {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    // recomputed during addressing, any value works
                    ":presets" => 0.0,
                    symbol => plugin.ports.get(symbol).copied().unwrap_or(0.0),
                };

                let result = self
                    .address(
                        &addr.instance,
                        &addr.port,
                        &actuator_uri,
                        &addr.label,
                        addr.minimum,
                        addr.maximum,
                        value,
                        addr.steps,
                        true,
                    )
                    .await;
                if let Err(err) = result {
                    warn!(%err, instance = %addr.instance, port = %addr.port, "stored addressing failed");
                    continue;
                }
                if !used_actuators.contains(&actuator_uri) {
                    used_actuators.push(actuator_uri.clone());
                }
            }
        }

        for actuator_uri in used_actuators {
            self.address_next_uri(&actuator_uri).await;
        }
    }
}
