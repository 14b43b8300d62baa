//! Plugin-world interface.
//!
//! The LV2 metadata reader is an external collaborator; the session only
//! needs the queries below. [`JsonCatalog`] is the shipping implementation,
//! backed by a directory of JSON descriptors, which also serves as the test
//! fixture format. Tests may use their own in-memory mocks.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown plugin uri: {0}")]
    UnknownPlugin(String),
    #[error("failed to read catalog file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse catalog file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Host-driven roles a control input may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDesignation {
    Enabled,
    Freewheel,
}

/// One discrete labelled value of a control input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePoint {
    pub value: f32,
    pub label: String,
}

/// A control input port as described by the plugin's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub designation: Option<PortDesignation>,
    /// LV2 port properties: `toggled`, `integer`, `logarithmic`, `trigger`,
    /// `enumeration`, `tapTempo`, `notOnGUI`, ...
    #[serde(default)]
    pub properties: HashSet<String>,
    #[serde(default)]
    pub default: f32,
    #[serde(default)]
    pub minimum: f32,
    #[serde(default = "one")]
    pub maximum: f32,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub scale_points: Vec<ScalePoint>,
}

fn one() -> f32 {
    1.0
}

/// Control inputs plus monitored outputs for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginControls {
    pub inputs: Vec<ControlInput>,
    #[serde(default)]
    pub monitored_outputs: Vec<String>,
}

/// One published preset of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetInfo {
    pub uri: String,
    pub label: String,
}

/// Port symbols grouped by class, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLists {
    #[serde(default)]
    pub audio_inputs: Vec<String>,
    #[serde(default)]
    pub audio_outputs: Vec<String>,
    #[serde(default)]
    pub control_inputs: Vec<String>,
    #[serde(default)]
    pub control_outputs: Vec<String>,
    #[serde(default)]
    pub cv_inputs: Vec<String>,
    #[serde(default)]
    pub cv_outputs: Vec<String>,
    #[serde(default)]
    pub midi_inputs: Vec<String>,
    #[serde(default)]
    pub midi_outputs: Vec<String>,
}

/// Full plugin description needed for serialization and preset addressing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default)]
    pub micro_version: i32,
    #[serde(default)]
    pub minor_version: i32,
    #[serde(default)]
    pub builder: i32,
    #[serde(default)]
    pub release: i32,
    #[serde(default)]
    pub ports: PortLists,
    #[serde(default)]
    pub presets: Vec<PresetInfo>,
}

/// Read access to the plugin world.
pub trait PluginCatalog: Send + Sync {
    /// Control inputs and monitored outputs for a plugin.
    fn control_ports(&self, uri: &str) -> Result<PluginControls, CatalogError>;

    /// Version, port classes and presets for a plugin.
    fn plugin_info(&self, uri: &str) -> Result<PluginInfo, CatalogError>;

    /// Parse the state document returned by the engine's `preset_show`
    /// into symbol/value pairs.
    fn state_port_values(&self, state: &str) -> BTreeMap<String, f32>;

    /// Whether a bundle path is already part of the world.
    fn is_bundle_loaded(&self, bundle: &Path) -> bool;

    /// Add a bundle to the world, returning the plugin URIs it brought in.
    fn add_bundle(&self, bundle: &Path) -> Vec<String>;

    /// Remove a bundle from the world, returning the plugin URIs dropped.
    fn remove_bundle(&self, bundle: &Path) -> Vec<String>;

    /// Plugin URIs contained in a bundle (loaded or not).
    fn plugins_in_bundle(&self, bundle: &Path) -> Vec<String>;

    /// Re-scan the preset list of one plugin after a preset bundle changed.
    fn rescan_presets(&self, uri: &str);
}

/// One plugin entry of the JSON catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub controls: PluginControls,
    #[serde(default)]
    pub info: PluginInfo,
}

/// Directory-backed catalog: `<dir>/plugins.json` maps plugin URI to
/// [`CatalogEntry`]. Bundles added at runtime are tracked in memory only.
pub struct JsonCatalog {
    plugins: RwLock<BTreeMap<String, CatalogEntry>>,
    loaded_bundles: RwLock<HashSet<PathBuf>>,
}

impl JsonCatalog {
    pub fn open(dir: &Path) -> Result<Self, CatalogError> {
        let path = dir.join("plugins.json");
        let text = std::fs::read_to_string(&path).map_err(|source| CatalogError::Read {
            path: path.clone(),
            source,
        })?;
        let plugins = serde_json::from_str(&text).map_err(|err| CatalogError::Parse {
            path,
            message: err.to_string(),
        })?;

        Ok(Self {
            plugins: RwLock::new(plugins),
            loaded_bundles: RwLock::new(HashSet::new()),
        })
    }

    pub fn empty() -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
            loaded_bundles: RwLock::new(HashSet::new()),
        }
    }

    pub fn insert(&self, uri: &str, entry: CatalogEntry) {
        self.plugins.write().unwrap().insert(uri.to_string(), entry);
    }
}

impl PluginCatalog for JsonCatalog {
    fn control_ports(&self, uri: &str) -> Result<PluginControls, CatalogError> {
        self.plugins
            .read()
            .unwrap()
            .get(uri)
            .map(|entry| entry.controls.clone())
            .ok_or_else(|| CatalogError::UnknownPlugin(uri.to_string()))
    }

    fn plugin_info(&self, uri: &str) -> Result<PluginInfo, CatalogError> {
        self.plugins
            .read()
            .unwrap()
            .get(uri)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| CatalogError::UnknownPlugin(uri.to_string()))
    }

    fn state_port_values(&self, state: &str) -> BTreeMap<String, f32> {
        // One "<symbol> <value>" pair per line; anything else is skipped.
        let mut values = BTreeMap::new();
        for line in state.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(symbol), Some(raw)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            match raw.parse::<f32>() {
                Ok(value) => {
                    values.insert(symbol.to_string(), value);
                }
                Err(_) => warn!(symbol, raw, "skipping unparseable state port value"),
            }
        }
        values
    }

    fn is_bundle_loaded(&self, bundle: &Path) -> bool {
        self.loaded_bundles.read().unwrap().contains(bundle)
    }

    fn add_bundle(&self, bundle: &Path) -> Vec<String> {
        self.loaded_bundles.write().unwrap().insert(bundle.to_path_buf());
        self.plugins_in_bundle(bundle)
    }

    fn remove_bundle(&self, bundle: &Path) -> Vec<String> {
        self.loaded_bundles.write().unwrap().remove(bundle);
        self.plugins_in_bundle(bundle)
    }

    fn plugins_in_bundle(&self, bundle: &Path) -> Vec<String> {
        // the JSON catalog has no per-bundle manifest; look for a sidecar
        let path = bundle.join("plugins.json");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<String>>(&text) {
            Ok(uris) => uris,
            Err(err) => {
                warn!(%err, path = %path.display(), "ignoring malformed bundle plugin list");
                Vec::new()
            }
        }
    }

    fn rescan_presets(&self, _uri: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_port_values_parse() {
        let catalog = JsonCatalog::empty();
        let state = "gain 0.5\ntone -3\n\nbroken line here\nmix 1.0\n";
        let values = catalog.state_port_values(state);

        assert_eq!(values.get("gain"), Some(&0.5));
        assert_eq!(values.get("tone"), Some(&-3.0));
        assert_eq!(values.get("mix"), Some(&1.0));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_bundle_tracking() {
        let catalog = JsonCatalog::empty();
        let bundle = Path::new("/tmp/example.lv2");

        assert!(!catalog.is_bundle_loaded(bundle));
        catalog.add_bundle(bundle);
        assert!(catalog.is_bundle_loaded(bundle));
        catalog.remove_bundle(bundle);
        assert!(!catalog.is_bundle_loaded(bundle));
    }

    #[test]
    fn test_unknown_plugin_errors() {
        let catalog = JsonCatalog::empty();
        assert!(matches!(
            catalog.control_ports("urn:ex:missing"),
            Err(CatalogError::UnknownPlugin(_))
        ));
    }
}
