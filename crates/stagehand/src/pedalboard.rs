//! Pedalboard bundle IO.
//!
//! A bundle is a directory `<sym>.pedalboard/` holding `manifest.ttl`, the
//! main graph `<sym>.ttl`, `addressings.json` and an optional
//! `presets.json`. The graph layout follows the ingen/pedalboard contract:
//! arcs for connections, one block per plugin with per-port value stubs and
//! MIDI bindings, and the hardware port enumeration on the root.
//!
//! Reading only understands the layout written here (plus whatever sticks
//! to it); it is not a general Turtle parser.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use stageproto::{EngineCommand, HmiSurface, PedalboardEntry};

use crate::banks;
use crate::catalog::PluginCatalog;
use crate::router::AudioRouter;
use crate::session::{Session, SessionError, GRAPH_PREFIX};
use crate::state::{MidiCc, MidiCcRange, MidiPortRecord, PedalboardPreset, Plugin, PluginSnapshot};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle has no main graph file: {0}")]
    MissingMainFile(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed graph file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// A MIDI mapping as stored in a bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiBinding {
    pub channel: i32,
    pub controller: i32,
    pub range: Option<(f32, f32)>,
}

/// One stored control-port value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPort {
    pub symbol: String,
    pub value: f32,
    pub midi_cc: Option<MidiBinding>,
}

/// One plugin as stored in a bundle. `instance` is the short node name.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlugin {
    pub instance: String,
    pub uri: String,
    pub x: f32,
    pub y: f32,
    pub bypassed: bool,
    pub bypass_cc: MidiCc,
    pub preset: String,
    pub ports: Vec<StoredPort>,
}

/// A hardware MIDI port referenced by a bundle: stable symbol + human name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwarePort {
    pub symbol: String,
    pub name: String,
}

/// Everything the load pipeline needs from a bundle's main graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleInfo {
    pub title: String,
    pub width: i32,
    pub height: i32,
    pub midi_ins: Vec<HardwarePort>,
    pub midi_outs: Vec<HardwarePort>,
    pub plugins: Vec<StoredPlugin>,
    /// Graph-prefix-stripped `(source, target)` pairs.
    pub connections: Vec<(String, String)>,
}

/// Subset used by `pedalboard_reset`: the values a bundle would restore.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPluginValues {
    pub instance: String,
    pub bypassed: bool,
    pub preset: String,
    pub ports: Vec<(String, f32)>,
}

// ---------------------------------------------------------------------------
// names and small helpers

/// Reduce a title to a `[A-Za-z0-9_]` symbol, truncated to `max_len`.
pub fn symbolify(name: &str, max_len: usize) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if out.len() >= max_len {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if matches!(ch, ' ' | '-' | '_') {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    if out.starts_with(|ch: char| ch.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn strip_graph(path: &str) -> &str {
    path.strip_prefix(GRAPH_PREFIX).unwrap_or(path)
}

fn escape_quotes(text: &str) -> String {
    text.replace('"', "\\\"")
}

/// Replace a file through a temp sibling so readers never see half a file.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

// ---------------------------------------------------------------------------
// bundle discovery

/// The main graph file, resolved through the manifest's `seeAlso` with a
/// directory scan as fallback.
pub fn main_graph_file(bundle: &Path) -> Result<PathBuf, BundleError> {
    let manifest = bundle.join("manifest.ttl");
    if let Ok(text) = std::fs::read_to_string(&manifest) {
        if let Some(name) = extract_angle(&text, "rdfs:seeAlso") {
            let path = bundle.join(name);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    let entries = std::fs::read_dir(bundle).map_err(|source| BundleError::Read {
        path: bundle.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "ttl")
            && path.file_name().is_some_and(|name| name != "manifest.ttl")
        {
            return Ok(path);
        }
    }
    Err(BundleError::MissingMainFile(bundle.to_path_buf()))
}

/// List the pedalboard bundles under a directory, newest-name order.
pub fn list_pedalboards(dir: &Path) -> Vec<PedalboardEntry> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut boards = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir()
            || path
                .extension()
                .map(|ext| ext != "pedalboard")
                .unwrap_or(true)
        {
            continue;
        }
        match read_bundle(&path) {
            Ok(info) => boards.push(PedalboardEntry {
                title: info.title,
                bundle: path.display().to_string(),
            }),
            Err(err) => {
                // broken bundles are hidden, not fatal
                warn!(%err, bundle = %path.display(), "skipping broken pedalboard");
            }
        }
    }
    boards.sort_by(|a, b| a.title.cmp(&b.title));
    boards
}

// ---------------------------------------------------------------------------
// reading

/// Parse a bundle's main graph.
pub fn read_bundle(bundle: &Path) -> Result<BundleInfo, BundleError> {
    let path = main_graph_file(bundle)?;
    let text = std::fs::read_to_string(&path).map_err(|source| BundleError::Read {
        path: path.clone(),
        source,
    })?;
    parse_main_graph(&text).map_err(|message| BundleError::Parse { path, message })
}

/// The plugin values a bundle would restore, for `pedalboard_reset`.
pub fn read_plugin_values(bundle: &Path) -> Result<Vec<StoredPluginValues>, BundleError> {
    let info = read_bundle(bundle)?;
    Ok(info
        .plugins
        .into_iter()
        .map(|plugin| StoredPluginValues {
            instance: plugin.instance,
            bypassed: plugin.bypassed,
            preset: plugin.preset,
            ports: plugin
                .ports
                .into_iter()
                .map(|port| (port.symbol, port.value))
                .collect(),
        })
        .collect())
}

struct Block {
    subject: String,
    body: String,
}

fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for line in text.lines() {
        let starts_subject = !line.starts_with([' ', '\t'])
            && (line.starts_with('<') || line.starts_with("_:"));
        if starts_subject {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            let subject = if line.starts_with("_:") {
                line.trim().to_string()
            } else {
                line.trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            };
            current = Some(Block {
                subject,
                body: String::new(),
            });
        } else if let Some(block) = current.as_mut() {
            block.body.push_str(line);
            block.body.push('\n');
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks
}

/// First whitespace-delimited token after `key`, with trailing `;` shaved.
fn extract_token(body: &str, key: &str) -> Option<String> {
    let start = body.find(key)? + key.len();
    let token = body[start..]
        .split_whitespace()
        .next()?
        .trim_end_matches(';')
        .to_string();
    (!token.is_empty()).then_some(token)
}

/// `<...>` contents following `key`.
fn extract_angle(body: &str, key: &str) -> Option<String> {
    let start = body.find(key)? + key.len();
    let rest = &body[start..];
    let open = rest.find('<')?;
    let close = rest[open..].find('>')? + open;
    Some(rest[open + 1..close].to_string())
}

/// Quoted string following `key`, honoring escaped quotes.
fn extract_quoted(body: &str, key: &str) -> Option<String> {
    let start = body.find(key)? + key.len();
    let rest = &body[start..];
    let open = rest.find('"')?;

    let mut out = String::new();
    let mut escaped = false;
    for ch in rest[open + 1..].chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            return Some(out);
        } else {
            out.push(ch);
        }
    }
    None
}

fn extract_number<T: std::str::FromStr>(body: &str, key: &str) -> Option<T> {
    extract_token(body, key)?.parse().ok()
}

fn extract_midi_binding(body: &str) -> Option<MidiBinding> {
    let start = body.find("midi:binding [")?;
    let end = body[start..].find(']')? + start;
    let segment = &body[start..end];

    let channel = extract_number(segment, "midi:channel")?;
    let controller = extract_number(segment, "midi:controllerNumber")?;
    let range = match (
        extract_number::<f32>(segment, "lv2:minimum"),
        extract_number::<f32>(segment, "lv2:maximum"),
    ) {
        (Some(minimum), Some(maximum)) => Some((minimum, maximum)),
        _ => None,
    };
    Some(MidiBinding {
        channel,
        controller,
        range,
    })
}

fn parse_main_graph(text: &str) -> Result<BundleInfo, String> {
    let blocks = split_blocks(text);
    let mut info = BundleInfo::default();
    let mut plugin_index: BTreeMap<String, usize> = BTreeMap::new();

    // plugins, root and arcs first so port stubs have someone to attach to
    for block in &blocks {
        if block.subject.starts_with("_:") {
            let tail = extract_angle(&block.body, "ingen:tail")
                .ok_or_else(|| format!("arc {} has no tail", block.subject))?;
            let head = extract_angle(&block.body, "ingen:head")
                .ok_or_else(|| format!("arc {} has no head", block.subject))?;
            info.connections.push((tail, head));
        } else if block.subject.is_empty() {
            info.title = extract_quoted(&block.body, "doap:name").unwrap_or_default();
            info.width = extract_number(&block.body, "pedal:width").unwrap_or(0);
            info.height = extract_number(&block.body, "pedal:height").unwrap_or(0);
        } else if block.body.contains("a ingen:Block") {
            let uri = extract_angle(&block.body, "lv2:prototype")
                .ok_or_else(|| format!("block {} has no prototype", block.subject))?;
            let enabled = extract_token(&block.body, "ingen:enabled")
                .map(|token| token == "true")
                .unwrap_or(true);
            plugin_index.insert(block.subject.clone(), info.plugins.len());
            info.plugins.push(StoredPlugin {
                instance: block.subject.clone(),
                uri,
                x: extract_number(&block.body, "ingen:canvasX").unwrap_or(0.0),
                y: extract_number(&block.body, "ingen:canvasY").unwrap_or(0.0),
                bypassed: !enabled,
                bypass_cc: MidiCc::UNMAPPED,
                preset: extract_angle(&block.body, "pedal:preset").unwrap_or_default(),
                ports: Vec::new(),
            });
        }
    }

    for block in &blocks {
        if let Some((node, symbol)) = block.subject.rsplit_once('/') {
            let Some(index) = plugin_index.get(node) else {
                continue;
            };
            let plugin = &mut info.plugins[*index];

            if symbol == ":bypass" {
                if let Some(binding) = extract_midi_binding(&block.body) {
                    plugin.bypass_cc = MidiCc {
                        channel: binding.channel,
                        controller: binding.controller,
                    };
                }
            } else if block.body.contains("lv2:ControlPort")
                && block.body.contains("lv2:InputPort")
            {
                if let Some(value) = extract_number(&block.body, "ingen:value") {
                    plugin.ports.push(StoredPort {
                        symbol: symbol.to_string(),
                        value,
                        midi_cc: extract_midi_binding(&block.body),
                    });
                }
            }
        } else if block.body.contains("midi:MidiEvent") {
            let symbol = block.subject.as_str();
            if symbol.is_empty()
                || symbol.starts_with("control_")
                || symbol.starts_with("serial_midi_")
            {
                continue;
            }
            let name = extract_quoted(&block.body, "lv2:name").unwrap_or_default();
            let port = HardwarePort {
                symbol: symbol.to_string(),
                name,
            };
            if block.body.contains("lv2:InputPort") {
                info.midi_ins.push(port);
            } else if block.body.contains("lv2:OutputPort") {
                info.midi_outs.push(port);
            }
        }
    }

    Ok(info)
}

/// Read `presets.json` as full text, then parse; a non-list or empty list
/// yields nothing.
pub fn read_extra_presets(bundle: &Path) -> Vec<PedalboardPreset> {
    let path = bundle.join("presets.json");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<PedalboardPreset>>(&text) {
        Ok(presets) => presets,
        Err(err) => {
            warn!(%err, path = %path.display(), "ignoring malformed presets file");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// writing

fn render_manifest(titlesym: &str) -> String {
    format!(
        "@prefix ingen: <http://drobilla.net/ns/ingen#> .\n\
         @prefix lv2:   <http://lv2plug.in/ns/lv2core#> .\n\
         @prefix pedal: <http://moddevices.com/ns/modpedal#> .\n\
         @prefix rdfs:  <http://www.w3.org/2000/01/rdf-schema#> .\n\
         \n\
         <{0}.ttl>\n\
         \x20   lv2:prototype ingen:GraphPrototype ;\n\
         \x20   a lv2:Plugin ,\n\
         \x20       ingen:Graph ,\n\
         \x20       pedal:Pedalboard ;\n\
         \x20   rdfs:seeAlso <{0}.ttl> .\n",
        titlesym
    )
}

impl Session {
    fn render_main_graph(&self, title: &str) -> Result<String, SessionError> {
        // hardware MIDI ports and their display names
        let mut midi_ins: Vec<String> = Vec::new();
        let mut midi_outs: Vec<String> = Vec::new();
        let mut midi_alias: BTreeMap<String, String> = BTreeMap::new();

        for record in &self.midiports {
            if let Some((input, output)) = record.symbol.split_once(';') {
                let (alias_in, alias_out) = record
                    .alias
                    .split_once(';')
                    .unwrap_or((record.alias.as_str(), record.alias.as_str()));
                midi_ins.push(input.to_string());
                midi_outs.push(output.to_string());
                midi_alias.insert(input.to_string(), alias_in.to_string());
                midi_alias.insert(output.to_string(), alias_out.to_string());
            } else {
                midi_ins.push(record.symbol.clone());
                midi_alias.insert(record.symbol.clone(), record.alias.clone());
            }
        }

        // arcs
        let mut arcs = String::new();
        for (index, (source, target)) in self.connections.iter().enumerate() {
            let _ = write!(
                arcs,
                "\n_:b{}\n    ingen:tail <{}> ;\n    ingen:head <{}> .\n",
                index + 1,
                strip_graph(source),
                strip_graph(target)
            );
        }

        // blocks
        let mut blocks = String::new();
        let mut ids: Vec<i32> = self.plugins.keys().copied().collect();
        ids.sort_unstable();

        for instance_id in &ids {
            let plugin = &self.plugins[instance_id];
            let lv2 = self.catalog.plugin_info(&plugin.uri)?;
            let instance = strip_graph(&plugin.instance);

            let mut port_refs: Vec<String> = Vec::new();
            for symbol in lv2
                .ports
                .audio_inputs
                .iter()
                .chain(&lv2.ports.audio_outputs)
                .chain(&lv2.ports.control_inputs)
                .chain(&lv2.ports.control_outputs)
                .chain(&lv2.ports.cv_inputs)
                .chain(&lv2.ports.cv_outputs)
                .chain(&lv2.ports.midi_inputs)
                .chain(&lv2.ports.midi_outputs)
            {
                port_refs.push(format!("{}/{}", instance, symbol));
            }
            port_refs.push(format!("{}/:bypass", instance));

            let _ = write!(
                blocks,
                "\n<{}>\n\
                 \x20   ingen:canvasX {:.1} ;\n\
                 \x20   ingen:canvasY {:.1} ;\n\
                 \x20   ingen:enabled {} ;\n\
                 \x20   ingen:polyphonic false ;\n\
                 \x20   lv2:microVersion {} ;\n\
                 \x20   lv2:minorVersion {} ;\n\
                 \x20   mod:builderVersion {} ;\n\
                 \x20   mod:releaseNumber {} ;\n\
                 \x20   lv2:port <{}> ;\n\
                 \x20   lv2:prototype <{}> ;\n\
                 \x20   pedal:preset <{}> ;\n\
                 \x20   a ingen:Block .\n",
                instance,
                plugin.x,
                plugin.y,
                if plugin.bypassed { "false" } else { "true" },
                lv2.micro_version,
                lv2.minor_version,
                lv2.builder,
                lv2.release,
                port_refs.join("> ,\n             <"),
                plugin.uri,
                plugin.preset,
            );

            for symbol in &lv2.ports.audio_inputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n    a lv2:AudioPort ,\n        lv2:InputPort .\n",
                    instance, symbol
                );
            }
            for symbol in &lv2.ports.audio_outputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n    a lv2:AudioPort ,\n        lv2:OutputPort .\n",
                    instance, symbol
                );
            }
            for symbol in &lv2.ports.cv_inputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n    a lv2:CVPort ,\n        lv2:InputPort .\n",
                    instance, symbol
                );
            }
            for symbol in &lv2.ports.cv_outputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n    a lv2:CVPort ,\n        lv2:OutputPort .\n",
                    instance, symbol
                );
            }
            for symbol in &lv2.ports.midi_inputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n\
                     \x20   atom:bufferType atom:Sequence ;\n\
                     \x20   atom:supports midi:MidiEvent ;\n\
                     \x20   a atom:AtomPort ,\n\
                     \x20       lv2:InputPort .\n",
                    instance, symbol
                );
            }
            for symbol in &lv2.ports.midi_outputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n\
                     \x20   atom:bufferType atom:Sequence ;\n\
                     \x20   atom:supports midi:MidiEvent ;\n\
                     \x20   a atom:AtomPort ,\n\
                     \x20       lv2:OutputPort .\n",
                    instance, symbol
                );
            }

            for (symbol, value) in &plugin.ports {
                let binding = plugin
                    .midi_ccs
                    .get(symbol)
                    .filter(|cc| cc.is_mapped())
                    .map(|cc| {
                        format!(
                            "\n    midi:binding [\n\
                             \x20       midi:channel {} ;\n\
                             \x20       midi:controllerNumber {} ;\n\
                             \x20       lv2:minimum {} ;\n\
                             \x20       lv2:maximum {} ;\n\
                             \x20       a midi:Controller ;\n\
                             \x20   ] ;",
                            cc.channel, cc.controller, cc.minimum, cc.maximum
                        )
                    })
                    .unwrap_or_default();
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n\
                     \x20   ingen:value {} ;{}\n\
                     \x20   a lv2:ControlPort ,\n\
                     \x20       lv2:InputPort .\n",
                    instance, symbol, value, binding
                );
            }

            for symbol in &lv2.ports.control_outputs {
                let _ = write!(
                    blocks,
                    "\n<{}/{}>\n    a lv2:ControlPort ,\n        lv2:OutputPort .\n",
                    instance, symbol
                );
            }

            let bypass_binding = if plugin.bypass_cc.is_mapped() {
                format!(
                    "\n    midi:binding [\n\
                     \x20       midi:channel {} ;\n\
                     \x20       midi:controllerNumber {} ;\n\
                     \x20       a midi:Controller ;\n\
                     \x20   ] ;",
                    plugin.bypass_cc.channel, plugin.bypass_cc.controller
                )
            } else {
                String::new()
            };
            let _ = write!(
                blocks,
                "\n<{}/:bypass>\n\
                 \x20   ingen:value {} ;{}\n\
                 \x20   a lv2:ControlPort ,\n\
                 \x20       lv2:InputPort .\n",
                instance,
                i32::from(plugin.bypassed),
                bypass_binding
            );
        }

        // graph-level ports
        let mut ports = String::from(
            "\n<control_in>\n\
             \x20   atom:bufferType atom:Sequence ;\n\
             \x20   lv2:index 0 ;\n\
             \x20   lv2:name \"Control In\" ;\n\
             \x20   lv2:portProperty lv2:connectionOptional ;\n\
             \x20   lv2:symbol \"control_in\" ;\n\
             \x20   <http://lv2plug.in/ns/ext/resize-port#minimumSize> 4096 ;\n\
             \x20   a atom:AtomPort ,\n\
             \x20       lv2:InputPort .\n\
             \n\
             <control_out>\n\
             \x20   atom:bufferType atom:Sequence ;\n\
             \x20   lv2:index 1 ;\n\
             \x20   lv2:name \"Control Out\" ;\n\
             \x20   lv2:portProperty lv2:connectionOptional ;\n\
             \x20   lv2:symbol \"control_out\" ;\n\
             \x20   <http://lv2plug.in/ns/ext/resize-port#minimumSize> 4096 ;\n\
             \x20   a atom:AtomPort ,\n\
             \x20       lv2:OutputPort .\n",
        );
        let mut index = 1;

        for port in &self.audioports_in {
            index += 1;
            let _ = write!(
                ports,
                "\n<{0}>\n\
                 \x20   lv2:index {1} ;\n\
                 \x20   lv2:name \"{2}\" ;\n\
                 \x20   lv2:portProperty lv2:connectionOptional ;\n\
                 \x20   lv2:symbol \"{0}\" ;\n\
                 \x20   a lv2:AudioPort ,\n\
                 \x20       lv2:InputPort .\n",
                port,
                index,
                crate::session::title_case(port).replace('_', " ")
            );
        }
        for port in &self.audioports_out {
            index += 1;
            let _ = write!(
                ports,
                "\n<{0}>\n\
                 \x20   lv2:index {1} ;\n\
                 \x20   lv2:name \"{2}\" ;\n\
                 \x20   lv2:portProperty lv2:connectionOptional ;\n\
                 \x20   lv2:symbol \"{0}\" ;\n\
                 \x20   a lv2:AudioPort ,\n\
                 \x20       lv2:OutputPort .\n",
                port,
                index,
                crate::session::title_case(port).replace('_', " ")
            );
        }

        for (symbols, output) in [(&midi_ins, false), (&midi_outs, true)] {
            for port in symbols {
                let short = port.strip_prefix("system:").unwrap_or(port);
                let name = midi_alias.get(port).cloned().unwrap_or_default();
                index += 1;
                let _ = write!(
                    ports,
                    "\n<{0}>\n\
                     \x20   atom:bufferType atom:Sequence ;\n\
                     \x20   atom:supports midi:MidiEvent ;\n\
                     \x20   lv2:index {1} ;\n\
                     \x20   lv2:name \"{2}\" ;\n\
                     \x20   lv2:portProperty lv2:connectionOptional ;\n\
                     \x20   lv2:symbol \"{0}\" ;\n\
                     \x20   <http://lv2plug.in/ns/ext/resize-port#minimumSize> 4096 ;\n\
                     \x20   a atom:AtomPort ,\n\
                     \x20       lv2:{3} .\n",
                    short,
                    index,
                    escape_quotes(&name),
                    if output { "OutputPort" } else { "InputPort" }
                );
            }
        }

        if self.has_serial_midi_in {
            index += 1;
            let _ = write!(
                ports,
                "\n<serial_midi_in>\n\
                 \x20   atom:bufferType atom:Sequence ;\n\
                 \x20   atom:supports midi:MidiEvent ;\n\
                 \x20   lv2:index {} ;\n\
                 \x20   lv2:name \"Serial MIDI In\" ;\n\
                 \x20   lv2:portProperty lv2:connectionOptional ;\n\
                 \x20   lv2:symbol \"serial_midi_in\" ;\n\
                 \x20   <http://lv2plug.in/ns/ext/resize-port#minimumSize> 4096 ;\n\
                 \x20   a atom:AtomPort ,\n\
                 \x20       lv2:InputPort .\n",
                index
            );
        }
        if self.has_serial_midi_out {
            index += 1;
            let _ = write!(
                ports,
                "\n<serial_midi_out>\n\
                 \x20   atom:bufferType atom:Sequence ;\n\
                 \x20   atom:supports midi:MidiEvent ;\n\
                 \x20   lv2:index {} ;\n\
                 \x20   lv2:name \"Serial MIDI Out\" ;\n\
                 \x20   lv2:portProperty lv2:connectionOptional ;\n\
                 \x20   lv2:symbol \"serial_midi_out\" ;\n\
                 \x20   <http://lv2plug.in/ns/ext/resize-port#minimumSize> 4096 ;\n\
                 \x20   a atom:AtomPort ,\n\
                 \x20       lv2:OutputPort .\n",
                index
            );
        }

        // root
        let mut root = format!(
            "\n<>\n\
             \x20   doap:name \"{}\" ;\n\
             \x20   pedal:width {} ;\n\
             \x20   pedal:height {} ;\n\
             \x20   pedal:addressings <addressings.json> ;\n\
             \x20   pedal:screenshot <screenshot.png> ;\n\
             \x20   pedal:thumbnail <thumbnail.png> ;\n\
             \x20   ingen:polyphony 1 ;\n",
            escape_quotes(title),
            self.pedalboard_size.0,
            self.pedalboard_size.1,
        );

        if !self.connections.is_empty() {
            let refs: Vec<String> = (1..=self.connections.len())
                .map(|i| format!("_:b{}", i))
                .collect();
            let _ = writeln!(root, "    ingen:arc {} ;", refs.join(" ,\n              "));
        }
        if !ids.is_empty() {
            let refs: Vec<String> = ids
                .iter()
                .map(|id| strip_graph(&self.plugins[id].instance).to_string())
                .collect();
            let _ = writeln!(
                root,
                "    ingen:block <{}> ;",
                refs.join("> ,\n                <")
            );
        }

        let mut port_syms: Vec<String> = vec!["control_in".to_string(), "control_out".to_string()];
        if self.has_serial_midi_in {
            port_syms.push("serial_midi_in".to_string());
        }
        if self.has_serial_midi_out {
            port_syms.push("serial_midi_out".to_string());
        }
        for port in midi_ins.iter().chain(&midi_outs) {
            port_syms.push(port.strip_prefix("system:").unwrap_or(port).to_string());
        }
        port_syms.extend(self.audioports_in.iter().cloned());
        port_syms.extend(self.audioports_out.iter().cloned());
        let _ = writeln!(
            root,
            "    lv2:port <{}> ;",
            port_syms.join("> ,\n             <")
        );

        root.push_str(
            "    lv2:extensionData <http://lv2plug.in/ns/ext/state#interface> ;\n\
             \x20   a lv2:Plugin ,\n\
             \x20       ingen:Graph ,\n\
             \x20       pedal:Pedalboard .\n",
        );

        Ok(format!(
            "@prefix atom:  <http://lv2plug.in/ns/ext/atom#> .\n\
             @prefix doap:  <http://usefulinc.com/ns/doap#> .\n\
             @prefix ingen: <http://drobilla.net/ns/ingen#> .\n\
             @prefix lv2:   <http://lv2plug.in/ns/lv2core#> .\n\
             @prefix midi:  <http://lv2plug.in/ns/ext/midi#> .\n\
             @prefix mod:   <http://moddevices.com/ns/mod#> .\n\
             @prefix pedal: <http://moddevices.com/ns/modpedal#> .\n\
             @prefix rdfs:  <http://www.w3.org/2000/01/rdf-schema#> .\n\
             {}{}{}{}",
            arcs, blocks, ports, root
        ))
    }

    fn render_bundle_files(
        &self,
        title: &str,
        titlesym: &str,
    ) -> Result<Vec<(String, String)>, SessionError> {
        let mut files = vec![
            ("manifest.ttl".to_string(), render_manifest(titlesym)),
            (
                "addressings.json".to_string(),
                serde_json::to_string(&self.saved_addressings()).unwrap_or_else(|_| "{}".into()),
            ),
            (
                format!("{}.ttl", titlesym),
                self.render_main_graph(title)?,
            ),
        ];
        if self.pedalboard_presets.len() > 1 {
            if let Ok(text) = serde_json::to_string(&self.pedalboard_presets[1..]) {
                files.push(("presets.json".to_string(), text));
            }
        }
        Ok(files)
    }

    /// Serialize the session into a bundle. Over-writes the current bundle
    /// in place unless `as_new` (or the current path lives outside the
    /// pedalboards dir); new bundles materialize atomically via a temp
    /// sibling directory.
    pub async fn save(&mut self, title: &str, as_new: bool) -> Result<PathBuf, SessionError> {
        let titlesym = symbolify(title, 16);
        let files = self.render_bundle_files(title, &titlesym)?;

        let in_place = !as_new
            && self.pedalboard_path.as_ref().is_some_and(|path| {
                path.is_dir() && path.starts_with(&self.options.pedalboards_dir)
            });

        let bundle = if in_place {
            let bundle = self.pedalboard_path.clone().unwrap();
            for (name, contents) in &files {
                write_atomic(&bundle.join(name), contents)?;
            }
            if self.pedalboard_presets.len() <= 1 {
                let stale = bundle.join("presets.json");
                if stale.exists() {
                    let _ = std::fs::remove_file(stale);
                }
            }
            bundle
        } else {
            std::fs::create_dir_all(&self.options.pedalboards_dir)?;

            let mut target = self
                .options
                .pedalboards_dir
                .join(format!("{}.pedalboard", titlesym));
            while target.exists() {
                target = self.options.pedalboards_dir.join(format!(
                    "{}-{}.pedalboard",
                    titlesym,
                    fastrand::u32(1..=99999)
                ));
            }

            let staging = self.options.pedalboards_dir.join(format!(
                ".{}-staging-{}",
                titlesym,
                fastrand::u32(1..=99999)
            ));
            std::fs::create_dir(&staging)?;

            let write_all = || -> std::io::Result<()> {
                for (name, contents) in &files {
                    std::fs::write(staging.join(name), contents)?;
                }
                Ok(())
            };
            if let Err(err) = write_all() {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(err.into());
            }
            if let Err(err) = std::fs::rename(&staging, &target) {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(err.into());
            }
            self.pedalboard_path = Some(target.clone());
            target
        };

        self.pedalboard_name = title.to_string();
        self.pedalboard_empty = false;
        self.pedalboard_modified = false;

        banks::save_last_bank_and_pedalboard(
            &self.options.last_state_file(),
            0,
            &bundle.display().to_string(),
        );
        info!(bundle = %bundle.display(), "pedalboard saved");
        Ok(bundle)
    }

    /// Rewrite only the main graph file of the current bundle.
    pub fn save_main_graph_only(&mut self) -> Result<bool, SessionError> {
        let Some(bundle) = self.pedalboard_path.clone() else {
            return Ok(false);
        };
        let titlesym = symbolify(&self.pedalboard_name, 16);
        let contents = self.render_main_graph(&self.pedalboard_name.clone())?;
        write_atomic(&bundle.join(format!("{}.ttl", titlesym)), &contents)?;
        self.pedalboard_modified = false;
        Ok(true)
    }

    /// Load a bundle into the session, issuing engine commands as we go.
    pub async fn load(
        &mut self,
        bundlepath: &Path,
        is_default: bool,
    ) -> Result<String, SessionError> {
        let pb = read_bundle(bundlepath)?;

        self.broadcaster
            .send(format!("loading_start {} 0", i32::from(is_default)));
        self.broadcaster
            .send(format!("size {} {}", pb.width, pb.height));

        // MIDI devices change port names at any time; connections are
        // restored by matching the stable human aliases
        let old_ins_by_symbol: BTreeMap<&str, &str> = pb
            .midi_ins
            .iter()
            .map(|port| (port.symbol.as_str(), port.name.as_str()))
            .collect();
        let old_outs_by_symbol: BTreeMap<&str, &str> = pb
            .midi_outs
            .iter()
            .map(|port| (port.symbol.as_str(), port.name.as_str()))
            .collect();
        let old_outs_by_name: BTreeMap<&str, &str> = pb
            .midi_outs
            .iter()
            .map(|port| (port.name.as_str(), port.symbol.as_str()))
            .collect();

        let alias_of = |router: &dyn crate::router::AudioRouter, port: &str| {
            router
                .port_alias(port)
                .map(|alias| crate::router::humanize_alias(&alias))
                .unwrap_or_else(|| crate::session::short_port_name(port).to_string())
        };
        let new_midi_ins: Vec<(String, String)> = self
            .router
            .hardware_ports(false, false)
            .iter()
            .map(|port| {
                (
                    alias_of(self.router.as_ref(), port),
                    crate::session::short_port_name(port).to_string(),
                )
            })
            .collect();
        let new_midi_outs: Vec<(String, String)> = self
            .router
            .hardware_ports(false, true)
            .iter()
            .map(|port| {
                (
                    alias_of(self.router.as_ref(), port),
                    crate::session::short_port_name(port).to_string(),
                )
            })
            .collect();
        let new_in_by_alias: BTreeMap<&str, &str> = new_midi_ins
            .iter()
            .map(|(alias, symbol)| (alias.as_str(), symbol.as_str()))
            .collect();
        let new_out_by_alias: BTreeMap<&str, &str> = new_midi_outs
            .iter()
            .map(|(alias, symbol)| (alias.as_str(), symbol.as_str()))
            .collect();

        let mut tracked_symbols: Vec<String> = self
            .midiports
            .iter()
            .flat_map(|record| {
                record
                    .jack_ports()
                    .into_iter()
                    .map(|port| crate::session::short_port_name(port).to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        // register currently-present devices the bundle knows about
        for (index, (alias, symbol)) in new_midi_ins.iter().enumerate() {
            if !pb.midi_ins.iter().any(|port| port.name == *alias) {
                continue;
            }
            if tracked_symbols.contains(symbol) {
                continue;
            }
            self.broadcaster.send(format!(
                "add_hw_port /graph/{} midi 0 {} {}",
                symbol,
                alias.replace(' ', "_"),
                index + 1
            ));

            let record = match new_out_by_alias.get(alias.as_str()) {
                Some(out_symbol) => MidiPortRecord::new(
                    format!("system:{};system:{}", symbol, out_symbol),
                    format!("{0};{0}", alias),
                ),
                None => MidiPortRecord::new(format!("system:{}", symbol), alias.clone()),
            };
            tracked_symbols.push(symbol.clone());
            self.midiports.push(record);
        }

        // retain stored devices that are absent right now, so a later
        // hot-plug can restore them
        for port in &pb.midi_ins {
            if tracked_symbols.contains(&port.symbol) {
                continue;
            }
            if new_out_by_alias.contains_key(port.name.as_str()) {
                continue;
            }
            let record = match old_outs_by_name.get(port.name.as_str()) {
                Some(out_symbol) => MidiPortRecord::new(
                    format!("system:{};system:{}", port.symbol, out_symbol),
                    format!("{0};{0}", port.name),
                ),
                None => MidiPortRecord::new(format!("system:{}", port.symbol), port.name.clone()),
            };
            self.midiports.push(record);
        }

        for (index, (alias, symbol)) in new_midi_outs.iter().enumerate() {
            if !pb.midi_outs.iter().any(|port| port.name == *alias) {
                continue;
            }
            if tracked_symbols.contains(symbol) {
                continue;
            }
            self.broadcaster.send(format!(
                "add_hw_port /graph/{} midi 1 {} {}",
                symbol,
                alias.replace(' ', "_"),
                index + 1
            ));
        }

        // plugins
        let mut default_snapshot: BTreeMap<String, PluginSnapshot> = BTreeMap::new();

        for stored in &pb.plugins {
            let controls = match self.catalog.control_ports(&stored.uri) {
                Ok(controls) => controls,
                Err(err) => {
                    warn!(%err, uri = %stored.uri, "skipping plugin with unknown metadata");
                    continue;
                }
            };

            let instance = format!("{}{}", GRAPH_PREFIX, stored.instance);
            let instance_id = self.mapper.get_id(&instance);

            let mut plugin = Plugin {
                instance: instance.clone(),
                uri: stored.uri.clone(),
                x: stored.x,
                y: stored.y,
                bypassed: stored.bypassed,
                bypass_cc: stored.bypass_cc,
                ports: Default::default(),
                outputs: controls
                    .monitored_outputs
                    .iter()
                    .map(|symbol| (symbol.clone(), None))
                    .collect(),
                midi_ccs: controls
                    .inputs
                    .iter()
                    .map(|port| (port.symbol.clone(), MidiCcRange::UNMAPPED))
                    .collect(),
                badports: Default::default(),
                designations: Default::default(),
                preset: stored.preset.clone(),
                map_presets: Vec::new(),
                addressings: Default::default(),
            };
            let mut ranges: BTreeMap<String, (f32, f32)> = BTreeMap::new();

            for port in &controls.inputs {
                let mut value = port.default;
                ranges.insert(port.symbol.clone(), (port.minimum, port.maximum));
                if port.properties.contains("notOnGUI") {
                    plugin.badports.insert(port.symbol.clone());
                } else {
                    match port.designation {
                        Some(crate::catalog::PortDesignation::Enabled) => {
                            plugin.designations.enabled = Some(port.symbol.clone());
                            plugin.badports.insert(port.symbol.clone());
                            value = if stored.bypassed { 0.0 } else { 1.0 };
                        }
                        Some(crate::catalog::PortDesignation::Freewheel) => {
                            plugin.designations.freewheel = Some(port.symbol.clone());
                            plugin.badports.insert(port.symbol.clone());
                            value = 0.0;
                        }
                        None => {}
                    }
                }
                plugin.ports.insert(port.symbol.clone(), value);
            }

            self.plugins.insert(instance_id, plugin);

            let _ = self
                .engine_cmd(
                    EngineCommand::Add { uri: stored.uri.clone(), instance_id },
                    false,
                )
                .await;
            if stored.bypassed {
                let _ = self
                    .engine_cmd(
                        EngineCommand::Bypass { instance_id, bypassed: true },
                        false,
                    )
                    .await;
            }
            self.broadcaster.send(format!(
                "add {} {} {:.1} {:.1} {}",
                instance,
                stored.uri,
                stored.x,
                stored.y,
                i32::from(stored.bypassed)
            ));

            if stored.bypass_cc.is_mapped() {
                let _ = self
                    .engine_cmd(
                        EngineCommand::MidiMap {
                            instance_id,
                            symbol: ":bypass".to_string(),
                            channel: stored.bypass_cc.channel,
                            controller: stored.bypass_cc.controller,
                            minimum: 0.0,
                            maximum: 1.0,
                        },
                        false,
                    )
                    .await;
                self.broadcaster.send(format!(
                    "midi_map {} :bypass {} {} 0.0 1.0",
                    instance, stored.bypass_cc.channel, stored.bypass_cc.controller
                ));
            }

            if !stored.preset.is_empty() {
                let _ = self
                    .engine_cmd(
                        EngineCommand::PresetLoad {
                            instance_id,
                            uri: stored.preset.clone(),
                        },
                        false,
                    )
                    .await;
                self.broadcaster
                    .send(format!("preset {} {}", instance, stored.preset));
            }

            for port in &stored.ports {
                if let Some(plugin) = self.plugins.get_mut(&instance_id) {
                    plugin.ports.insert(port.symbol.clone(), port.value);
                }
                let _ = self
                    .engine_cmd(
                        EngineCommand::ParamSet {
                            instance_id,
                            symbol: port.symbol.clone(),
                            value: port.value,
                        },
                        false,
                    )
                    .await;
                self.broadcaster.send(format!(
                    "param_set {} {} {}",
                    instance, port.symbol, port.value
                ));

                let is_bad = self
                    .plugins
                    .get(&instance_id)
                    .map(|plugin| plugin.badports.contains(&port.symbol))
                    .unwrap_or(true);
                if is_bad {
                    continue;
                }

                if let Some(binding) = &port.midi_cc {
                    if binding.channel < 0 || binding.controller < 0 {
                        continue;
                    }
                    let (minimum, maximum) = binding.range.unwrap_or_else(|| {
                        ranges.get(&port.symbol).copied().unwrap_or((0.0, 1.0))
                    });
                    if let Some(plugin) = self.plugins.get_mut(&instance_id) {
                        plugin.midi_ccs.insert(
                            port.symbol.clone(),
                            MidiCcRange {
                                channel: binding.channel,
                                controller: binding.controller,
                                minimum,
                                maximum,
                            },
                        );
                    }
                    let _ = self
                        .engine_cmd(
                            EngineCommand::MidiMap {
                                instance_id,
                                symbol: port.symbol.clone(),
                                channel: binding.channel,
                                controller: binding.controller,
                                minimum,
                                maximum,
                            },
                            false,
                        )
                        .await;
                    self.broadcaster.send(format!(
                        "midi_map {} {} {} {} {} {}",
                        instance, port.symbol, binding.channel, binding.controller, minimum,
                        maximum
                    ));
                }
            }

            for symbol in &controls.monitored_outputs {
                let _ = self
                    .engine_cmd(
                        EngineCommand::MonitorOutput {
                            instance_id,
                            symbol: symbol.clone(),
                        },
                        false,
                    )
                    .await;
            }

            if let Some(plugin) = self.plugins.get(&instance_id) {
                default_snapshot.insert(
                    instance,
                    PluginSnapshot {
                        bypassed: stored.bypassed,
                        ports: plugin.ports.clone(),
                        preset: stored.preset.clone(),
                    },
                );
            }
        }

        // connections, remapping stored MIDI symbols onto live port names
        for (stored_source, stored_target) in &pb.connections {
            let mut source = stored_source.clone();
            let mut target = stored_target.clone();
            let mut connect_now = true;
            let mut alias_source = None;
            let mut alias_target = None;

            if let Some(name) = old_ins_by_symbol.get(source.as_str()) {
                alias_source = Some(name.to_string());
                match new_in_by_alias.get(name) {
                    Some(symbol) => source = symbol.to_string(),
                    None => connect_now = false,
                }
            }
            if let Some(name) = old_outs_by_symbol.get(target.as_str()) {
                alias_target = Some(name.to_string());
                match new_out_by_alias.get(name) {
                    Some(symbol) => target = symbol.to_string(),
                    None => connect_now = false,
                }
            }

            let port_from = format!("{}{}", GRAPH_PREFIX, source);
            let port_to = format!("{}{}", GRAPH_PREFIX, target);

            if connect_now {
                let (Ok(fixed_from), Ok(fixed_to)) = (
                    self.fix_engine_port(&port_from),
                    self.fix_engine_port(&port_to),
                ) else {
                    continue;
                };
                let _ = self
                    .engine_cmd(
                        EngineCommand::Connect { source: fixed_from, target: fixed_to },
                        false,
                    )
                    .await;
                self.connections.push((port_from.clone(), port_to.clone()));
                self.broadcaster
                    .send(format!("connect {} {}", port_from, port_to));
            } else if alias_source.is_some() || alias_target.is_some() {
                for record in &mut self.midiports {
                    let matched = [alias_source.as_deref(), alias_target.as_deref()]
                        .into_iter()
                        .flatten()
                        .any(|alias| record.matches_alias(alias));
                    if matched {
                        record
                            .pending_connections
                            .push((port_from.clone(), port_to.clone()));
                        break;
                    }
                }
            }
        }

        // whole-board presets: the implicit Default plus any stored extras
        self.pedalboard_presets = vec![PedalboardPreset {
            name: "Default".to_string(),
            data: default_snapshot,
        }];
        self.pedalboard_presets.extend(read_extra_presets(bundlepath));

        if self.hmi.initialized() {
            self.load_saved_addressings(bundlepath).await;
        }

        self.broadcaster.send("loading_end");

        if is_default {
            self.pedalboard_empty = true;
            self.pedalboard_modified = false;
            self.pedalboard_name.clear();
            self.pedalboard_path = None;
            self.pedalboard_size = (0, 0);
        } else {
            self.pedalboard_empty = false;
            self.pedalboard_modified = false;
            self.pedalboard_name = pb.title.clone();
            self.pedalboard_path = Some(bundlepath.to_path_buf());
            self.pedalboard_size = (pb.width, pb.height);

            if bundlepath.starts_with(&self.options.pedalboards_dir) {
                banks::save_last_bank_and_pedalboard(
                    &self.options.last_state_file(),
                    self.bank_id,
                    &bundlepath.display().to_string(),
                );
            } else {
                banks::save_last_bank_and_pedalboard(&self.options.last_state_file(), 0, "");
            }
        }

        Ok(self.pedalboard_name.clone())
    }
}
