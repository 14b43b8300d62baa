//! Configuration loading.
//!
//! Defaults first, then `~/.config/stagehand/config.toml`, then a local
//! `./stagehand.toml` override, then `STAGEHAND_*` environment variables.
//! Later sources win per field.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid {key} override: {value:?}")]
    BadOverride { key: &'static str, value: String },
}

/// Where the audio engine listens. The write socket uses `port`, the read
/// socket `port + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 5555,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Where saved pedalboard bundles live.
    pub pedalboards_dir: PathBuf,
    /// Banks file, last-state file, and friends.
    pub data_dir: PathBuf,
    /// Plugin catalog directory (`plugins.json`).
    pub catalog_dir: PathBuf,
    /// Bundle loaded when nothing was saved from the previous session.
    #[serde(default)]
    pub default_pedalboard: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        let data = ProjectDirs::from("", "", "stagehand")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./stagehand-data"));

        Self {
            pedalboards_dir: home
                .map(|h| h.join(".pedalboards"))
                .unwrap_or_else(|| PathBuf::from("./pedalboards")),
            catalog_dir: data.join("catalog"),
            data_dir: data,
            default_pedalboard: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StagehandConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Partial config as found in files; unset fields keep earlier values.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigOverlay {
    engine: Option<EngineConfig>,
    paths: Option<PathsConfig>,
}

impl StagehandConfig {
    pub fn banks_file(&self) -> PathBuf {
        self.paths.data_dir.join("banks.json")
    }

    pub fn last_state_file(&self) -> PathBuf {
        self.paths.data_dir.join("last.json")
    }

    /// Load with the standard source order.
    pub fn load() -> Result<Self, ConfigError> {
        let mut files = Vec::new();
        if let Some(dirs) = ProjectDirs::from("", "", "stagehand") {
            files.push(dirs.config_dir().join("config.toml"));
        }
        files.push(PathBuf::from("./stagehand.toml"));

        Self::load_from(&files)
    }

    /// Load defaults, then apply whichever of `files` exist, then env vars.
    pub fn load_from(files: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut config = StagehandConfig::default();

        for path in files {
            if !path.exists() {
                continue;
            }
            config.apply_file(path)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let overlay: ConfigOverlay = toml::from_str(&text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        if let Some(engine) = overlay.engine {
            self.engine = engine;
        }
        if let Some(paths) = overlay.paths {
            self.paths = paths;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("STAGEHAND_ENGINE_HOST") {
            self.engine.host = host.parse().map_err(|_| ConfigError::BadOverride {
                key: "STAGEHAND_ENGINE_HOST",
                value: host,
            })?;
        }
        if let Ok(port) = std::env::var("STAGEHAND_ENGINE_PORT") {
            self.engine.port = port.parse().map_err(|_| ConfigError::BadOverride {
                key: "STAGEHAND_ENGINE_PORT",
                value: port,
            })?;
        }
        if let Ok(dir) = std::env::var("STAGEHAND_PEDALBOARDS_DIR") {
            self.paths.pedalboards_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("STAGEHAND_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}
