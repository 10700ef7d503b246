//! Configuration types and loading.
//!
//! Every binary takes a single positional config-file argument; the format
//! is detected from the extension (YAML for the engine and recorder, JSON
//! accepted everywhere for tool interop).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    /// YAML (.yaml, .yml)
    #[default]
    Yaml,
    /// JSON (.json)
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "yaml" | "yml" => Some(Self::Yaml),
                "json" => Some(Self::Json),
                _ => None,
            })
    }
}

/// Loads a typed configuration from a file, detecting the format from the
/// extension.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, the extension is
/// not recognized, or the content does not parse into `T`.
pub fn load_file<T, P>(path: P) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnknownFormat {
        path: path.display().to_string(),
    })?;

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    load_str(&content, format).map_err(|e| match e {
        ConfigError::Parse { reason, .. } => ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// Parses a typed configuration from a string.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] when the content does not parse into `T`.
pub fn load_str<T>(content: &str, format: ConfigFormat) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<string>".to_string(),
            reason: e.to_string(),
        }),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<string>".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Market snapshot backing selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Slot array in process heap.
    #[default]
    Local,
    /// Named shared-memory region.
    Shm,
}

/// Snapshot configuration block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Backing selection.
    #[serde(rename = "type", default)]
    pub kind: SnapshotKind,
    /// Region name or path (shm only).
    #[serde(default)]
    pub path: Option<String>,
    /// Whether this process writes the region.
    #[serde(default = "default_true")]
    pub is_writer: bool,
}

/// Trading-hours block; times are `HH:MM:SS` local.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingHours {
    /// Session start (informational).
    #[serde(default)]
    pub start: Option<String>,
    /// Session end; the engine run loop exits when local time passes it.
    #[serde(default)]
    pub end: Option<String>,
}

/// One entry in the `plugins` list.
///
/// `library` is accepted for config compatibility but ignored: modules are
/// linked into the binary and resolved through the static factory registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Module name, resolved against the factory registry.
    pub name: String,
    /// Ignored; kept so configs written for dynamic loaders still parse.
    #[serde(default)]
    pub library: Option<String>,
    /// Whether the module is instantiated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-module parameters, arbitrary nesting.
    #[serde(default)]
    pub config: serde_yaml::Value,
}

impl PluginConfig {
    /// Flattens the scalar top-level parameters into string key/values.
    ///
    /// Nested parameters stay available to modules through the serialized
    /// raw blob ([`PluginConfig::raw_config`]).
    #[must_use]
    pub fn flat_params(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let serde_yaml::Value::Mapping(map) = &self.config {
            for (key, value) in map {
                let Some(key) = key.as_str() else { continue };
                let rendered = match value {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                out.insert(key.to_string(), rendered);
            }
        }
        out
    }

    /// Serializes the full nested parameter tree back to YAML for modules
    /// that need hierarchical configuration.
    #[must_use]
    pub fn raw_config(&self) -> Option<String> {
        if self.config.is_null() {
            return None;
        }
        serde_yaml::to_string(&self.config).ok()
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instrument map file (`id:ticker[:multiplier]` lines).
    #[serde(default = "default_symbols_file")]
    pub symbols_file: PathBuf,
    /// Trading hours, optional.
    #[serde(default)]
    pub trading_hours: Option<TradingHours>,
    /// Snapshot backing, optional (defaults to local).
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,
    /// Modules to load, in declaration order.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

fn default_symbols_file() -> PathBuf {
    PathBuf::from("conf/symbols.txt")
}

fn default_true() -> bool {
    true
}
