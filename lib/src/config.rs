//! Configuration types for collection fixtures
//!
//! Two kinds of configuration live here. [`ConfigSnapshot`] is the immutable
//! key-value view that resource factories read while constructing shared
//! fixtures. [`HarnessConfig`] controls how the runner itself behaves.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{FixtureError, Result};
use crate::harness::RunMode;

/// Section holding named connection strings
pub const CONNECTION_STRINGS_SECTION: &str = "ConnectionStrings";

/// Separator between nested section names in flattened keys
pub const KEY_DELIMITER: char = ':';

/// Supported configuration document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FixtureError::ConfigLoad {
                source_name: path.display().to_string(),
                reason: "config file has no extension".to_string(),
            })?;

        match extension.to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            other => Err(FixtureError::ConfigLoad {
                source_name: path.display().to_string(),
                reason: format!("unsupported config file format: {}", other),
            }),
        }
    }
}

/// Where a configuration snapshot is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Inline { format: ConfigFormat, contents: String },
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ConfigSource::File(path.into())
    }

    pub fn json(contents: impl Into<String>) -> Self {
        ConfigSource::Inline {
            format: ConfigFormat::Json,
            contents: contents.into(),
        }
    }

    /// Human readable name used in errors and logs
    pub fn describe(&self) -> String {
        match self {
            ConfigSource::File(path) => path.display().to_string(),
            ConfigSource::Inline { format, .. } => format!("inline {:?} document", format),
        }
    }
}

/// Immutable key-value view over a configuration document
///
/// Nested sections are flattened into `section:key` paths and array items are
/// addressed by index (`section:0`). Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    /// Read and parse a configuration source
    pub fn load(source: &ConfigSource) -> Result<Self> {
        let snapshot = match source {
            ConfigSource::File(path) => {
                let format = ConfigFormat::from_path(path)?;
                let contents =
                    std::fs::read_to_string(path).map_err(|e| FixtureError::ConfigLoad {
                        source_name: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                Self::parse(format, &contents, &source.describe())?
            }
            ConfigSource::Inline { format, contents } => {
                Self::parse(*format, contents, &source.describe())?
            }
        };

        tracing::debug!(
            "Loaded {} configuration values from {}",
            snapshot.len(),
            source.describe()
        );
        Ok(snapshot)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::parse(ConfigFormat::Json, json, "inline Json document")
    }

    pub fn from_toml(toml: &str) -> Result<Self> {
        Self::parse(ConfigFormat::Toml, toml, "inline Toml document")
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::parse(ConfigFormat::Yaml, yaml, "inline Yaml document")
    }

    /// Build a snapshot directly from flattened key-value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(key, value)| (normalize_key(key.as_ref()), value.into()))
            .collect();
        Self { values }
    }

    fn parse(format: ConfigFormat, contents: &str, source_name: &str) -> Result<Self> {
        let parse_error = |reason: String| FixtureError::ConfigLoad {
            source_name: source_name.to_string(),
            reason,
        };

        let document: Value = match format {
            ConfigFormat::Json => {
                serde_json::from_str(contents).map_err(|e| parse_error(e.to_string()))?
            }
            ConfigFormat::Toml => toml::from_str(contents).map_err(|e| parse_error(e.to_string()))?,
            ConfigFormat::Yaml => {
                serde_yaml::from_str(contents).map_err(|e| parse_error(e.to_string()))?
            }
        };

        if !document.is_object() {
            return Err(parse_error(
                "configuration root must be an object".to_string(),
            ));
        }

        let mut values = BTreeMap::new();
        flatten(None, &document, &mut values);
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    /// Look up a named entry of the `ConnectionStrings` section
    pub fn connection_string(&self, name: &str) -> Option<&str> {
        self.get(&format!(
            "{}{}{}",
            CONNECTION_STRINGS_SECTION, KEY_DELIMITER, name
        ))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flattened keys in sorted order (normalized to lowercase)
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase()
}

fn flatten(prefix: Option<&str>, value: &Value, out: &mut BTreeMap<String, String>) {
    let join = |segment: &str| match prefix {
        Some(prefix) => format!("{}{}{}", prefix, KEY_DELIMITER, segment),
        None => segment.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(Some(&join(key)), nested, out);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten(Some(&join(&index.to_string())), nested, out);
            }
        }
        scalar => {
            // Root scalars are rejected before flattening, so a prefix exists here
            let Some(key) = prefix else { return };
            let text = match scalar {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(normalize_key(key), text);
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("appsettings.json")
}

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HarnessConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub run_mode: RunMode,
    /// Configuration document the collection container is built from
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            run_mode: RunMode::default(),
            config_path: default_config_path(),
        }
    }
}

impl HarnessConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !["error", "warn", "info", "debug", "trace"].contains(&self.log_level.as_str()) {
            return Err(FixtureError::Harness(format!(
                "Invalid log level: {}",
                self.log_level
            )));
        }

        if self.config_path.as_os_str().is_empty() {
            return Err(FixtureError::Harness(
                "Config path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HarnessConfig =
            serde_json::from_str(json).map_err(|e| FixtureError::ConfigLoad {
                source_name: "harness settings".to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Source the collection container should be built from
    pub fn config_source(&self) -> ConfigSource {
        ConfigSource::File(self.config_path.clone())
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
        };
        f.write_str(name)
    }
}
