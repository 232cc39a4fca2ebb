//! Bridge configuration
//!
//! Loaded from YAML, TOML or JSON with `${VAR}` / `$VAR` substitution, then
//! overlaid with `TJS_BRIDGE__*` environment variables
//! (`TJS_BRIDGE__DEFAULT_VERSION=2.4.2`, `TJS_BRIDGE__ENV__ALLOWLOCALMODELS=true`).

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::ConfigError;
use crate::host::{EnvConfig, EnvValue};

pub const ENV_PREFIX: &str = "TJS_BRIDGE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Version key used when none is given
    pub default_version: String,
    /// CDN root for package locators
    pub cdn_base: String,
    /// Manifest file fetched from each locator
    pub manifest_file: String,
    /// Origin part of `blob:` URLs
    pub blob_origin: String,
    pub fetch_timeout_secs: u64,
    /// `env` values applied to every new instance
    pub env: BTreeMap<String, EnvValue>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_version: "latest".to_string(),
            cdn_base: "https://cdn.jsdelivr.net/npm".to_string(),
            manifest_file: "package.json".to_string(),
            blob_origin: "tjs-bridge".to_string(),
            fetch_timeout_secs: 30,
            env: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Load a config file; the format comes from the extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = config_format(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Source(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content, format)
    }

    pub fn from_str(content: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let expanded = expand_env_refs(content);
        Self::build(Cfg::builder().add_source(File::from_str(&expanded, format)))
    }

    /// Defaults overlaid with the environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(Cfg::builder())
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Source(e.to_string()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// `env` overrides with known flag names restored to their canonical
    /// spelling, since environment variables arrive lowercased
    pub fn env_overrides(&self) -> BTreeMap<String, EnvValue> {
        let known: Vec<String> = EnvConfig::new("").flags().into_iter().map(|(k, _)| k).collect();
        self.env
            .iter()
            .map(|(flag, value)| {
                let canonical = known
                    .iter()
                    .find(|k| k.eq_ignore_ascii_case(flag))
                    .cloned()
                    .unwrap_or_else(|| flag.clone());
                (canonical, value.clone())
            })
            .collect()
    }
}

/// Bridge config files are `.toml`, `.json`, `.yaml` or `.yml`
pub fn config_format(path: &Path) -> Result<FileFormat, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat(format!("{} has no extension", path.display())))?;

    match ext.to_ascii_lowercase().as_str() {
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

fn env_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)\b")
            .expect("env reference pattern is valid")
    })
}

/// Expand `${VAR}` and `$VAR` references, such as a model directory in
/// `env.localModelPath`; unset variables are left as written
pub fn expand_env_refs(content: &str) -> String {
    env_ref_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
