//! Library environment flags
//!
//! Every loaded library instance owns one [`EnvConfig`]; writes through one
//! instance's `env` never show up in another's.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use super::object::{Capabilities, Capability, HostObject, HostValue};
use crate::error::{ConfigError, HostError, HostResult};

/// Primitive flag value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl EnvValue {
    pub fn kind(&self) -> &'static str {
        match self {
            EnvValue::Bool(_) => "boolean",
            EnvValue::Number(_) => "number",
            EnvValue::String(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EnvValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EnvValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn from_host(flag: &str, value: &HostValue) -> Result<Self, ConfigError> {
        match value {
            HostValue::Bool(b) => Ok(EnvValue::Bool(*b)),
            HostValue::Number(n) => Ok(EnvValue::Number(*n)),
            HostValue::BigInt(n) => Ok(EnvValue::Number(*n as f64)),
            HostValue::String(s) => Ok(EnvValue::String(s.clone())),
            other => Err(ConfigError::NotPrimitive {
                flag: flag.to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    fn to_host(&self) -> HostValue {
        match self {
            EnvValue::Bool(b) => HostValue::Bool(*b),
            EnvValue::Number(n) => HostValue::Number(*n),
            EnvValue::String(s) => HostValue::String(s.clone()),
        }
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Bool(b) => write!(f, "{}", b),
            EnvValue::Number(n) => write!(f, "{}", n),
            EnvValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for EnvValue {
    fn from(v: bool) -> Self {
        EnvValue::Bool(v)
    }
}

impl From<f64> for EnvValue {
    fn from(v: f64) -> Self {
        EnvValue::Number(v)
    }
}

impl From<&str> for EnvValue {
    fn from(v: &str) -> Self {
        EnvValue::String(v.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(v: String) -> Self {
        EnvValue::String(v)
    }
}

const READ_ONLY: &[&str] = &["version"];

/// Per-instance environment object
pub struct EnvConfig {
    flags: RwLock<Vec<(String, EnvValue)>>,
}

impl EnvConfig {
    /// Defaults of a freshly loaded library reporting `version`
    pub fn new(version: &str) -> Self {
        let flags = vec![
            ("version", EnvValue::from(version)),
            ("allowRemoteModels", EnvValue::from(true)),
            ("remoteHost", EnvValue::from("https://huggingface.co/")),
            ("remotePathTemplate", EnvValue::from("{model}/resolve/{revision}/")),
            // the loader turns local models off for every instance it creates
            ("allowLocalModels", EnvValue::from(false)),
            ("localModelPath", EnvValue::from("/models/")),
            ("useFS", EnvValue::from(false)),
            ("useBrowserCache", EnvValue::from(true)),
            ("useFSCache", EnvValue::from(false)),
            ("cacheDir", EnvValue::from("/.cache/")),
            ("useCustomCache", EnvValue::from(false)),
        ];
        Self {
            flags: RwLock::new(flags.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
        }
    }

    pub fn get(&self, flag: &str) -> Option<EnvValue> {
        self.flags
            .read()
            .iter()
            .find(|(k, _)| k == flag)
            .map(|(_, v)| v.clone())
    }

    pub fn get_bool(&self, flag: &str) -> Option<bool> {
        self.get(flag).and_then(|v| v.as_bool())
    }

    pub fn get_string(&self, flag: &str) -> Option<String> {
        self.get(flag).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn version(&self) -> String {
        self.get_string("version").unwrap_or_default()
    }

    /// Write a flag; existing flags keep their type, new flags are added
    pub fn set(&self, flag: &str, value: impl Into<EnvValue>) -> Result<(), ConfigError> {
        if READ_ONLY.contains(&flag) {
            return Err(ConfigError::ReadOnly(flag.to_string()));
        }
        let value = value.into();
        let mut flags = self.flags.write();
        match flags.iter_mut().find(|(k, _)| k == flag) {
            Some((_, current)) if current.kind() != value.kind() => Err(ConfigError::TypeMismatch {
                flag: flag.to_string(),
                expected: current.kind().to_string(),
                actual: value.kind().to_string(),
            }),
            Some((_, current)) => {
                debug!(flag, value = %value, "Env flag updated");
                *current = value;
                Ok(())
            }
            None => {
                debug!(flag, value = %value, "Env flag added");
                flags.push((flag.to_string(), value));
                Ok(())
            }
        }
    }

    /// Apply configured overrides in key order
    pub fn apply(&self, overrides: &BTreeMap<String, EnvValue>) -> Result<(), ConfigError> {
        for (flag, value) in overrides {
            self.set(flag, value.clone())?;
        }
        Ok(())
    }

    pub fn flags(&self) -> Vec<(String, EnvValue)> {
        self.flags.read().clone()
    }
}

impl HostObject for EnvConfig {
    fn class_name(&self) -> &str {
        "Env"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get, Capability::Set, Capability::Iterate])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        Ok(self
            .get(name)
            .map(|v| v.to_host())
            .unwrap_or(HostValue::Undefined))
    }

    fn set(&self, name: &str, value: HostValue) -> HostResult<()> {
        let value = EnvValue::from_host(name, &value)?;
        EnvConfig::set(self, name, value).map_err(HostError::from)
    }

    fn keys(&self) -> Vec<String> {
        self.flags.read().iter().map(|(k, _)| k.clone()).collect()
    }

    fn iterate(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.keys().into_iter().map(HostValue::String).collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let env = EnvConfig::new("2.4.2");
        assert_eq!(env.version(), "2.4.2");
        assert_eq!(env.get_bool("allowRemoteModels"), Some(true));
        assert_eq!(env.get_bool("allowLocalModels"), Some(false));
        assert_eq!(env.get_string("remoteHost").as_deref(), Some("https://huggingface.co/"));
    }

    #[test]
    fn test_type_is_kept() {
        let env = EnvConfig::new("3.0.0");
        env.set("allowRemoteModels", false).unwrap();
        assert_eq!(env.get_bool("allowRemoteModels"), Some(false));

        let err = env.set("allowRemoteModels", "no").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
        assert!(matches!(env.set("version", "9.9.9"), Err(ConfigError::ReadOnly(_))));

        env.set("customFlag", 1.5).unwrap();
        assert_eq!(env.get("customFlag"), Some(EnvValue::Number(1.5)));
    }

    #[test]
    fn test_host_writes_must_be_primitive() {
        let env = EnvConfig::new("3.0.0");
        let err = HostObject::set(&env, "remoteHost", HostValue::Array(vec![])).unwrap_err();
        assert!(matches!(err, HostError::Config(ConfigError::NotPrimitive { .. })));
        assert!(matches!(HostObject::get(&env, "nope").unwrap(), HostValue::Undefined));
    }
}
