//! Tracker configuration
//!
//! Values come from the plugin configuration map that ships with the backup
//! tooling. Keys and units:
//!
//! | key                   | unit    | default |
//! |-----------------------|---------|---------|
//! | `dataUploadTimeout`   | minutes | 30      |
//! | `dataUploadCheckPace` | seconds | 10      |
//! | `propagationTimeout`  | seconds | 120     |
//! | `migration`           | bool    | false   |
//!
//! The map can be given inline or as a YAML file, either a flat mapping or a
//! ConfigMap manifest whose `data` holds the keys.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde_yaml::Value;
use tracing::debug;

use crate::controller::poll::PollSettings;
use crate::controller::retry::RetryConfig;
use crate::error::{Error, Result};

pub const DATA_UPLOAD_TIMEOUT_KEY: &str = "dataUploadTimeout";
pub const DATA_UPLOAD_CHECK_PACE_KEY: &str = "dataUploadCheckPace";
pub const PROPAGATION_TIMEOUT_KEY: &str = "propagationTimeout";
pub const MIGRATION_KEY: &str = "migration";

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Deadline and pace for data-movement checks
    pub upload: PollSettings,
    /// Deadline and pace for the control-plane pause propagation wait
    pub propagation: PollSettings,
    pub retry: RetryConfig,
    /// Leave the workload paused once the backup has finished
    pub migration: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            upload: PollSettings::upload_defaults(),
            propagation: PollSettings::propagation_defaults(),
            retry: RetryConfig::default(),
            migration: false,
        }
    }
}

impl TrackerConfig {
    /// Build from the plugin configuration map; absent keys keep their default.
    pub fn from_plugin_config(data: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply(data)?;
        Ok(config)
    }

    /// Overlay the keys present in `data`
    pub fn apply(&mut self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(minutes) = parse_key::<u64>(data, DATA_UPLOAD_TIMEOUT_KEY)? {
            self.upload.timeout = Duration::from_secs(minutes * 60);
        }
        if let Some(seconds) = parse_key::<u64>(data, DATA_UPLOAD_CHECK_PACE_KEY)? {
            if seconds == 0 {
                return Err(Error::ConfigError(format!(
                    "{DATA_UPLOAD_CHECK_PACE_KEY} must be at least one second"
                )));
            }
            self.upload.pace = Duration::from_secs(seconds);
        }
        if let Some(seconds) = parse_key::<u64>(data, PROPAGATION_TIMEOUT_KEY)? {
            self.propagation.timeout = Duration::from_secs(seconds);
        }
        if let Some(migration) = parse_key::<bool>(data, MIGRATION_KEY)? {
            self.migration = migration;
        }
        debug!(config = ?self, "Applied plugin configuration");
        Ok(())
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let data = flatten_yaml(&raw).map_err(|e| match e {
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        Self::from_plugin_config(&data)
    }
}

fn parse_key<T>(data: &BTreeMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = data.get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| Error::ConfigError(format!("invalid value {raw:?} for {key}: {e}")))
}

/// Turn a flat mapping, or a ConfigMap's `data`, into string key/values
fn flatten_yaml(raw: &str) -> Result<BTreeMap<String, String>> {
    let doc: Value = serde_yaml::from_str(raw)?;
    let mapping = match &doc {
        Value::Mapping(m) => match m.get("data") {
            Some(Value::Mapping(data)) if m.contains_key("kind") => data,
            _ => m,
        },
        Value::Null => return Ok(BTreeMap::new()),
        _ => {
            return Err(Error::ConfigError(
                "configuration must be a mapping".to_string(),
            ))
        }
    };

    let mut out = BTreeMap::new();
    for (key, value) in mapping {
        let Value::String(key) = key else {
            return Err(Error::ConfigError(format!("non-string key {key:?}")));
        };
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(Error::ConfigError(format!(
                    "value for {key} must be a scalar, got {other:?}"
                )))
            }
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::from_plugin_config(&BTreeMap::new()).unwrap();
        assert_eq!(config.upload.timeout, Duration::from_secs(30 * 60));
        assert_eq!(config.upload.pace, Duration::from_secs(10));
        assert_eq!(config.propagation.timeout, Duration::from_secs(120));
        assert_eq!(config.propagation.pace, Duration::from_secs(2));
        assert!(!config.migration);
    }

    #[test]
    fn test_units() {
        let config = TrackerConfig::from_plugin_config(&map(&[
            ("dataUploadTimeout", "45"),
            ("dataUploadCheckPace", "5"),
            ("propagationTimeout", "300"),
            ("migration", "true"),
        ]))
        .unwrap();
        assert_eq!(config.upload.timeout, Duration::from_secs(45 * 60));
        assert_eq!(config.upload.pace, Duration::from_secs(5));
        assert_eq!(config.propagation.timeout, Duration::from_secs(300));
        assert!(config.migration);
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        let err = TrackerConfig::from_plugin_config(&map(&[("dataUploadTimeout", "30m")]))
            .unwrap_err();
        match err {
            Error::ConfigError(msg) => assert!(msg.contains("dataUploadTimeout")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
        assert!(TrackerConfig::from_plugin_config(&map(&[("dataUploadCheckPace", "0")])).is_err());
        assert!(TrackerConfig::from_plugin_config(&map(&[("migration", "yes")])).is_err());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config =
            TrackerConfig::from_plugin_config(&map(&[("hypershift.openshift.io/x", "1")])).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_flat_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dataUploadTimeout: 60\ndataUploadCheckPace: \"20\"\nmigration: false").unwrap();

        let config = TrackerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.upload.timeout, Duration::from_secs(60 * 60));
        assert_eq!(config.upload.pace, Duration::from_secs(20));
    }

    #[test]
    fn test_configmap_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: hypershift-plugin-config
  namespace: openshift-adp
data:
  dataUploadTimeout: "15"
  migration: "true"
"#
        )
        .unwrap();

        let config = TrackerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.upload.timeout, Duration::from_secs(15 * 60));
        assert!(config.migration);
    }

    #[test]
    fn test_nested_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dataUploadTimeout:\n  minutes: 5").unwrap();
        let err = TrackerConfig::from_yaml_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrackerConfig::from_yaml_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
    }
}
