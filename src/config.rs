//! User configuration handling

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::DiffError;

pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Node-detail records requested per page
    pub page_size: usize,
    /// Period of the structure and node poll timers
    pub poll_interval_ms: u64,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Model type -> property shown as the node label
    pub label_properties: BTreeMap<String, String>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log_level: "warn".to_string(),
            label_properties: default_label_properties(),
        }
    }
}

impl DiffConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// # Errors
    ///
    /// Returns [`DiffError::InvalidConfig`] for a zero page size or period.
    pub fn validate(&self) -> Result<(), DiffError> {
        if self.page_size == 0 {
            return Err(DiffError::InvalidConfig("page_size must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(DiffError::InvalidConfig(
                "poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply `ENVDIFF_PAGE_SIZE` / `ENVDIFF_POLL_MS` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a number.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(value) = std::env::var("ENVDIFF_PAGE_SIZE") {
            self.page_size = value
                .parse()
                .with_context(|| format!("Invalid ENVDIFF_PAGE_SIZE: {value}"))?;
        }
        if let Ok(value) = std::env::var("ENVDIFF_POLL_MS") {
            self.poll_interval_ms = value
                .parse()
                .with_context(|| format!("Invalid ENVDIFF_POLL_MS: {value}"))?;
        }
        Ok(())
    }
}

/// Label property for each model type of the environment graph.
#[must_use]
pub fn default_label_properties() -> BTreeMap<String, String> {
    [
        ("AptPackage", "name"),
        ("Configfile", "name"),
        ("ConfiguredInterface", "device"),
        ("Device", "name"),
        ("Environment", "name"),
        ("GitRemote", "name"),
        ("GitRepo", "path"),
        ("GitUntrackedFile", "path"),
        ("GitUrl", "url"),
        ("Host", "hostname"),
        ("Interface", "device"),
        ("KernelModule", "name"),
        ("KernelModuleParameter", "name"),
        ("Mount", "mount"),
        ("NameServer", "ip"),
        ("Partition", "name"),
        ("PythonPackage", "name"),
        ("Uservar", "name"),
        ("Virtualenv", "path"),
    ]
    .into_iter()
    .map(|(model, prop)| (model.to_string(), prop.to_string()))
    .collect()
}

/// Load configuration from the user's config directory.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
pub fn load_config() -> anyhow::Result<Option<DiffConfig>> {
    let Some(path) = config_path() else {
        return Ok(None);
    };
    load_config_from(&path)
}

/// Load configuration from an explicit path; a missing file is `None`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> anyhow::Result<Option<DiffConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(Some(config))
}

fn config_path() -> Option<PathBuf> {
    let base = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".config")
    } else {
        return None;
    };

    Some(base.join("envdiff").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config_from(&dir.path().join("config.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"page_size": 100, "label_properties": {"Host": "fqdn"}}"#)
            .unwrap();

        let config = load_config_from(&path).unwrap().unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.label_properties["Host"], "fqdn");
        assert!(!config.label_properties.contains_key("AptPackage"));
    }

    #[test]
    fn test_bad_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{page_size").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(DiffConfig::default().validate().is_ok());
        let config = DiffConfig {
            page_size: 0,
            ..DiffConfig::default()
        };
        assert!(matches!(config.validate(), Err(DiffError::InvalidConfig(_))));
        let config = DiffConfig {
            poll_interval_ms: 0,
            ..DiffConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_labels() {
        let labels = default_label_properties();
        assert_eq!(labels["Host"], "hostname");
        assert_eq!(labels["GitUrl"], "url");
        assert_eq!(labels.len(), 19);
    }
}
