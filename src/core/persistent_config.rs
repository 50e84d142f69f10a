//! Charm configuration with a frozen copy of the previously saved snapshot.
//!
//! `changed` always compares against the snapshot loaded when the invocation
//! began, never against values set during this invocation. `save` merges
//! forward: keys from the snapshot that are missing locally are written back,
//! unless they were removed explicitly with `remove`.

use crate::utils::error::Result;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".juju-persistent-config";

#[derive(Debug, Clone)]
pub struct PersistentConfig {
    current: Map<String, Value>,
    previous: Option<Map<String, Value>>,
    removed: BTreeSet<String>,
    path: PathBuf,
}

impl PersistentConfig {
    /// Uses the snapshot file in `charm_dir`.
    pub fn load(current: Map<String, Value>, charm_dir: &Path) -> Result<Self> {
        Self::with_path(current, charm_dir.join(CONFIG_FILE_NAME))
    }

    pub fn with_path(current: Map<String, Value>, path: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            current,
            previous: None,
            removed: BTreeSet::new(),
            path: path.into(),
        };
        if config.path.exists() {
            config.load_previous(None)?;
        }
        Ok(config)
    }

    /// Loads the snapshot to compare against. A `path` also redirects later saves.
    pub fn load_previous(&mut self, path: Option<&Path>) -> Result<()> {
        if let Some(path) = path {
            self.path = path.to_path_buf();
        }
        let content = fs::read_to_string(&self.path)?;
        let previous: Map<String, Value> = serde_json::from_str(&content)?;
        tracing::debug!(
            "Loaded {} previous config keys from {}",
            previous.len(),
            self.path.display()
        );
        self.previous = Some(previous);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.removed.remove(&key);
        self.current.insert(key, value.into());
    }

    /// Removes `key` for good: `save` will not restore it from the snapshot.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.removed.insert(key.to_string());
        self.current.remove(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.current
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// True when no snapshot exists yet, or the value differs from the snapshot.
    pub fn changed(&self, key: &str) -> bool {
        if self.previous.is_none() {
            return true;
        }
        self.previous(key) != self.get(key)
    }

    pub fn previous(&self, key: &str) -> Option<&Value> {
        self.previous.as_ref().and_then(|previous| previous.get(key))
    }

    pub fn save(&mut self) -> Result<()> {
        if let Some(previous) = &self.previous {
            for (key, value) in previous {
                if !self.current.contains_key(key) && !self.removed.contains(key) {
                    self.current.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(&self.current)?)?;
        fs::rename(&tmp_path, &self.path)?;
        tracing::debug!("Saved {} config keys to {}", self.current.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn config_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_everything_changed_without_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let config = PersistentConfig::load(
            config_map(json!({"storage-path": "data", "port": 80})),
            temp_dir.path(),
        )
        .unwrap();

        assert!(!config.has_previous());
        assert!(config.changed("storage-path"));
        assert!(config.changed("port"));
        assert!(config.changed("never-set"));
        assert_eq!(config.previous("storage-path"), None);
    }

    #[test]
    fn test_changed_compares_to_frozen_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let mut first =
            PersistentConfig::load(config_map(json!({"storage-path": "data"})), temp_dir.path())
                .unwrap();
        first.save().unwrap();

        let mut second =
            PersistentConfig::load(config_map(json!({"storage-path": "data"})), temp_dir.path())
                .unwrap();
        assert!(!second.changed("storage-path"));

        second.set("storage-path", "other");
        assert!(second.changed("storage-path"));
        assert_eq!(second.previous("storage-path"), Some(&json!("data")));

        second.set("storage-path", "data");
        assert!(!second.changed("storage-path"));
    }

    #[test]
    fn test_save_restores_untouched_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mut first = PersistentConfig::load(
            config_map(json!({"storage-path": "data", "admin-password": "s3cret"})),
            temp_dir.path(),
        )
        .unwrap();
        first.save().unwrap();

        let mut second =
            PersistentConfig::load(config_map(json!({"storage-path": "data"})), temp_dir.path())
                .unwrap();
        second.save().unwrap();

        let third = PersistentConfig::load(Map::new(), temp_dir.path()).unwrap();
        assert_eq!(third.previous("admin-password"), Some(&json!("s3cret")));
    }

    #[test]
    fn test_explicit_remove_is_not_restored() {
        let temp_dir = TempDir::new().unwrap();
        let mut first = PersistentConfig::load(
            config_map(json!({"storage-path": "data", "stale": true})),
            temp_dir.path(),
        )
        .unwrap();
        first.save().unwrap();

        let mut second = PersistentConfig::load(
            config_map(json!({"storage-path": "data", "stale": true})),
            temp_dir.path(),
        )
        .unwrap();
        assert_eq!(second.remove("stale"), Some(json!(true)));
        second.save().unwrap();

        let third = PersistentConfig::load(Map::new(), temp_dir.path()).unwrap();
        assert_eq!(third.previous("stale"), None);
        assert_eq!(third.previous("storage-path"), Some(&json!("data")));
    }

    #[test]
    fn test_load_previous_from_other_path() {
        let temp_dir = TempDir::new().unwrap();
        let other = temp_dir.path().join("elsewhere.json");
        std::fs::write(&other, r#"{"port": 80}"#).unwrap();

        let mut config =
            PersistentConfig::load(config_map(json!({"port": 80})), temp_dir.path()).unwrap();
        config.load_previous(Some(&other)).unwrap();

        assert!(!config.changed("port"));
        assert_eq!(config.path(), other.as_path());
    }

    #[test]
    fn test_malformed_snapshot_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "{not json").unwrap();

        assert!(PersistentConfig::load(Map::new(), temp_dir.path()).is_err());
    }
}
