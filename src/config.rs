// src/config.rs

//! Declarative desired state
//!
//! The desired state of the system image is a small JSON document: a base
//! image reference plus two package lists, one to install on top of the
//! base and one to remove from it. The lists are mutually exclusive; a
//! name moved to one side is dropped from the other. The image definition
//! text is regenerated from this document, never edited in place.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_BASE_IMAGE: &str = "registry.local/base:latest";

/// The declarative desired state document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub image: String,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl Default for DesiredConfig {
    fn default() -> Self {
        DesiredConfig {
            image: DEFAULT_BASE_IMAGE.to_string(),
            install: Vec::new(),
            remove: Vec::new(),
        }
    }
}

impl DesiredConfig {
    /// Record a package as desired-installed. Returns true if the
    /// document changed. The name leaves the remove list first so it can
    /// never appear on both sides.
    pub fn add_install(&mut self, name: &str) -> bool {
        let mut changed = false;
        if let Some(pos) = self.remove.iter().position(|p| p == name) {
            self.remove.remove(pos);
            changed = true;
        }
        if !self.install.iter().any(|p| p == name) {
            self.install.push(name.to_string());
            changed = true;
        }
        changed
    }

    /// Record a package as desired-removed. Mirror of [`add_install`].
    ///
    /// [`add_install`]: DesiredConfig::add_install
    pub fn add_remove(&mut self, name: &str) -> bool {
        let mut changed = false;
        if let Some(pos) = self.install.iter().position(|p| p == name) {
            self.install.remove(pos);
            changed = true;
        }
        if !self.remove.iter().any(|p| p == name) {
            self.remove.push(name.to_string());
            changed = true;
        }
        changed
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.install.iter().any(|p| p == name)
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.remove.iter().any(|p| p == name)
    }

    /// Regenerate the image definition text from the document.
    ///
    /// One layer removes, one installs, so a failed install never leaves
    /// removed packages behind in the image.
    pub fn dockerfile(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "FROM {}", self.image);
        let _ = writeln!(text, "RUN apt-get update");
        if !self.remove.is_empty() {
            let _ = writeln!(text, "RUN apt-get remove -y {}", self.remove.join(" "));
        }
        if !self.install.is_empty() {
            let _ = writeln!(text, "RUN apt-get install -y {}", self.install.join(" "));
        }
        let _ = writeln!(text, "RUN apt-get clean");
        text
    }
}

/// Persistence seam for the desired state document
pub trait ConfigStore {
    fn load(&self) -> Result<DesiredConfig>;
    fn save(&self, config: &DesiredConfig) -> Result<()>;
}

/// JSON file backed [`ConfigStore`]
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    /// A missing file is not an error; it yields the default document
    fn load(&self) -> Result<DesiredConfig> {
        if !self.path.exists() {
            debug!("no config at {}, using defaults", self.path.display());
            return Ok(DesiredConfig::default());
        }
        let text = fs::read_to_string(&self.path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config {}: {}", self.path.display(), e)))
    }

    fn save(&self, config: &DesiredConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("cannot serialize config: {}", e)))?;
        fs::write(&self.path, text)?;
        debug!("config saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lists_are_mutually_exclusive() {
        let mut config = DesiredConfig::default();
        assert!(config.add_install("vim"));
        assert!(config.is_installed("vim"));

        assert!(config.add_remove("vim"));
        assert!(!config.is_installed("vim"));
        assert!(config.is_removed("vim"));

        assert!(config.add_install("vim"));
        assert!(config.is_installed("vim"));
        assert!(!config.is_removed("vim"));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut config = DesiredConfig::default();
        assert!(config.add_install("vim"));
        assert!(!config.add_install("vim"));
        assert_eq!(config.install, vec!["vim"]);
    }

    #[test]
    fn test_load_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("absent.json"));
        let config = store.load().unwrap();
        assert_eq!(config, DesiredConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("sub/config.json"));

        let mut config = DesiredConfig::default();
        config.add_install("vim");
        config.add_remove("nano");
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_json_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let result = FileConfigStore::new(path).load();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_dockerfile_layers() {
        let mut config = DesiredConfig::default();
        config.add_install("vim");
        config.add_install("git");
        config.add_remove("nano");

        let text = config.dockerfile();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("FROM {}", DEFAULT_BASE_IMAGE));
        assert_eq!(lines[1], "RUN apt-get update");
        assert_eq!(lines[2], "RUN apt-get remove -y nano");
        assert_eq!(lines[3], "RUN apt-get install -y vim git");
        assert_eq!(lines[4], "RUN apt-get clean");
    }

    #[test]
    fn test_dockerfile_skips_empty_lists() {
        let config = DesiredConfig::default();
        let text = config.dockerfile();
        assert!(!text.contains("install -y"));
        assert!(!text.contains("remove -y"));
    }
}
