//! Runtime configuration.
//!
//! Loaded from `<config_dir>/bagfs/config.ron`. Every field has a default,
//! so a missing file or a partial file both work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUSY_TIMEOUT, DEFAULT_FILESYSTEM_NAME, DEFAULT_HOTPLUG_DEBOUNCE, DEFAULT_MARKER_FILE,
    DEFAULT_SETTLE_DELAY, DEFAULT_VOLUME_LABEL,
};
use crate::driver::DriverOptions;
use crate::meta::MetaPipeline;
use crate::volume::{RegistryOptions, StaticVolumes, SystemVolumes, VolumeSource};

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BagfsConfig {
    /// Catalog filename looked for at each volume root.
    pub marker_file: String,
    /// Volume roots to scan. Empty means every disk the OS reports.
    pub volume_roots: Vec<PathBuf>,
    /// Directories whose changes signal a device arriving or leaving,
    /// e.g. `/media/$USER`.
    pub media_roots: Vec<PathBuf>,
    pub hotplug_debounce_ms: u64,
    pub extraction_delay_ms: u64,
    pub busy_timeout_ms: u64,
    /// Refuse to mount catalogs whose stored hash does not match.
    pub verify_integrity: bool,
    pub volume_label: String,
    pub filesystem_name: String,
}

impl Default for BagfsConfig {
    fn default() -> Self {
        Self {
            marker_file: DEFAULT_MARKER_FILE.to_string(),
            volume_roots: Vec::new(),
            media_roots: Vec::new(),
            hotplug_debounce_ms: DEFAULT_HOTPLUG_DEBOUNCE.as_millis() as u64,
            extraction_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            verify_integrity: true,
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            filesystem_name: DEFAULT_FILESYSTEM_NAME.to_string(),
        }
    }
}

impl BagfsConfig {
    /// `~/.config/bagfs/config.ron` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bagfs").join("config.ron"))
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Load `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn hotplug_debounce(&self) -> Duration {
        Duration::from_millis(self.hotplug_debounce_ms)
    }

    pub fn extraction_delay(&self) -> Duration {
        Duration::from_millis(self.extraction_delay_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            marker_file: self.marker_file.clone(),
            busy_timeout: self.busy_timeout(),
            verify_integrity: self.verify_integrity,
        }
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            volume_label: self.volume_label.clone(),
            filesystem_name: self.filesystem_name.clone(),
        }
    }

    pub fn pipeline(&self) -> MetaPipeline {
        MetaPipeline::new(self.extraction_delay())
    }

    pub fn volume_source(&self) -> Arc<dyn VolumeSource> {
        if self.volume_roots.is_empty() {
            Arc::new(SystemVolumes)
        } else {
            Arc::new(StaticVolumes::new(self.volume_roots.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = BagfsConfig::from_ron(r#"(volume_roots: ["/mnt/a"], hotplug_debounce_ms: 250)"#)
            .unwrap();
        assert_eq!(config.volume_roots, vec![PathBuf::from("/mnt/a")]);
        assert_eq!(config.hotplug_debounce(), Duration::from_millis(250));
        assert_eq!(config.marker_file, DEFAULT_MARKER_FILE);
        assert_eq!(config.extraction_delay(), DEFAULT_SETTLE_DELAY);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = BagfsConfig::load_or_default(Some(&dir.path().join("none.ron"))).unwrap();
        assert_eq!(config, BagfsConfig::default());
    }

    #[test]
    fn test_bad_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, "(marker_file: 12").unwrap();
        assert!(matches!(
            BagfsConfig::load_or_default(Some(&path)),
            Err(ConfigError::Ron(_))
        ));
    }
}
