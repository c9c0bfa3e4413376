//! # Core Configuration Module
//!
//! Provides configuration management for the device sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance holding the on-device layout conventions and the private staging
//! location used during conversion. `build()` validates eagerly so a bad
//! setting is rejected before any device is touched.
//!
//! ## Usage
//!
//! ```no_run
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .artifact_dir_name("MUSIC")
//!     .staging_dir("/var/tmp/device-sync")
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Directory names must be a single path component
//! let config = CoreConfig::builder()
//!     .artifact_dir_name("music/pcm")
//!     .build()
//!     .expect("Should fail - nested artifact directory");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use std::path::PathBuf;

/// Directory under the device root holding artifacts and the index.
pub const DEFAULT_ARTIFACT_DIR: &str = "music";

/// Extension of header-prefixed PCM artifacts.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "pcm";

/// Name of the JSON index written next to the artifact folders.
pub const DEFAULT_INDEX_FILE_NAME: &str = "index.json";

/// Schema version written into every index.
pub const DEFAULT_INDEX_VERSION: &str = "1.0";

/// Marker file used to probe writability.
pub const DEFAULT_WRITE_PROBE_NAME: &str = ".device-sync-write-test";

/// Core configuration for the device sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Directory name under the device root (`<deviceRoot>/<artifact_dir_name>`)
    pub artifact_dir_name: String,

    /// Artifact file extension, without the leading dot
    pub artifact_extension: String,

    /// Index file name inside the artifact directory
    pub index_file_name: String,

    /// Schema version string stored in the index
    pub index_version: String,

    /// Private directory for staged payloads, never on the device
    pub staging_dir: PathBuf,

    /// Name of the marker file created and removed by writability probes
    pub write_probe_name: String,

    /// Buffer size of the sync event bus
    pub event_buffer_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            artifact_dir_name: DEFAULT_ARTIFACT_DIR.to_string(),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            index_file_name: DEFAULT_INDEX_FILE_NAME.to_string(),
            index_version: DEFAULT_INDEX_VERSION.to_string(),
            staging_dir: default_staging_dir(),
            write_probe_name: DEFAULT_WRITE_PROBE_NAME.to_string(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

/// `<tmp>/device-sync-staging`
pub fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("device-sync-staging")
}

impl CoreConfig {
    /// Creates a new builder seeded with defaults.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Directory and file names are single, non-empty path components
    /// - The extension carries no leading dot
    /// - The index file name does not collide with the artifact extension
    /// - The event buffer can hold at least one event
    pub fn validate(&self) -> Result<()> {
        validate_component("Artifact directory name", &self.artifact_dir_name)?;
        validate_component("Index file name", &self.index_file_name)?;
        validate_component("Write probe name", &self.write_probe_name)?;

        if self.artifact_extension.is_empty() {
            return Err(Error::Config(
                "Artifact extension cannot be empty".to_string(),
            ));
        }

        if self.artifact_extension.starts_with('.')
            || self.artifact_extension.contains(['/', '\\'])
        {
            return Err(Error::Config(format!(
                "Artifact extension must be a bare extension like 'pcm', got '{}'",
                self.artifact_extension
            )));
        }

        let index_ext = self.index_file_name.rsplit_once('.').map(|(_, ext)| ext);
        if index_ext.is_some_and(|ext| ext.eq_ignore_ascii_case(&self.artifact_extension)) {
            return Err(Error::Config(format!(
                "Index file name '{}' would be scanned as an artifact",
                self.index_file_name
            )));
        }

        if self.index_version.trim().is_empty() {
            return Err(Error::Config("Index version cannot be empty".to_string()));
        }

        if self.staging_dir.as_os_str().is_empty() {
            return Err(Error::Config("Staging directory cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_component(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config(format!("{} cannot be empty", label)));
    }

    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(Error::Config(format!(
            "{} must be a single path component, got '{}'",
            label, value
        )));
    }

    Ok(())
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Sets the artifact directory name under the device root.
    pub fn artifact_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.artifact_dir_name = name.into();
        self
    }

    /// Sets the artifact file extension (without the dot).
    pub fn artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.artifact_extension = extension.into();
        self
    }

    /// Sets the index file name.
    pub fn index_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.index_file_name = name.into();
        self
    }

    /// Sets the index schema version.
    pub fn index_version(mut self, version: impl Into<String>) -> Self {
        self.config.index_version = version.into();
        self
    }

    /// Sets the private staging directory.
    pub fn staging_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.staging_dir = path.into();
        self
    }

    /// Sets the writability probe marker name.
    pub fn write_probe_name(mut self, name: impl Into<String>) -> Self {
        self.config.write_probe_name = name.into();
        self
    }

    /// Sets the event bus buffer size.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        let config = CoreConfig::builder().build().unwrap();

        assert_eq!(config.artifact_dir_name, "music");
        assert_eq!(config.artifact_extension, "pcm");
        assert_eq!(config.index_file_name, "index.json");
        assert_eq!(config.index_version, "1.0");
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.staging_dir.ends_with("device-sync-staging"));
    }

    #[test]
    fn test_builder_overrides() {
        let config = CoreConfig::builder()
            .artifact_dir_name("MUSIC")
            .artifact_extension("raw")
            .index_file_name("library.json")
            .index_version("2.0")
            .staging_dir("/tmp/staging")
            .event_buffer_size(16)
            .build()
            .unwrap();

        assert_eq!(config.artifact_dir_name, "MUSIC");
        assert_eq!(config.artifact_extension, "raw");
        assert_eq!(config.index_file_name, "library.json");
        assert_eq!(config.index_version, "2.0");
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/staging"));
        assert_eq!(config.event_buffer_size, 16);
    }

    #[test]
    fn test_rejects_nested_artifact_dir() {
        let result = CoreConfig::builder().artifact_dir_name("a/b").build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = CoreConfig::builder().artifact_dir_name("..").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_dotted_extension() {
        let result = CoreConfig::builder().artifact_extension(".pcm").build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = CoreConfig::builder().artifact_extension("").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_index_with_artifact_extension() {
        let result = CoreConfig::builder().index_file_name("index.PCM").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_event_buffer() {
        let result = CoreConfig::builder().event_buffer_size(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
