//! Stack configuration
//!
//! Settings can be built programmatically or read from the environment:
//!
//! - `LOOSELEAF_STORAGE_DIR`: where imported page assets are written
//! - `LOOSELEAF_THUMBNAIL_MAX_DIM`: longest side, in pixels, of rendered PDF
//!   page backgrounds

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::PageId;

pub const STORAGE_DIR_VAR: &str = "LOOSELEAF_STORAGE_DIR";
pub const THUMBNAIL_MAX_DIM_VAR: &str = "LOOSELEAF_THUMBNAIL_MAX_DIM";

/// Configuration for a [`PaperStack`](crate::PaperStack)
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    /// Root directory for page assets
    pub storage_dir: PathBuf,
    /// Longest side of PDF page backgrounds, in pixels
    pub thumbnail_max_dimension: u32,
    /// Name given to the stack created at start-up
    pub default_stack_name: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            storage_dir: Self::default_storage_dir(),
            thumbnail_max_dimension: 1024,
            default_stack_name: "Notebook".to_string(),
        }
    }
}

impl StackConfig {
    pub fn with_storage_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.storage_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_thumbnail_max_dimension(mut self, pixels: u32) -> Self {
        self.thumbnail_max_dimension = pixels;
        self
    }

    pub fn with_default_stack_name(mut self, name: impl Into<String>) -> Self {
        self.default_stack_name = name.into();
        self
    }

    /// Platform data directory, falling back to the working directory
    pub fn default_storage_dir() -> PathBuf {
        match dirs::data_local_dir() {
            Some(dir) => dir.join("looseleaf"),
            None => PathBuf::from(".looseleaf"),
        }
    }

    /// Defaults overridden by any environment variables that are set
    ///
    /// # Errors
    /// Returns an error if a variable holds a value that cannot be used.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var(STORAGE_DIR_VAR) {
            if val.is_empty() {
                return Err(ConfigError::InvalidValue { key: STORAGE_DIR_VAR, value: val });
            }
            config.storage_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(THUMBNAIL_MAX_DIM_VAR) {
            config.thumbnail_max_dimension = match val.parse::<u32>() {
                Ok(pixels) if pixels > 0 => pixels,
                _ => return Err(ConfigError::InvalidValue { key: THUMBNAIL_MAX_DIM_VAR, value: val }),
            };
        }

        Ok(config)
    }

    /// Directory holding the assets of one page
    pub fn page_dir(&self, page_id: &PageId) -> PathBuf {
        self.storage_dir.join("pages").join(page_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(STORAGE_DIR_VAR);
        std::env::remove_var(THUMBNAIL_MAX_DIM_VAR);
    }

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();

        assert_eq!(config.thumbnail_max_dimension, 1024);
        assert!(config.storage_dir.ends_with("looseleaf"));
    }

    #[test]
    fn test_builders() {
        let config = StackConfig::default()
            .with_storage_dir("/data/notes")
            .with_thumbnail_max_dimension(512)
            .with_default_stack_name("Inbox");

        assert_eq!(config.storage_dir, PathBuf::from("/data/notes"));
        assert_eq!(config.thumbnail_max_dimension, 512);
        assert_eq!(config.default_stack_name, "Inbox");
        assert_eq!(
            config.page_dir(&PageId::from("p1")),
            PathBuf::from("/data/notes/pages/p1")
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var(STORAGE_DIR_VAR, "/var/looseleaf");
        std::env::set_var(THUMBNAIL_MAX_DIM_VAR, "2048");

        let config = StackConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.storage_dir, PathBuf::from("/var/looseleaf"));
        assert_eq!(config.thumbnail_max_dimension, 2048);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_dimension() {
        clear_env();
        std::env::set_var(THUMBNAIL_MAX_DIM_VAR, "0");

        let result = StackConfig::from_env();
        clear_env();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: THUMBNAIL_MAX_DIM_VAR, .. })
        ));
    }
}
