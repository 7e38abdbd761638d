//! Kiln Configuration System
//!
//! Provides configuration management for kiln builds including:
//! - Project configuration (kiln.toml)
//! - Global user configuration (~/.kiln/config.toml)
//! - Site configuration files (~/.kiln/sites/<target>.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.kiln/config.toml)
//! 2. Project config (./kiln.toml)
//! 3. Environment variables (KILN_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use kiln_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! ```

pub mod global;
pub mod loader;
pub mod project;
pub mod site;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Read and parse a TOML file, mapping errors the same way for every config kind
pub(crate) fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
        file: path.to_path_buf(),
        error: e,
    })
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::ProjectConfig;
pub use site::SiteFile;
