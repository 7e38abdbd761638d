//! Global Configuration (~/.kiln/config.toml)
//!
//! Handles user-level configuration stored in `~/.kiln/config.toml`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.kiln/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Cache settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
}

/// Default settings applied to every build on this machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Site name used when neither --site nor $SITE is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Platform name used when neither --platform nor $PLATFORM is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Compiler suite (e.g. "gnu", "intel-classic")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,

    /// Worker count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nprocs: Option<usize>,

    /// Workspace directory holding build trees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

/// Shared cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Directory shared by all builds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = crate::read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(defaults) = &self.defaults {
            if defaults.nprocs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "defaults.nprocs".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            for (field, value) in [
                ("defaults.site", &defaults.site),
                ("defaults.platform", &defaults.platform),
                ("defaults.suite", &defaults.suite),
            ] {
                if matches!(value, Some(v) if v.trim().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: "cannot be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Get the global configuration file path (~/.kiln/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".kiln").join("config.toml"))
    }

    pub fn default_site(&self) -> Option<&str> {
        self.defaults.as_ref()?.site.as_deref()
    }

    pub fn default_platform(&self) -> Option<&str> {
        self.defaults.as_ref()?.platform.as_deref()
    }

    pub fn default_suite(&self) -> Option<&str> {
        self.defaults.as_ref()?.suite.as_deref()
    }

    pub fn default_nprocs(&self) -> Option<usize> {
        self.defaults.as_ref()?.nprocs
    }

    pub fn default_workspace(&self) -> Option<&Path> {
        self.defaults.as_ref()?.workspace.as_deref()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache.as_ref()?.dir.as_deref()
    }
}
