//! Site Configuration (~/.kiln/sites/<target>.toml)
//!
//! A site file describes one site/platform target: which profiles are valid,
//! which compiler suite to prefer, extra tools (e.g. compiler wrappers), flags
//! per tool and profile, and linker library tables.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Category names accepted in site files
pub const CATEGORY_NAMES: &[&str] = &[
    "c-compiler",
    "fortran-compiler",
    "linker",
    "shell",
    "misc",
    "c-preprocessor",
    "fortran-preprocessor",
    "archiver",
];

/// A parsed site file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SiteFile {
    /// Profiles accepted by --profile; the first one is the default
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_profiles: Vec<String>,

    /// Suite made default for every category that has it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,

    /// Apply the built-in default site before this file
    #[serde(default = "default_true")]
    pub inherit_defaults: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<SiteToolConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<SiteProfileConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<SiteLibraryConfig>,

    /// Extra command-line options this site understands
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SiteOptionConfig>,
}

fn default_true() -> bool {
    true
}

/// An extra tool registered by the site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SiteToolConfig {
    pub name: String,
    pub category: String,
    /// Executable; defaults to the tool name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    #[serde(default)]
    pub mpi: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openmp_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openacc_flag: Option<String>,
    /// Name of a registered tool of the same category this one wraps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wraps: Option<String>,
}

/// Flags for one tool profile; the profile is defined under `parent` if missing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SiteProfileConfig {
    pub tool: String,
    pub category: String,
    pub profile: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A named library in a linker's library table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SiteLibraryConfig {
    pub linker: String,
    pub name: String,
    pub flags: Vec<String>,
    /// Flags appended after all libraries instead of a named entry
    #[serde(default)]
    pub post: bool,
}

/// A site-declared command-line option (`--<name> <value>`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SiteOptionConfig {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl SiteFile {
    /// Load a site file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = crate::read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the site file
    pub fn validate(&self) -> ConfigResult<()> {
        for tool in &self.tools {
            check_category("tools.category", &tool.category)?;
            if tool.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "tools.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }
        for profile in &self.profiles {
            check_category("profiles.category", &profile.category)?;
            if profile.profile.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "profiles.profile".to_string(),
                    reason: "the root profile cannot be redefined".to_string(),
                });
            }
        }
        for option in &self.options {
            if option.name.is_empty() || option.name.starts_with('-') {
                return Err(ConfigError::InvalidValue {
                    field: "options.name".to_string(),
                    reason: format!("'{}' is not a valid option name", option.name),
                });
            }
        }
        Ok(())
    }

    /// Directory holding site files (~/.kiln/sites)
    pub fn default_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".kiln").join("sites"))
    }
}

fn check_category(field: &str, value: &str) -> ConfigResult<()> {
    if CATEGORY_NAMES.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("unknown category '{}'", value),
        })
    }
}
