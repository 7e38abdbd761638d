//! Project Configuration (kiln.toml)
//!
//! Handles project-level configuration stored in `kiln.toml` at the project root.
//! A project lists the source repositories it is assembled from, the flags for
//! each tool stage and the code generators that run before analysis.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Link targets accepted in `[project] link_target`
pub const LINK_TARGETS: &[&str] = &["executable", "static-library", "shared-library"];

/// Project configuration from kiln.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSection>,

    /// Source repositories, fetched in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,

    /// Build settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    /// Preprocessor flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<FlagsConfig>,

    /// Fortran compiler flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fortran: Option<FlagsConfig>,

    /// C compiler flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<FlagsConfig>,

    /// Linker settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkConfig>,

    /// Code generators run during analysis
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generators: Vec<GeneratorConfig>,
}

/// `[project]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Project name, used in build labels and output file names
    pub name: String,

    /// One of "executable", "static-library", "shared-library"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,

    /// Program unit containing the entry point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_symbol: Option<String>,
}

/// One `[[sources]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Directory name under the source root
    pub label: String,

    /// Fetchers tried in order until one succeeds
    #[serde(default)]
    pub fetch: Vec<FetchConfig>,
}

/// A single way of obtaining a source tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FetchConfig {
    /// Copy a local directory
    Folder { path: PathBuf },

    /// Run an external tool; `$dest` in the arguments is replaced by the destination
    Command {
        tool: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Path filter applied during discovery; the last matching filter wins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterConfig {
    Include(String),
    Exclude(String),
}

/// `[build]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nprocs: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterConfig>,
}

/// Common flags plus ordered path rules for one tool stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FlagsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_flags: Vec<PathFlagConfig>,
}

/// One `[[<stage>.path_flags]]` rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PathFlagConfig {
    pub pattern: String,
    pub flags: Vec<String>,
    #[serde(default)]
    pub exclusive: bool,
}

/// `[link]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    /// Library names resolved through the linker's library table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,
}

/// One `[[generators]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    pub name: String,
    pub tool: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory, relative to the build output, where generated files appear
    pub output_dir: PathBuf,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = crate::read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(project) = &self.project {
            if project.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "project.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
            if let Some(target) = &project.link_target {
                if !LINK_TARGETS.contains(&target.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: "project.link_target".to_string(),
                        reason: format!(
                            "'{}' is not one of {}",
                            target,
                            LINK_TARGETS.join(", ")
                        ),
                    });
                }
            }
        }

        let mut labels = std::collections::HashSet::new();
        for source in &self.sources {
            if source.label.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sources.label".to_string(),
                    reason: "label cannot be empty".to_string(),
                });
            }
            if !labels.insert(source.label.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate source label '{}'",
                    source.label
                )));
            }
            if source.fetch.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "source '{}' has no fetchers",
                    source.label
                )));
            }
        }

        if let Some(build) = &self.build {
            if build.nprocs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "build.nprocs".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        for (section, flags) in [
            ("preprocess", &self.preprocess),
            ("fortran", &self.fortran),
            ("c", &self.c),
        ] {
            if let Some(flags) = flags {
                if flags.path_flags.iter().any(|r| r.pattern.is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.path_flags.pattern", section),
                        reason: "pattern cannot be empty".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the project name
    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.name.as_str())
    }

    /// Get the configured profile
    pub fn profile(&self) -> Option<&str> {
        self.build.as_ref()?.profile.as_deref()
    }

    pub fn nprocs(&self) -> Option<usize> {
        self.build.as_ref()?.nprocs
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.build.as_ref()?.workspace.as_deref()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.build.as_ref()?.cache_dir.as_deref()
    }

    pub fn filters(&self) -> &[FilterConfig] {
        self.build.as_ref().map(|b| b.filters.as_slice()).unwrap_or(&[])
    }
}
