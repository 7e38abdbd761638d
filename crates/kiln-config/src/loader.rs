//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{BuildSection, ProjectConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project file name searched for in the start directory and its parents
pub const PROJECT_FILE: &str = "kiln.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.kiln/config.toml) - lowest priority
/// 2. Project config (./kiln.toml) - overrides global
/// 3. Environment variables (KILN_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where kiln.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.kiln/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find kiln.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognised: KILN_NPROCS, KILN_PROFILE, KILN_WORKSPACE, KILN_CACHE_DIR
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        let build = config.build.get_or_insert_with(BuildSection::default);

        if let Ok(nprocs) = env::var("KILN_NPROCS") {
            let parsed = nprocs
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "KILN_NPROCS".to_string(),
                    reason: format!("'{}' is not a positive integer", nprocs),
                })?;
            build.nprocs = Some(parsed);
        }

        if let Ok(profile) = env::var("KILN_PROFILE") {
            build.profile = Some(profile);
        }

        if let Ok(workspace) = env::var("KILN_WORKSPACE") {
            build.workspace = Some(PathBuf::from(workspace));
        }

        if let Ok(cache_dir) = env::var("KILN_CACHE_DIR") {
            build.cache_dir = Some(PathBuf::from(cache_dir));
        }

        if *build == BuildSection::default() {
            config.build = None;
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.kiln)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".kiln"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Get the project name
    pub fn project_name(&self) -> Option<&str> {
        self.project.project_name()
    }

    /// Check if this is a project (has kiln.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Effective worker count (project > global > 1)
    pub fn nprocs(&self) -> usize {
        self.project
            .nprocs()
            .or_else(|| self.global.default_nprocs())
            .unwrap_or(1)
    }

    /// Effective profile, if configured anywhere
    pub fn profile(&self) -> Option<&str> {
        self.project.profile()
    }

    /// Effective workspace (project > global > ~/kiln-workspace)
    pub fn workspace(&self) -> PathBuf {
        if let Some(dir) = self
            .project
            .workspace()
            .or_else(|| self.global.default_workspace())
        {
            return match (&self.project_root, dir.is_relative()) {
                (Some(root), true) => root.join(dir),
                _ => dir.to_path_buf(),
            };
        }
        dirs::home_dir()
            .map(|home| home.join("kiln-workspace"))
            .unwrap_or_else(|| PathBuf::from("kiln-workspace"))
    }

    /// Effective cache directory (project > global > <workspace>/cache)
    pub fn cache_dir(&self) -> PathBuf {
        self.project
            .cache_dir()
            .or_else(|| self.global.cache_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.workspace().join("cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn loader(temp: &TempDir) -> ConfigLoader {
        ConfigLoader::new().with_global_config_path(temp.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[project]\nname = \"gungho\"\n");

        let config = loader(&temp_dir)
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.project_name(), Some("gungho"));
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[project]\nname = \"parent\"\n");

        let sub_dir = temp_dir.path().join("src").join("physics");
        fs::create_dir_all(&sub_dir).unwrap();

        let config = loader(&temp_dir).load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.project_name(), Some("parent"));
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_global_then_project_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        fs::write(&global, "[defaults]\nnprocs = 2\nworkspace = \"/g/ws\"\n").unwrap();
        create_config_file(temp_dir.path(), "[build]\nnprocs = 6\n");

        let config = ConfigLoader::new()
            .with_global_config_path(&global)
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.nprocs(), 6);
        assert_eq!(config.workspace(), PathBuf::from("/g/ws"));
        assert_eq!(config.cache_dir(), PathBuf::from("/g/ws/cache"));
    }

    #[test]
    #[serial]
    fn test_env_override_nprocs() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[build]\nnprocs = 2\n");

        env::set_var("KILN_NPROCS", "12");
        let config = loader(&temp_dir).load_from_directory(temp_dir.path());
        env::remove_var("KILN_NPROCS");

        assert_eq!(config.unwrap().nprocs(), 12);
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_nprocs() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("KILN_NPROCS", "many");
        let result = loader(&temp_dir).load_from_directory(temp_dir.path());
        env::remove_var("KILN_NPROCS");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_relative_workspace_resolves_against_project_root() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[build]\nworkspace = \"ws\"\n");

        let config = loader(&temp_dir)
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.workspace(), temp_dir.path().join("ws"));
    }

    #[test]
    fn test_default_nprocs() {
        assert_eq!(Config::default().nprocs(), 1);
    }
}
