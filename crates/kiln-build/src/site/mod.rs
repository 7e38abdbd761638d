//! Site and platform configuration
//!
//! A site target (`<site>_<platform>`, or `default`) selects a
//! [`SiteConfig`] from a [`SiteRegistry`]. Sites set compiler defaults,
//! name the valid profiles and may declare extra command line options.

pub mod default;
pub mod file;

use crate::error::{BuildError, BuildResult};
use crate::options::BuildOptions;
use crate::registry::ToolRegistry;
use kiln_config::{GlobalConfig, SiteFile};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub use default::DefaultSite;
pub use file::FileSite;

const DEFAULT: &str = "default";

/// Site and platform the build runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteTarget {
    pub site: String,
    pub platform: String,
}

impl SiteTarget {
    pub fn new(site: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            platform: platform.into(),
        }
    }

    /// Flag, else `$SITE`/`$PLATFORM`, else the global config, else `default`
    pub fn resolve(site: Option<&str>, platform: Option<&str>, global: &GlobalConfig) -> Self {
        Self::resolve_with(site, platform, global, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(
        site: Option<&str>,
        platform: Option<&str>,
        global: &GlobalConfig,
        env: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |flag: Option<&str>, var: &str, configured: Option<&str>| {
            flag.map(str::to_string)
                .or_else(|| env(var).filter(|v| !v.is_empty()))
                .or_else(|| configured.map(str::to_string))
                .unwrap_or_else(|| DEFAULT.to_string())
        };
        Self {
            site: pick(site, "SITE", global.default_site()),
            platform: pick(platform, "PLATFORM", global.default_platform()),
        }
    }

    /// Registry key: `default` when both parts are default
    pub fn id(&self) -> String {
        if self.site == DEFAULT && self.platform == DEFAULT {
            DEFAULT.to_string()
        } else {
            format!("{}_{}", self.site, self.platform)
        }
    }
}

impl fmt::Display for SiteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Extra command line option declared by a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOption {
    pub name: String,
    pub help: String,
    pub default: Option<String>,
}

/// Site-specific configuration
pub trait SiteConfig: Send {
    fn name(&self) -> &str;

    /// Profiles users may select; the first is the default
    fn valid_profile_names(&self) -> Vec<String>;

    /// Options added to the command line
    fn extra_options(&self) -> Vec<SiteOption> {
        Vec::new()
    }

    /// Called once the full command line has been parsed
    fn on_options_parsed(&mut self, options: &BuildOptions) -> BuildResult<()> {
        let _ = options;
        Ok(())
    }

    /// Define profiles, flags and defaults in the registry
    fn apply_defaults(&self, registry: &mut ToolRegistry) -> BuildResult<()>;
}

type SiteFactory = Box<dyn Fn() -> Box<dyn SiteConfig> + Send + Sync>;

/// Site configurations by target id
#[derive(Default)]
pub struct SiteRegistry {
    factories: BTreeMap<String, SiteFactory>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `default` site
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT, || Box::new(DefaultSite::new()));
        registry
    }

    /// Register a site; a later registration for the same id replaces it
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SiteConfig> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.factories.insert(id.clone(), Box::new(factory)).is_some() {
            debug!(site = %id, "replacing site configuration");
        }
    }

    /// Register every `<target>.toml` site file in `dir`
    pub fn load_dir(&mut self, dir: &Path) -> BuildResult<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut loaded = 0;
        let entries = fs::read_dir(dir).map_err(|e| BuildError::io(dir, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let file = SiteFile::load_from_file(&path)?;
            let site_id = id.clone();
            self.register(id, move || Box::new(FileSite::new(site_id.clone(), file.clone())));
            debug!(path = %path.display(), "loaded site file");
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Site for a target; a missing one is logged and yields `None`
    pub fn create(&self, target: &SiteTarget) -> Option<Box<dyn SiteConfig>> {
        let id = target.id();
        match self.factories.get(&id) {
            Some(factory) => Some(factory()),
            None => {
                warn!(site = %id, "no site configuration found, using no site defaults");
                None
            }
        }
    }

    /// Registered target ids, sorted
    pub fn targets(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
