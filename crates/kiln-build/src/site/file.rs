//! Site configuration read from a TOML site file

use crate::error::BuildResult;
use crate::profile::DEFAULT_PROFILES;
use crate::registry::ToolRegistry;
use crate::site::default::{define_tool_profiles, DefaultSite};
use crate::site::{SiteConfig, SiteOption};
use crate::tool::{Category, Probe, Tool};
use kiln_config::SiteFile;
use tracing::{debug, info};

/// A site described by a [`SiteFile`]
#[derive(Debug, Clone)]
pub struct FileSite {
    id: String,
    file: SiteFile,
}

impl FileSite {
    pub fn new(id: impl Into<String>, file: SiteFile) -> Self {
        Self {
            id: id.into(),
            file,
        }
    }

    fn register_tools(&self, registry: &mut ToolRegistry) -> BuildResult<()> {
        let profiles = self.valid_profile_names();

        for config in &self.file.tools {
            let category = Category::from_str(&config.category)?;
            let mut tool = Tool::new(&config.name, category).with_mpi(config.mpi);
            if let Some(exec) = &config.exec {
                tool = tool.with_exec(exec);
            }
            if let Some(suite) = &config.suite {
                tool = tool.with_suite(suite);
            }
            if let Some(flag) = &config.openmp_flag {
                tool = tool.with_openmp_flag(flag);
            }
            if let Some(flag) = &config.openacc_flag {
                tool = tool.with_openacc_flag(flag);
            }
            if category == Category::Shell {
                tool = tool.with_probe(Probe::Run(vec!["-c".to_string(), "true".to_string()]));
            }
            if let Some(wrapped) = &config.wraps {
                tool = tool.wrapping(registry.get(category, wrapped)?);
            }

            let tool = registry.register(tool)?;
            if category.is_compiler() {
                define_tool_profiles(&tool, &profiles)?;
                let linker = registry.get(Category::Linker, &format!("linker-{}", tool.name()))?;
                define_tool_profiles(&linker, &profiles)?;
            }
            debug!(site = %self.id, tool = %tool.name(), "registered site tool");
        }
        Ok(())
    }

    fn apply_profiles(&self, registry: &ToolRegistry) -> BuildResult<()> {
        for config in &self.file.profiles {
            let tool = registry.get(Category::from_str(&config.category)?, &config.tool)?;
            if !tool.has_profile(&config.profile) {
                tool.define_profile(&config.profile, &config.parent)?;
            }
            tool.add_flags(&config.profile, config.flags.iter().cloned())?;
        }
        Ok(())
    }

    fn apply_libraries(&self, registry: &ToolRegistry) -> BuildResult<()> {
        for config in &self.file.libraries {
            let linker = registry.get(Category::Linker, &config.linker)?;
            if config.post {
                linker.add_post_lib_flags(config.flags.iter().cloned());
            } else {
                linker.add_lib_flags(&config.name, config.flags.iter().cloned(), false);
            }
        }
        Ok(())
    }
}

impl SiteConfig for FileSite {
    fn name(&self) -> &str {
        &self.id
    }

    fn valid_profile_names(&self) -> Vec<String> {
        if self.file.valid_profiles.is_empty() && self.file.inherit_defaults {
            DEFAULT_PROFILES.iter().map(|p| p.to_string()).collect()
        } else {
            self.file.valid_profiles.clone()
        }
    }

    fn extra_options(&self) -> Vec<SiteOption> {
        self.file
            .options
            .iter()
            .map(|option| SiteOption {
                name: option.name.clone(),
                help: option.help.clone(),
                default: option.default.clone(),
            })
            .collect()
    }

    fn apply_defaults(&self, registry: &mut ToolRegistry) -> BuildResult<()> {
        if self.file.inherit_defaults {
            DefaultSite::new().apply_defaults(registry)?;
        }
        crate::site::default::define_profiles(registry, &self.valid_profile_names())?;

        self.register_tools(registry)?;
        self.apply_profiles(registry)?;
        self.apply_libraries(registry)?;

        if let Some(suite) = &self.file.suite {
            registry.set_default_suite(suite)?;
            info!(site = %self.id, suite = %suite, "site default suite");
        }
        Ok(())
    }
}
