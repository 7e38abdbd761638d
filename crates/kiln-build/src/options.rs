//! Build options from the command line and environment
//!
//! Setup runs in this order: resolve the site target, create the site,
//! parse the command line, `on_options_parsed`, `apply_defaults`, apply the
//! suite, then choose tools. [`BuildOptions`] carries the parsed values
//! through those steps.

use crate::error::{BuildError, BuildResult};
use crate::registry::ToolRegistry;
use crate::site::SiteConfig;
use crate::targets::Host;
use crate::tool::Category;
use crate::toolbox::ToolBox;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Everything the user chose for one build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    pub site: String,
    pub platform: String,
    pub profile: Option<String>,
    /// Compiler suite; when set, `$FC`/`$CC`/`$LD` are ignored
    pub suite: Option<String>,
    pub fc: Option<String>,
    pub cc: Option<String>,
    pub ld: Option<String>,
    pub fflags: Vec<String>,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub nprocs: Option<usize>,
    pub mpi: bool,
    pub openmp: bool,
    pub openacc: bool,
    /// Where OpenMP or OpenACC regions run
    pub host: Host,
    /// Values of site-declared options
    pub extra: BTreeMap<String, String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self {
            site: "default".to_string(),
            platform: "default".to_string(),
            mpi: true,
            openmp: true,
            ..Self::default()
        }
    }

    /// Fill `fc`, `cc` and `ld` from `$FC`, `$CC` and `$LD` when no suite is given
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.suite.is_some() {
            return;
        }
        for (var, slot) in [("FC", &mut self.fc), ("CC", &mut self.cc), ("LD", &mut self.ld)] {
            if slot.is_none() {
                if let Some(value) = env(var).filter(|v| !v.is_empty()) {
                    debug!(var, value = %value, "tool from environment");
                    *slot = Some(value);
                }
            }
        }
    }

    /// Profile to build with
    ///
    /// Without a site the empty profile is used. Otherwise the requested
    /// profile must be one of the site's, and the first one is the default.
    pub fn resolve_profile(&self, site: Option<&dyn SiteConfig>) -> BuildResult<String> {
        let Some(site) = site else {
            if let Some(profile) = &self.profile {
                warn!(profile = %profile, "no site configuration, ignoring profile");
            }
            return Ok(String::new());
        };

        let valid = site.valid_profile_names();
        match &self.profile {
            Some(profile) if valid.iter().any(|p| p == profile) => Ok(profile.clone()),
            Some(profile) => Err(BuildError::configuration(format!(
                "invalid profile '{}' for site '{}', expected one of: {}",
                profile,
                site.name(),
                valid.join(", ")
            ))),
            None => Ok(valid.first().cloned().unwrap_or_default()),
        }
    }

    /// Let the site see the options and set up the registry
    pub fn prepare_registry(
        &self,
        site: Option<&mut (dyn SiteConfig + '_)>,
        registry: &mut ToolRegistry,
    ) -> BuildResult<()> {
        if let Some(site) = site {
            site.on_options_parsed(self)?;
            site.apply_defaults(registry)?;
        }
        if let Some(suite) = &self.suite {
            registry.set_default_suite(suite)?;
            info!(suite = %suite, "default compiler suite");
        }
        Ok(())
    }

    /// Tool box holding the compilers and linker named by the options
    ///
    /// A name is matched against tool names first, then executable names.
    /// Without a linker choice the linker wrapping the chosen Fortran (else C)
    /// compiler is used.
    pub fn configure_tool_box(&self, registry: &ToolRegistry) -> BuildResult<ToolBox> {
        let mut tool_box = ToolBox::new();

        let fc = self
            .fc
            .as_deref()
            .map(|name| registry.find(Category::FortranCompiler, name))
            .transpose()?;
        let cc = self
            .cc
            .as_deref()
            .map(|name| registry.find(Category::CCompiler, name))
            .transpose()?;

        for tool in fc.iter().chain(cc.iter()) {
            tool_box.add_tool(tool.clone())?;
        }

        let linker = match (&self.ld, fc.as_ref().or(cc.as_ref())) {
            (Some(name), _) => Some(registry.find(Category::Linker, name)?),
            (None, Some(compiler)) => {
                Some(registry.get(Category::Linker, &format!("linker-{}", compiler.name()))?)
            }
            (None, None) => None,
        };
        if let Some(linker) = linker {
            tool_box.add_tool(linker)?;
        }

        for tool in tool_box.iter() {
            info!(category = %tool.category(), tool = %tool.name(), "selected");
        }
        Ok(tool_box)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::default::DefaultSite;
    use crate::tool::{Probe, Tool};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for (name, exec, category, mpi) in [
            ("gfortran", "gfortran", Category::FortranCompiler, false),
            ("mpif90-gfortran", "mpif90", Category::FortranCompiler, true),
            ("gcc", "gcc", Category::CCompiler, false),
        ] {
            registry
                .register(
                    Tool::new(name, category)
                        .with_exec(exec)
                        .with_suite("gnu")
                        .with_mpi(mpi)
                        .with_probe(Probe::Assume(true)),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_env_used_without_suite() {
        let mut options = BuildOptions::new();
        options.apply_env(env(&[("FC", "mpif90"), ("CC", "")]));
        assert_eq!(options.fc.as_deref(), Some("mpif90"));
        assert_eq!(options.cc, None);
    }

    #[test]
    fn test_env_ignored_with_suite() {
        let mut options = BuildOptions::new();
        options.suite = Some("gnu".to_string());
        options.apply_env(env(&[("FC", "ifort"), ("LD", "ld")]));
        assert_eq!(options.fc, None);
        assert_eq!(options.ld, None);
    }

    #[test]
    fn test_explicit_flag_beats_env() {
        let mut options = BuildOptions::new();
        options.fc = Some("gfortran".to_string());
        options.apply_env(env(&[("FC", "ifort")]));
        assert_eq!(options.fc.as_deref(), Some("gfortran"));
    }

    #[test]
    fn test_profile_resolution() {
        let site = DefaultSite::new();
        let mut options = BuildOptions::new();
        assert_eq!(options.resolve_profile(Some(&site)).unwrap(), "full-debug");

        options.profile = Some("production".to_string());
        assert_eq!(options.resolve_profile(Some(&site)).unwrap(), "production");
        assert_eq!(options.resolve_profile(None).unwrap(), "");

        options.profile = Some("turbo".to_string());
        let err = options.resolve_profile(Some(&site)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_tool_box_from_exec_name() {
        let registry = registry();
        let mut options = BuildOptions::new();
        options.fc = Some("mpif90".to_string());

        let tool_box = options.configure_tool_box(&registry).unwrap();
        assert_eq!(
            tool_box.get(Category::FortranCompiler).unwrap().name(),
            "mpif90-gfortran"
        );
        assert_eq!(
            tool_box.get(Category::Linker).unwrap().name(),
            "linker-mpif90-gfortran"
        );
        assert!(tool_box.get(Category::CCompiler).is_none());
    }

    #[test]
    fn test_unknown_compiler_is_configuration_error() {
        let registry = registry();
        let mut options = BuildOptions::new();
        options.cc = Some("tcc".to_string());
        let err = options.configure_tool_box(&registry).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_suite() {
        let mut registry = registry();
        let mut options = BuildOptions::new();
        options.suite = Some("cray".to_string());
        let err = options.prepare_registry(None, &mut registry).unwrap_err();
        assert!(matches!(err, BuildError::UnknownSuite(_)));
    }
}
