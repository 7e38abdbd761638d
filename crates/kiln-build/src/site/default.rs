//! The built-in `default` site
//!
//! Defines a hidden `base` profile plus the standard profiles for every
//! compiler and linker, then the GNU and Intel classic flag sets and linker
//! library tables.

use crate::error::BuildResult;
use crate::profile::{DEFAULT_PROFILES, ROOT_PROFILE};
use crate::registry::ToolRegistry;
use crate::site::SiteConfig;
use crate::tool::{Category, Tool};
use std::sync::Arc;
use tracing::{debug, info};

/// Profile every selectable profile inherits from
pub const BASE_PROFILE: &str = "base";

/// Default site configuration
#[derive(Debug, Clone)]
pub struct DefaultSite {
    profiles: Vec<String>,
}

impl DefaultSite {
    pub fn new() -> Self {
        Self {
            profiles: DEFAULT_PROFILES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Default for DefaultSite {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteConfig for DefaultSite {
    fn name(&self) -> &str {
        "default"
    }

    fn valid_profile_names(&self) -> Vec<String> {
        self.profiles.clone()
    }

    fn apply_defaults(&self, registry: &mut ToolRegistry) -> BuildResult<()> {
        define_profiles(registry, &self.profiles)?;
        setup_intel_classic(registry)?;
        setup_gnu(registry)?;
        Ok(())
    }
}

/// Define `base` under the root and `profiles` under `base` for every
/// compiler and linker, whether or not it is available
///
/// Profiles that already exist are left alone.
pub fn define_profiles(registry: &ToolRegistry, profiles: &[String]) -> BuildResult<()> {
    for category in [Category::CCompiler, Category::FortranCompiler, Category::Linker] {
        for tool in registry.tools(category) {
            define_tool_profiles(tool, profiles)?;
        }
    }
    Ok(())
}

pub(crate) fn define_tool_profiles(tool: &Tool, profiles: &[String]) -> BuildResult<()> {
    if !tool.has_profile(BASE_PROFILE) {
        tool.define_profile(BASE_PROFILE, ROOT_PROFILE)?;
    }
    for profile in profiles {
        if !tool.has_profile(profile) {
            tool.define_profile(profile, BASE_PROFILE)?;
        }
    }
    Ok(())
}

/// `primary` if available, else its MPI wrapper, else nothing
fn usable_compiler(registry: &ToolRegistry, primary: &str, wrapper: &str) -> Option<Arc<Tool>> {
    [primary, wrapper]
        .into_iter()
        .filter_map(|name| registry.get(Category::FortranCompiler, name).ok())
        .find(|tool| tool.is_available())
}

fn setup_intel_classic(registry: &ToolRegistry) -> BuildResult<()> {
    let Some(ifort) = usable_compiler(registry, "ifort", "mpif90-ifort") else {
        debug!("no Intel classic Fortran compiler available");
        return Ok(());
    };

    ifort.add_flags(BASE_PROFILE, ["-stand", "f08"])?;
    ifort.add_flags(BASE_PROFILE, ["-g", "-traceback"])?;
    ifort.add_flags(BASE_PROFILE, ["-warn", "all"])?;
    ifort.add_flags(BASE_PROFILE, ["-gen-interfaces", "nosource"])?;

    ifort.add_flags("full-debug", ["-check", "all", "-fpe0"])?;
    ifort.add_flags("full-debug", ["-O0", "-ftrapuv"])?;
    ifort.add_flags("fast-debug", ["-O2", "-fp-model=strict"])?;
    ifort.add_flags("production", ["-O3", "-xhost"])?;

    setup_linker_libraries(registry, &ifort)?;
    info!(compiler = %ifort.name(), "Intel classic flags set");
    Ok(())
}

fn setup_gnu(registry: &ToolRegistry) -> BuildResult<()> {
    let Some(gfortran) = usable_compiler(registry, "gfortran", "mpif90-gfortran") else {
        debug!("no GNU Fortran compiler available");
        return Ok(());
    };

    gfortran.add_flags(
        BASE_PROFILE,
        [
            "-ffree-line-length-none",
            "-Wall",
            "-g",
            "-Werror=conversion",
            "-Werror=character-truncation",
            "-Werror=unused-value",
            "-Werror=tabs",
            "-std=f2008",
            "-fdefault-real-8",
            "-fdefault-double-8",
        ],
    )?;

    let runtime = ["-fcheck=all", "-ffpe-trap=invalid,zero,overflow"];
    let init = [
        "-finit-integer=31173",
        "-finit-real=snan",
        "-finit-logical=true",
        "-finit-character=85",
    ];

    gfortran.add_flags("full-debug", runtime)?;
    gfortran.add_flags("full-debug", ["-O0"])?;
    gfortran.add_flags("full-debug", init)?;

    gfortran.add_flags("fast-debug", runtime)?;
    gfortran.add_flags("fast-debug", ["-Og"])?;

    gfortran.add_flags("production", ["-Ofast"])?;

    gfortran.add_flags("unit-tests", runtime)?;
    gfortran.add_flags("unit-tests", ["-O0"])?;
    gfortran.add_flags("unit-tests", init)?;

    setup_linker_libraries(registry, &gfortran)?;
    info!(compiler = %gfortran.name(), "GNU flags set");
    Ok(())
}

/// NetCDF flags as reported by `nf-config`; empty when it cannot be run
fn netcdf_flags(registry: &ToolRegistry) -> Vec<String> {
    let Ok(shell) = registry.get_default(Category::Shell) else {
        return Vec::new();
    };
    match shell.run(&["-c", "nf-config --flibs"], None, &[]) {
        Ok(output) => output.split_whitespace().map(str::to_string).collect(),
        Err(error) => {
            debug!(%error, "nf-config unavailable, netcdf needs no flags");
            Vec::new()
        }
    }
}

fn setup_linker_libraries(registry: &ToolRegistry, compiler: &Tool) -> BuildResult<()> {
    let linker = registry.get(Category::Linker, &format!("linker-{}", compiler.name()))?;

    linker.add_lib_flags("netcdf", netcdf_flags(registry), false);
    linker.add_lib_flags("yaxt", ["-lyaxt", "-lyaxt_c"], false);
    linker.add_lib_flags("xios", ["-lxios"], false);
    linker.add_lib_flags("hdf5", ["-lhdf5"], false);
    linker.add_post_lib_flags(["-lstdc++"]);
    Ok(())
}
