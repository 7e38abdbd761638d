//! Tools: compilers, linkers, preprocessors and helpers run by the build
//!
//! A [`Tool`] has an immutable identity (name, executable, category, suite)
//! and mutable flag state (profiles, linker library tables) behind interior
//! locks, so a registry can hand out shared `Arc<Tool>` handles.

use crate::error::{BuildError, BuildResult};
use crate::profile::ProfileTree;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Tool category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    CCompiler,
    FortranCompiler,
    Linker,
    Shell,
    Misc,
    CPreprocessor,
    FortranPreprocessor,
    Archiver,
}

impl Category {
    /// Every category, in display order
    pub const ALL: [Category; 8] = [
        Category::CCompiler,
        Category::FortranCompiler,
        Category::Linker,
        Category::Shell,
        Category::Misc,
        Category::CPreprocessor,
        Category::FortranPreprocessor,
        Category::Archiver,
    ];

    /// Parse category from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> BuildResult<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| BuildError::configuration(format!("unknown tool category '{}'", s)))
    }

    /// Get category name
    pub fn name(&self) -> &'static str {
        match self {
            Self::CCompiler => "c-compiler",
            Self::FortranCompiler => "fortran-compiler",
            Self::Linker => "linker",
            Self::Shell => "shell",
            Self::Misc => "misc",
            Self::CPreprocessor => "c-preprocessor",
            Self::FortranPreprocessor => "fortran-preprocessor",
            Self::Archiver => "archiver",
        }
    }

    /// C and Fortran compilers
    pub fn is_compiler(&self) -> bool {
        matches!(self, Self::CCompiler | Self::FortranCompiler)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How availability of a tool is determined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Run the executable with these arguments; exit status 0 means available
    Run(Vec<String>),
    /// Skip probing
    Assume(bool),
}

impl Default for Probe {
    fn default() -> Self {
        Self::Run(vec!["--version".to_string()])
    }
}

#[derive(Debug, Default)]
struct LinkerFlags {
    libraries: HashMap<String, Vec<String>>,
    post_libraries: Vec<String>,
}

/// A tool known to the registry
#[derive(Debug)]
pub struct Tool {
    name: String,
    exec_name: String,
    base_args: Vec<String>,
    category: Category,
    suite: Option<String>,
    mpi: bool,
    openmp_flag: Option<String>,
    openacc_flag: Option<String>,
    probe: Probe,
    wrapped: Option<Arc<Tool>>,
    availability: OnceLock<bool>,
    profiles: RwLock<ProfileTree>,
    linker_flags: RwLock<LinkerFlags>,
}

impl Tool {
    /// Create a new tool whose executable has the same name
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        let name = name.into();
        Self {
            exec_name: name.clone(),
            base_args: Vec::new(),
            category,
            suite: None,
            mpi: false,
            openmp_flag: None,
            openacc_flag: None,
            probe: Probe::default(),
            wrapped: None,
            availability: OnceLock::new(),
            profiles: RwLock::new(ProfileTree::new(name.clone())),
            linker_flags: RwLock::new(LinkerFlags::default()),
            name,
        }
    }

    /// Set the executable
    pub fn with_exec(mut self, exec_name: impl Into<String>) -> Self {
        self.exec_name = exec_name.into();
        self
    }

    /// Arguments always passed before any others
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the compiler suite
    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self
    }

    /// Mark the tool as MPI-capable
    pub fn with_mpi(mut self, mpi: bool) -> Self {
        self.mpi = mpi;
        self
    }

    /// Set the flag that enables OpenMP
    pub fn with_openmp_flag(mut self, flag: impl Into<String>) -> Self {
        self.openmp_flag = Some(flag.into());
        self
    }

    /// Set the flag that enables OpenACC
    pub fn with_openacc_flag(mut self, flag: impl Into<String>) -> Self {
        self.openacc_flag = Some(flag.into());
        self
    }

    /// Set the availability probe
    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    /// Make this tool a wrapper around another one
    pub fn wrapping(mut self, tool: Arc<Tool>) -> Self {
        self.wrapped = Some(tool);
        self
    }

    /// Derive the linker that links with `compiler` (`linker-<compiler>`)
    pub fn linker_for(compiler: &Arc<Tool>) -> Self {
        let mut linker = Tool::new(format!("linker-{}", compiler.name), Category::Linker)
            .with_exec(compiler.exec_name.clone())
            .with_args(compiler.base_args.clone())
            .with_mpi(compiler.mpi)
            .with_probe(compiler.probe.clone())
            .wrapping(Arc::clone(compiler));
        linker.suite = compiler.suite.clone();
        linker.openmp_flag = compiler.openmp_flag.clone();
        linker.openacc_flag = compiler.openacc_flag.clone();
        linker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exec_name(&self) -> &str {
        &self.exec_name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Suite of this tool, or of the tool it wraps
    pub fn suite(&self) -> Option<&str> {
        self.suite
            .as_deref()
            .or_else(|| self.wrapped.as_ref().and_then(|w| w.suite()))
    }

    pub fn is_mpi(&self) -> bool {
        self.mpi
    }

    /// OpenMP flag of this tool, or of the tool it wraps
    pub fn openmp_flag(&self) -> Option<&str> {
        self.openmp_flag
            .as_deref()
            .or_else(|| self.wrapped.as_ref().and_then(|w| w.openmp_flag()))
    }

    /// OpenACC flag of this tool, or of the tool it wraps
    pub fn openacc_flag(&self) -> Option<&str> {
        self.openacc_flag
            .as_deref()
            .or_else(|| self.wrapped.as_ref().and_then(|w| w.openacc_flag()))
    }

    pub fn wrapped(&self) -> Option<&Arc<Tool>> {
        self.wrapped.as_ref()
    }

    /// Probe the tool once; later calls return the cached answer
    pub fn is_available(&self) -> bool {
        *self.availability.get_or_init(|| {
            let available = match &self.probe {
                Probe::Assume(value) => *value,
                Probe::Run(args) => Command::new(&self.exec_name)
                    .args(&self.base_args)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map(|status| status.success())
                    .unwrap_or(false),
            };
            debug!(tool = %self.name, available, "probed tool");
            available
        })
    }

    /// Define a profile in this tool's tree
    pub fn define_profile(&self, name: &str, parent: &str) -> BuildResult<()> {
        self.profiles.write().define(name, parent)
    }

    /// Append flags to one profile
    pub fn add_flags<I, S>(&self, profile: &str, flags: I) -> BuildResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles.write().add_flags(profile, flags)
    }

    /// Effective flags for a profile
    pub fn flags(&self, profile: &str) -> BuildResult<Vec<String>> {
        self.profiles.write().resolve(profile)
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.read().contains(profile)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.read().names().map(str::to_string).collect()
    }

    /// Set the flags needed to link against a named library
    pub fn add_lib_flags<I, S>(&self, library: &str, flags: I, silent_replace: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = self.linker_flags.write();
        let flags: Vec<String> = flags.into_iter().map(Into::into).collect();
        if table.libraries.insert(library.to_string(), flags).is_some() && !silent_replace {
            warn!(linker = %self.name, library, "replacing existing library flags");
        }
    }

    /// Flags for a named library
    pub fn lib_flags(&self, library: &str) -> BuildResult<Vec<String>> {
        self.linker_flags
            .read()
            .libraries
            .get(library)
            .cloned()
            .ok_or_else(|| BuildError::UnknownLibrary {
                linker: self.name.clone(),
                library: library.to_string(),
            })
    }

    /// Append flags placed after all libraries on the link line
    pub fn add_post_lib_flags<I, S>(&self, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linker_flags
            .write()
            .post_libraries
            .extend(flags.into_iter().map(Into::into));
    }

    pub fn post_lib_flags(&self) -> Vec<String> {
        self.linker_flags.read().post_libraries.clone()
    }

    /// Run the tool and return its standard output
    pub fn run<S: AsRef<str>>(
        &self,
        args: &[S],
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> BuildResult<String> {
        let mut command = Command::new(&self.exec_name);
        command
            .args(&self.base_args)
            .args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        debug!(
            tool = %self.name,
            "{} {}",
            self.exec_name,
            args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
        );

        let output = command.output().map_err(|error| BuildError::ToolLaunch {
            tool: self.name.clone(),
            error,
        })?;

        if !output.status.success() {
            return Err(BuildError::ToolFailed {
                tool: self.name.clone(),
                status: output.status.code().unwrap_or(1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}: {}", self.category, self.name, self.exec_name)
    }
}
