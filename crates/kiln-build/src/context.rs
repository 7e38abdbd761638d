//! Build configuration and the per-build context threaded through every stage

use crate::artifacts::ArtifactStore;
use crate::cache::{CacheStats, ContentCache};
use crate::error::BuildResult;
use crate::flags::{FlagSettings, TemplateVars};
use crate::pipeline::Stage;
use crate::registry::ToolRegistry;
use crate::stages::analyse::CodeGenerator;
use crate::stages::discover::PathFilter;
use crate::stages::fetch::SourceSpec;
use crate::targets::{Host, LinkTarget};
use crate::tool::{Category, Tool};
use crate::toolbox::ToolBox;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings fixed for the whole build
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Project name
    pub name: String,
    /// Program unit holding the entry point, for executables
    pub root_symbol: Option<String>,
    pub link_target: LinkTarget,
    /// Directory of this build: holds `source/` and `build_output/`
    pub project_workspace: PathBuf,
    pub profile: String,
    /// Worker count for per-file work
    pub nprocs: usize,
    pub mpi: bool,
    pub openmp: bool,
    pub openacc: bool,
    pub host: Host,
    /// Extra Fortran compiler flags from the command line
    pub fflags: Vec<String>,
    /// Extra C compiler flags from the command line
    pub cflags: Vec<String>,
    /// Extra linker flags from the command line
    pub ldflags: Vec<String>,
}

impl BuildConfig {
    /// Create a new build configuration
    pub fn new(name: impl Into<String>, project_workspace: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_symbol: None,
            link_target: LinkTarget::default(),
            project_workspace: project_workspace.into(),
            profile: String::new(),
            nprocs: 1,
            mpi: false,
            openmp: false,
            openacc: false,
            host: Host::default(),
            fflags: Vec::new(),
            cflags: Vec::new(),
            ldflags: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_nprocs(mut self, nprocs: usize) -> Self {
        self.nprocs = nprocs.max(1);
        self
    }

    pub fn with_mpi(mut self, mpi: bool) -> Self {
        self.mpi = mpi;
        self
    }

    pub fn with_openmp(mut self, openmp: bool) -> Self {
        self.openmp = openmp;
        self
    }

    pub fn with_openacc(mut self, openacc: bool) -> Self {
        self.openacc = openacc;
        self
    }

    pub fn with_host(mut self, host: Host) -> Self {
        self.host = host;
        self
    }

    pub fn with_link_target(mut self, target: LinkTarget) -> Self {
        self.link_target = target;
        self
    }

    pub fn with_root_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.root_symbol = Some(symbol.into());
        self
    }

    /// Where fetched sources are placed
    pub fn source_root(&self) -> PathBuf {
        self.project_workspace.join("source")
    }

    /// Where every generated file is written
    pub fn build_output(&self) -> PathBuf {
        self.project_workspace.join("build_output")
    }

    /// Workspace directory name for this project, profile and compiler
    pub fn label(name: &str, profile: &str, compiler: &str) -> String {
        if profile.is_empty() {
            format!("{}-{}", name, compiler)
        } else {
            format!("{}-{}-{}", name, profile, compiler)
        }
    }
}

/// Wall time spent in one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub seconds: f64,
}

/// Counters collected while the pipeline runs
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildStats {
    pub stages: Vec<StageTiming>,
    pub sources_fetched: usize,
    pub files_discovered: usize,
    pub files_preprocessed: usize,
    pub files_generated: usize,
    pub files_compiled: usize,
    pub cache: CacheStats,
}

/// Everything a stage can see and change during one build
pub struct BuildContext {
    pub config: BuildConfig,
    pub artifacts: ArtifactStore,
    pub tool_box: ToolBox,
    pub sources: Vec<SourceSpec>,
    pub filters: Vec<PathFilter>,
    pub generators: Vec<CodeGenerator>,
    pub preprocess_flags: FlagSettings,
    pub fortran_flags: FlagSettings,
    pub c_flags: FlagSettings,
    /// Flags added to every link line
    pub link_flags: Vec<String>,
    /// Library names looked up in the linker's library table
    pub libraries: Vec<String>,
    /// Fortran file to the files defining the modules it uses
    pub dependencies: BTreeMap<PathBuf, Vec<PathBuf>>,
    /// Site options after command line parsing, by name
    pub options: BTreeMap<String, String>,
    pub stats: BuildStats,
    registry: Arc<ToolRegistry>,
    cache: Arc<ContentCache>,
}

impl BuildContext {
    /// Create a new build context
    pub fn new(config: BuildConfig, registry: Arc<ToolRegistry>, cache: Arc<ContentCache>) -> Self {
        Self {
            config,
            artifacts: ArtifactStore::new(),
            tool_box: ToolBox::new(),
            sources: Vec::new(),
            filters: Vec::new(),
            generators: Vec::new(),
            preprocess_flags: FlagSettings::new(),
            fortran_flags: FlagSettings::new(),
            c_flags: FlagSettings::new(),
            link_flags: Vec::new(),
            libraries: Vec::new(),
            dependencies: BTreeMap::new(),
            options: BTreeMap::new(),
            stats: BuildStats::default(),
            registry,
            cache,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Tool for a category; compilers and linkers honour the MPI setting
    pub fn tool(&self, category: Category) -> BuildResult<Arc<Tool>> {
        let mpi = match category {
            Category::CCompiler | Category::FortranCompiler | Category::Linker => {
                Some(self.config.mpi)
            }
            _ => None,
        };
        self.tool_box.get_tool(category, &self.registry, mpi)
    }

    pub fn source_root(&self) -> PathBuf {
        self.config.source_root()
    }

    pub fn build_output(&self) -> PathBuf {
        self.config.build_output()
    }

    /// Variables for path flags
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars::new(self.source_root(), self.build_output())
    }

    /// Output path under `build_output` mirroring `input` under the source root
    pub fn output_path(&self, input: &Path, extension: &str) -> PathBuf {
        let source_root = self.source_root();
        let build_output = self.build_output();
        let relative = input
            .strip_prefix(&source_root)
            .or_else(|_| input.strip_prefix(&build_output))
            .unwrap_or(input);
        let relative = if relative.is_absolute() {
            Path::new(relative.file_name().unwrap_or(relative.as_os_str()))
        } else {
            relative
        };
        build_output.join(relative).with_extension(extension)
    }

    /// Object path for `input`; the source extension stays in the name, so
    /// `a.f90` and `a.c` in one directory give `a.f90.o` and `a.c.o`
    pub fn object_path(&self, input: &Path) -> PathBuf {
        match input.extension() {
            Some(ext) => self.output_path(input, &format!("{}.o", ext.to_string_lossy())),
            None => self.output_path(input, "o"),
        }
    }
}
