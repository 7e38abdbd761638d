//! Build orchestration
//!
//! [`Builder`] turns a project configuration plus the chosen tools into a
//! [`BuildContext`], runs the staged pipeline over it and reports what was
//! produced.

use crate::artifacts::ArtifactSet;
use crate::cache::{ContentCache, SweepReport};
use crate::context::{BuildConfig, BuildContext, BuildStats};
use crate::error::{BuildError, BuildResult};
use crate::flags::FlagSettings;
use crate::options::BuildOptions;
use crate::pipeline::{Layer, Pipeline, PipelineReport};
use crate::registry::ToolRegistry;
use crate::stages::analyse::CodeGenerator;
use crate::stages::discover::PathFilter;
use crate::stages::fetch::{CommandFetcher, FolderFetcher, SourceSpec};
use crate::stages::BaseStages;
use crate::targets::LinkTarget;
use crate::tool::{Category, Tool};
use crate::toolbox::ToolBox;
use kiln_config::project::{FetchConfig, FlagsConfig};
use kiln_config::ProjectConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a successful build
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub name: String,
    /// Workspace directory name: `<name>-<profile>-<compiler>`
    pub label: String,
    pub profile: String,
    pub project_workspace: PathBuf,
    pub link_target: LinkTarget,
    pub outputs: Vec<PathBuf>,
    pub report: PipelineReport,
    pub stats: BuildStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swept: Option<SweepReport>,
}

/// Main builder for orchestrating builds
pub struct Builder {
    registry: Arc<ToolRegistry>,
    project: ProjectConfig,
    /// Directory holding kiln.toml; relative source paths start here
    project_root: PathBuf,
    options: BuildOptions,
    tool_box: ToolBox,
    profile: String,
    workspace: PathBuf,
    cache_dir: PathBuf,
    layers: Vec<Box<dyn Layer>>,
    sweep_cache: bool,
}

impl Builder {
    /// Create a builder for a project rooted at `project_root`
    pub fn new(
        registry: Arc<ToolRegistry>,
        project: ProjectConfig,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        let project_root = project_root.into();
        Self {
            registry,
            project,
            workspace: project_root.join("kiln-workspace"),
            cache_dir: project_root.join("kiln-workspace").join("_cache"),
            project_root,
            options: BuildOptions::new(),
            tool_box: ToolBox::new(),
            profile: String::new(),
            layers: Vec::new(),
            sweep_cache: false,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tool_box(mut self, tool_box: ToolBox) -> Self {
        self.tool_box = tool_box;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Directory every project workspace is created under
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Add a pipeline layer inside the ones already added
    pub fn with_layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Remove cache entries this build did not use once it succeeds
    pub fn with_sweep_cache(mut self, sweep: bool) -> Self {
        self.sweep_cache = sweep;
        self
    }

    /// Name of the compiler used in the workspace label
    fn compiler_name(&self) -> BuildResult<String> {
        let mpi = Some(self.options.mpi);
        self.tool_box
            .get_tool(Category::FortranCompiler, &self.registry, mpi)
            .or_else(|_| self.tool_box.get_tool(Category::CCompiler, &self.registry, mpi))
            .map(|tool| tool.name().to_string())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Tool for a fetcher or generator: a registered one, else an ad-hoc tool
    fn named_tool(&self, name: &str, categories: &[Category]) -> Arc<Tool> {
        categories
            .iter()
            .find_map(|category| self.registry.find(*category, name).ok())
            .unwrap_or_else(|| {
                debug!(tool = name, "using unregistered tool");
                Arc::new(Tool::new(name, Category::Misc))
            })
    }

    fn build_config(&self) -> BuildResult<BuildConfig> {
        let section = self.project.project.as_ref().ok_or_else(|| {
            BuildError::configuration("kiln.toml has no [project] section")
        })?;

        let label = BuildConfig::label(&section.name, &self.profile, &self.compiler_name()?);
        let nprocs = self
            .options
            .nprocs
            .or(self.project.nprocs())
            .unwrap_or_else(default_nprocs);

        let mut config = BuildConfig::new(&section.name, self.workspace.join(label))
            .with_profile(&self.profile)
            .with_nprocs(nprocs)
            .with_mpi(self.options.mpi)
            .with_openmp(self.options.openmp)
            .with_openacc(self.options.openacc)
            .with_host(self.options.host);
        if let Some(target) = &section.link_target {
            config = config.with_link_target(LinkTarget::from_str(target)?);
        }
        if let Some(symbol) = &section.root_symbol {
            config = config.with_root_symbol(symbol);
        }
        config.fflags = self.options.fflags.clone();
        config.cflags = self.options.cflags.clone();
        config.ldflags = self.options.ldflags.clone();
        Ok(config)
    }

    /// Build context for this project, ready for the pipeline
    pub fn build_context(&self) -> BuildResult<BuildContext> {
        let config = self.build_config()?;
        let cache = Arc::new(ContentCache::new(&self.cache_dir)?);
        let mut ctx = BuildContext::new(config, Arc::clone(&self.registry), cache);
        ctx.tool_box = self.tool_box.clone();

        for source in &self.project.sources {
            let mut spec = SourceSpec::new(&source.label);
            for fetch in &source.fetch {
                spec = match fetch {
                    FetchConfig::Folder { path } => {
                        spec.with_fetcher(FolderFetcher::new(self.resolve(path)))
                    }
                    FetchConfig::Command { tool, args } => spec.with_fetcher(CommandFetcher::new(
                        self.named_tool(tool, &[Category::Misc]),
                        args.clone(),
                    )),
                };
            }
            ctx.sources.push(spec);
        }

        ctx.filters = self
            .project
            .filters()
            .iter()
            .map(PathFilter::from_config)
            .collect();

        let settings = |flags: &Option<FlagsConfig>| {
            flags
                .as_ref()
                .map(FlagSettings::from_config)
                .unwrap_or_default()
        };
        ctx.preprocess_flags = settings(&self.project.preprocess);
        ctx.fortran_flags = settings(&self.project.fortran);
        ctx.c_flags = settings(&self.project.c);

        if let Some(link) = &self.project.link {
            ctx.link_flags = link.flags.clone();
            ctx.libraries = link.libraries.clone();
        }

        let build_output = ctx.build_output();
        ctx.generators = self
            .project
            .generators
            .iter()
            .map(|generator| {
                CodeGenerator::new(
                    &generator.name,
                    self.named_tool(&generator.tool, &[Category::Misc, Category::Shell]),
                    generator.args.clone(),
                    build_output.join(&generator.output_dir),
                )
            })
            .collect();

        ctx.options = self.options.extra.clone();
        Ok(ctx)
    }

    /// Run the pipeline
    pub fn build(self) -> BuildResult<BuildSummary> {
        let mut ctx = self.build_context()?;
        info!(
            project = %ctx.config.name,
            workspace = %ctx.config.project_workspace.display(),
            profile = %ctx.config.profile,
            openacc = ctx.config.openacc,
            host = %ctx.config.host,
            "building"
        );

        let Self {
            layers,
            sweep_cache,
            ..
        } = self;
        let mut pipeline = Pipeline::new(BaseStages);
        for layer in layers {
            pipeline.add_layer(layer);
        }

        let report = pipeline.run(&mut ctx)?;
        let swept = if sweep_cache {
            Some(ctx.cache().sweep()?)
        } else {
            None
        };

        let label = ctx
            .config
            .project_workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(BuildSummary {
            name: ctx.config.name.clone(),
            label,
            profile: ctx.config.profile.clone(),
            project_workspace: ctx.config.project_workspace.clone(),
            link_target: ctx.config.link_target,
            outputs: ctx.artifacts.get(&ArtifactSet::Executables),
            report,
            stats: ctx.stats.clone(),
            swept,
        })
    }
}

fn default_nprocs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
