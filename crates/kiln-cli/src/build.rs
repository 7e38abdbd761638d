//! Build command - resolve the site, set up tools and run the pipeline

use crate::cli::{self, Cli};
use crate::report;
use anyhow::{Context, Result};
use kiln_build::{Builder, SiteRegistry, SiteTarget, ToolRegistry};
use kiln_config::{Config, ConfigLoader, SiteFile};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Run kiln with the raw process arguments
pub fn run(args: &[String]) -> Result<()> {
    let args = &cli::normalize_args(args);
    let project = cli::peek_option(args, "project", None);
    let config = load_config(project.as_deref().map(Path::new))?;

    let target = SiteTarget::resolve(
        cli::peek_option(args, "site", Some('s')).as_deref(),
        cli::peek_option(args, "platform", Some('p')).as_deref(),
        &config.global,
    );
    let sites = site_registry()?;
    let mut site = sites.create(&target);
    let site_options = site.as_ref().map(|s| s.extra_options()).unwrap_or_default();

    let invocation = Cli::parse_with_site_options(args, &site_options)?;
    let cli = invocation.cli;
    let mut options = cli.build_options(&target, invocation.extra, &config);
    options.apply_env(|var| std::env::var(var).ok());
    debug!(?options, "build options");

    let mut registry = ToolRegistry::with_builtin_tools();
    options
        .prepare_registry(site.as_deref_mut(), &mut registry)
        .context("failed to apply site defaults")?;

    if cli.available_compilers {
        report::print_available(&registry);
        return Ok(());
    }

    let profile = options.resolve_profile(site.as_deref())?;
    let tool_box = options.configure_tool_box(&registry)?;

    let project_root = config
        .project_root()
        .map(Path::to_path_buf)
        .context("no kiln.toml found in this directory or any parent")?;
    info!(site = %target.id(), profile = %profile, "configured");

    let (workspace, cache_dir) = match &cli.workspace {
        Some(dir) => {
            let cache = config
                .project
                .cache_dir()
                .or_else(|| config.global.cache_dir())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.join("cache"));
            (dir.clone(), cache)
        }
        None => (config.workspace(), config.cache_dir()),
    };

    let summary = Builder::new(Arc::new(registry), config.project.clone(), project_root)
        .with_options(options)
        .with_tool_box(tool_box)
        .with_profile(profile)
        .with_workspace(workspace)
        .with_cache_dir(cache_dir)
        .with_sweep_cache(cli.clean_cache)
        .build()
        .context("build failed")?;

    if cli.json {
        report::print_json(&summary)?;
    } else if !cli.quiet {
        report::print_summary(&summary, cli.verbose);
    }
    Ok(())
}

fn load_config(project: Option<&Path>) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    let config = match project {
        Some(path) if path.is_file() => loader.load_from_file(path),
        Some(dir) => loader.load_from_directory(dir),
        None => loader.load_from_directory(&std::env::current_dir()?),
    };
    config.context("failed to load configuration")
}

/// Built-in sites plus any site files in ~/.kiln/sites
fn site_registry() -> Result<SiteRegistry> {
    let mut sites = SiteRegistry::builtin();
    match SiteFile::default_dir() {
        Ok(dir) => {
            let loaded = sites
                .load_dir(&dir)
                .with_context(|| format!("failed to load site files from {}", dir.display()))?;
            debug!(loaded, dir = %dir.display(), "site files");
        }
        Err(e) => debug!(error = %e, "no site directory"),
    }
    Ok(sites)
}
