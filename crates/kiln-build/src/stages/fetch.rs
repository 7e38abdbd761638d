//! Source acquisition
//!
//! Every source has a chain of fetchers tried in order. A failed attempt is
//! logged and its partial output removed before the next one runs.

use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::tool::Tool;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Something that can place a source tree at `dest`
pub trait SourceFetcher: Send + Sync + fmt::Debug {
    /// Short description used in logs and errors
    fn describe(&self) -> String;

    fn fetch(&self, dest: &Path) -> BuildResult<()>;
}

/// Copies a local directory tree
#[derive(Debug, Clone)]
pub struct FolderFetcher {
    pub path: PathBuf,
}

impl FolderFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceFetcher for FolderFetcher {
    fn describe(&self) -> String {
        format!("folder {}", self.path.display())
    }

    fn fetch(&self, dest: &Path) -> BuildResult<()> {
        if !self.path.is_dir() {
            return Err(BuildError::io(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source folder not found"),
            ));
        }

        for entry in WalkDir::new(&self.path).into_iter().filter_map(|e| e.ok()) {
            let relative = match entry.path().strip_prefix(&self.path) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|e| BuildError::io(&target, e))?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).map_err(|e| BuildError::io(entry.path(), e))?;
            }
        }
        Ok(())
    }
}

/// Runs an external tool (git, fcm, svn, ...); `$dest` in the arguments is
/// replaced by the destination directory
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    pub tool: Arc<Tool>,
    pub args: Vec<String>,
}

impl CommandFetcher {
    pub fn new(tool: Arc<Tool>, args: Vec<String>) -> Self {
        Self { tool, args }
    }
}

impl SourceFetcher for CommandFetcher {
    fn describe(&self) -> String {
        format!("{} {}", self.tool.exec_name(), self.args.join(" "))
    }

    fn fetch(&self, dest: &Path) -> BuildResult<()> {
        let dest_str = dest.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("$dest", &dest_str))
            .collect();
        self.tool.run(&args, None, &[])?;

        if !dest.exists() {
            return Err(BuildError::io(
                dest,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} did not create the destination", self.tool.name()),
                ),
            ));
        }
        Ok(())
    }
}

/// A source tree and the ways to obtain it
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Directory name under the source root
    pub label: String,
    pub fetchers: Vec<Arc<dyn SourceFetcher>>,
}

impl SourceSpec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fetchers: Vec::new(),
        }
    }

    /// Add a fetcher at the end of the fallback chain
    pub fn with_fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetchers.push(Arc::new(fetcher));
        self
    }

    /// Try each fetcher in turn until one succeeds
    pub fn fetch_into(&self, source_root: &Path) -> BuildResult<PathBuf> {
        let dest = source_root.join(&self.label);
        let mut attempts = Vec::new();

        for fetcher in &self.fetchers {
            clear(&dest)?;
            match fetcher.fetch(&dest) {
                Ok(()) => {
                    info!(source = %self.label, "fetched from {}", fetcher.describe());
                    return Ok(dest);
                }
                Err(error) => {
                    warn!(source = %self.label, %error, "{} failed", fetcher.describe());
                    attempts.push(format!("{}: {}", fetcher.describe(), error));
                }
            }
        }

        clear(&dest)?;
        if attempts.is_empty() {
            attempts.push("no fetchers configured".to_string());
        }
        Err(BuildError::FetchFailed {
            label: self.label.clone(),
            attempts,
        })
    }
}

fn clear(dest: &Path) -> BuildResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|e| BuildError::io(dest, e))?;
    }
    Ok(())
}

/// Fetch every configured source into the source root
pub fn run(ctx: &mut BuildContext) -> BuildResult<()> {
    let source_root = ctx.source_root();
    fs::create_dir_all(&source_root).map_err(|e| BuildError::io(&source_root, e))?;

    for spec in &ctx.sources {
        spec.fetch_into(&source_root)?;
    }
    ctx.stats.sources_fetched = ctx.sources.len();
    Ok(())
}
