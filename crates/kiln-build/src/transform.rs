//! Cached per-file transformations
//!
//! A [`FileTransform`] turns one input file into one output file. Wrapped in
//! a [`CachedTransformMixin`] it runs over an artifact set across the worker
//! pool, through the content cache, before the stage it is attached to.

use crate::artifacts::ArtifactSet;
use crate::cache::TransformId;
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::pipeline::{Layer, Next, Stage};
use crate::pool::run_parallel;
use crate::tool::Tool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A deterministic file-to-file transformation
pub trait FileTransform: Send + Sync {
    /// Identity used in cache keys; must change whenever the output would
    fn id(&self) -> TransformId;

    fn apply(&self, input: &Path, output: &Path) -> BuildResult<()>;
}

/// Transformation performed by an external tool
///
/// `$input` and `$output` in the arguments are replaced per file.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    name: String,
    tool: Arc<Tool>,
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(name: impl Into<String>, tool: Arc<Tool>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tool,
            args,
        }
    }
}

impl FileTransform for CommandTransform {
    fn id(&self) -> TransformId {
        let mut parts = vec![self.tool.name().to_string(), self.tool.exec_name().to_string()];
        parts.extend(self.args.iter().cloned());
        TransformId::new(&self.name, &parts)
    }

    fn apply(&self, input: &Path, output: &Path) -> BuildResult<()> {
        let input_str = input.to_string_lossy();
        let output_str = output.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("$input", &input_str).replace("$output", &output_str))
            .collect();
        self.tool
            .run(&args, None, &[])
            .map(|_| ())
            .map_err(|e| BuildError::transformation(input, e))
    }
}

/// Layer running a cached transformation over one artifact set
///
/// Outputs land in `build_output/<name>/` mirroring the source layout and
/// replace the inputs in the set, so the wrapped stage sees the transformed
/// files.
pub struct CachedTransformMixin {
    name: String,
    stage: Stage,
    set: ArtifactSet,
    transform: Arc<dyn FileTransform>,
}

impl CachedTransformMixin {
    pub fn new(
        name: impl Into<String>,
        stage: Stage,
        set: ArtifactSet,
        transform: impl FileTransform + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            stage,
            set,
            transform: Arc::new(transform),
        }
    }

    fn output_for(&self, ctx: &BuildContext, input: &Path) -> PathBuf {
        let relative = input
            .strip_prefix(ctx.source_root())
            .or_else(|_| input.strip_prefix(ctx.build_output()))
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(input.file_name().unwrap_or(input.as_os_str())));
        ctx.build_output().join(&self.name).join(relative)
    }

    fn transform_set(&self, ctx: &mut BuildContext) -> BuildResult<()> {
        let inputs = ctx.artifacts.get(&self.set);
        if inputs.is_empty() {
            return Ok(());
        }

        let pairs: Vec<(PathBuf, PathBuf)> = inputs
            .into_iter()
            .map(|input| {
                let output = self.output_for(ctx, &input);
                (input, output)
            })
            .collect();

        let cache = Arc::clone(ctx.cache());
        let id = self.transform.id();
        let transform = &self.transform;
        run_parallel(
            &pairs,
            |(input, output)| {
                cache.get_or_transform(input, &id, output, |i, o| transform.apply(i, o))
            },
            ctx.config.nprocs,
        )?;

        info!(transform = %self.name, files = pairs.len(), "transformed {}", self.set);
        ctx.artifacts
            .replace(self.set.clone(), pairs.into_iter().map(|(_, output)| output));
        Ok(())
    }
}

impl Layer for CachedTransformMixin {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_stage(&self, stage: Stage, ctx: &mut BuildContext, next: Next<'_>) -> BuildResult<()> {
        if stage == self.stage {
            self.transform_set(ctx)?;
        }
        next.run(ctx)
    }
}
