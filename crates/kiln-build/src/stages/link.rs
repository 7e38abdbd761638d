//! Linking: executable, static library or shared library

use crate::artifacts::ArtifactSet;
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::stages::compile::offload_flags;
use crate::targets::LinkTarget;
use crate::tool::{Category, Tool};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Full linker command line for `objects`
pub fn link_args(
    ctx: &BuildContext,
    linker: &Tool,
    objects: &[PathBuf],
    output: &Path,
) -> BuildResult<Vec<String>> {
    let mut args = linker.flags(&ctx.config.profile)?;
    args.extend(offload_flags(ctx, linker));
    if ctx.config.link_target == LinkTarget::SharedLibrary {
        args.push("-shared".to_string());
    }
    args.extend(ctx.config.ldflags.iter().cloned());
    args.extend(ctx.link_flags.iter().cloned());
    args.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));
    for library in &ctx.libraries {
        args.extend(linker.lib_flags(library)?);
    }
    args.extend(linker.post_lib_flags());
    args.push("-o".to_string());
    args.push(output.to_string_lossy().into_owned());
    Ok(args)
}

pub fn run(ctx: &mut BuildContext) -> BuildResult<()> {
    let objects = ctx.artifacts.get(&ArtifactSet::ObjectFiles);
    if objects.is_empty() {
        return Err(BuildError::BuildFailed("no object files to link".to_string()));
    }

    let output = ctx
        .build_output()
        .join(ctx.config.link_target.output_filename(&ctx.config.name));
    if output.exists() {
        fs::remove_file(&output).map_err(|e| BuildError::io(&output, e))?;
    }

    let tool = match ctx.config.link_target {
        LinkTarget::StaticLibrary => {
            let archiver = ctx.tool(Category::Archiver)?;
            let mut args = vec!["cr".to_string(), output.to_string_lossy().into_owned()];
            args.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));
            archiver.run(&args, None, &[])?;
            archiver
        }
        LinkTarget::Executable | LinkTarget::SharedLibrary => {
            let linker = ctx.tool(Category::Linker)?;
            let args = link_args(ctx, &linker, &objects, &output)?;
            linker.run(&args, None, &[])?;
            linker
        }
    };

    info!(
        tool = %tool.name(),
        objects = objects.len(),
        "linked {}",
        output.display()
    );
    ctx.artifacts.add(ArtifactSet::Executables, output);
    Ok(())
}
