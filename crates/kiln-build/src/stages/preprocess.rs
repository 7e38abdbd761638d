//! Preprocessing of `.F90`/`.F` and `.c` sources
//!
//! Outputs mirror the source tree under `build_output`; Fortran outputs get
//! the lowercase suffix so later stages treat them as plain Fortran. Before
//! the C preprocessor runs, every `#include` in a C file is wrapped in
//! pragmas telling user headers from system headers. The marked copy sits
//! next to the source as `<name>.c.prag`, so relative includes still resolve.

use crate::artifacts::ArtifactSet;
use crate::cache::{CacheOutcome, TransformId};
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::flags::FlagSettings;
use crate::pool::run_parallel;
use crate::tool::Category;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const USER_INCLUDE_START: &str = "#pragma kiln user_include_start";
pub const USER_INCLUDE_END: &str = "#pragma kiln user_include_end";
pub const SYSTEM_INCLUDE_START: &str = "#pragma kiln system_include_start";
pub const SYSTEM_INCLUDE_END: &str = "#pragma kiln system_include_end";

/// Bumped whenever the marker format changes
const PRAGMA_VERSION: &str = "1";

struct Job {
    input: PathBuf,
    output: PathBuf,
    flags: Vec<String>,
}

fn output_extension(input: &Path) -> String {
    input
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// `text` with each `#include` line wrapped in user or system include pragmas
pub fn inject_pragmas(text: &str) -> BuildResult<String> {
    let pattern = r#"^\s*#\s*include\s*([<"])"#;
    let include = Regex::new(pattern).map_err(|e| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        error: e.to_string(),
    })?;

    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let markers = include.captures(line).map(|c| match &c[1] {
            "<" => (SYSTEM_INCLUDE_START, SYSTEM_INCLUDE_END),
            _ => (USER_INCLUDE_START, USER_INCLUDE_END),
        });
        match markers {
            Some((start, end)) => {
                out.push_str(start);
                out.push('\n');
                out.push_str(line);
                if !line.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(end);
                out.push('\n');
            }
            None => out.push_str(line),
        }
    }
    Ok(out)
}

/// Where the pragma-marked copy of `source` is written
pub fn pragma_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".prag");
    PathBuf::from(name)
}

/// Write the pragma-marked copy of every pending C file
///
/// Returns (source, marked copy) pairs in source order.
fn inject_c_pragmas(ctx: &mut BuildContext) -> BuildResult<Vec<(PathBuf, PathBuf)>> {
    let sources = ctx.artifacts.get(&ArtifactSet::CPreprocess);
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let pairs: Vec<(PathBuf, PathBuf)> = sources
        .into_iter()
        .map(|source| {
            let marked = pragma_path(&source);
            (source, marked)
        })
        .collect();

    let id = TransformId::new("c-pragma", &[PRAGMA_VERSION]);
    let cache = Arc::clone(ctx.cache());
    let outcomes = run_parallel(
        &pairs,
        |(source, marked)| {
            cache.get_or_transform(source, &id, marked, |input, output| {
                let bytes = fs::read(input).map_err(|e| BuildError::io(input, e))?;
                let text = inject_pragmas(&String::from_utf8_lossy(&bytes))?;
                fs::write(output, text).map_err(|e| BuildError::io(output, e))
            })
        },
        ctx.config.nprocs,
    )?;

    let reused = outcomes.iter().filter(|o| **o == CacheOutcome::Hit).count();
    debug!(files = pairs.len(), reused, "injected include pragmas");
    ctx.artifacts.extend(
        ArtifactSet::CPragmaInjected,
        pairs.iter().map(|(_, marked)| marked.clone()),
    );
    Ok(pairs)
}

/// Preprocess `inputs`, given as (source, file to preprocess) pairs
///
/// Outputs are named after the source.
fn preprocess_set(
    ctx: &mut BuildContext,
    category: Category,
    inputs: Vec<(PathBuf, PathBuf)>,
    produced: ArtifactSet,
) -> BuildResult<usize> {
    if inputs.is_empty() {
        return Ok(0);
    }

    let tool = ctx.tool(category)?;
    let vars = ctx.template_vars();
    let settings: &FlagSettings = &ctx.preprocess_flags;
    let jobs = inputs
        .into_iter()
        .map(|(source, input)| -> BuildResult<Job> {
            let flags = settings.flags_for(Vec::new(), &source, &vars)?;
            let output = ctx.output_path(&source, &output_extension(&source));
            Ok(Job {
                input,
                output,
                flags,
            })
        })
        .collect::<BuildResult<Vec<_>>>()?;

    let cache = Arc::clone(ctx.cache());
    run_parallel(
        &jobs,
        |job| {
            let mut parts = vec![tool.name().to_string(), tool.exec_name().to_string()];
            parts.extend(job.flags.iter().cloned());
            let id = TransformId::new(&format!("{}-preprocess", tool.name()), &parts);

            cache.get_or_transform(&job.input, &id, &job.output, |input, output| {
                let mut args = job.flags.clone();
                args.push(input.to_string_lossy().into_owned());
                args.push(output.to_string_lossy().into_owned());
                tool.run(&args, None, &[])
                    .map(|_| ())
                    .map_err(|e| BuildError::transformation(input, e))
            })
        },
        ctx.config.nprocs,
    )?;

    let count = jobs.len();
    info!(tool = %tool.name(), files = count, "preprocessed into {}", produced);
    ctx.artifacts
        .extend(produced, jobs.into_iter().map(|job| job.output));
    Ok(count)
}

pub fn run(ctx: &mut BuildContext) -> BuildResult<()> {
    let fortran_inputs = ctx
        .artifacts
        .get(&ArtifactSet::FortranPreprocess)
        .into_iter()
        .map(|path| (path.clone(), path))
        .collect();
    let fortran = preprocess_set(
        ctx,
        Category::FortranPreprocessor,
        fortran_inputs,
        ArtifactSet::FortranBuildFiles,
    )?;

    let c_inputs = inject_c_pragmas(ctx)?;
    let c = preprocess_set(ctx, Category::CPreprocessor, c_inputs, ArtifactSet::CBuildFiles)?;
    ctx.stats.files_preprocessed = fortran + c;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::context::BuildConfig;
    use crate::flags::FlagRule;
    use crate::registry::ToolRegistry;
    use crate::tool::{Probe, Tool};
    use std::fs;
    use tempfile::TempDir;

    /// `sh -c 'cp "$last-but-one" "$last"'` standing in for cpp
    fn copy_tool(name: &str, category: Category) -> Tool {
        Tool::new(name, category)
            .with_exec("sh")
            .with_args([
                "-c",
                "for a in \"$@\"; do p=\"$q\"; q=\"$a\"; done; cp \"$p\" \"$q\"",
                name,
            ])
            .with_probe(Probe::Assume(true))
    }

    #[test]
    fn test_fortran_and_c_outputs() {
        let temp = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(copy_tool("fpp", Category::FortranPreprocessor)).unwrap();
        registry.register(copy_tool("cpp", Category::CPreprocessor)).unwrap();

        let config = BuildConfig::new("demo", temp.path().join("ws")).with_nprocs(2);
        let cache = Arc::new(ContentCache::new(temp.path().join("cache")).unwrap());
        let mut ctx = BuildContext::new(config, Arc::new(registry), cache);
        ctx.preprocess_flags.common.push("-DKILN".to_string());
        ctx.preprocess_flags
            .rules
            .push(FlagRule::new("$source/core/*", ["-DCORE"]));

        let src = ctx.source_root().join("core");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.F90"), "program main\nend program main\n").unwrap();
        fs::write(
            src.join("io.c"),
            "#include \"io.h\"\nint main(void) { return 0; }\n",
        )
        .unwrap();
        ctx.artifacts.add(ArtifactSet::FortranPreprocess, src.join("main.F90"));
        ctx.artifacts.add(ArtifactSet::CPreprocess, src.join("io.c"));

        run(&mut ctx).unwrap();

        let f90 = ctx.build_output().join("core/main.f90");
        let c = ctx.build_output().join("core/io.c");
        assert_eq!(ctx.artifacts.get(&ArtifactSet::FortranBuildFiles), vec![f90.clone()]);
        assert_eq!(ctx.artifacts.get(&ArtifactSet::CBuildFiles), vec![c.clone()]);
        assert!(fs::read_to_string(f90).unwrap().starts_with("program main"));
        assert!(fs::read_to_string(&c).unwrap().contains(USER_INCLUDE_START));
        assert_eq!(
            ctx.artifacts.get(&ArtifactSet::CPragmaInjected),
            vec![src.join("io.c.prag")]
        );
        assert_eq!(ctx.stats.files_preprocessed, 2);
    }

    #[test]
    fn test_includes_are_wrapped_in_pragmas() {
        let text = "#include \"constants.h\"\n  # include <stdio.h>\nint x;\n#include <math.h>";
        let marked = inject_pragmas(text).unwrap();
        let expected = [
            USER_INCLUDE_START,
            "#include \"constants.h\"",
            USER_INCLUDE_END,
            SYSTEM_INCLUDE_START,
            "  # include <stdio.h>",
            SYSTEM_INCLUDE_END,
            "int x;",
            SYSTEM_INCLUDE_START,
            "#include <math.h>",
            SYSTEM_INCLUDE_END,
        ];
        assert_eq!(marked.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_text_without_includes_is_unchanged() {
        let text = "/* #include \"x.h\" */\nint main(void) { return 0; }\n";
        assert_eq!(inject_pragmas(text).unwrap(), text);
        assert_eq!(pragma_path(Path::new("/ws/src/io.c")), PathBuf::from("/ws/src/io.c.prag"));
    }

    #[test]
    fn test_nothing_pending_needs_no_tool() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::new("demo", temp.path().join("ws"));
        let cache = Arc::new(ContentCache::new(temp.path().join("cache")).unwrap());
        let mut ctx = BuildContext::new(config, Arc::new(ToolRegistry::new()), cache);
        run(&mut ctx).unwrap();
        assert_eq!(ctx.stats.files_preprocessed, 0);
    }

    #[test]
    fn test_failing_preprocessor_reports_file() {
        let temp = TempDir::new().unwrap();
        let mut registry = ToolRegistry::new();
        registry
            .register(
                Tool::new("fpp", Category::FortranPreprocessor)
                    .with_exec("false")
                    .with_probe(Probe::Assume(true)),
            )
            .unwrap();
        let config = BuildConfig::new("demo", temp.path().join("ws"));
        let cache = Arc::new(ContentCache::new(temp.path().join("cache")).unwrap());
        let mut ctx = BuildContext::new(config, Arc::new(registry), cache);

        let src = ctx.source_root();
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("bad.F90"), "#error\n").unwrap();
        ctx.artifacts.add(ArtifactSet::FortranPreprocess, src.join("bad.F90"));

        match run(&mut ctx) {
            Err(BuildError::Transformation { path, .. }) => assert!(path.ends_with("bad.F90")),
            other => panic!("Expected Transformation, got {:?}", other.err()),
        }
    }
}
