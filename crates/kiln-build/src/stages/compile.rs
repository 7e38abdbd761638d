//! Compilation through the content cache
//!
//! Fortran files compile in dependency passes: every file of a pass only uses
//! modules from earlier passes, and a pass runs on the worker pool. Compilers
//! run in `build_output`, so module files land there. Module files are cached
//! next to objects and restored on a hit. C files compile in one pass.

use crate::artifacts::ArtifactSet;
use crate::cache::{hash_file, CacheKey, CacheOutcome, ContentCache, TransformId};
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::flags::FlagSettings;
use crate::pool::run_parallel;
use crate::stages::analyse::{reachable, FortranScanner};
use crate::tool::{Category, Tool};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct CompileJob {
    input: PathBuf,
    output: PathBuf,
    flags: Vec<String>,
    transform: TransformId,
    modules: Vec<String>,
}

fn is_fortran(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("f90") | Some("f") | Some("F90") | Some("F")
    )
}

/// Profile flags, OpenMP and OpenACC flags, then command-line flags for `compiler`
fn base_flags(ctx: &BuildContext, compiler: &Tool, extra: &[String]) -> BuildResult<Vec<String>> {
    let mut flags = compiler.flags(&ctx.config.profile)?;
    flags.extend(offload_flags(ctx, compiler));
    flags.extend(extra.iter().cloned());
    Ok(flags)
}

/// OpenMP and OpenACC flags `tool` needs for this build
pub fn offload_flags(ctx: &BuildContext, tool: &Tool) -> Vec<String> {
    let mut flags = Vec::new();
    if ctx.config.openmp {
        if let Some(flag) = tool.openmp_flag() {
            flags.push(flag.to_string());
        }
    }
    if ctx.config.openacc {
        match tool.openacc_flag() {
            Some(flag) => flags.push(flag.to_string()),
            None => warn!(tool = %tool.name(), "OpenACC requested but the tool has no OpenACC flag"),
        }
    }
    flags
}

fn module_transform(module: &str, job: &CompileJob) -> TransformId {
    TransformId::new(&format!("mod-{}", module), &[job.transform.as_str()])
}

fn run_compiler(
    compiler: &Tool,
    job: &CompileJob,
    input: &Path,
    output: &Path,
    cwd: &Path,
) -> BuildResult<()> {
    let mut args = job.flags.clone();
    args.push("-c".to_string());
    args.push(input.to_string_lossy().into_owned());
    args.push("-o".to_string());
    args.push(output.to_string_lossy().into_owned());
    compiler
        .run(&args, Some(cwd), &[])
        .map(|_| ())
        .map_err(|e| BuildError::transformation(input, e))
}

/// Compile `job` unless cached; module files are restored or cached with the object
///
/// A cached object whose module files are not all cached is compiled again.
fn compile_one(
    cache: &ContentCache,
    compiler: &Tool,
    job: &CompileJob,
    cwd: &Path,
) -> BuildResult<CacheOutcome> {
    let outcome = cache.get_or_transform(&job.input, &job.transform, &job.output, |input, output| {
        run_compiler(compiler, job, input, output, cwd)
    })?;

    if job.modules.is_empty() {
        return Ok(outcome);
    }

    let digest = hash_file(&job.input)?;
    let modules: Vec<(&String, CacheKey, PathBuf)> = job
        .modules
        .iter()
        .map(|module| {
            let key = CacheKey::new(digest.clone(), module_transform(module, job));
            (module, key, cwd.join(format!("{}.mod", module)))
        })
        .collect();

    if outcome == CacheOutcome::Hit {
        let cached: Option<Vec<PathBuf>> =
            modules.iter().map(|(_, key, _)| cache.lookup(key)).collect();
        match cached {
            Some(cached) => {
                for ((_, _, mod_file), artifact) in modules.iter().zip(&cached) {
                    fs::copy(artifact, mod_file).map_err(|e| BuildError::io(mod_file, e))?;
                }
                cache.mark_live(cached);
                return Ok(CacheOutcome::Hit);
            }
            None => {
                warn!(input = %job.input.display(), "module file missing from cache, recompiling");
                run_compiler(compiler, job, &job.input, &job.output, cwd)?;
                let object_key = CacheKey::new(digest.clone(), job.transform.clone());
                let stored = cache.store(&object_key, &job.output)?;
                cache.mark_live([stored]);
            }
        }
    }

    for (module, key, mod_file) in &modules {
        if mod_file.is_file() {
            let stored = cache.store(key, mod_file)?;
            cache.mark_live([stored]);
        } else {
            debug!(module = %module, "no module file written");
        }
    }
    Ok(CacheOutcome::Miss)
}

fn prepare_jobs(
    ctx: &BuildContext,
    files: &[PathBuf],
    compiler: &Tool,
    extra: &[String],
    settings: &FlagSettings,
    scanner: Option<&FortranScanner>,
) -> BuildResult<Vec<CompileJob>> {
    let base = base_flags(ctx, compiler, extra)?;
    let vars = ctx.template_vars();

    files
        .iter()
        .map(|input| -> BuildResult<CompileJob> {
            let flags = settings.flags_for(base.clone(), input, &vars)?;
            let mut parts = vec![compiler.name().to_string(), compiler.exec_name().to_string()];
            parts.extend(flags.iter().cloned());

            let mut modules = Vec::new();
            if let Some(scanner) = scanner {
                let mut upstream = reachable(&ctx.dependencies, input);
                upstream.remove(input);
                for dep in &upstream {
                    parts.push(hash_file(dep)?);
                }
                let bytes = fs::read(input).map_err(|e| BuildError::io(input, e))?;
                modules = scanner.scan(&String::from_utf8_lossy(&bytes)).modules;
            }

            Ok(CompileJob {
                input: input.clone(),
                output: ctx.object_path(input),
                flags,
                transform: TransformId::new(&format!("compile-{}", compiler.name()), &parts),
                modules,
            })
        })
        .collect()
}

/// Split files into passes; each pass depends only on earlier ones
pub fn compile_passes(
    files: &[PathBuf],
    dependencies: &BTreeMap<PathBuf, Vec<PathBuf>>,
) -> BuildResult<Vec<Vec<PathBuf>>> {
    let pending: BTreeSet<&PathBuf> = files.iter().collect();
    let mut done: BTreeSet<&PathBuf> = BTreeSet::new();
    let mut passes = Vec::new();

    while done.len() < pending.len() {
        let ready: Vec<&PathBuf> = pending
            .iter()
            .filter(|file| !done.contains(*file))
            .filter(|file| {
                dependencies.get(**file).map_or(true, |deps| {
                    deps.iter()
                        .all(|dep| done.contains(dep) || !pending.contains(dep))
                })
            })
            .copied()
            .collect();

        if ready.is_empty() {
            let stuck: Vec<String> = pending
                .iter()
                .filter(|file| !done.contains(*file))
                .map(|file| file.display().to_string())
                .collect();
            return Err(BuildError::BuildFailed(format!(
                "circular module dependency among {}",
                stuck.join(", ")
            )));
        }

        done.extend(ready.iter().copied());
        passes.push(ready.into_iter().cloned().collect());
    }
    Ok(passes)
}

fn run_jobs(
    ctx: &BuildContext,
    compiler: &Arc<Tool>,
    jobs: &[CompileJob],
    cwd: &Path,
) -> BuildResult<()> {
    let cache = Arc::clone(ctx.cache());
    let outcomes = run_parallel(
        jobs,
        |job| compile_one(&cache, compiler, job, cwd),
        ctx.config.nprocs,
    )?;
    let hits = outcomes.iter().filter(|o| **o == CacheOutcome::Hit).count();
    debug!(compiler = %compiler.name(), files = jobs.len(), hits, "compile pass done");
    Ok(())
}

pub fn run(ctx: &mut BuildContext) -> BuildResult<()> {
    let pending = ctx.artifacts.get(&ArtifactSet::CompilePending);
    let (fortran, c): (Vec<PathBuf>, Vec<PathBuf>) =
        pending.into_iter().partition(|path| is_fortran(path));

    let cwd = ctx.build_output();
    fs::create_dir_all(&cwd).map_err(|e| BuildError::io(&cwd, e))?;
    let mut objects = Vec::new();

    if !fortran.is_empty() {
        let compiler = ctx.tool(Category::FortranCompiler)?;
        let scanner = FortranScanner::new()?;
        let passes = compile_passes(&fortran, &ctx.dependencies)?;
        info!(
            compiler = %compiler.name(),
            files = fortran.len(),
            passes = passes.len(),
            "compiling Fortran"
        );

        for pass in &passes {
            let jobs = prepare_jobs(
                ctx,
                pass,
                &compiler,
                &ctx.config.fflags,
                &ctx.fortran_flags,
                Some(&scanner),
            )?;
            run_jobs(ctx, &compiler, &jobs, &cwd)?;
            objects.extend(jobs.into_iter().map(|job| job.output));
        }
    }

    if !c.is_empty() {
        let compiler = ctx.tool(Category::CCompiler)?;
        info!(compiler = %compiler.name(), files = c.len(), "compiling C");
        let jobs = prepare_jobs(ctx, &c, &compiler, &ctx.config.cflags, &ctx.c_flags, None)?;
        run_jobs(ctx, &compiler, &jobs, &cwd)?;
        objects.extend(jobs.into_iter().map(|job| job.output));
    }

    ctx.stats.files_compiled += objects.len();
    ctx.artifacts.extend(ArtifactSet::ObjectFiles, objects);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_follow_dependencies() {
        let a = PathBuf::from("a.f90");
        let b = PathBuf::from("b.f90");
        let c = PathBuf::from("c.f90");
        let d = PathBuf::from("d.f90");
        let mut deps = BTreeMap::new();
        deps.insert(b.clone(), vec![a.clone()]);
        deps.insert(c.clone(), vec![a.clone(), b.clone()]);
        deps.insert(d.clone(), vec![PathBuf::from("outside.f90")]);

        let passes = compile_passes(&[a.clone(), b.clone(), c.clone(), d.clone()], &deps).unwrap();
        assert_eq!(passes, vec![vec![a, d], vec![b], vec![c]]);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let a = PathBuf::from("a.f90");
        let b = PathBuf::from("b.f90");
        let mut deps = BTreeMap::new();
        deps.insert(a.clone(), vec![b.clone()]);
        deps.insert(b.clone(), vec![a.clone()]);

        let err = compile_passes(&[a, b], &deps).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn test_offload_flags() {
        use crate::cache::ContentCache;
        use crate::context::BuildConfig;
        use crate::registry::ToolRegistry;
        use tempfile::TempDir;

        let temp = TempDir::new().unwrap();
        let config = BuildConfig::new("demo", temp.path().join("ws"))
            .with_openmp(true)
            .with_openacc(true);
        let cache = Arc::new(ContentCache::new(temp.path().join("cache")).unwrap());
        let ctx = BuildContext::new(config, Arc::new(ToolRegistry::new()), cache);

        let gfortran = Tool::new("gfortran", Category::FortranCompiler)
            .with_openmp_flag("-fopenmp")
            .with_openacc_flag("-fopenacc");
        assert_eq!(offload_flags(&ctx, &gfortran), vec!["-fopenmp", "-fopenacc"]);

        let ifort = Tool::new("ifort", Category::FortranCompiler).with_openmp_flag("-qopenmp");
        assert_eq!(offload_flags(&ctx, &ifort), vec!["-qopenmp"]);
    }

    #[test]
    fn test_is_fortran() {
        assert!(is_fortran(Path::new("x/a.f90")));
        assert!(is_fortran(Path::new("x/a.F")));
        assert!(!is_fortran(Path::new("x/a.c")));
    }
}
