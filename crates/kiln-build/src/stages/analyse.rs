//! Analysis: code generation and Fortran module dependencies
//!
//! Generators run first so their output takes part in the dependency scan.
//! The scan is a line-level regex pass, enough to order compilation and to
//! prune an executable down to what its program unit reaches. Anything it
//! cannot see (modules defined outside the project, intrinsic modules) is
//! ignored.

use crate::artifacts::ArtifactSet;
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::targets::LinkTarget;
use crate::tool::Tool;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Opaque code-generation tool whose output files join the build
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    pub name: String,
    pub tool: Arc<Tool>,
    /// Arguments; `$source`, `$output`, `$relative` and `${option}` are substituted
    pub args: Vec<String>,
    /// Directory the generated files are written to
    pub output_dir: PathBuf,
    /// Working directory; defaults to `output_dir`
    pub cwd: Option<PathBuf>,
}

impl CodeGenerator {
    pub fn new(
        name: impl Into<String>,
        tool: Arc<Tool>,
        args: Vec<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            tool,
            args,
            output_dir: output_dir.into(),
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Run the generator and return the Fortran and C files it created
    pub fn generate(&self, ctx: &BuildContext) -> BuildResult<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir).map_err(|e| BuildError::io(&self.output_dir, e))?;
        let before = generated_files(&self.output_dir);

        let vars = ctx.template_vars();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                let arg = ctx
                    .options
                    .iter()
                    .fold(arg.clone(), |acc, (k, v)| acc.replace(&format!("${{{}}}", k), v));
                vars.substitute(&arg, &self.output_dir)
            })
            .collect();

        let cwd = self.cwd.as_deref().unwrap_or(&self.output_dir);
        self.tool.run(&args, Some(cwd), &[])?;

        let created: Vec<PathBuf> = generated_files(&self.output_dir)
            .difference(&before)
            .cloned()
            .collect();
        debug!(generator = %self.name, files = created.len(), "generated");
        Ok(created)
    }
}

fn generated_files(dir: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| source_kind(path).is_some())
        .collect()
}

fn source_kind(path: &Path) -> Option<ArtifactSet> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "f90" | "f" => Some(ArtifactSet::FortranBuildFiles),
        "c" => Some(ArtifactSet::CBuildFiles),
        _ => None,
    }
}

/// Program units found in one Fortran file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FortranUnits {
    pub modules: Vec<String>,
    pub uses: Vec<String>,
    pub programs: Vec<String>,
}

/// Line-level scanner for Fortran program units
pub struct FortranScanner {
    module: Regex,
    uses: Regex,
    program: Regex,
}

fn compile(pattern: &str) -> BuildResult<Regex> {
    Regex::new(pattern).map_err(|e| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        error: e.to_string(),
    })
}

impl FortranScanner {
    pub fn new() -> BuildResult<Self> {
        Ok(Self {
            module: compile(r"(?i)^\s*module\s+(\w+)\s*(?:!.*)?$")?,
            uses: compile(r"(?i)^\s*use\b\s*(?:,\s*(?:non_)?intrinsic\s*)?(?:::)?\s*(\w+)")?,
            program: compile(r"(?i)^\s*program\s+(\w+)")?,
        })
    }

    /// Scan Fortran source text; names are lowercased
    pub fn scan(&self, text: &str) -> FortranUnits {
        let mut units = FortranUnits::default();

        for line in text.lines() {
            let capture = |re: &Regex| re.captures(line).map(|c| c[1].to_ascii_lowercase());
            if let Some(name) = capture(&self.module) {
                if name != "procedure" {
                    units.modules.push(name);
                }
            } else if let Some(name) = capture(&self.uses) {
                if !units.uses.contains(&name) {
                    units.uses.push(name);
                }
            } else if let Some(name) = capture(&self.program) {
                units.programs.push(name);
            }
        }
        units
    }
}

/// Module dependencies between files
pub fn analyse_dependencies(
    files: &[PathBuf],
) -> BuildResult<(BTreeMap<PathBuf, Vec<PathBuf>>, HashMap<String, PathBuf>)> {
    let scanner = FortranScanner::new()?;
    let mut units = Vec::with_capacity(files.len());
    let mut definitions: HashMap<String, PathBuf> = HashMap::new();
    let mut programs: HashMap<String, PathBuf> = HashMap::new();

    for file in files {
        let bytes = fs::read(file).map_err(|e| BuildError::io(file, e))?;
        let found = scanner.scan(&String::from_utf8_lossy(&bytes));
        for module in &found.modules {
            if let Some(previous) = definitions.insert(module.clone(), file.clone()) {
                warn!(
                    module = %module,
                    "defined in both {} and {}",
                    previous.display(),
                    file.display()
                );
            }
        }
        for program in &found.programs {
            programs.insert(program.clone(), file.clone());
        }
        units.push((file.clone(), found));
    }

    let dependencies = units
        .into_iter()
        .map(|(file, found)| {
            let deps: BTreeSet<PathBuf> = found
                .uses
                .iter()
                .filter_map(|name| definitions.get(name))
                .filter(|dep| **dep != file)
                .cloned()
                .collect();
            (file, deps.into_iter().collect())
        })
        .collect();

    Ok((dependencies, programs))
}

/// Files reachable from `root` through the dependency map, `root` included
pub fn reachable(dependencies: &BTreeMap<PathBuf, Vec<PathBuf>>, root: &Path) -> BTreeSet<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(file) = queue.pop_front() {
        if !seen.insert(file.clone()) {
            continue;
        }
        if let Some(deps) = dependencies.get(&file) {
            queue.extend(deps.iter().cloned());
        }
    }
    seen
}

pub fn run(ctx: &mut BuildContext) -> BuildResult<()> {
    let generators = ctx.generators.clone();
    for generator in &generators {
        let created = generator.generate(ctx)?;
        ctx.stats.files_generated += created.len();
        for path in created {
            if let Some(set) = source_kind(&path) {
                ctx.artifacts.add(set, path);
            }
        }
    }

    let fortran = ctx.artifacts.get(&ArtifactSet::FortranBuildFiles);
    let (dependencies, programs) = analyse_dependencies(&fortran)?;

    let compile: Vec<PathBuf> = match (&ctx.config.root_symbol, ctx.config.link_target) {
        (Some(symbol), LinkTarget::Executable) => {
            let symbol = symbol.to_ascii_lowercase();
            let root = programs.get(&symbol).ok_or_else(|| {
                BuildError::configuration(format!("program '{}' not found in the sources", symbol))
            })?;
            let keep = reachable(&dependencies, root);
            info!(
                program = %symbol,
                kept = keep.len(),
                dropped = fortran.len() - keep.len(),
                "pruned Fortran sources"
            );
            keep.into_iter().collect()
        }
        _ => fortran,
    };

    ctx.dependencies = dependencies
        .into_iter()
        .filter(|(file, _)| compile.contains(file))
        .collect();
    let c_files = ctx.artifacts.get(&ArtifactSet::CBuildFiles);
    ctx.artifacts
        .replace(ArtifactSet::CompilePending, compile.into_iter().chain(c_files));
    info!(
        files = ctx.artifacts.len(&ArtifactSet::CompilePending),
        "analysis complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::context::BuildConfig;
    use crate::registry::ToolRegistry;
    use crate::tool::{Category, Probe};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> BuildContext {
        let config = BuildConfig::new("demo", temp.path().join("ws"));
        let cache = Arc::new(ContentCache::new(temp.path().join("cache")).unwrap());
        BuildContext::new(config, Arc::new(ToolRegistry::new()), cache)
    }

    fn write(ctx: &mut BuildContext, name: &str, text: &str) -> PathBuf {
        let path = ctx.build_output().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        ctx.artifacts.add(ArtifactSet::FortranBuildFiles, path.clone());
        path
    }

    #[test]
    fn test_scan_units() {
        let text = "\
MODULE Constants_Mod ! physical constants
  use, intrinsic :: iso_c_binding
  USE kinds_mod, only: r_def
  interface
    module procedure foo
  end interface
end module constants_mod
";
        let scanner = FortranScanner::new().unwrap();
        let units = scanner.scan(text);
        assert_eq!(units.modules, vec!["constants_mod"]);
        assert_eq!(units.uses, vec!["iso_c_binding", "kinds_mod"]);
        assert!(units.programs.is_empty());
        assert_eq!(scanner.scan("program gungho\nend program\n").programs, vec!["gungho"]);
    }

    #[test]
    fn test_dependencies_and_pruning() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        let kinds = write(&mut ctx, "kinds.f90", "module kinds\nend module kinds\n");
        let physics = write(
            &mut ctx,
            "physics.f90",
            "module physics\nuse kinds\nend module physics\n",
        );
        let main = write(&mut ctx, "main.f90", "program model\nuse physics\nend program\n");
        let unused = write(&mut ctx, "unused.f90", "module unused\nuse kinds\nend module\n");
        let c = ctx.build_output().join("io.c");
        fs::write(&c, "").unwrap();
        ctx.artifacts.add(ArtifactSet::CBuildFiles, c.clone());
        ctx.config = ctx.config.clone().with_root_symbol("MODEL");

        run(&mut ctx).unwrap();

        assert_eq!(ctx.dependencies[&main], vec![physics.clone()]);
        assert_eq!(ctx.dependencies[&physics], vec![kinds.clone()]);
        let pending = ctx.artifacts.get(&ArtifactSet::CompilePending);
        assert!(pending.contains(&main));
        assert!(pending.contains(&kinds));
        assert!(pending.contains(&c));
        assert!(!pending.contains(&unused));
        assert!(!ctx.dependencies.contains_key(&unused));
    }

    #[test]
    fn test_no_root_symbol_keeps_everything() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        write(&mut ctx, "a.f90", "module a\nend module a\n");
        write(&mut ctx, "b.f90", "module b\nuse a\nend module b\n");

        run(&mut ctx).unwrap();
        assert_eq!(ctx.artifacts.len(&ArtifactSet::CompilePending), 2);
    }

    #[test]
    fn test_missing_program_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        write(&mut ctx, "a.f90", "module a\nend module a\n");
        ctx.config = ctx.config.clone().with_root_symbol("lfric");

        let err = run(&mut ctx).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_generator_output_joins_build() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        ctx.options.insert("precision".to_string(), "64".to_string());
        let sh = Arc::new(Tool::new("sh", Category::Shell).with_probe(Probe::Assume(true)));
        let out = ctx.build_output().join("configuration");
        ctx.generators.push(CodeGenerator::new(
            "namelists",
            sh,
            vec![
                "-c".to_string(),
                "echo \"module config_${precision}\" > config.f90 && echo int > helper.c".to_string(),
            ],
            &out,
        ));

        run(&mut ctx).unwrap();

        assert_eq!(ctx.stats.files_generated, 2);
        let generated = out.join("config.f90");
        assert_eq!(fs::read_to_string(&generated).unwrap().trim(), "module config_64");
        assert!(ctx.artifacts.contains(&ArtifactSet::FortranBuildFiles, &generated));
        assert!(ctx
            .artifacts
            .contains(&ArtifactSet::CompilePending, &out.join("helper.c")));
    }
}
