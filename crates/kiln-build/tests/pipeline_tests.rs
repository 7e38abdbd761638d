//! End-to-end builds driven by shell-script stand-ins for real compilers

#![cfg(unix)]

use kiln_build::{
    ArtifactSet, BuildError, BuildOptions, Builder, CachedTransformMixin, Category,
    CommandTransform, Hook, Probe, Stage, Tool, ToolRegistry,
};
use kiln_config::ProjectConfig;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const COPY: &str = r#"for a in "$@"; do p="$q"; q="$a"; done
cp "$p" "$q"
"#;

fn compiler_script(log: &Path) -> String {
    format!(
        r#"src=; out=; objs=
while [ $# -gt 0 ]; do
  case "$1" in
    -c) src="$2"; shift ;;
    -o) out="$2"; shift ;;
    *.o) objs="$objs $1" ;;
  esac
  shift
done
if [ -n "$src" ]; then
  echo "$src" >> "{}"
  sed -n 's/^module \([a-z_]*\)$/\1/p' "$src" | while read m; do echo "$src" > "$m.mod"; done
  cp "$src" "$out"
else
  cat $objs > "$out"
fi
"#,
        log.display()
    )
}

fn script_tool(dir: &Path, name: &str, category: Category, body: &str) -> Tool {
    let path = dir.join(format!("{}.sh", name));
    fs::write(&path, body).unwrap();
    Tool::new(name, category)
        .with_exec("sh")
        .with_args([path.to_string_lossy().into_owned()])
        .with_probe(Probe::Assume(true))
}

struct Fixture {
    temp: TempDir,
    registry: Arc<ToolRegistry>,
}

impl Fixture {
    fn new(compiler_body: Option<&str>) -> Self {
        let temp = TempDir::new().unwrap();
        let tools = temp.path().join("tools");
        fs::create_dir_all(&tools).unwrap();

        let body = compiler_body
            .map(str::to_string)
            .unwrap_or_else(|| compiler_script(&temp.path().join("compile.log")));

        let mut registry = ToolRegistry::new();
        registry
            .register(script_tool(&tools, "fakefc", Category::FortranCompiler, &body))
            .unwrap();
        registry
            .register(script_tool(&tools, "fakefpp", Category::FortranPreprocessor, COPY))
            .unwrap();

        let core = temp.path().join("src/core");
        fs::create_dir_all(core.join("unit-test")).unwrap();
        fs::write(
            core.join("constants_mod.F90"),
            "module constants_mod\n  integer, parameter :: n = 3\nend module constants_mod\n",
        )
        .unwrap();
        fs::write(
            core.join("model.f90"),
            "program model\n  use constants_mod, only: n\n  print *, n\nend program model\n",
        )
        .unwrap();
        fs::write(
            core.join("unused.f90"),
            "module unused_mod\nend module unused_mod\n",
        )
        .unwrap();
        fs::write(
            core.join("unit-test/check.f90"),
            "program check\nend program check\n",
        )
        .unwrap();

        Self {
            temp,
            registry: Arc::new(registry),
        }
    }

    fn project(&self) -> ProjectConfig {
        toml::from_str(
            r#"
[project]
name = "gungho"
root_symbol = "model"

[[sources]]
label = "core"
[[sources.fetch]]
path = "src/core"

[build]
filters = [{ exclude = "unit-test" }]
"#,
        )
        .unwrap()
    }

    fn builder(&self, workspace: &str) -> Builder {
        let mut options = BuildOptions::new();
        options.mpi = false;
        options.nprocs = Some(2);

        Builder::new(Arc::clone(&self.registry), self.project(), self.temp.path())
            .with_options(options)
            .with_workspace(self.temp.path().join(workspace))
            .with_cache_dir(self.temp.path().join("cache"))
    }

    fn compile_log(&self) -> Vec<String> {
        fs::read_to_string(self.temp.path().join("compile.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[test]
fn test_full_build_prunes_and_links() {
    let fixture = Fixture::new(None);
    let summary = fixture.builder("ws").build().unwrap();

    assert_eq!(summary.label, "gungho-fakefc");
    assert_eq!(summary.report.completed, Stage::ALL.to_vec());
    assert_eq!(summary.stats.sources_fetched, 1);
    assert_eq!(summary.stats.files_discovered, 3);
    assert_eq!(summary.stats.files_preprocessed, 1);
    assert_eq!(summary.stats.files_compiled, 2);

    let executable = summary.project_workspace.join("build_output/gungho");
    assert_eq!(summary.outputs, vec![executable.clone()]);

    let linked = fs::read_to_string(&executable).unwrap();
    assert!(linked.contains("module constants_mod"));
    assert!(linked.contains("program model"));
    assert!(!linked.contains("unused_mod"));
    assert!(!linked.contains("program check"));

    let log = fixture.compile_log();
    assert_eq!(log.len(), 2);
    assert!(log[0].ends_with("constants_mod.f90"));
    assert!(log[1].ends_with("model.f90"));
}

#[test]
fn test_second_build_reuses_cache() {
    let fixture = Fixture::new(None);
    fixture.builder("first").build().unwrap();
    let summary = fixture.builder("second").build().unwrap();

    assert_eq!(fixture.compile_log().len(), 2);
    assert_eq!(summary.stats.cache.misses, 0);
    assert!(summary.stats.cache.hits >= 3);

    let first = fs::read(fixture.temp.path().join("first/gungho-fakefc/build_output/gungho")).unwrap();
    let second = fs::read(&summary.outputs[0]).unwrap();
    assert_eq!(first, second);
}

fn cached_module_dirs(cache: &Path, module: &str) -> Vec<std::path::PathBuf> {
    let prefix = format!("mod-{}-", module);
    fs::read_dir(cache)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect()
}

#[test]
fn test_missing_cached_module_file_recompiles() {
    let fixture = Fixture::new(None);
    let first = fixture.builder("ws").build().unwrap();
    let mod_file = first.project_workspace.join("build_output/constants_mod.mod");
    assert!(mod_file.is_file());

    let cache = fixture.temp.path().join("cache");
    let cached = cached_module_dirs(&cache, "constants_mod");
    assert_eq!(cached.len(), 1);
    fs::remove_dir_all(&cached[0]).unwrap();
    fs::remove_dir_all(fixture.temp.path().join("ws")).unwrap();

    let summary = fixture.builder("ws").build().unwrap();
    assert!(mod_file.is_file());
    assert_eq!(cached_module_dirs(&cache, "constants_mod").len(), 1);

    let log = fixture.compile_log();
    assert_eq!(log.len(), 3);
    assert!(log[2].ends_with("constants_mod.f90"));
    assert_eq!(summary.outputs.len(), 1);
}

#[test]
fn test_hook_sees_preprocessed_files() {
    let fixture = Fixture::new(None);
    let summary = fixture
        .builder("ws")
        .with_layer(Hook::before(Stage::Analyse, "check-preprocessed", |ctx| {
            let files = ctx.artifacts.get(&ArtifactSet::FortranBuildFiles);
            if files.len() == 3 {
                Ok(())
            } else {
                Err(BuildError::BuildFailed(format!("saw {} files", files.len())))
            }
        }))
        .build()
        .unwrap();
    assert_eq!(summary.outputs.len(), 1);
}

#[test]
fn test_transform_before_analyse() {
    let fixture = Fixture::new(None);
    let strip = script_tool(
        &fixture.temp.path().join("tools"),
        "strip",
        Category::Misc,
        "sed -e 's/print \\*, n/continue/' \"$1\" > \"$2\"\n",
    );
    let transform = CommandTransform::new(
        "strip",
        Arc::new(strip),
        vec!["$input".to_string(), "$output".to_string()],
    );

    let summary = fixture
        .builder("ws")
        .with_layer(CachedTransformMixin::new(
            "strip",
            Stage::Analyse,
            ArtifactSet::FortranBuildFiles,
            transform,
        ))
        .build()
        .unwrap();

    let stripped = summary.project_workspace.join("build_output/strip/core/model.f90");
    assert!(fs::read_to_string(stripped).unwrap().contains("continue"));

    let linked = fs::read_to_string(&summary.outputs[0]).unwrap();
    assert!(linked.contains("program model"));
    assert!(!linked.contains("print *, n"));
}

#[test]
fn test_compiler_failure_stops_at_compile() {
    let fixture = Fixture::new(Some("echo 'Error: bad syntax' >&2\nexit 1\n"));
    let err = fixture.builder("ws").build().unwrap_err();

    match err {
        BuildError::StageFailed {
            stage,
            completed,
            source,
        } => {
            assert_eq!(stage, Stage::Compile);
            assert_eq!(
                completed,
                vec![Stage::Fetch, Stage::Discover, Stage::Preprocess, Stage::Analyse]
            );
            assert!(source.to_string().contains("bad syntax"));
        }
        other => panic!("Expected StageFailed, got {:?}", other),
    }

    let preprocessed = fixture
        .temp
        .path()
        .join("ws/gungho-fakefc/build_output/core/constants_mod.f90");
    assert!(preprocessed.is_file());
}

#[test]
fn test_missing_root_program() {
    let fixture = Fixture::new(None);
    let mut project = fixture.project();
    if let Some(section) = project.project.as_mut() {
        section.root_symbol = Some("nowhere".to_string());
    }

    let mut options = BuildOptions::new();
    options.mpi = false;
    let err = Builder::new(Arc::clone(&fixture.registry), project, fixture.temp.path())
        .with_options(options)
        .with_workspace(fixture.temp.path().join("ws"))
        .with_cache_dir(fixture.temp.path().join("cache"))
        .build()
        .unwrap_err();

    assert_eq!(err.failed_stage(), Some(Stage::Analyse));
    assert!(err.is_configuration());
}
