//! Source discovery
//!
//! Walks the source root, applies the include/exclude filters and sorts files
//! into artifact sets by suffix.

use crate::artifacts::ArtifactSet;
use crate::context::BuildContext;
use crate::error::BuildResult;
use kiln_config::project::FilterConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Path filter; the last filter whose text occurs in a path decides
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathFilter {
    Include(String),
    Exclude(String),
}

impl PathFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        match config {
            FilterConfig::Include(text) => Self::Include(text.clone()),
            FilterConfig::Exclude(text) => Self::Exclude(text.clone()),
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Include(text) | Self::Exclude(text) => text,
        }
    }
}

/// Whether `path` survives the filters; unmatched paths are included
pub fn is_included(filters: &[PathFilter], path: &Path) -> bool {
    let path = path.to_string_lossy();
    filters
        .iter()
        .rev()
        .find(|filter| path.contains(filter.text()))
        .map_or(true, |filter| matches!(filter, PathFilter::Include(_)))
}

/// Artifact set a file suffix belongs to, if any
pub fn classify(path: &Path) -> Option<ArtifactSet> {
    match path.extension()?.to_str()? {
        "F90" | "F" => Some(ArtifactSet::FortranPreprocess),
        "f90" | "f" => Some(ArtifactSet::FortranBuildFiles),
        "c" => Some(ArtifactSet::CPreprocess),
        _ => None,
    }
}

pub fn run(ctx: &mut BuildContext) -> BuildResult<()> {
    let source_root = ctx.source_root();
    let files: Vec<PathBuf> = WalkDir::new(&source_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            let relative = path.strip_prefix(&source_root).unwrap_or(path);
            let keep = is_included(&ctx.filters, relative);
            if !keep {
                debug!(path = %relative.display(), "excluded");
            }
            keep
        })
        .collect();

    for path in &files {
        if let Some(set) = classify(path) {
            ctx.artifacts.add(set, path.clone());
        }
    }
    ctx.stats.files_discovered = files.len();
    ctx.artifacts.extend(ArtifactSet::InitialSource, files);

    info!(
        files = ctx.stats.files_discovered,
        fortran = ctx.artifacts.len(&ArtifactSet::FortranPreprocess)
            + ctx.artifacts.len(&ArtifactSet::FortranBuildFiles),
        c = ctx.artifacts.len(&ArtifactSet::CPreprocess),
        "discovered source files"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::context::BuildConfig;
    use crate::registry::ToolRegistry;
    use rstest::rstest;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[rstest]
    #[case("src/a.F90", Some(ArtifactSet::FortranPreprocess))]
    #[case("src/a.F", Some(ArtifactSet::FortranPreprocess))]
    #[case("src/a.f90", Some(ArtifactSet::FortranBuildFiles))]
    #[case("src/a.f", Some(ArtifactSet::FortranBuildFiles))]
    #[case("src/a.c", Some(ArtifactSet::CPreprocess))]
    #[case("src/a.h", None)]
    #[case("Makefile", None)]
    fn test_classify(#[case] path: &str, #[case] expected: Option<ArtifactSet>) {
        assert_eq!(classify(Path::new(path)), expected);
    }

    #[test]
    fn test_last_matching_filter_wins() {
        let filters = vec![
            PathFilter::Exclude("unit-test".to_string()),
            PathFilter::Include("unit-test/keep".to_string()),
        ];
        assert!(!is_included(&filters, Path::new("core/unit-test/a.f90")));
        assert!(is_included(&filters, Path::new("core/unit-test/keep/b.f90")));
        assert!(is_included(&filters, Path::new("core/src/c.f90")));
    }

    #[test]
    fn test_run_fills_sets() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::new("demo", temp.path().join("ws"));
        let cache = Arc::new(ContentCache::new(temp.path().join("cache")).unwrap());
        let mut ctx = BuildContext::new(config, Arc::new(ToolRegistry::new()), cache);
        ctx.filters.push(PathFilter::Exclude("legacy".to_string()));

        let root = ctx.source_root().join("core");
        fs::create_dir_all(root.join("legacy")).unwrap();
        for name in ["main.F90", "util.f90", "io.c", "README", "legacy/old.f90"] {
            fs::write(root.join(name), "").unwrap();
        }

        run(&mut ctx).unwrap();

        assert_eq!(ctx.stats.files_discovered, 4);
        assert_eq!(ctx.artifacts.len(&ArtifactSet::InitialSource), 4);
        assert_eq!(
            ctx.artifacts.get(&ArtifactSet::FortranPreprocess),
            vec![root.join("main.F90")]
        );
        assert_eq!(
            ctx.artifacts.get(&ArtifactSet::FortranBuildFiles),
            vec![root.join("util.f90")]
        );
        assert_eq!(ctx.artifacts.get(&ArtifactSet::CPreprocess), vec![root.join("io.c")]);
    }
}
