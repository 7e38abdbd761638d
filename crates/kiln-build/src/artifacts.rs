//! Named artifact sets shared between stages

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// A named collection of files in the artifact store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArtifactSet {
    InitialSource,
    FortranPreprocess,
    CPreprocess,
    CPragmaInjected,
    FortranBuildFiles,
    CBuildFiles,
    CompilePending,
    ObjectFiles,
    Executables,
    Custom(String),
}

impl fmt::Display for ArtifactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Artifact sets of one build; paths are kept sorted and unique
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    sets: BTreeMap<ArtifactSet, BTreeSet<PathBuf>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, set: ArtifactSet, path: impl Into<PathBuf>) {
        self.sets.entry(set).or_default().insert(path.into());
    }

    pub fn extend<I>(&mut self, set: ArtifactSet, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.sets.entry(set).or_default().extend(paths);
    }

    /// Replace the contents of a set
    pub fn replace<I>(&mut self, set: ArtifactSet, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.sets.insert(set, paths.into_iter().collect());
    }

    /// Paths of a set in sorted order; empty if the set was never filled
    pub fn get(&self, set: &ArtifactSet) -> Vec<PathBuf> {
        self.sets
            .get(set)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, set: &ArtifactSet, path: &std::path::Path) -> bool {
        self.sets.get(set).is_some_and(|paths| paths.contains(path))
    }

    pub fn len(&self, set: &ArtifactSet) -> usize {
        self.sets.get(set).map_or(0, BTreeSet::len)
    }

    pub fn remove(&mut self, set: &ArtifactSet) -> Vec<PathBuf> {
        self.sets
            .remove(set)
            .map(|paths| paths.into_iter().collect())
            .unwrap_or_default()
    }

    /// Set names with their sizes
    pub fn summary(&self) -> BTreeMap<String, usize> {
        self.sets
            .iter()
            .map(|(set, paths)| (set.to_string(), paths.len()))
            .collect()
    }
}
