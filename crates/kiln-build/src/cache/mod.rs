//! Content-addressed artifact cache
//!
//! Artifacts are keyed by (content digest of the input, transformation
//! identity) and stored as `<root>/<transform>/<digest[..2]>/<digest>`. The
//! files on disk are the source of truth, so separate builds sharing a cache
//! directory reuse each other's results. Entries are never invalidated during
//! a build; [`ContentCache::sweep`] is the explicit cleanup.

pub mod digest;

pub use digest::{hash_bytes, hash_file, TransformId};

use crate::error::{BuildError, BuildResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub digest: String,
    pub transform: TransformId,
}

impl CacheKey {
    pub fn new(digest: impl Into<String>, transform: TransformId) -> Self {
        Self {
            digest: digest.into(),
            transform,
        }
    }
}

/// Whether `get_or_transform` reused a cached artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// Cache counters for this process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub stores: usize,
}

/// Result of a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
}

/// Content-addressed cache shared by every worker of a build
#[derive(Debug)]
pub struct ContentCache {
    root: PathBuf,
    index: RwLock<HashMap<CacheKey, PathBuf>>,
    live: Mutex<HashSet<PathBuf>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    stores: AtomicUsize,
    temp_counter: AtomicUsize,
}

impl ContentCache {
    /// Open (and create if needed) a cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> BuildResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| BuildError::io(&root, e))?;
        Ok(Self {
            root,
            index: RwLock::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
            temp_counter: AtomicUsize::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for `key` lives
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        let shard = key.digest.get(..2).unwrap_or("xx");
        self.root
            .join(key.transform.as_str())
            .join(shard)
            .join(&key.digest)
    }

    /// Cached artifact for `key`, or `None` on a miss
    ///
    /// An indexed entry whose file has vanished counts as a miss and is dropped.
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.artifact_path(key);
        if path.is_file() {
            self.index.write().insert(key.clone(), path.clone());
            return Some(path);
        }

        if self.index.write().remove(key).is_some() {
            warn!(
                transform = %key.transform,
                digest = %key.digest,
                "cached artifact vanished, treating as a miss"
            );
        }
        None
    }

    /// Copy `artifact` into the cache under `key`
    ///
    /// Storing a key that is already present only verifies the existing file.
    pub fn store(&self, key: &CacheKey, artifact: &Path) -> BuildResult<PathBuf> {
        let dest = self.artifact_path(key);
        if dest.is_file() {
            self.index.write().insert(key.clone(), dest.clone());
            return Ok(dest);
        }

        let parent = dest
            .parent()
            .ok_or_else(|| BuildError::CacheError(format!("no parent for {}", dest.display())))?;
        fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;

        let temp = parent.join(format!(
            ".{}.{}.{}.tmp",
            key.digest,
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        fs::copy(artifact, &temp).map_err(|e| BuildError::io(artifact, e))?;
        fs::rename(&temp, &dest).map_err(|e| BuildError::io(&dest, e))?;

        self.stores.fetch_add(1, Ordering::Relaxed);
        self.index.write().insert(key.clone(), dest.clone());
        debug!(transform = %key.transform, digest = %key.digest, "stored artifact");
        Ok(dest)
    }

    /// Exempt artifacts from the next sweep
    pub fn mark_live<I>(&self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.live.lock().extend(paths);
    }

    pub fn is_live(&self, path: &Path) -> bool {
        self.live.lock().contains(path)
    }

    /// Produce `output` from `input`, running `transform` only on a cache miss
    ///
    /// Concurrent calls for the same content and transformation serialise on a
    /// per-key lock, so the transformation runs at most once. On a miss any
    /// existing `output` is removed first, so the transformation must write it.
    pub fn get_or_transform<F>(
        &self,
        input: &Path,
        transform: &TransformId,
        output: &Path,
        run: F,
    ) -> BuildResult<CacheOutcome>
    where
        F: FnOnce(&Path, &Path) -> BuildResult<()>,
    {
        let key = CacheKey::new(hash_file(input)?, transform.clone());
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock();
            self.transform_locked(&key, input, output, run)
        };
        self.release_key_lock(&key, lock);
        outcome
    }

    fn transform_locked<F>(
        &self,
        key: &CacheKey,
        input: &Path,
        output: &Path,
        run: F,
    ) -> BuildResult<CacheOutcome>
    where
        F: FnOnce(&Path, &Path) -> BuildResult<()>,
    {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }

        if let Some(cached) = self.lookup(key) {
            fs::copy(&cached, output).map_err(|e| BuildError::io(output, e))?;
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.mark_live([cached]);
            return Ok(CacheOutcome::Hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match fs::remove_file(output) {
            Ok(()) => debug!(output = %output.display(), "removed stale output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::io(output, e)),
        }

        run(input, output)?;
        if !output.is_file() {
            return Err(BuildError::transformation(
                input,
                format!("{} produced no output at {}", key.transform, output.display()),
            ));
        }

        let stored = self.store(key, output)?;
        self.mark_live([stored]);
        Ok(CacheOutcome::Miss)
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(self.in_flight.lock().entry(key.clone()).or_default())
    }

    /// Drop the per-key lock once no other caller holds or waits on it
    fn release_key_lock(&self, key: &CacheKey, lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        // One reference in the map, one in `lock`
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(key);
        }
    }

    /// Remove every artifact not marked live during this run
    pub fn sweep(&self) -> BuildResult<SweepReport> {
        let live = self.live.lock().clone();
        let mut report = SweepReport::default();

        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if live.contains(entry.path()) {
                report.kept += 1;
                continue;
            }
            fs::remove_file(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;
            report.removed += 1;
        }

        self.index.write().retain(|_, path| live.contains(path));
        debug!(removed = report.removed, kept = report.kept, "cache swept");
        Ok(report)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}
