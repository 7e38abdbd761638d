//! Content digests and transformation identities

use crate::error::{BuildError, BuildResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// SHA-256 of a file's bytes, as lowercase hex
pub fn hash_file(path: &Path) -> BuildResult<String> {
    let mut file = File::open(path).map_err(|e| BuildError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|e| BuildError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a byte slice, as lowercase hex
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Identity of a transformation: a name plus a short hash of everything that
/// changes its output (tool, flags)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransformId(String);

impl TransformId {
    pub fn new<S: AsRef<str>>(name: &str, parts: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_ref().as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        let name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self(format!("{}-{}", name, &digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
