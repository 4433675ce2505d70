//! Canonicalises and jails filesystem paths under a configured root. The one
//! process-wide singleton this crate permits — construct it once at startup
//! and share it as `Arc<PathGuard>`.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathGuardError {
    #[error("failed to canonicalize root {0}: {1}")]
    BadRoot(PathBuf, std::io::Error),
    #[error("failed to canonicalize parent of {0}: {1}")]
    BadParent(PathBuf, std::io::Error),
    #[error("path {0} escapes the configured root")]
    Escapes(PathBuf),
    #[error("path {0} has no parent component")]
    NoParent(PathBuf),
}

/// A canonicalized root directory that every resolved path is checked against.
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathGuardError> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|e| PathGuardError::BadRoot(root.as_ref().to_path_buf(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `input` relative to the root and verifies it doesn't escape.
    /// Symlinks are resolved where possible; a nonexistent leaf component is
    /// permitted (its parent is canonicalized and the leaf re-joined) since
    /// callers often resolve a path for a file about to be created.
    pub fn resolve(&self, input: &Path) -> Result<PathBuf, PathGuardError> {
        let candidate = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };

        let resolved = match candidate.canonicalize() {
            Ok(p) => p,
            Err(_) => {
                let parent = candidate
                    .parent()
                    .ok_or_else(|| PathGuardError::NoParent(candidate.clone()))?;
                let leaf = candidate
                    .file_name()
                    .ok_or_else(|| PathGuardError::NoParent(candidate.clone()))?;
                let canon_parent = parent
                    .canonicalize()
                    .map_err(|e| PathGuardError::BadParent(parent.to_path_buf(), e))?;
                canon_parent.join(leaf)
            }
        };

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(PathGuardError::Escapes(resolved))
        }
    }
}
