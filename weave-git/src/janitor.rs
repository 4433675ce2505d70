//! Removes abandoned worktree directories and prunes dangling worktree
//! metadata. Run periodically (or at startup) rather than after every
//! work order, since a crashed build gate can leave a worktree behind.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::client::GitClient;
use crate::error::GitError;

/// Default directory prefix the build gate creates its own worktrees under.
pub const WORKTREE_DIR_PREFIX: &str = "weave-wo";

/// Removes subdirectories of `root` whose name starts with
/// [`WORKTREE_DIR_PREFIX`] and whose modification time is older than `max_age`,
/// then asks `git` to prune any worktree metadata left pointing at them.
/// Returns the list of directories removed.
pub async fn sweep(
    git: &dyn GitClient,
    root: &Path,
    max_age: Duration,
) -> Result<Vec<PathBuf>, GitError> {
    let mut removed = Vec::new();
    let now = SystemTime::now();

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(GitError::Io(e)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(GitError::Io)? {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !name.starts_with(WORKTREE_DIR_PREFIX) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();

        if age < max_age {
            continue;
        }

        if path.is_dir() {
            let _ = git.remove_worktree(&path).await;
            if tokio::fs::remove_dir_all(&path).await.is_ok() {
                removed.push(path);
            }
        }
    }

    git.prune_worktrees().await?;
    Ok(removed)
}
