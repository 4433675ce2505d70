//! The narrow git/PR interface every caller in the orchestrator depends on
//! through `Arc<dyn GitClient>`, never a concrete implementation directly.

use std::path::Path;

use async_trait::async_trait;

use crate::error::GitError;
use crate::types::{ChecksStatus, PrInfo, RepoStatus};

/// Diffs and changed-file listings are computed against this ref.
pub const DEFAULT_BASE_REF: &str = "HEAD";

/// Diffs larger than this are truncated with a marker appended (§4.9's
/// "unified diff vs. base (capped at 500 KiB)").
pub const MAX_DIFF_BYTES: usize = 500 * 1024;

/// Captured subprocess stderr is capped to this many bytes before being
/// folded into a [`GitError::CommandFailed`].
pub const MAX_STDERR_BYTES: usize = 8 * 1024;

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn create_branch(&self, name: &str, base: &str) -> Result<(), GitError>;
    async fn checkout(&self, branch: &str) -> Result<(), GitError>;

    /// Stages all changes and commits. Returns the new commit hash. A no-op
    /// working tree still produces a hash (the current HEAD) rather than an error.
    async fn commit_all(&self, message: &str) -> Result<String, GitError>;

    async fn current_hash(&self) -> Result<String, GitError>;

    async fn changed_files(&self, base: &str) -> Result<Vec<String>, GitError>;

    /// Unified diff against `base`, capped at [`MAX_DIFF_BYTES`].
    async fn diff_vs_base(&self, base: &str) -> Result<String, GitError>;

    async fn push(&self, branch: &str) -> Result<(), GitError>;

    async fn create_pr(&self, title: &str, body: &str, base: &str, head: &str) -> Result<PrInfo, GitError>;
    async fn merge_pr(&self, number: u64) -> Result<(), GitError>;
    async fn pr_checks_status(&self, number: u64) -> Result<ChecksStatus, GitError>;

    async fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError>;
    async fn remove_worktree(&self, path: &Path) -> Result<(), GitError>;
    async fn prune_worktrees(&self) -> Result<(), GitError>;

    async fn repo_status(&self) -> Result<RepoStatus, GitError>;

    /// Confirms the hosting CLI (e.g. `gh`) has valid credentials.
    async fn hosting_cli_auth_check(&self) -> Result<bool, GitError>;

    /// Shows the content of `path` at `rref`, or `None` if the path doesn't
    /// exist at that ref (a new file relative to base) rather than an error.
    async fn show_file_at_ref(&self, rref: &str, path: &str) -> Result<Option<String>, GitError>;

    /// Dry-runs a unified diff against the working tree without touching it.
    /// Returns `false` rather than erroring when the patch doesn't apply cleanly.
    async fn apply_patch_check(&self, patch: &str) -> Result<bool, GitError>;

    /// Applies a unified diff to the working tree.
    async fn apply_patch(&self, patch: &str) -> Result<(), GitError>;
}

/// Truncates `diff` to `MAX_DIFF_BYTES`, appending a marker if cut.
/// Truncation happens on a UTF-8 boundary.
pub fn cap_diff(mut diff: String) -> String {
    if diff.len() <= MAX_DIFF_BYTES {
        return diff;
    }
    let mut cut = MAX_DIFF_BYTES;
    while cut > 0 && !diff.is_char_boundary(cut) {
        cut -= 1;
    }
    diff.truncate(cut);
    diff.push_str("\n... [diff truncated]\n");
    diff
}

/// Truncates stderr to `MAX_STDERR_BYTES` for inclusion in a [`GitError`].
pub fn cap_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    if text.len() <= MAX_STDERR_BYTES {
        return text.into_owned();
    }
    let mut cut = MAX_STDERR_BYTES;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [stderr truncated]", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_diff_leaves_small_diffs_untouched() {
        let small = "a small diff".to_string();
        assert_eq!(cap_diff(small.clone()), small);
    }

    #[test]
    fn cap_diff_truncates_oversized_diffs() {
        let big = "x".repeat(MAX_DIFF_BYTES + 100);
        let capped = cap_diff(big);
        assert!(capped.len() < MAX_DIFF_BYTES + 100);
        assert!(capped.ends_with("[diff truncated]\n"));
    }

    #[test]
    fn cap_stderr_truncates_long_output() {
        let big = vec![b'e'; MAX_STDERR_BYTES + 50];
        let capped = cap_stderr(&big);
        assert!(capped.contains("[stderr truncated]"));
    }
}
