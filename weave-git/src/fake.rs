//! In-memory `GitClient` for deterministic tests. Every `weave-core` test
//! that drives the build gate or synthesis reviewer exercises this one
//! instead of shelling out to a real repository.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::{cap_diff, GitClient};
use crate::error::GitError;
use crate::types::{ChecksStatus, PrInfo, RepoStatus};

#[derive(Default)]
struct State {
    branches: HashMap<String, String>,
    current_branch: String,
    commit_counter: u64,
    changed_files: HashMap<String, Vec<String>>,
    diffs: HashMap<String, String>,
    base_files: HashMap<String, String>,
    pushed: HashSet<String>,
    worktrees: HashMap<PathBuf, String>,
    prs: HashMap<u64, PrInfo>,
    next_pr_number: u64,
    checks: HashMap<u64, ChecksStatus>,
    auth_ok: bool,
    clean: bool,
    patches_apply: bool,
    applied_patches: Vec<String>,
}

/// Configurable in-memory git/PR double.
pub struct FakeGitClient {
    state: Mutex<State>,
}

impl Default for FakeGitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGitClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current_branch: "main".to_string(),
                next_pr_number: 1,
                auth_ok: true,
                clean: true,
                patches_apply: true,
                ..Default::default()
            }),
        }
    }

    /// Configures whether `apply_patch_check`/`apply_patch` succeed.
    pub async fn set_patches_apply(&self, applies: bool) {
        self.state.lock().await.patches_apply = applies;
    }

    pub async fn applied_patches(&self) -> Vec<String> {
        self.state.lock().await.applied_patches.clone()
    }

    /// Declares the set of paths `changed_files(base)` should return.
    pub async fn set_changed_files(&self, base: &str, files: Vec<String>) {
        self.state.lock().await.changed_files.insert(base.to_string(), files);
    }

    /// Declares the diff text `diff_vs_base(base)` should return.
    pub async fn set_diff(&self, base: &str, diff: impl Into<String>) {
        self.state.lock().await.diffs.insert(base.to_string(), diff.into());
    }

    /// Declares the content of `path` at `base` (absent ⇒ `show_file_at_ref` returns `None`).
    pub async fn set_base_file(&self, rref_path: impl Into<String>, content: impl Into<String>) {
        self.state.lock().await.base_files.insert(rref_path.into(), content.into());
    }

    pub async fn set_auth_ok(&self, ok: bool) {
        self.state.lock().await.auth_ok = ok;
    }

    pub async fn set_checks_status(&self, pr: u64, status: ChecksStatus) {
        self.state.lock().await.checks.insert(pr, status);
    }

    pub async fn worktree_count(&self) -> usize {
        self.state.lock().await.worktrees.len()
    }

    pub async fn was_pushed(&self, branch: &str) -> bool {
        self.state.lock().await.pushed.contains(branch)
    }

    pub async fn merged_pr_numbers(&self) -> Vec<u64> {
        let state = self.state.lock().await;
        state.prs.keys().copied().collect()
    }
}

#[async_trait]
impl GitClient for FakeGitClient {
    async fn create_branch(&self, name: &str, base: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().await;
        let base_hash = state.branches.get(base).cloned().unwrap_or_else(|| "0".repeat(40));
        state.branches.insert(name.to_string(), base_hash);
        Ok(())
    }

    async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().await;
        if !state.branches.contains_key(branch) && branch != "main" {
            return Err(GitError::NoSuchBranch(branch.to_string()));
        }
        state.current_branch = branch.to_string();
        Ok(())
    }

    async fn commit_all(&self, _message: &str) -> Result<String, GitError> {
        let mut state = self.state.lock().await;
        state.commit_counter += 1;
        let hash = format!("{:040x}", state.commit_counter);
        let branch = state.current_branch.clone();
        state.branches.insert(branch, hash.clone());
        state.clean = true;
        Ok(hash)
    }

    async fn current_hash(&self) -> Result<String, GitError> {
        let state = self.state.lock().await;
        Ok(state
            .branches
            .get(&state.current_branch)
            .cloned()
            .unwrap_or_else(|| "0".repeat(40)))
    }

    async fn changed_files(&self, base: &str) -> Result<Vec<String>, GitError> {
        let state = self.state.lock().await;
        Ok(state.changed_files.get(base).cloned().unwrap_or_default())
    }

    async fn diff_vs_base(&self, base: &str) -> Result<String, GitError> {
        let state = self.state.lock().await;
        Ok(cap_diff(state.diffs.get(base).cloned().unwrap_or_default()))
    }

    async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.state.lock().await.pushed.insert(branch.to_string());
        Ok(())
    }

    async fn create_pr(&self, _title: &str, _body: &str, _base: &str, _head: &str) -> Result<PrInfo, GitError> {
        let mut state = self.state.lock().await;
        let number = state.next_pr_number;
        state.next_pr_number += 1;
        let info = PrInfo {
            number,
            url: format!("https://example.invalid/pr/{number}"),
        };
        state.prs.insert(number, info.clone());
        Ok(info)
    }

    async fn merge_pr(&self, number: u64) -> Result<(), GitError> {
        let state = self.state.lock().await;
        if !state.prs.contains_key(&number) {
            return Err(GitError::NoSuchPr(number));
        }
        Ok(())
    }

    async fn pr_checks_status(&self, number: u64) -> Result<ChecksStatus, GitError> {
        let state = self.state.lock().await;
        Ok(state.checks.get(&number).copied().unwrap_or(ChecksStatus::NoChecks))
    }

    async fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().await;
        if state.worktrees.contains_key(path) {
            return Err(GitError::WorktreeExists(path.display().to_string()));
        }
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), GitError> {
        let mut state = self.state.lock().await;
        state
            .worktrees
            .remove(path)
            .ok_or_else(|| GitError::NoSuchWorktree(path.display().to_string()))?;
        Ok(())
    }

    async fn prune_worktrees(&self) -> Result<(), GitError> {
        Ok(())
    }

    async fn repo_status(&self) -> Result<RepoStatus, GitError> {
        let state = self.state.lock().await;
        Ok(RepoStatus {
            clean: state.clean,
            changed_paths: Vec::new(),
        })
    }

    async fn hosting_cli_auth_check(&self) -> Result<bool, GitError> {
        Ok(self.state.lock().await.auth_ok)
    }

    async fn show_file_at_ref(&self, _rref: &str, path: &str) -> Result<Option<String>, GitError> {
        Ok(self.state.lock().await.base_files.get(path).cloned())
    }

    async fn apply_patch_check(&self, _patch: &str) -> Result<bool, GitError> {
        Ok(self.state.lock().await.patches_apply)
    }

    async fn apply_patch(&self, patch: &str) -> Result<(), GitError> {
        let mut state = self.state.lock().await;
        if !state.patches_apply {
            return Err(GitError::CommandFailed {
                command: "git apply -".to_string(),
                exit_code: 1,
                stderr: "patch does not apply".to_string(),
            });
        }
        state.applied_patches.push(patch.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_branch_then_checkout_succeeds() {
        let client = FakeGitClient::new();
        client.create_branch("feature/x", "main").await.unwrap();
        client.checkout("feature/x").await.unwrap();
    }

    #[tokio::test]
    async fn checkout_unknown_branch_is_error() {
        let client = FakeGitClient::new();
        assert!(matches!(client.checkout("nope").await, Err(GitError::NoSuchBranch(_))));
    }

    #[tokio::test]
    async fn commit_all_advances_current_hash() {
        let client = FakeGitClient::new();
        let before = client.current_hash().await.unwrap();
        let after = client.commit_all("msg").await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn changed_files_returns_configured_list() {
        let client = FakeGitClient::new();
        client.set_changed_files("main", vec!["src/lib.rs".to_string()]).await;
        let files = client.changed_files("main").await.unwrap();
        assert_eq!(files, vec!["src/lib.rs".to_string()]);
    }

    #[tokio::test]
    async fn show_file_at_ref_missing_returns_none() {
        let client = FakeGitClient::new();
        assert_eq!(client.show_file_at_ref("main", "new.rs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn worktree_add_remove_roundtrips() {
        let client = FakeGitClient::new();
        let path = PathBuf::from("/tmp/weave-wo/abc");
        client.add_worktree(&path, "feature/x").await.unwrap();
        assert_eq!(client.worktree_count().await, 1);
        client.remove_worktree(&path).await.unwrap();
        assert_eq!(client.worktree_count().await, 0);
    }

    #[tokio::test]
    async fn add_worktree_twice_errors() {
        let client = FakeGitClient::new();
        let path = PathBuf::from("/tmp/weave-wo/dup");
        client.add_worktree(&path, "feature/x").await.unwrap();
        assert!(matches!(
            client.add_worktree(&path, "feature/x").await,
            Err(GitError::WorktreeExists(_))
        ));
    }

    #[tokio::test]
    async fn merge_pr_unknown_number_errors() {
        let client = FakeGitClient::new();
        assert!(matches!(client.merge_pr(999).await, Err(GitError::NoSuchPr(999))));
    }

    #[tokio::test]
    async fn create_pr_then_merge_succeeds() {
        let client = FakeGitClient::new();
        let pr = client.create_pr("title", "body", "main", "feature/x").await.unwrap();
        client.merge_pr(pr.number).await.unwrap();
    }

    #[tokio::test]
    async fn apply_patch_records_it_when_configured_to_apply() {
        let client = FakeGitClient::new();
        client.apply_patch("diff --git a/x b/x").await.unwrap();
        assert_eq!(client.applied_patches().await, vec!["diff --git a/x b/x".to_string()]);
    }

    #[tokio::test]
    async fn apply_patch_fails_when_configured_not_to_apply() {
        let client = FakeGitClient::new();
        client.set_patches_apply(false).await;
        assert!(client.apply_patch("diff").await.is_err());
        assert!(!client.apply_patch_check("diff").await.unwrap());
    }
}
