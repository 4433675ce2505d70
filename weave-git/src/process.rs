//! Shells out to the real `git` and `gh` CLIs via `tokio::process::Command`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::client::{cap_diff, cap_stderr, GitClient, MAX_STDERR_BYTES};
use crate::error::GitError;
use crate::types::{ChecksStatus, PrInfo, RepoStatus};

/// Invoked with `(program, args, exit_code)` after every subprocess call,
/// success or failure, for callers that want to mirror commands into their
/// own audit log.
pub type LogHook = Arc<dyn Fn(&str, &[String], i32) + Send + Sync>;

pub struct ProcessGitClient {
    repo_root: PathBuf,
    log_hook: Option<LogHook>,
}

impl ProcessGitClient {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            log_hook: None,
        }
    }

    pub fn with_log_hook(mut self, hook: LogHook) -> Self {
        self.log_hook = Some(hook);
        self
    }

    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String, GitError> {
        let owned_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                command: format!("{program} {}", owned_args.join(" ")),
                source,
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if let Some(hook) = &self.log_hook {
            hook(program, &owned_args, exit_code);
        }

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("{program} {}", owned_args.join(" ")),
                exit_code,
                stderr: cap_stderr(&output.stderr[..output.stderr.len().min(MAX_STDERR_BYTES * 4)]),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, GitError> {
        self.run("git", args, &self.repo_root).await
    }

    async fn run_gh(&self, args: &[&str]) -> Result<String, GitError> {
        self.run("gh", args, &self.repo_root).await
    }

    async fn run_git_stdin(&self, args: &[&str], stdin_data: &str) -> Result<String, GitError> {
        let owned_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|source| GitError::Spawn {
                command: format!("git {}", owned_args.join(" ")),
                source,
            })?;

        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            let _ = stdin.write_all(stdin_data.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(|source| GitError::Spawn {
            command: format!("git {}", owned_args.join(" ")),
            source,
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if let Some(hook) = &self.log_hook {
            hook("git", &owned_args, exit_code);
        }

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", owned_args.join(" ")),
                exit_code,
                stderr: cap_stderr(&output.stderr[..output.stderr.len().min(MAX_STDERR_BYTES * 4)]),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)
    }
}

#[async_trait]
impl GitClient for ProcessGitClient {
    async fn create_branch(&self, name: &str, base: &str) -> Result<(), GitError> {
        self.run_git(&["branch", name, base]).await?;
        Ok(())
    }

    async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run_git(&["checkout", branch]).await?;
        Ok(())
    }

    async fn commit_all(&self, message: &str) -> Result<String, GitError> {
        self.run_git(&["add", "-A"]).await?;
        let status = self.run_git(&["status", "--porcelain"]).await?;
        if !status.trim().is_empty() {
            self.run_git(&["commit", "-m", message]).await?;
        }
        self.current_hash().await
    }

    async fn current_hash(&self) -> Result<String, GitError> {
        Ok(self.run_git(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn changed_files(&self, base: &str) -> Result<Vec<String>, GitError> {
        let out = self.run_git(&["diff", "--name-only", base]).await?;
        Ok(out.lines().map(|s| s.to_string()).filter(|s| !s.is_empty()).collect())
    }

    async fn diff_vs_base(&self, base: &str) -> Result<String, GitError> {
        let diff = self.run_git(&["diff", base]).await?;
        Ok(cap_diff(diff))
    }

    async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.run_git(&["push", "--set-upstream", "origin", branch]).await?;
        Ok(())
    }

    async fn create_pr(&self, title: &str, body: &str, base: &str, head: &str) -> Result<PrInfo, GitError> {
        let out = self
            .run_gh(&["pr", "create", "--title", title, "--body", body, "--base", base, "--head", head])
            .await?;
        let url = out.trim().to_string();
        let number = url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(PrInfo { number, url })
    }

    async fn merge_pr(&self, number: u64) -> Result<(), GitError> {
        self.run_gh(&["pr", "merge", &number.to_string(), "--merge"]).await?;
        Ok(())
    }

    async fn pr_checks_status(&self, number: u64) -> Result<ChecksStatus, GitError> {
        let out = self.run_gh(&["pr", "checks", &number.to_string()]).await;
        match out {
            Ok(text) => {
                if text.is_empty() {
                    Ok(ChecksStatus::NoChecks)
                } else if text.to_lowercase().contains("fail") {
                    Ok(ChecksStatus::Failing)
                } else if text.to_lowercase().contains("pending") {
                    Ok(ChecksStatus::Pending)
                } else {
                    Ok(ChecksStatus::Passing)
                }
            }
            Err(GitError::CommandFailed { .. }) => Ok(ChecksStatus::Pending),
            Err(e) => Err(e),
        }
    }

    async fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        if path.exists() {
            return Err(GitError::WorktreeExists(path.display().to_string()));
        }
        self.run_git(&["worktree", "add", &path.to_string_lossy(), branch]).await?;
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), GitError> {
        self.run_git(&["worktree", "remove", "--force", &path.to_string_lossy()]).await?;
        Ok(())
    }

    async fn prune_worktrees(&self) -> Result<(), GitError> {
        self.run_git(&["worktree", "prune"]).await?;
        Ok(())
    }

    async fn repo_status(&self) -> Result<RepoStatus, GitError> {
        let out = self.run_git(&["status", "--porcelain"]).await?;
        let changed_paths: Vec<String> = out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.trim_start().split_whitespace().last().unwrap_or(l).to_string())
            .collect();
        Ok(RepoStatus {
            clean: changed_paths.is_empty(),
            changed_paths,
        })
    }

    async fn hosting_cli_auth_check(&self) -> Result<bool, GitError> {
        match self.run_gh(&["auth", "status"]).await {
            Ok(_) => Ok(true),
            Err(GitError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn show_file_at_ref(&self, rref: &str, path: &str) -> Result<Option<String>, GitError> {
        match self.run_git(&["show", &format!("{rref}:{path}")]).await {
            Ok(contents) => Ok(Some(contents)),
            Err(GitError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn apply_patch_check(&self, patch: &str) -> Result<bool, GitError> {
        match self.run_git_stdin(&["apply", "--check", "-"], patch).await {
            Ok(_) => Ok(true),
            Err(GitError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn apply_patch(&self, patch: &str) -> Result<(), GitError> {
        self.run_git_stdin(&["apply", "-"], patch).await?;
        Ok(())
    }
}
