//! Orchestrates scope -> AST -> build -> test in a throwaway (or
//! caller-supplied) worktree. Any failing phase short-circuits the rest.
//! A worktree this gate creates itself is always removed on return, even
//! if the phase-running task panics — the inner work runs inside a spawned
//! task so the outer scope's cleanup always executes ("guaranteed-release
//! scoping": the cleanup statement is reached regardless of how the task
//! ended, rather than relying on a synchronous `Drop`, which async code
//! can't lean on for async cleanup work).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use weave_git::{cap_stderr, janitor::WORKTREE_DIR_PREFIX, GitClient, GitError};

use crate::ast_gate::{self, AstError, AstResult, FileDiff, Policy};
use crate::work_order::WorkOrderData;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub passed: bool,
    pub duration_ms: u64,
    pub output: String,
}

impl PhaseResult {
    fn skipped() -> Self {
        Self {
            passed: false,
            duration_ms: 0,
            output: "skipped: an earlier phase failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEnv {
    pub arch: String,
    pub os: String,
    pub compiler_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildGateResult {
    pub scope: PhaseResult,
    pub ast: AstPhaseResult,
    pub build: PhaseResult,
    pub test: PhaseResult,
    pub passed: bool,
    pub build_env: BuildEnv,
    pub worktree_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstPhaseResult {
    pub passed: bool,
    pub duration_ms: u64,
    pub result: Option<AstResult>,
}

impl AstPhaseResult {
    fn skipped() -> Self {
        Self {
            passed: false,
            duration_ms: 0,
            result: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildGateConfig {
    pub build_command: Vec<String>,
    pub test_command: Vec<String>,
    pub worktree_root: PathBuf,
    pub ast_policy: Policy,
}

impl Default for BuildGateConfig {
    fn default() -> Self {
        Self {
            build_command: vec!["cargo".to_string(), "build".to_string()],
            test_command: vec!["cargo".to_string(), "test".to_string()],
            worktree_root: std::env::temp_dir(),
            ast_policy: Policy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildGateError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Ast(#[from] AstError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("build gate phases task panicked: {0}")]
    Panicked(String),
}

fn repo_relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

async fn run_command(cwd: &Path, argv: &[String]) -> std::io::Result<(bool, String)> {
    let started = Instant::now();
    let output = Command::new(&argv[0]).args(&argv[1..]).current_dir(cwd).output().await?;
    let mut combined = Vec::new();
    combined.extend_from_slice(&output.stdout);
    combined.extend_from_slice(&output.stderr);
    let _elapsed = started.elapsed();
    Ok((output.status.success(), cap_stderr(&combined)))
}

async fn capture_build_env() -> BuildEnv {
    let compiler_version = Command::new("rustc")
        .arg("--version")
        .output()
        .await
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    BuildEnv {
        arch: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        compiler_version,
    }
}

/// Runs scope -> AST -> build -> test in `worktree_path` against `base_branch`.
/// Assumes the worktree is already checked out at the work order's branch;
/// only orchestrates phase sequencing, not worktree lifecycle.
async fn run_phases(
    git: Arc<dyn GitClient>,
    wo: WorkOrderData,
    config: BuildGateConfig,
    worktree_path: PathBuf,
) -> Result<BuildGateResult, BuildGateError> {
    let build_env = capture_build_env().await;

    let scope_started = Instant::now();
    let changed = git.changed_files(&wo.base_branch).await?;
    let out_of_scope: Vec<&String> = changed
        .iter()
        .filter(|f| !wo.scope_paths.iter().any(|prefix| f.starts_with(prefix.as_str())))
        .collect();
    let scope = PhaseResult {
        passed: out_of_scope.is_empty(),
        duration_ms: scope_started.elapsed().as_millis() as u64,
        output: if out_of_scope.is_empty() {
            "all changed files within scope".to_string()
        } else {
            format!("files outside scope: {out_of_scope:?}")
        },
    };
    if !scope.passed {
        return Ok(BuildGateResult {
            scope,
            ast: AstPhaseResult::skipped(),
            build: PhaseResult::skipped(),
            test: PhaseResult::skipped(),
            passed: false,
            build_env,
            worktree_at: worktree_path.display().to_string(),
        });
    }

    let ast_started = Instant::now();
    let source_files: Vec<&String> = changed.iter().filter(|f| f.ends_with(".rs")).collect();
    let mut diffs = Vec::with_capacity(source_files.len());
    for path in &source_files {
        let base_content = git.show_file_at_ref(&wo.base_branch, path).await?;
        let new_content = tokio::fs::read_to_string(worktree_path.join(repo_relative(path))).await.ok();
        diffs.push(FileDiff {
            path: (*path).clone(),
            base_content,
            new_content,
        });
    }
    let ast_result = ast_gate::validate(&diffs, &wo.scope_paths, &config.ast_policy)?;
    let ast = AstPhaseResult {
        passed: ast_result.passed,
        duration_ms: ast_started.elapsed().as_millis() as u64,
        result: Some(ast_result),
    };
    if !ast.passed {
        return Ok(BuildGateResult {
            scope,
            ast,
            build: PhaseResult::skipped(),
            test: PhaseResult::skipped(),
            passed: false,
            build_env,
            worktree_at: worktree_path.display().to_string(),
        });
    }

    let build_started = Instant::now();
    let (build_ok, build_output) = run_command(&worktree_path, &config.build_command).await?;
    let build = PhaseResult {
        passed: build_ok,
        duration_ms: build_started.elapsed().as_millis() as u64,
        output: build_output,
    };
    if !build.passed {
        return Ok(BuildGateResult {
            scope,
            ast,
            build,
            test: PhaseResult::skipped(),
            passed: false,
            build_env,
            worktree_at: worktree_path.display().to_string(),
        });
    }

    let test_started = Instant::now();
    let (test_ok, test_output) = run_command(&worktree_path, &config.test_command).await?;
    let test = PhaseResult {
        passed: test_ok,
        duration_ms: test_started.elapsed().as_millis() as u64,
        output: test_output,
    };

    Ok(BuildGateResult {
        scope,
        ast,
        build,
        passed: test.passed,
        test,
        build_env,
        worktree_at: worktree_path.display().to_string(),
    })
}

/// Runs the full gate. If `worktree_path` is `None`, creates an ephemeral
/// worktree under `config.worktree_root` and removes it before returning,
/// regardless of whether the phases completed, errored, or panicked.
pub async fn run(
    git: Arc<dyn GitClient>,
    wo: &WorkOrderData,
    wo_id: weave_ids::Id,
    config: BuildGateConfig,
    worktree_path: Option<PathBuf>,
) -> Result<BuildGateResult, BuildGateError> {
    let (path, owned) = match worktree_path {
        Some(p) => (p, false),
        None => {
            let path = config.worktree_root.join(format!("{WORKTREE_DIR_PREFIX}-{wo_id}"));
            let branch = wo.branch_name.clone().unwrap_or_else(|| format!("agent/unassigned/{wo_id}"));
            git.add_worktree(&path, &branch).await?;
            (path, true)
        }
    };

    let git_for_task = Arc::clone(&git);
    let wo_for_task = wo.clone();
    let path_for_task = path.clone();
    let handle = tokio::spawn(async move { run_phases(git_for_task, wo_for_task, config, path_for_task).await });
    let result = handle.await;

    if owned {
        let _ = git.remove_worktree(&path).await;
        let _ = tokio::fs::remove_dir_all(&path).await;
    }

    match result {
        Ok(inner) => inner,
        Err(join_err) => Err(BuildGateError::Panicked(join_err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_git::FakeGitClient;

    fn wo() -> WorkOrderData {
        WorkOrderData {
            status: crate::work_order::WorkOrderStatus::Mutating,
            revision: 1,
            task_id: None,
            agent_key: Some("a1".to_string()),
            branch_name: Some("agent/a1/wo1".to_string()),
            base_branch: "main".to_string(),
            repo_root: None,
            commit_hash: None,
            pr_id: None,
            pr_url: None,
            checks_status: None,
            checks_at: None,
            files_changed: Vec::new(),
            scope_paths: vec!["/pkg/".to_string()],
            attempt: 0,
            last_error: None,
            last_error_at: None,
            worktree_path: None,
            last_event: None,
            event_count: 0,
            allow_public_api_change: false,
            description: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn scope_violation_short_circuits_remaining_phases() {
        let git = Arc::new(FakeGitClient::new());
        git.set_changed_files("main", vec!["/outside/hack.rs".to_string()]).await;
        let tmp = tempfile::tempdir().unwrap();

        let result = run(git, &wo(), weave_ids::Id::new(), BuildGateConfig::default(), Some(tmp.path().to_path_buf()))
            .await
            .unwrap();

        assert!(!result.scope.passed);
        assert!(!result.ast.passed);
        assert!(result.ast.result.is_none());
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn ast_violation_short_circuits_build_and_test() {
        let git = Arc::new(FakeGitClient::new());
        git.set_changed_files("main", vec!["/pkg/foo.rs".to_string()]).await;
        git.set_base_file("/pkg/foo.rs", "pub fn remove() {}").await;
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("pkg")).await.unwrap();
        tokio::fs::write(tmp.path().join("pkg/foo.rs"), "").await.unwrap();

        let result = run(git, &wo(), weave_ids::Id::new(), BuildGateConfig::default(), Some(tmp.path().to_path_buf()))
            .await
            .unwrap();

        assert!(result.scope.passed);
        assert!(!result.ast.passed);
        assert_eq!(result.build.duration_ms, 0);
        assert!(!result.passed);
    }
}
