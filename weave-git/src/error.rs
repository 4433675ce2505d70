use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("worktree path already exists: {0}")]
    WorktreeExists(String),

    #[error("no such worktree: {0}")]
    NoSuchWorktree(String),

    #[error("no such branch: {0}")]
    NoSuchBranch(String),

    #[error("no such pull request: #{0}")]
    NoSuchPr(u64),

    #[error("hosting CLI is not authenticated")]
    NotAuthenticated,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output was not valid utf-8")]
    InvalidUtf8,
}
