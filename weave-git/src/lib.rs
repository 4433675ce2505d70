//! Git/PR client abstraction: a narrow trait covering everything the build
//! gate and synthesis reviewer need, with a process-backed implementation
//! and an in-memory fake for deterministic tests.

mod client;
mod error;
mod fake;
pub mod janitor;
mod process;
mod types;

pub use client::{cap_diff, cap_stderr, GitClient, DEFAULT_BASE_REF, MAX_DIFF_BYTES, MAX_STDERR_BYTES};
pub use error::GitError;
pub use fake::FakeGitClient;
pub use process::{LogHook, ProcessGitClient};
pub use types::{ChecksStatus, PrInfo, RepoStatus};
