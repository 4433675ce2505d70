//! Wire-neutral types returned by [`crate::GitClient`].

/// Working-tree cleanliness as reported by `git status --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub clean: bool,
    pub changed_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksStatus {
    Pending,
    Passing,
    Failing,
    /// The hosting provider reports no checks configured for this PR.
    NoChecks,
}
