//! Storage connection settings, per the external-interfaces contract: a
//! connection-string override, individual host/user/database/ssl overrides,
//! and an API-key file pointer. API keys themselves are never persisted by
//! this crate or by the orchestrator — only the environment variable *name*
//! naming where to find one is stored in router config; this module only
//! resolves which file (if any) to read such variables from at process start.

use std::env;
use std::path::PathBuf;

/// Resolved database connection settings for the graph store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbSettings {
    /// Full connection string, when set; takes precedence over the individual fields.
    pub connection_string: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: Option<String>,
}

impl DbSettings {
    /// Reads `WEAVE_DB_URL`, falling back to `WEAVE_DB_HOST` / `WEAVE_DB_USER` /
    /// `WEAVE_DB_NAME` / `WEAVE_DB_SSLMODE` overrides when no full URL is set.
    pub fn from_env() -> Self {
        Self {
            connection_string: env::var("WEAVE_DB_URL").ok(),
            host: env::var("WEAVE_DB_HOST").ok(),
            user: env::var("WEAVE_DB_USER").ok(),
            database: env::var("WEAVE_DB_NAME").ok(),
            ssl_mode: env::var("WEAVE_DB_SSLMODE").ok(),
        }
    }

    /// Whether at least one field is set.
    pub fn is_configured(&self) -> bool {
        self.connection_string.is_some()
            || self.host.is_some()
            || self.user.is_some()
            || self.database.is_some()
    }
}

/// Top-level settings assembled at process start. Individual subsystems
/// (router, graph store, git client) each read their own narrower env vars;
/// this struct only covers the ambient cross-cutting ones named in §6.
#[derive(Clone, Debug, Default)]
pub struct WeaveSettings {
    pub db: DbSettings,
    /// Path to a file containing an API key, as an alternative to inlining
    /// the key in an env var. When set, router role resolution reads this
    /// file lazily rather than the provider's `api_key_env` variable.
    pub api_key_file: Option<PathBuf>,
    /// Repository root this orchestrator instance owns (one instance, one repo; §1).
    pub repo_root: Option<PathBuf>,
}

impl WeaveSettings {
    /// Reads all ambient settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            db: DbSettings::from_env(),
            api_key_file: env::var_os("WEAVE_API_KEY_FILE").map(PathBuf::from),
            repo_root: env::var_os("WEAVE_REPO_ROOT").map(PathBuf::from),
        }
    }

    /// Reads the API key from `api_key_file` if configured, else from `fallback_env`.
    pub fn resolve_api_key(&self, fallback_env: &str) -> Option<String> {
        if let Some(path) = &self.api_key_file {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let trimmed = contents.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        env::var(fallback_env).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_settings_is_configured_false_when_empty() {
        let s = DbSettings::default();
        assert!(!s.is_configured());
    }

    #[test]
    fn db_settings_is_configured_true_with_connection_string() {
        let s = DbSettings {
            connection_string: Some("postgres://x".to_string()),
            ..Default::default()
        };
        assert!(s.is_configured());
    }

    #[test]
    fn resolve_api_key_prefers_file_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.txt");
        std::fs::write(&path, "sk-from-file\n").unwrap();

        std::env::set_var("WEAVE_CONFIG_TEST_KEY_ENV", "sk-from-env");
        let settings = WeaveSettings {
            api_key_file: Some(path),
            ..Default::default()
        };
        let resolved = settings.resolve_api_key("WEAVE_CONFIG_TEST_KEY_ENV");
        std::env::remove_var("WEAVE_CONFIG_TEST_KEY_ENV");
        assert_eq!(resolved.as_deref(), Some("sk-from-file"));
    }

    #[test]
    fn resolve_api_key_falls_back_to_env_when_no_file() {
        std::env::set_var("WEAVE_CONFIG_TEST_KEY_ENV2", "sk-from-env-2");
        let settings = WeaveSettings::default();
        let resolved = settings.resolve_api_key("WEAVE_CONFIG_TEST_KEY_ENV2");
        std::env::remove_var("WEAVE_CONFIG_TEST_KEY_ENV2");
        assert_eq!(resolved.as_deref(), Some("sk-from-env-2"));
    }
}
