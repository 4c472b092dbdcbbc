//! Process configuration (§6): every option the core recognizes, sourced from
//! environment variables the way `examples/5dlabs-cto/crates/integrations/src/config.rs`
//! builds its `Config::default()` — `env::var("X").ok().and_then(|s| s.parse().ok())
//! .unwrap_or(default)` per field.

use std::env;

/// Recognized configuration options (§6). A missing `token_encryption_key` is fatal
/// at startup (§4.1); everything else falls back to the documented default.
#[derive(Debug, Clone)]
pub struct Config {
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_redirect_uri: String,
    pub oauth_scopes: Vec<String>,
    pub ingest_base_url: String,
    pub token_encryption_key: Option<String>,
    pub token_encryption_key_id: String,
    pub max_files_per_pr: usize,
    pub max_errors_per_file: usize,
    pub remediation_deadline_s: u64,
    pub provider_retry_max_attempts: u32,
    pub llm_endpoint: Option<String>,
    pub llm_model: String,
    pub llm_timeout_s: u64,
    /// Bound on concurrent orchestrator runs (§5 "bounded worker pool").
    pub remediation_worker_concurrency: usize,
    /// Bound on log context forwarded to the LLM per error block (§4.7 Budgets).
    pub max_log_context_chars: usize,
    /// HTTP listen port for `crates/server`.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oauth_client_id: env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
            oauth_client_secret: env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
            oauth_redirect_uri: env::var("OAUTH_REDIRECT_URI").unwrap_or_default(),
            oauth_scopes: env::var("OAUTH_SCOPES")
                .ok()
                .map(|s| s.split(',').map(|v| v.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["repo".to_string(), "admin:repo_hook".to_string()]),
            ingest_base_url: env::var("INGEST_BASE_URL")
                .unwrap_or_else(|_| "https://ingest.example.com".to_string()),
            token_encryption_key: env::var("TOKEN_ENCRYPTION_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            token_encryption_key_id: env::var("TOKEN_ENCRYPTION_KEY_ID")
                .unwrap_or_else(|_| "k1".to_string()),
            max_files_per_pr: env::var("MAX_FILES_PER_PR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            max_errors_per_file: env::var("MAX_ERRORS_PER_FILE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            remediation_deadline_s: env::var("REMEDIATION_DEADLINE_S")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            provider_retry_max_attempts: env::var("PROVIDER_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            llm_endpoint: env::var("LLM_ENDPOINT").ok(),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "claude-default".to_string()),
            llm_timeout_s: env::var("LLM_TIMEOUT_S")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            remediation_worker_concurrency: env::var("REMEDIATION_WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            max_log_context_chars: env::var("MAX_LOG_CONTEXT_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4_000),
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment. Alias for `Config::default()`,
    /// kept as a named entry point for `main`.
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_defaults_match_spec() {
        for key in [
            "MAX_FILES_PER_PR",
            "MAX_ERRORS_PER_FILE",
            "REMEDIATION_DEADLINE_S",
            "PROVIDER_RETRY_MAX_ATTEMPTS",
        ] {
            env::remove_var(key);
        }
        let config = Config::default();
        assert_eq!(config.max_files_per_pr, 3);
        assert_eq!(config.max_errors_per_file, 5);
        assert_eq!(config.remediation_deadline_s, 300);
        assert_eq!(config.provider_retry_max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("MAX_FILES_PER_PR", "7");
        let config = Config::default();
        assert_eq!(config.max_files_per_pr, 7);
        env::remove_var("MAX_FILES_PER_PR");
    }

    #[test]
    #[serial]
    fn test_missing_encryption_key_is_none_not_panic() {
        env::remove_var("TOKEN_ENCRYPTION_KEY");
        let config = Config::default();
        assert!(config.token_encryption_key.is_none());
    }
}
