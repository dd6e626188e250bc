//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::git::repository::DEFAULT_TOKEN_VAR;

/// Default seconds between backup ticks.
const DEFAULT_BACKUP_INTERVAL_SECS: u64 = 60;

/// Environment variable naming the local backup directory.
pub const BACKUP_DIR_VAR: &str = "SHARDLOG_BACKUP_DIR";

/// Environment variable naming the remote repository URL.
pub const REPO_URL_VAR: &str = "SHARDLOG_REPO_URL";

/// Environment variable overriding the backup interval, in seconds.
pub const BACKUP_INTERVAL_VAR: &str = "SHARDLOG_BACKUP_INTERVAL_SECS";

/// Environment variable overriding which variable the credential is read
/// from.
pub const TOKEN_VAR_VAR: &str = "SHARDLOG_TOKEN_VAR";

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// An environment variable holds an unusable value.
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Configuration for the sync engine and its scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local directory holding the checkout and the shard files.
    pub backup_dir: PathBuf,

    /// URL of the remote backup repository.
    pub repo_url: String,

    /// Interval between backup ticks.
    pub backup_interval: Duration,

    /// Name of the environment variable holding the remote credential.
    pub token_var: String,
}

impl EngineConfig {
    /// Creates a configuration with the default interval and credential
    /// variable.
    pub fn new(backup_dir: impl Into<PathBuf>, repo_url: impl Into<String>) -> Self {
        EngineConfig {
            backup_dir: backup_dir.into(),
            repo_url: repo_url.into(),
            backup_interval: Duration::from_secs(DEFAULT_BACKUP_INTERVAL_SECS),
            token_var: DEFAULT_TOKEN_VAR.to_string(),
        }
    }

    /// Overrides the backup interval.
    pub fn with_backup_interval(mut self, interval: Duration) -> Self {
        self.backup_interval = interval;
        self
    }

    /// Overrides the credential environment variable.
    pub fn with_token_var(mut self, var: impl Into<String>) -> Self {
        self.token_var = var.into();
        self
    }

    /// Loads the configuration from the environment.
    ///
    /// `SHARDLOG_BACKUP_DIR` and `SHARDLOG_REPO_URL` are required;
    /// `SHARDLOG_BACKUP_INTERVAL_SECS` and `SHARDLOG_TOKEN_VAR` override
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backup_dir =
            std::env::var(BACKUP_DIR_VAR).map_err(|_| ConfigError::MissingVar(BACKUP_DIR_VAR))?;
        let repo_url =
            std::env::var(REPO_URL_VAR).map_err(|_| ConfigError::MissingVar(REPO_URL_VAR))?;

        let mut config = EngineConfig::new(backup_dir, repo_url);

        if let Ok(value) = std::env::var(BACKUP_INTERVAL_VAR) {
            let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                var: BACKUP_INTERVAL_VAR,
                value,
            })?;
            config.backup_interval = Duration::from_secs(secs);
        }
        if let Ok(var) = std::env::var(TOKEN_VAR_VAR) {
            config.token_var = var;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = EngineConfig::new("backup", "https://example.com/logs.git");
        assert_eq!(config.backup_interval, Duration::from_secs(60));
        assert_eq!(config.token_var, DEFAULT_TOKEN_VAR);
    }

    #[test]
    fn builders_override_defaults() {
        let config = EngineConfig::new("backup", "url")
            .with_backup_interval(Duration::from_secs(5))
            .with_token_var("OTHER_TOKEN");
        assert_eq!(config.backup_interval, Duration::from_secs(5));
        assert_eq!(config.token_var, "OTHER_TOKEN");
    }

    /// Env-var cases share one test because the variables are process-wide.
    #[test]
    fn from_env_round_trip() {
        // SAFETY: no other test reads these variables.
        unsafe {
            std::env::remove_var(BACKUP_DIR_VAR);
            std::env::remove_var(REPO_URL_VAR);
            std::env::remove_var(BACKUP_INTERVAL_VAR);
        }

        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::MissingVar(BACKUP_DIR_VAR))
        ));

        unsafe {
            std::env::set_var(BACKUP_DIR_VAR, "logs");
            std::env::set_var(REPO_URL_VAR, "https://example.com/logs.git");
            std::env::set_var(BACKUP_INTERVAL_VAR, "120");
        }
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("logs"));
        assert_eq!(config.backup_interval, Duration::from_secs(120));

        unsafe { std::env::set_var(BACKUP_INTERVAL_VAR, "not a number") };
        assert!(matches!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        unsafe {
            std::env::remove_var(BACKUP_DIR_VAR);
            std::env::remove_var(REPO_URL_VAR);
            std::env::remove_var(BACKUP_INTERVAL_VAR);
        }
    }
}
