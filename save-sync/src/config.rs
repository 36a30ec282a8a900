//! Environment-driven configuration for sessions and the document store.

use std::path::PathBuf;
use std::time::Duration;

use crate::offline_queue::BackoffSchedule;

pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_BACKOFF_MS: &[u64] = &[3000, 6000, 12000, 30000, 60000];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse env var {key}={value}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("backoff schedule must contain at least one delay")]
    EmptyBackoff,
    #[error("backoff schedule must be non-decreasing (step {index} is shorter than step {previous})")]
    DecreasingBackoff { index: usize, previous: usize },
}

/// Timing knobs for a document session
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period after the last edit before an automatic save
    pub debounce: Duration,
    /// Delays between offline retries; the last step repeats forever
    pub backoff: BackoffSchedule,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let debounce_ms = env_parse("SAVE_SYNC_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?;
        let backoff_ms = env_u64_csv("SAVE_SYNC_BACKOFF_MS", DEFAULT_BACKOFF_MS)?;

        Ok(Self {
            debounce: Duration::from_millis(debounce_ms),
            backoff: BackoffSchedule::from_millis(&backoff_ms)?,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            backoff: BackoffSchedule::default(),
        }
    }
}

/// Settings for the `docstore` binary
#[derive(Debug, Clone)]
pub struct DocstoreConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: String,
    /// Directory holding one JSON file per document
    pub data_dir: PathBuf,
}

impl DocstoreConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_str("DOCSTORE_BIND", "127.0.0.1:8787"),
            data_dir: PathBuf::from(env_str("DOCSTORE_DATA_DIR", "./data/documents")),
        }
    }
}

/// Load the nearest `.env` from the current directory or its ancestors.
pub fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => tracing::info!(path = %candidate.display(), "Loaded environment from .env"),
                Err(e) => tracing::warn!(
                    path = %candidate.display(),
                    error = %e,
                    "Failed to load .env file"
                ),
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::debug!(cwd = %cwd.display(), "No .env file found; using process environment only");
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64_csv(key: &str, default: &[u64]) -> Result<Vec<u64>, ConfigError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(default.to_vec());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            item.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_defaults_without_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("SAVE_SYNC_DEBOUNCE_MS");
        std::env::remove_var("SAVE_SYNC_BACKOFF_MS");

        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.debounce, Duration::from_millis(2000));
        assert_eq!(config.backoff.delay_for(0), Duration::from_millis(3000));
        assert_eq!(config.backoff.delay_for(99), Duration::from_millis(60000));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SAVE_SYNC_DEBOUNCE_MS", "250");
        std::env::set_var("SAVE_SYNC_BACKOFF_MS", "10, 20,40");

        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.backoff.len(), 3);
        assert_eq!(config.backoff.delay_for(2), Duration::from_millis(40));

        std::env::remove_var("SAVE_SYNC_DEBOUNCE_MS");
        std::env::remove_var("SAVE_SYNC_BACKOFF_MS");
    }

    #[test]
    fn test_rejects_bad_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SAVE_SYNC_DEBOUNCE_MS", "soon");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
        std::env::remove_var("SAVE_SYNC_DEBOUNCE_MS");

        std::env::set_var("SAVE_SYNC_BACKOFF_MS", "40,20");
        assert_eq!(
            SyncConfig::from_env().unwrap_err(),
            ConfigError::DecreasingBackoff {
                index: 1,
                previous: 0
            }
        );
        std::env::remove_var("SAVE_SYNC_BACKOFF_MS");
    }
}
