use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use engagement_core::{EngineConfig, EngineError};
use thiserror::Error;

use crate::service::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Sqlite { path: PathBuf },
    Postgres { url: String },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite { .. } => "sqlite",
            Backend::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub backend: Backend,
    pub log_level: String,
    pub engine: EngineConfig,
    pub retry: RetryPolicy,
    pub allowed_origin: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", "0.0.0.0:3000".parse().ok())?;

        let backend = match lookup("BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("sqlite") => Backend::Sqlite {
                path: lookup("SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("engagement.db")),
            },
            Some("postgres") => Backend::Postgres {
                url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let log_level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let engine = match lookup("ENGINE_CONFIG") {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                EngineConfig::from_toml_str(&content)?
            }
            None => EngineConfig::default(),
        };

        let max_attempts: u32 = parse_or(&lookup, "STALE_WRITE_RETRIES", Some(3))?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "STALE_WRITE_RETRIES",
                value: "0".to_string(),
            });
        }
        let backoff_ms: u64 = parse_or(&lookup, "RETRY_BACKOFF_MS", Some(100))?;

        let allowed_origin = lookup("ALLOWED_ORIGIN")
            .unwrap_or_default()
            .split(',')
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();

        Ok(Self {
            bind_addr,
            backend,
            log_level,
            engine,
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(backoff_ms),
            },
            allowed_origin,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}
