//! Runtime settings from the environment, optionally seeded from a `.env` file.

use crate::error::ConfigError;
use std::str::FromStr;

/// What an update does with collection elements added after the owner was persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdditionPolicy {
    /// Leave them unwritten and log a warning.
    #[default]
    Skip,
    /// Insert them as nested creates inside the update transaction.
    Insert,
}

impl FromStr for AdditionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(AdditionPolicy::Skip),
            "insert" => Ok(AdditionPolicy::Insert),
            _ => Err(ConfigError::Validation(format!(
                "invalid addition policy: {} (expected skip or insert)",
                s
            ))),
        }
    }
}

/// Read/write knobs for `Repository`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Depth limit for single-entity reads. Finite so cyclic class graphs stay bounded.
    pub single_read_depth: usize,
    /// Nominal depth limit for list reads; collections are capped at one level regardless.
    pub list_read_depth: usize,
    pub addition_policy: AdditionPolicy,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        RepositoryOptions {
            single_read_depth: 6,
            list_read_depth: 6,
            addition_policy: AdditionPolicy::Skip,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Directory holding `classes.json` and `models.json`.
    pub config_path: String,
    pub repository: RepositoryOptions,
}

impl Settings {
    /// Load `.env` (if present) into the process environment, then read `from_env`.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Load(format!(".env: {}", e)));
            }
        }
        Self::from_env()
    }

    /// `DATABASE_URL`, `RELKIT_CONFIG_PATH`, `RELKIT_SINGLE_READ_DEPTH`, `RELKIT_LIST_READ_DEPTH`,
    /// `RELKIT_ADDITION_POLICY`. Unset variables fall back to defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = RepositoryOptions::default();
        let depth = |key: &str, default: usize| -> Result<usize, ConfigError> {
            match get(key) {
                Some(v) => v
                    .parse()
                    .map_err(|_| ConfigError::Validation(format!("{} must be a non-negative integer, got '{}'", key, v))),
                None => Ok(default),
            }
        };
        let repository = RepositoryOptions {
            single_read_depth: depth("RELKIT_SINGLE_READ_DEPTH", defaults.single_read_depth)?,
            list_read_depth: depth("RELKIT_LIST_READ_DEPTH", defaults.list_read_depth)?,
            addition_policy: match get("RELKIT_ADDITION_POLICY") {
                Some(v) => v.parse()?,
                None => defaults.addition_policy,
            },
        };
        Ok(Settings {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/relkit".into()),
            config_path: get("RELKIT_CONFIG_PATH").unwrap_or_else(|| "config".into()),
            repository,
        })
    }
}
