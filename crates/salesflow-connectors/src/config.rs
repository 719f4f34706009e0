//! Shared configuration helpers for the connectors.
//!
//! Every connector is configured from a flat `HashMap<String, String>` using
//! dotted keys (`bootstrap.servers`, `batch.size`, ...), so the same maps can
//! come from a file, the environment or the command line.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConnectorError, Result};

/// Runtime state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorState::Running => write!(f, "RUNNING"),
            ConnectorState::Stopped => write!(f, "STOPPED"),
            ConnectorState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A required, non-blank string value.
pub fn required(config: &HashMap<String, String>, key: &str) -> Result<String> {
    let value = config
        .get(key)
        .ok_or_else(|| ConnectorError::ConfigError(format!("missing required '{}'", key)))?;
    if value.trim().is_empty() {
        return Err(ConnectorError::ConfigError(format!(
            "'{}' must not be empty",
            key
        )));
    }
    Ok(value.trim().to_string())
}

/// An optional value parsed with `FromStr`.
pub fn parse_opt<T>(config: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    config
        .get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|e| ConnectorError::ConfigError(format!("invalid {}: {}", key, e)))
        })
        .transpose()
}

/// A comma-separated list, blanks dropped.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
