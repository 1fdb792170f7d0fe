use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::models::{RulesError, StreamEntity, Symbol};

mod bot;
mod line;
mod line_logger;

pub use bot::BotSettings;
pub use line::LineSettings;
pub use line_logger::LineLoggerSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(String),

    #[error("Invalid value \"{value}\" for {key}")]
    Invalid { key: String, value: String },

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid strategy rules: {0}")]
    Rules(#[from] RulesError),
}

/// Reads settings through a lookup function so tests need not touch the process environment.
pub(crate) struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

pub(crate) fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

impl<'a> EnvReader<'a> {
    pub fn new(lookup: &'a dyn Fn(&str) -> Option<String>) -> Self {
        Self { lookup }
    }

    pub fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn parse_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value.parse::<T>().map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
    }

    pub fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                }),
            },
        }
    }

    /// Comma separated list; `None` when unset.
    pub fn list<T: FromStr>(&self, key: &str) -> Result<Option<Vec<T>>, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(None);
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value: item.to_string(),
                })
            })
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
    }

    /// `SYMBOLS` list, falling back to a single `SYMBOL`.
    pub fn symbols(&self) -> Result<Vec<Symbol>, ConfigError> {
        let symbols = match self.list::<String>("SYMBOLS")? {
            Some(symbols) => symbols,
            None => vec![self.required("SYMBOL").map_err(|_| ConfigError::Missing("SYMBOLS".to_string()))?],
        };
        Ok(symbols.into_iter().map(|s| s.to_uppercase()).collect())
    }

    pub fn entities(&self) -> Result<Vec<StreamEntity>, ConfigError> {
        Ok(self
            .list::<StreamEntity>("ENTITIES")?
            .unwrap_or_else(|| StreamEntity::ALL.to_vec()))
    }
}

#[cfg(test)]
pub(crate) fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
}
