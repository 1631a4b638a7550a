//! Throttle limits and how they are loaded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("concurrency must be a positive integer")]
    ZeroConcurrency,
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

/// Limits for one throttle. Fixed for the throttle's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum number of units running at once. Must be > 0.
    pub concurrency: usize,
    /// Maximum number of units waiting once every slot is busy. `0` disables waiting.
    pub queue_tolerance: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            queue_tolerance: 0,
        }
    }
}

impl ThrottleConfig {
    pub const CONCURRENCY_ENV: &'static str = "SLOTGATE_CONCURRENCY";
    pub const QUEUE_TOLERANCE_ENV: &'static str = "SLOTGATE_QUEUE_TOLERANCE";

    pub fn new(concurrency: usize, queue_tolerance: usize) -> Self {
        Self {
            concurrency,
            queue_tolerance,
        }
    }

    /// Read limits from `SLOTGATE_CONCURRENCY` / `SLOTGATE_QUEUE_TOLERANCE`.
    ///
    /// Unset variables keep their defaults; set-but-unparsable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = parse_var(&lookup, Self::CONCURRENCY_ENV)? {
            config.concurrency = value;
        }
        if let Some(value) = parse_var(&lookup, Self::QUEUE_TOLERANCE_ENV)? {
            config.queue_tolerance = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

pub(crate) fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { var, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ThrottleConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ThrottleConfig::new(1, 0));
    }

    #[test]
    fn reads_both_limits() {
        let config = ThrottleConfig::from_lookup(lookup(&[
            ("SLOTGATE_CONCURRENCY", "8"),
            ("SLOTGATE_QUEUE_TOLERANCE", " 32 "),
        ]))
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.queue_tolerance, 32);
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = ThrottleConfig::from_lookup(lookup(&[("SLOTGATE_QUEUE_TOLERANCE", "-1")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "SLOTGATE_QUEUE_TOLERANCE",
                value: "-1".to_string(),
            }
        );
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err =
            ThrottleConfig::from_lookup(lookup(&[("SLOTGATE_CONCURRENCY", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroConcurrency);
        assert_eq!(err.to_string(), "concurrency must be a positive integer");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ThrottleConfig = serde_json::from_str(r#"{"concurrency": 4}"#).unwrap();
        assert_eq!(config, ThrottleConfig::new(4, 0));
    }
}
