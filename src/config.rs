// Configuration schema for the creditgate enforcement core.
// Numan Thabit 2026

use std::{
    env, fs,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;

/// Error returned while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when reading a configuration file from disk.
    #[error("failed to read config '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
    /// Error when parsing the configuration contents.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration did not pass validation checks.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// High-level configuration loaded at startup.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Enforcement loop tunables.
    pub enforcer: EnforcerSettings,
}

impl Config {
    /// Loads configuration from `CREDITGATE_CONFIG` if set, otherwise
    /// returns defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var("CREDITGATE_CONFIG") {
            Ok(path) => Self::from_path(path),
            Err(_missing) => {
                let cfg = Self::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Loads a configuration file from the provided path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads configuration from any reader implementing [`Read`].
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ConfigError> {
        let mut buf = String::new();
        reader
            .read_to_string(&mut buf)
            .map_err(|source| ConfigError::Io {
                path: PathBuf::from("<reader>"),
                source,
            })?;
        Self::from_toml_str(&buf)
    }

    /// Loads configuration from a TOML string slice.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        <Self as FromStr>::from_str(input)
    }

    /// Validates the configuration, returning an error when constraints are
    /// violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.enforcer.validate().map_err(ConfigError::Validation)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Tunables for the enforcement loop and its data-plane client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnforcerSettings {
    /// Seconds between update-collection cycles towards the peer.
    pub update_interval_secs: u64,
    /// Milliseconds between loop ticks driving scheduled activations.
    pub tick_ms: u64,
    /// Response deadline for data-plane RPCs, in seconds.
    pub rpc_timeout_secs: u64,
    /// Capacity of the command channel into the enforcement loop.
    pub command_buffer: usize,
    /// Capacity of the event channel surfaced to the caller.
    pub event_buffer: usize,
}

impl Default for EnforcerSettings {
    fn default() -> Self {
        Self {
            update_interval_secs: 10,
            tick_ms: 500,
            rpc_timeout_secs: 6,
            command_buffer: 512,
            event_buffer: 1024,
        }
    }
}

impl EnforcerSettings {
    /// Ensures invariants for the settings hold.
    pub fn validate(&self) -> Result<(), String> {
        if self.update_interval_secs == 0 {
            return Err("update_interval_secs must be > 0".into());
        }
        if self.tick_ms == 0 {
            return Err("tick_ms must be > 0".into());
        }
        if self.rpc_timeout_secs == 0 || self.rpc_timeout_secs > 60 {
            return Err("rpc_timeout_secs must lie within [1, 60]".into());
        }
        if self.command_buffer == 0 {
            return Err("command_buffer must be > 0".into());
        }
        if self.event_buffer == 0 {
            return Err("event_buffer must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.enforcer.rpc_timeout_secs, 6);
    }

    #[test]
    fn invalid_interval_rejected() {
        let input = r#"
            [enforcer]
            update_interval_secs = 0
        "#;

        let err = Config::from_toml_str(input).unwrap_err();
        match err {
            ConfigError::Validation(msg) => {
                assert!(msg.contains("update_interval_secs"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let input = r#"
            [enforcer]
            tick_ms = 250
        "#;

        let cfg = Config::from_toml_str(input).expect("valid config");
        assert_eq!(cfg.enforcer.tick_ms, 250);
        assert_eq!(cfg.enforcer.update_interval_secs, 10);
    }
}
