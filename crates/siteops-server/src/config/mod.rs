//! Configuration loading and resolution.
//!
//! Precedence is CLI flag > `SITEOPS_*` environment variable > default. The
//! binary applies CLI overrides on top of [`ServerConfig::from_env`].

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use siteops_rpc::DEFAULT_MAX_MESSAGE_BYTES;

pub const DEFAULT_PORT: u16 = 7410;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_OPERATION_RETENTION_SECS: u64 = 60;
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

pub const ENV_BIND: &str = "SITEOPS_BIND";
pub const ENV_MAX_MESSAGE_BYTES: &str = "SITEOPS_MAX_MESSAGE_BYTES";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SITEOPS_REQUEST_TIMEOUT_SECS";
pub const ENV_OPERATION_TIMEOUT_SECS: &str = "SITEOPS_OPERATION_TIMEOUT_SECS";
pub const ENV_OPERATION_RETENTION_SECS: &str = "SITEOPS_OPERATION_RETENTION_SECS";
pub const ENV_MAX_CONNECTIONS: &str = "SITEOPS_MAX_CONNECTIONS";
pub const ENV_PROVIDERS: &str = "SITEOPS_PROVIDERS";
pub const ENV_FEATURES: &str = "SITEOPS_FEATURES";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Runtime limits and advertised capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub max_message_bytes: usize,
    pub request_timeout: Duration,
    pub operation_timeout: Duration,
    /// How long terminal operation records stay queryable.
    pub operation_retention: Duration,
    pub max_connections: usize,
    pub providers: Vec<String>,
    pub features: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            operation_retention: Duration::from_secs(DEFAULT_OPERATION_RETENTION_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            providers: Vec::new(),
            features: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bind) = parse_var::<SocketAddr, _>(&lookup, ENV_BIND)? {
            config.bind = bind;
        }
        if let Some(bytes) = parse_var(&lookup, ENV_MAX_MESSAGE_BYTES)? {
            config.max_message_bytes = bytes;
        }
        if let Some(secs) = parse_var(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_OPERATION_TIMEOUT_SECS)? {
            config.operation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_OPERATION_RETENTION_SECS)? {
            config.operation_retention = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var(&lookup, ENV_MAX_CONNECTIONS)? {
            config.max_connections = max;
        }
        if let Some(list) = lookup(ENV_PROVIDERS) {
            config.providers = split_list(&list);
        }
        if let Some(list) = lookup(ENV_FEATURES) {
            config.features = split_list(&list);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_bytes == 0 {
            return Err(ConfigError::ZeroLimit("max_message_bytes"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroLimit("request_timeout"));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::ZeroLimit("operation_timeout"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroLimit("max_connections"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
