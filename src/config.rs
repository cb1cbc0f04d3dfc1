//! Service configuration from environment variables.
//!
//! | Variable                        | Default            |
//! |---------------------------------|--------------------|
//! | `NOTIFIER_BIND`                 | `127.0.0.1:8080`   |
//! | `NOTIFIER_DATA_FILE`            | `webhooks.json`    |
//! | `NOTIFIER_RATE_LIMIT`           | `100` per hour     |
//! | `NOTIFIER_ATTEMPT_TIMEOUT_SECS` | `10`               |
//! | `NOTIFIER_ACCOUNTS`             | empty              |
//!
//! `NOTIFIER_ACCOUNTS` is a comma-separated list of `credential:owner` pairs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::accounts::StaticAccounts;
use crate::delivery::DeliveryConfig;
use crate::rate_limit::RateLimitConfig;

pub const ENV_BIND: &str = "NOTIFIER_BIND";
pub const ENV_DATA_FILE: &str = "NOTIFIER_DATA_FILE";
pub const ENV_RATE_LIMIT: &str = "NOTIFIER_RATE_LIMIT";
pub const ENV_ATTEMPT_TIMEOUT_SECS: &str = "NOTIFIER_ATTEMPT_TIMEOUT_SECS";
pub const ENV_ACCOUNTS: &str = "NOTIFIER_ACCOUNTS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("NOTIFIER_ACCOUNTS: malformed entry {0:?}, expected credential:owner")]
    MalformedAccount(String),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub data_file: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub delivery: DeliveryConfig,
    pub accounts: StaticAccounts,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_file: PathBuf::from("webhooks.json"),
            rate_limit: RateLimitConfig::default(),
            delivery: DeliveryConfig::default(),
            accounts: StaticAccounts::new(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_BIND) {
            config.bind_addr = parse(ENV_BIND, &value)?;
        }
        if let Some(value) = lookup(ENV_DATA_FILE) {
            config.data_file = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_RATE_LIMIT) {
            config.rate_limit.max_requests = parse(ENV_RATE_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_ATTEMPT_TIMEOUT_SECS) {
            let secs: u64 = parse(ENV_ATTEMPT_TIMEOUT_SECS, &value)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_ATTEMPT_TIMEOUT_SECS,
                    value,
                });
            }
            config.delivery.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = lookup(ENV_ACCOUNTS) {
            config.accounts = parse_accounts(&value)?;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

fn parse_accounts(value: &str) -> Result<StaticAccounts, ConfigError> {
    let mut accounts = StaticAccounts::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (credential, owner) = pair
            .split_once(':')
            .map(|(c, o)| (c.trim(), o.trim()))
            .filter(|(c, o)| !c.is_empty() && !o.is_empty())
            .ok_or_else(|| ConfigError::MalformedAccount(pair.to_string()))?;
        accounts = accounts.with_account(credential, owner);
    }
    Ok(accounts)
}
