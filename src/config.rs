use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "postgres://subtrack:subtrack@db:5432/subtrack";
const DEFAULT_JWT_SECRET: &str = "change-me";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_BASE_CURRENCY: &str = "INR";
const DEFAULT_RATE_CACHE_TTL_SECS: u64 = 4 * 60 * 60;
const DEFAULT_RATE_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RENEWAL_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive whole number of seconds, got {value:?}")]
    InvalidSeconds { name: &'static str, value: String },
    #[error("{name} must be a socket address, got {value:?}")]
    InvalidAddress { name: &'static str, value: String },
}

/// Process configuration read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    pub app_base_url: String,
    /// When unset, the cron endpoint rejects every request.
    pub cron_secret: Option<String>,
    pub currency_api_key: Option<String>,
    pub base_currency: String,
    pub rate_cache_ttl: Duration,
    pub rate_refresh_interval: Duration,
    pub renewal_sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = match var("BIND_ADDR") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidAddress {
                name: "BIND_ADDR",
                value,
            })?,
            None => DEFAULT_BIND_ADDR
                .parse()
                .map_err(|_| ConfigError::InvalidAddress {
                    name: "BIND_ADDR",
                    value: DEFAULT_BIND_ADDR.to_string(),
                })?,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            jwt_secret: var("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.into()),
            bind_addr,
            app_base_url: var("APP_BASE_URL")
                .unwrap_or_else(|| DEFAULT_APP_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            cron_secret: var("CRON_SECRET"),
            currency_api_key: var("FREECURRENCYAPI_KEY"),
            base_currency: var("BASE_CURRENCY")
                .map(|code| code.to_uppercase())
                .unwrap_or_else(|| DEFAULT_BASE_CURRENCY.into()),
            rate_cache_ttl: seconds(
                "RATE_CACHE_TTL_SECS",
                var("RATE_CACHE_TTL_SECS"),
                DEFAULT_RATE_CACHE_TTL_SECS,
            )?,
            rate_refresh_interval: positive_seconds(
                "RATE_REFRESH_INTERVAL_SECS",
                var("RATE_REFRESH_INTERVAL_SECS"),
                DEFAULT_RATE_REFRESH_INTERVAL_SECS,
            )?,
            renewal_sweep_interval: positive_seconds(
                "RENEWAL_SWEEP_INTERVAL_SECS",
                var("RENEWAL_SWEEP_INTERVAL_SECS"),
                DEFAULT_RENEWAL_SWEEP_INTERVAL_SECS,
            )?,
        })
    }
}

fn seconds(name: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidSeconds { name, value }),
    }
}

/// Worker periods must be non-zero.
fn positive_seconds(
    name: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<Duration, ConfigError> {
    let duration = seconds(name, value, default)?;
    if duration.is_zero() {
        return Err(ConfigError::InvalidSeconds {
            name,
            value: "0".into(),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.jwt_secret, "change-me");
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.app_base_url, "http://localhost:3000");
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.currency_api_key, None);
        assert_eq!(config.base_currency, "INR");
        assert_eq!(config.rate_cache_ttl, Duration::from_secs(14_400));
        assert_eq!(config.rate_refresh_interval, Duration::from_secs(86_400));
        assert_eq!(config.renewal_sweep_interval, Duration::from_secs(3_600));
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("APP_BASE_URL", "https://subs.example.com/"),
            ("CRON_SECRET", "s3cret"),
            ("BASE_CURRENCY", "usd"),
            ("RATE_CACHE_TTL_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.app_base_url, "https://subs.example.com");
        assert_eq!(config.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.base_currency, "USD");
        assert_eq!(config.rate_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn blank_values_are_unset() {
        let config = config_from(&[("CRON_SECRET", "  "), ("JWT_SECRET", "")]).unwrap();
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.jwt_secret, "change-me");
    }

    #[test]
    fn rejects_malformed_numbers_and_addresses() {
        assert_eq!(
            config_from(&[("RENEWAL_SWEEP_INTERVAL_SECS", "hourly")]).unwrap_err(),
            ConfigError::InvalidSeconds {
                name: "RENEWAL_SWEEP_INTERVAL_SECS",
                value: "hourly".into(),
            }
        );
        assert!(matches!(
            config_from(&[("RATE_REFRESH_INTERVAL_SECS", "0")]),
            Err(ConfigError::InvalidSeconds { .. })
        ));
        assert!(matches!(
            config_from(&[("BIND_ADDR", "localhost")]),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }
}
