//! Manages application configuration loaded from environment variables.
//!
//! This module defines the `Config` struct which holds all runtime settings
//! and provides the `from_env` function to populate this struct. It supports
//! loading variables from a `.env` file via the `dotenv` crate and provides
//! default values for optional settings.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// The largest number of catch-all probes a single detection session issues.
pub const MAX_PROBE_COUNT: usize = 5;

/// Holds the application's runtime configuration settings.
///
/// These settings are typically loaded from environment variables via
/// `from_env`; tests construct the struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The domain announced in the HELO command. (Required: `MAIL_PROBE_HELO_DOMAIN`)
    pub helo_domain: String,

    /// The envelope sender used in MAIL FROM. (Required: `MAIL_PROBE_MAIL_FROM`)
    pub mail_from: String,

    /// The port mail exchangers are contacted on. (Optional: `MAIL_PROBE_SMTP_PORT`, Default: 25)
    pub smtp_port: u16,

    /// DNS lookup timeout in milliseconds. (Optional: `MAIL_PROBE_DNS_TIMEOUT_MS`, Default: 5000)
    pub dns_timeout_ms: u64,

    /// TCP connect timeout in milliseconds. (Optional: `MAIL_PROBE_SMTP_CONNECT_TIMEOUT_MS`, Default: 10000)
    pub smtp_connect_timeout_ms: u64,

    /// Per-response read timeout in milliseconds. (Optional: `MAIL_PROBE_SMTP_READ_TIMEOUT_MS`, Default: 15000)
    pub smtp_read_timeout_ms: u64,

    /// Number of random-recipient probes per catch-all detection, in [1, 5].
    /// (Optional: `MAIL_PROBE_PROBE_COUNT`, Default: 2)
    pub probe_count: usize,

    /// Whether detection results are cached per domain.
    /// (Optional: `MAIL_PROBE_CACHING_ENABLED`, Default: true)
    pub caching_enabled: bool,

    /// Lifetime of a cached detection result in milliseconds.
    /// (Optional: `MAIL_PROBE_CACHE_TTL_MS`, Default: 3600000)
    pub cache_ttl_ms: u64,

    /// Upper bound on cached domains. (Optional: `MAIL_PROBE_MAX_CACHE_SIZE`, Default: 10000)
    pub max_cache_size: usize,
}

impl Config {
    /// Loads configuration settings from environment variables.
    ///
    /// Reads variables prefixed with `MAIL_PROBE_`. Supports loading from a
    /// `.env` file if present. Provides default values for every optional
    /// setting and logs the values being used.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - `MAIL_PROBE_HELO_DOMAIN` or `MAIL_PROBE_MAIL_FROM` is missing or empty.
    /// - An optional variable is set but cannot be parsed as its type.
    /// - `MAIL_PROBE_PROBE_COUNT` is outside [1, 5].
    pub fn from_env() -> Result<Self> {
        // Attempt to load variables from a .env file, if it exists. Ignore errors.
        let _ = dotenv::dotenv();

        // --- Required Variables ---
        let helo_domain = require_env("MAIL_PROBE_HELO_DOMAIN")?;
        log::info!("Config: Using helo_domain: {}", helo_domain);

        let mail_from = require_env("MAIL_PROBE_MAIL_FROM")?;
        log::info!("Config: Using mail_from: {}", mail_from);

        // --- Optional Variables with Defaults ---
        let smtp_port: u16 = parse_env("MAIL_PROBE_SMTP_PORT", 25)?;
        log::info!("Config: Using smtp_port: {}", smtp_port);

        let dns_timeout_ms: u64 = parse_env("MAIL_PROBE_DNS_TIMEOUT_MS", 5_000)?;
        log::info!("Config: Using dns_timeout_ms: {}", dns_timeout_ms);

        let smtp_connect_timeout_ms: u64 =
            parse_env("MAIL_PROBE_SMTP_CONNECT_TIMEOUT_MS", 10_000)?;
        log::info!(
            "Config: Using smtp_connect_timeout_ms: {}",
            smtp_connect_timeout_ms
        );

        let smtp_read_timeout_ms: u64 = parse_env("MAIL_PROBE_SMTP_READ_TIMEOUT_MS", 15_000)?;
        log::info!(
            "Config: Using smtp_read_timeout_ms: {}",
            smtp_read_timeout_ms
        );

        let probe_count: usize = parse_env("MAIL_PROBE_PROBE_COUNT", 2)?;
        if !(1..=MAX_PROBE_COUNT).contains(&probe_count) {
            let err_msg = format!(
                "MAIL_PROBE_PROBE_COUNT ('{}') must be between 1 and {}",
                probe_count, MAX_PROBE_COUNT
            );
            log::error!("{}", err_msg);
            return Err(anyhow!(err_msg));
        }
        log::info!("Config: Using probe_count: {}", probe_count);

        let caching_enabled: bool = parse_env("MAIL_PROBE_CACHING_ENABLED", true)?;
        log::info!("Config: Using caching_enabled: {}", caching_enabled);

        let cache_ttl_ms: u64 = parse_env("MAIL_PROBE_CACHE_TTL_MS", 3_600_000)?;
        log::info!("Config: Using cache_ttl_ms: {}", cache_ttl_ms);

        let max_cache_size: usize = parse_env("MAIL_PROBE_MAX_CACHE_SIZE", 10_000)?;
        log::info!("Config: Using max_cache_size: {}", max_cache_size);

        Ok(Config {
            helo_domain,
            mail_from,
            smtp_port,
            dns_timeout_ms,
            smtp_connect_timeout_ms,
            smtp_read_timeout_ms,
            probe_count,
            caching_enabled,
            cache_ttl_ms,
            max_cache_size,
        })
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.smtp_connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.smtp_read_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

fn require_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        Ok(_) => {
            let err_msg = format!("{name} cannot be empty");
            log::error!("{}", err_msg);
            Err(anyhow!(err_msg))
        }
        Err(e) => {
            let err_msg = format!("{name} environment variable must be set");
            log::error!("{}: {}", err_msg, e);
            Err(anyhow!(e).context(err_msg))
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.trim().parse::<T>().map_err(|e| {
            let err_msg = format!(
                "{name} ('{val}') must be a valid {}",
                std::any::type_name::<T>()
            );
            log::error!("{}: {}", err_msg, e);
            anyhow!("{err_msg}: {e}")
        }),
        Err(_) => Ok(default),
    }
}
