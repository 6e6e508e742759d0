//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::ProductId;
use saga::{RetryPolicy, SagaConfig};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },

    #[error("FLASH_SALE_STOCK entry {0:?} is not of the form product=stock")]
    FlashSaleEntry(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `8000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL` Postgres URL; unset runs on seeded in-memory backends
/// - `PAYMENT_TIMEOUT_SECS` payment window (default: `30`)
/// - `STEP_MAX_ATTEMPTS` attempts per saga step (default: `3`)
/// - `FLASH_SALE_STOCK` `product=stock,...` preheated into the admission gate
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_timeout: Duration,
    pub step_max_attempts: u32,
    pub flash_sale_stock: Vec<(ProductId, i64)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let number = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::NotANumber { name, value })
                })
                .transpose()
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: match number("PORT")? {
                Some(port) => u16::try_from(port).map_err(|_| ConfigError::NotANumber {
                    name: "PORT",
                    value: port.to_string(),
                })?,
                None => defaults.port,
            },
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            payment_timeout: number("PAYMENT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            step_max_attempts: match number("STEP_MAX_ATTEMPTS")? {
                Some(attempts) => u32::try_from(attempts.max(1)).unwrap_or(u32::MAX),
                None => defaults.step_max_attempts,
            },
            flash_sale_stock: match lookup("FLASH_SALE_STOCK") {
                Some(raw) => parse_flash_sale_stock(&raw)?,
                None => defaults.flash_sale_stock,
            },
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            payment_timeout: self.payment_timeout,
            retry: RetryPolicy::default().with_max_attempts(self.step_max_attempts),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            payment_timeout: saga::PAYMENT_TIMEOUT,
            step_max_attempts: 3,
            flash_sale_stock: Vec::new(),
        }
    }
}

/// Parses `iPhone15=10,MacPro=5`.
pub fn parse_flash_sale_stock(raw: &str) -> Result<Vec<(ProductId, i64)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (product, stock) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::FlashSaleEntry(entry.to_string()))?;
            let product = product.trim();
            let stock: i64 = stock
                .trim()
                .parse()
                .map_err(|_| ConfigError::FlashSaleEntry(entry.to_string()))?;
            if product.is_empty() || stock < 0 {
                return Err(ConfigError::FlashSaleEntry(entry.to_string()));
            }
            Ok((ProductId::new(product), stock))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 8000);
        assert_eq!(config.payment_timeout, Duration::from_secs(30));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = from(&[("HOST", "127.0.0.1"), ("PORT", "8080")]).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn reads_saga_settings() {
        let config = from(&[
            ("PAYMENT_TIMEOUT_SECS", "5"),
            ("STEP_MAX_ATTEMPTS", "7"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        let saga = config.saga_config();
        assert_eq!(saga.payment_timeout, Duration::from_secs(5));
        assert_eq!(saga.retry.max_attempts, 7);
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert_eq!(
            from(&[("PORT", "eighty")]),
            Err(ConfigError::NotANumber {
                name: "PORT",
                value: "eighty".to_string()
            })
        );
    }

    #[test]
    fn parses_flash_sale_stock() {
        let stock = parse_flash_sale_stock(" iPhone15=10, MacPro=5 ,").unwrap();
        assert_eq!(
            stock,
            vec![(ProductId::new("iPhone15"), 10), (ProductId::new("MacPro"), 5)]
        );
        assert!(matches!(
            parse_flash_sale_stock("iPhone15"),
            Err(ConfigError::FlashSaleEntry(_))
        ));
        assert!(matches!(
            parse_flash_sale_stock("iPhone15=-1"),
            Err(ConfigError::FlashSaleEntry(_))
        ));
    }
}
