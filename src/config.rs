//! Environment driven configuration.

use rust_decimal::Decimal;
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value '{value}': {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind { Postgres, Memory }

impl FromStr for StorageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage '{other}', expected postgres or memory")),
        }
    }
}

/// Checkout charges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    pub currency: String,
    pub tax_rate: Decimal,
    pub shipping_flat_fee: Decimal,
    pub free_shipping_threshold: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { currency: "USD".into(), tax_rate: Decimal::ZERO, shipping_flat_fee: Decimal::new(500, 2), free_shipping_threshold: Decimal::new(5000, 2) }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub storage: StorageKind,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub nats_url: Option<String>,
    pub admin_token: String,
    pub pricing: PricingConfig,
    pub low_stock_threshold: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage: StorageKind = try_load(&var, "STORAGE", "postgres")?;
        let database_url = var("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if storage == StorageKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        let admin_token = var("ADMIN_TOKEN").filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Missing("ADMIN_TOKEN"))?;
        let pricing = PricingConfig {
            currency: try_load::<String>(&var, "DEFAULT_CURRENCY", "USD")?.to_uppercase(),
            tax_rate: try_load(&var, "TAX_RATE", "0")?,
            shipping_flat_fee: try_load(&var, "SHIPPING_FLAT_FEE", "5.00")?,
            free_shipping_threshold: try_load(&var, "FREE_SHIPPING_THRESHOLD", "50.00")?,
        };
        if pricing.tax_rate.is_sign_negative() || pricing.tax_rate > Decimal::ONE {
            return Err(ConfigError::Invalid { key: "TAX_RATE", value: pricing.tax_rate.to_string(), reason: "must be between 0 and 1".into() });
        }
        Ok(Self {
            port: try_load(&var, "PORT", "8083")?,
            storage,
            database_url,
            db_max_connections: try_load(&var, "DB_MAX_CONNECTIONS", "10")?,
            nats_url: var("NATS_URL").filter(|v| !v.trim().is_empty()),
            admin_token,
            pricing,
            low_stock_threshold: try_load(&var, "LOW_STOCK_THRESHOLD", "5")?,
        })
    }

    /// In-memory configuration used by tests and local demos.
    pub fn for_memory(admin_token: impl Into<String>) -> Self {
        Self {
            port: 0, storage: StorageKind::Memory, database_url: None, db_max_connections: 1, nats_url: None,
            admin_token: admin_token.into(), pricing: PricingConfig::default(), low_stock_threshold: 5,
        }
    }
}

fn try_load<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid { key, value, reason: e.to_string() })
}
