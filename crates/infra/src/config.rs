//! Ledger configuration.
//!
//! Layered loading:
//! 1. Default values in code
//! 2. Optional configuration file `config/stockledger.{toml,yaml,json}`
//! 3. Environment variable overrides with the `STOCKLEDGER` prefix and `__`
//!    as section separator (e.g. `STOCKLEDGER__ENGINE__MAX_RETRIES=5`)

use std::time::Duration;

use config::{ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use stockledger_inventory::ZeroAdjustPolicy;
use stockledger_observability::{LogFormat, LoggingConfig};

use crate::engine::EngineSettings;
use crate::ledger_store::PageSettings;
use crate::projections::{AlertDelivery, AlertMode, AlertSettings};
use crate::retry::RetryPolicy;

/// Main ledger configuration.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub alerts: AlertSettings,
    pub pagination: PageSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Absent means the in-memory store.
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on waiting for a product lock, per attempt
    pub lock_wait_ms: u64,

    /// Retries after a concurrency conflict before it surfaces
    pub max_retries: u32,

    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// What a zero-delta ADJUST does
    pub zero_adjust: ZeroAdjustPolicy,
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            retry: RetryPolicy::exponential(
                self.max_retries,
                Duration::from_millis(self.base_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            ),
            zero_adjust: self.zero_adjust,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from the optional file and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("config/stockledger").required(false))
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("database.max_connections", 10)?
            .set_default("engine.lock_wait_ms", 250)?
            .set_default("engine.max_retries", 3)?
            .set_default("engine.base_backoff_ms", 10)?
            .set_default("engine.max_backoff_ms", 200)?
            .set_default("engine.zero_adjust", "record")?
            .set_default("alerts.mode", "lazy")?
            .set_default("alerts.delivery", "poll")?
            .set_default("pagination.default_page_size", 10)?
            .set_default("pagination.max_page_size", 500)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
            },
            engine: EngineConfig {
                lock_wait_ms: 250,
                max_retries: 3,
                base_backoff_ms: 10,
                max_backoff_ms: 200,
                zero_adjust: ZeroAdjustPolicy::Record,
            },
            alerts: AlertSettings {
                mode: AlertMode::Lazy,
                delivery: AlertDelivery::Poll,
            },
            pagination: PageSettings::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
            },
        }
    }
}
