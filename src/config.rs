// 7.0 config.rs: all settings in one place. exchange access, quoting ladder, limits, brackets, run loop.
// 7.1 loaded from an optional TOML file, then CLI overrides on top. every field has a default.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bracket::BracketParams;
use crate::risk::RiskParams;
use crate::types::Symbol;

// Complete configuration for one market maker process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub quoting: QuotingSettings,
    pub risk: RiskParams,
    pub bracket: BracketParams,
    pub runtime: RuntimeSettings,
}

// Where we trade and how hard we hit the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    // Instrument we quote
    pub symbol: Symbol,
    // Instruments summed into the portfolio delta
    pub contracts: Vec<Symbol>,
    // Mutating calls become no-ops when set
    pub dry_run: bool,
    // Synthetic balance reported in dry-run, in settlement currency
    pub dry_run_balance: Decimal,
    // Order book levels fetched per side
    pub depth: usize,
    // Pause after every mutating call
    pub api_rest_interval_ms: u64,
    // Pause before retrying a failed read
    pub api_error_interval_ms: u64,
    pub max_read_retries: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            symbol: Symbol::new("XBTUSD"),
            contracts: vec![Symbol::new("XBTUSD")],
            dry_run: false,
            dry_run_balance: dec!(50),
            depth: 10,
            api_rest_interval_ms: 1_000,
            api_error_interval_ms: 10_000,
            max_read_retries: 3,
        }
    }
}

impl ExchangeSettings {
    pub fn api_rest_interval(&self) -> Duration {
        Duration::from_millis(self.api_rest_interval_ms)
    }

    pub fn api_error_interval(&self) -> Duration {
        Duration::from_millis(self.api_error_interval_ms)
    }
}

/** 7.2: quoting ladder. order_pairs = 0 switches the ladder off (bracket trading only). */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotingSettings {
    pub order_pairs: u32,
    // Size of the innermost rung
    pub order_start_size: Decimal,
    // Added per rung going outward
    pub order_step_size: Decimal,
    pub random_order_size: bool,
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    // Geometric distance between rungs (0.005 = 0.5%)
    pub interval: Decimal,
    // Minimum spread between our best buy and sell as a fraction
    pub min_spread: Decimal,
    pub maintain_spreads: bool,
    // Price drift tolerated before an order is amended
    pub relist_interval: Decimal,
    pub amend_retry_wait_ms: u64,
    pub max_amend_retries: u32,
    // Re-read fills right before amending
    pub verify_fills_before_amend: bool,
}

impl Default for QuotingSettings {
    fn default() -> Self {
        Self {
            order_pairs: 0,
            order_start_size: dec!(100),
            order_step_size: dec!(100),
            random_order_size: false,
            min_order_size: dec!(50),
            max_order_size: dec!(200),
            interval: dec!(0.005),
            min_spread: dec!(0.01),
            maintain_spreads: true,
            relist_interval: dec!(0.01),
            amend_retry_wait_ms: 500,
            max_amend_retries: 1,
            verify_fills_before_amend: true,
        }
    }
}

impl QuotingSettings {
    pub fn amend_retry_wait(&self) -> Duration {
        Duration::from_millis(self.amend_retry_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    // Time between poll cycles
    pub loop_interval_ms: u64,
    // A change to any of these restarts the process
    pub watched_files: Vec<PathBuf>,
    pub log_level: String,
    // Audit events kept in memory
    pub max_events: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            loop_interval_ms: 5_000,
            watched_files: Vec::new(),
            log_level: "info".to_string(),
            max_events: 10_000,
        }
    }
}

impl RuntimeSettings {
    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

// Command line values that win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub symbol: Option<Symbol>,
    pub dry_run: bool,
    pub log_level: Option<String>,
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    // No path means defaults only
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                Self::from_toml_str(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(symbol) = &overrides.symbol {
            self.exchange.symbol = symbol.clone();
            if !self.exchange.contracts.contains(symbol) {
                self.exchange.contracts.push(symbol.clone());
            }
        }
        if overrides.dry_run {
            self.exchange.dry_run = true;
        }
        if let Some(level) = &overrides.log_level {
            self.runtime.log_level = level.clone();
        }
        self
    }

    // No pacing anywhere. for the paper exchange and tests
    pub fn instant() -> Self {
        let mut settings = Self::default();
        settings.exchange.api_rest_interval_ms = 0;
        settings.exchange.api_error_interval_ms = 0;
        settings.quoting.amend_retry_wait_ms = 0;
        settings.bracket.take_profit_delay_ms = 0;
        settings.runtime.loop_interval_ms = 0;
        settings
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exchange = |reason: &str| ConfigError::InvalidExchange { reason: reason.to_string() };
        let quoting = |reason: &str| ConfigError::InvalidQuoting { reason: reason.to_string() };
        let risk = |reason: &str| ConfigError::InvalidRisk { reason: reason.to_string() };
        let bracket = |reason: &str| ConfigError::InvalidBracket { reason: reason.to_string() };

        // exchange checks
        if self.exchange.symbol.as_str().is_empty() {
            return Err(exchange("Symbol must not be empty"));
        }
        if self.exchange.depth == 0 {
            return Err(exchange("Depth must be at least 1"));
        }
        if self.exchange.dry_run_balance < Decimal::ZERO {
            return Err(exchange("Dry-run balance must not be negative"));
        }
        if self.runtime.max_events == 0 {
            return Err(ConfigError::InvalidRuntime {
                reason: "Event log must keep at least one event".to_string(),
            });
        }

        // quoting checks
        let q = &self.quoting;
        if q.interval <= Decimal::ZERO {
            return Err(quoting("Interval must be positive"));
        }
        if q.min_spread < Decimal::ZERO || q.min_spread >= Decimal::TWO {
            return Err(quoting("Min spread must be in [0, 2)"));
        }
        if q.relist_interval < Decimal::ZERO {
            return Err(quoting("Relist interval must not be negative"));
        }
        if q.order_start_size <= Decimal::ZERO || q.order_step_size < Decimal::ZERO {
            return Err(quoting("Order sizes must be positive"));
        }
        if q.random_order_size
            && (q.min_order_size <= Decimal::ZERO || q.min_order_size > q.max_order_size)
        {
            return Err(quoting("Random size range must be positive and ordered"));
        }

        // risk checks
        if self.risk.min_position >= self.risk.max_position {
            return Err(risk("Min position must be less than max"));
        }

        // bracket checks
        let b = &self.bracket;
        if b.entry_size <= Decimal::ZERO {
            return Err(bracket("Entry size must be positive"));
        }
        if b.stop_distance <= Decimal::ZERO || b.limit_distance <= Decimal::ZERO {
            return Err(bracket("Stop and limit distances must be positive"));
        }
        if b.stop_step <= Decimal::ZERO || b.limit_step < Decimal::ZERO {
            return Err(bracket("Steps must be positive"));
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid exchange settings: {reason}")]
    InvalidExchange { reason: String },
    #[error("Invalid quoting settings: {reason}")]
    InvalidQuoting { reason: String },
    #[error("Invalid risk settings: {reason}")]
    InvalidRisk { reason: String },
    #[error("Invalid bracket settings: {reason}")]
    InvalidBracket { reason: String },
    #[error("Invalid runtime settings: {reason}")]
    InvalidRuntime { reason: String },
    #[error("Cannot read {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("Cannot parse settings: {reason}")]
    Parse { reason: String },
}
