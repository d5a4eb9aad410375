// 7.0 config.rs: all settings in one place. engine knobs, listed instruments and
// liquidity targets. loadable from JSON, validated before an engine is built.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::liquidity::{LiquidityError, LiquidityMarketSettings};
use crate::market::{InstrumentConfig, MarketError};
use crate::types::{AssetType, Instrument, MarketId, Side, Timestamp};

// Liquidity target as it appears in a config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityTargetConfig {
    pub instrument: Instrument,
    pub side: Side,
    pub target_notional: Decimal,
    #[serde(default)]
    pub tolerance_pct: Option<Decimal>,
    #[serde(default)]
    pub max_notional: Option<Decimal>,
    #[serde(default)]
    pub min_order_notional: Decimal,
    #[serde(default)]
    pub max_order_notional: Option<Decimal>,
    #[serde(default = "default_orders_per_level")]
    pub desired_orders_per_level: u32,
    #[serde(default = "default_price_deviation")]
    pub price_deviation_pct: Decimal,
    #[serde(default = "default_max_orders_per_level")]
    pub max_orders_per_level: u32,
}

fn default_orders_per_level() -> u32 {
    1
}

fn default_price_deviation() -> Decimal {
    Decimal::new(10, 0)
}

fn default_max_orders_per_level() -> u32 {
    10
}

impl LiquidityTargetConfig {
    pub fn to_settings(&self, default_tolerance: Decimal, timestamp: Timestamp) -> LiquidityMarketSettings {
        let mut settings = LiquidityMarketSettings::new(self.instrument, self.side, self.target_notional);
        settings.tolerance_pct = self.tolerance_pct.unwrap_or(default_tolerance);
        settings.max_notional = self.max_notional;
        settings.min_order_notional = self.min_order_notional;
        settings.max_order_notional = self.max_order_notional;
        settings.desired_orders_per_level = self.desired_orders_per_level;
        settings.price_deviation_pct = self.price_deviation_pct;
        settings.max_orders_per_level = self.max_orders_per_level;
        settings.updated_at = timestamp;
        settings
    }
}

// The complete exchange configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub environment: Environment,
    #[serde(default)]
    pub engine: EngineConfig,
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub liquidity: Vec<LiquidityTargetConfig>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            engine: EngineConfig::default(),
            instruments: vec![
                InstrumentConfig::new(Instrument::new(AssetType::Rec, MarketId(1)), "REC-NORDIC"),
                InstrumentConfig::new(Instrument::new(AssetType::GuaranteeOfOrigin, MarketId(1)), "GO-NORDIC"),
            ],
            liquidity: Vec::new(),
        }
    }
}

impl ExchangeConfig {
    // Production: coarser tick, longer tick cadence, fewer retained notifications
    pub fn production() -> Self {
        let mut config = Self::default();
        config.environment = Environment::Production;
        config.engine.ticket_prefix = "LDG".to_string();
        config.engine.tick_interval_secs = 60;
        config.engine.max_notifications = 1_000;
        for instrument in &mut config.instruments {
            instrument.tick_size = Decimal::new(5, 2); // 0.05
        }
        config
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.engine.ticket_prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::InvalidEngine {
                reason: format!("ticket prefix must be uppercase letters, got {:?}", prefix),
            });
        }
        if self.engine.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "tick interval must be positive".to_string(),
            });
        }
        if self.engine.internal_trade_retries == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "need at least one internal trade attempt".to_string(),
            });
        }
        if self.engine.liquidity_tolerance_pct < Decimal::ZERO
            || self.engine.liquidity_tolerance_pct >= Decimal::ONE_HUNDRED
        {
            return Err(ConfigError::InvalidEngine {
                reason: "liquidity tolerance must be within [0, 100)".to_string(),
            });
        }

        for (i, instrument) in self.instruments.iter().enumerate() {
            instrument.validate()?;
            if self.instruments[..i].iter().any(|other| other.instrument == instrument.instrument) {
                return Err(ConfigError::DuplicateInstrument(instrument.instrument));
            }
        }

        for target in &self.liquidity {
            if !self.instruments.iter().any(|i| i.instrument == target.instrument) {
                return Err(ConfigError::UnknownInstrument(target.instrument));
            }
            target
                .to_settings(self.engine.liquidity_tolerance_pct, Timestamp::from_millis(0))
                .validate()?;
        }

        Ok(())
    }

    pub fn instrument(&self, instrument: Instrument) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.instrument == instrument)
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid engine settings: {reason}")]
    InvalidEngine { reason: String },

    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("Instrument {0} listed twice")]
    DuplicateInstrument(Instrument),

    #[error("Liquidity target for unlisted instrument {0}")]
    UnknownInstrument(Instrument),

    #[error("{0}")]
    InvalidLiquidity(#[from] LiquidityError),

    #[error("Config parse error: {0}")]
    Parse(String),
}

impl From<MarketError> for ConfigError {
    fn from(err: MarketError) -> Self {
        ConfigError::InvalidInstrument(err.to_string())
    }
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn config(&self) -> ExchangeConfig {
        match self {
            Environment::Development => ExchangeConfig::default(),
            Environment::Production => ExchangeConfig::production(),
        }
    }
}
