//! Engine configuration options.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audit ticket id prefix, e.g. "TX" gives TX-2026-000001.
    pub ticket_prefix: String,
    /// Seed for every random choice the engine makes.
    pub rng_seed: u64,
    /// Scheduler tick in seconds.
    pub tick_interval_secs: u64,
    /// Internal trades attempted per exceeds-max drain.
    pub internal_trade_retries: u32,
    /// Band half-width for liquidity targets loaded without one.
    pub liquidity_tolerance_pct: Decimal,
    /// Maximum number of notifications to retain in memory.
    pub max_notifications: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ticket_prefix: "TX".to_string(),
            rng_seed: 42,
            tick_interval_secs: 30,
            internal_trade_retries: 5,
            liquidity_tolerance_pct: Decimal::new(5, 0),
            max_notifications: 10_000,
        }
    }
}
