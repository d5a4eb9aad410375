// 9.3 liquidity.rs: target bands for resting liquidity. pure classification only,
// the engine (engine/liquidity.rs) measures the book and acts on the result.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Instrument, Side, Timestamp, TradeId};

/// Per (instrument, side) liquidity targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityMarketSettings {
    pub instrument: Instrument,
    pub side: Side,
    /// Resting notional we aim for. zero disables the controller for this side
    pub target_notional: Decimal,
    /// Half-width of the acceptable band, in percent of target
    pub tolerance_pct: Decimal,
    /// Hard ceiling. above it the controller drains with internal trades
    pub max_notional: Option<Decimal>,
    pub min_order_notional: Decimal,
    pub max_order_notional: Option<Decimal>,
    pub desired_orders_per_level: u32,
    /// Fallback deviation ceiling for rules without their own
    pub price_deviation_pct: Decimal,
    pub max_orders_per_level: u32,
    pub updated_at: Timestamp,
}

impl LiquidityMarketSettings {
    pub fn new(instrument: Instrument, side: Side, target_notional: Decimal) -> Self {
        Self {
            instrument,
            side,
            target_notional,
            tolerance_pct: Decimal::new(5, 0), // 5%
            max_notional: None,
            min_order_notional: Decimal::ZERO,
            max_order_notional: None,
            desired_orders_per_level: 1,
            price_deviation_pct: Decimal::new(10, 0), // 10%
            max_orders_per_level: 10,
            updated_at: Timestamp::from_millis(0),
        }
    }

    pub fn with_max_notional(mut self, max_notional: Decimal) -> Self {
        self.max_notional = Some(max_notional);
        self
    }

    pub fn with_order_bounds(mut self, min: Decimal, max: Option<Decimal>) -> Self {
        self.min_order_notional = min;
        self.max_order_notional = max;
        self
    }

    pub fn lower_bound(&self) -> Decimal {
        self.target_notional - self.band()
    }

    pub fn upper_bound(&self) -> Decimal {
        self.target_notional + self.band()
    }

    fn band(&self) -> Decimal {
        self.target_notional * self.tolerance_pct / Decimal::ONE_HUNDRED
    }

    pub fn validate(&self) -> Result<(), LiquidityError> {
        if self.target_notional < Decimal::ZERO {
            return Err(LiquidityError::InvalidSettings {
                reason: "target must not be negative".to_string(),
            });
        }
        if self.tolerance_pct < Decimal::ZERO || self.tolerance_pct >= Decimal::ONE_HUNDRED {
            return Err(LiquidityError::InvalidSettings {
                reason: "tolerance must be within [0, 100)".to_string(),
            });
        }
        if let Some(max) = self.max_notional {
            if max < self.upper_bound() {
                return Err(LiquidityError::InvalidSettings {
                    reason: format!("max notional {} below target band", max),
                });
            }
        }
        if self.min_order_notional < Decimal::ZERO {
            return Err(LiquidityError::InvalidSettings {
                reason: "min order notional must not be negative".to_string(),
            });
        }
        if let Some(max) = self.max_order_notional {
            if max <= Decimal::ZERO || max < self.min_order_notional {
                return Err(LiquidityError::InvalidSettings {
                    reason: "max order notional must be positive and above min".to_string(),
                });
            }
        }
        if self.price_deviation_pct <= Decimal::ZERO || self.price_deviation_pct > Decimal::ONE_HUNDRED {
            return Err(LiquidityError::InvalidSettings {
                reason: "price deviation must be within (0, 100]".to_string(),
            });
        }
        if self.desired_orders_per_level == 0 || self.max_orders_per_level == 0 {
            return Err(LiquidityError::InvalidSettings {
                reason: "order counts must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityStatus {
    BelowTarget,
    AtTarget,
    AboveTarget,
    ExceedsMax,
    NoTarget,
}

/// What the controller wants done for a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerAction {
    PlaceOrder,
    Hold,
    /// Up to `max_attempts` internal trades.
    Drain { max_attempts: u32 },
}

impl LiquidityStatus {
    pub fn action(&self, retry_ceiling: u32) -> ControllerAction {
        match self {
            LiquidityStatus::BelowTarget | LiquidityStatus::NoTarget => ControllerAction::PlaceOrder,
            LiquidityStatus::AtTarget => ControllerAction::Hold,
            LiquidityStatus::AboveTarget => ControllerAction::Drain { max_attempts: 1 },
            LiquidityStatus::ExceedsMax => ControllerAction::Drain {
                max_attempts: retry_ceiling,
            },
        }
    }
}

/// Classify a resting notional. the hard maximum wins over the band.
pub fn classify(current: Decimal, settings: Option<&LiquidityMarketSettings>) -> LiquidityStatus {
    let Some(settings) = settings else {
        return LiquidityStatus::NoTarget;
    };
    if settings.target_notional.is_zero() {
        return LiquidityStatus::NoTarget;
    }
    if let Some(max) = settings.max_notional {
        if current > max {
            return LiquidityStatus::ExceedsMax;
        }
    }
    if current < settings.lower_bound() {
        LiquidityStatus::BelowTarget
    } else if current > settings.upper_bound() {
        LiquidityStatus::AboveTarget
    } else {
        LiquidityStatus::AtTarget
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityStatusReport {
    pub instrument: Instrument,
    pub side: Side,
    pub status: LiquidityStatus,
    pub current_notional: Decimal,
    pub target_notional: Option<Decimal>,
    pub max_notional: Option<Decimal>,
    pub resting_orders: usize,
    // (target - current) / desired_orders_per_level, below target only
    pub suggested_order_notional: Option<Decimal>,
}

impl LiquidityStatusReport {
    pub fn build(
        instrument: Instrument,
        side: Side,
        current: Decimal,
        resting_orders: usize,
        settings: Option<&LiquidityMarketSettings>,
    ) -> Self {
        let status = classify(current, settings);
        let suggested_order_notional = match (status, settings) {
            (LiquidityStatus::BelowTarget, Some(s)) => {
                Some((s.target_notional - current) / Decimal::from(s.desired_orders_per_level))
            }
            _ => None,
        };
        Self {
            instrument,
            side,
            status,
            current_notional: current,
            target_notional: settings.map(|s| s.target_notional),
            max_notional: settings.and_then(|s| s.max_notional),
            resting_orders,
            suggested_order_notional,
        }
    }
}

/// Result of one enforcement pass over a side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementReport {
    pub instrument: Instrument,
    pub side: Side,
    pub status_before: LiquidityStatus,
    pub status_after: LiquidityStatus,
    pub notional_before: Decimal,
    pub notional_after: Decimal,
    pub attempts: u32,
    pub trades: Vec<TradeId>,
    // Why draining stopped early, if it did
    pub failure: Option<String>,
}

impl EnforcementReport {
    pub fn drained(&self) -> bool {
        !self.trades.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiquidityError {
    #[error("Invalid liquidity settings: {reason}")]
    InvalidSettings { reason: String },
}
