//! Instrument configuration and runtime state.
//!
//! An instrument is one certificate asset listed on one market. Its config holds the
//! exchange grid (tick and lot size) every price and quantity is snapped to.

use crate::types::{Instrument, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static instrument configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub instrument: Instrument,
    /// Human-readable name (e.g., "REC-NORDIC")
    pub name: String,
    /// Minimum price increment
    pub tick_size: Decimal,
    /// Minimum tradable unit
    pub lot_size: Decimal,
    /// Minimum order quantity
    pub min_quantity: Decimal,
}

impl InstrumentConfig {
    pub fn new(instrument: Instrument, name: impl Into<String>) -> Self {
        Self {
            instrument,
            name: name.into(),
            tick_size: Decimal::new(1, 2), // 0.01
            lot_size: Decimal::ONE,
            min_quantity: Decimal::ONE,
        }
    }

    pub fn with_grid(mut self, tick_size: Decimal, lot_size: Decimal, min_quantity: Decimal) -> Self {
        self.tick_size = tick_size;
        self.lot_size = lot_size;
        self.min_quantity = min_quantity;
        self
    }

    pub fn validate(&self) -> Result<(), MarketError> {
        if !self.instrument.asset.is_certificate() {
            return Err(MarketError::NotACertificate(self.instrument));
        }
        if self.tick_size <= Decimal::ZERO || self.lot_size <= Decimal::ZERO {
            return Err(MarketError::InvalidGrid {
                tick_size: self.tick_size,
                lot_size: self.lot_size,
            });
        }
        if self.min_quantity < self.lot_size {
            return Err(MarketError::InvalidGrid {
                tick_size: self.tick_size,
                lot_size: self.lot_size,
            });
        }
        Ok(())
    }

    /// Validate an order quantity
    pub fn validate_quantity(&self, quantity: Decimal) -> Result<(), MarketError> {
        if quantity < self.min_quantity {
            return Err(MarketError::OrderTooSmall {
                quantity,
                minimum: self.min_quantity,
            });
        }
        let remainder = quantity % self.lot_size;
        if !remainder.is_zero() {
            return Err(MarketError::InvalidLotSize {
                quantity,
                lot_size: self.lot_size,
            });
        }
        Ok(())
    }

    /// Round a price to the nearest tick
    pub fn round_price(&self, value: Decimal) -> Result<Price, MarketError> {
        let rounded = value
            .checked_div(self.tick_size)
            .and_then(|ticks| ticks.round().checked_mul(self.tick_size))
            .ok_or(MarketError::InvalidPrice(value))?;
        Price::new(rounded).ok_or(MarketError::InvalidPrice(value))
    }

    /// Largest lot-aligned quantity not above `quantity`
    pub fn floor_to_lot(&self, quantity: Decimal) -> Decimal {
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        quantity - quantity % self.lot_size
    }
}

/// Dynamic instrument state (changes during trading)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub config: InstrumentConfig,
    pub last_trade_price: Option<Price>,
    /// Cumulative traded notional
    pub traded_notional: Decimal,
    pub trade_count: u64,
    pub last_updated: Timestamp,
}

impl MarketState {
    pub fn new(config: InstrumentConfig, timestamp: Timestamp) -> Self {
        Self {
            config,
            last_trade_price: None,
            traded_notional: Decimal::ZERO,
            trade_count: 0,
            last_updated: timestamp,
        }
    }

    /// Record a trade
    pub fn record_trade(&mut self, price: Price, quantity: Decimal, timestamp: Timestamp) {
        self.last_trade_price = Some(price);
        self.traded_notional = self.traded_notional.saturating_add(price.notional(quantity));
        self.trade_count += 1;
        self.last_updated = timestamp;
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketError {
    #[error("Order quantity {quantity} below minimum {minimum}")]
    OrderTooSmall { quantity: Decimal, minimum: Decimal },

    #[error("Quantity {quantity} not aligned to lot size {lot_size}")]
    InvalidLotSize { quantity: Decimal, lot_size: Decimal },

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Invalid grid: tick {tick_size}, lot {lot_size}")]
    InvalidGrid { tick_size: Decimal, lot_size: Decimal },

    #[error("Instrument {0} does not trade a certificate")]
    NotACertificate(Instrument),
}
