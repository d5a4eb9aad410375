// Price Feed Integration
//
// The engine never scrapes prices itself. Whatever supplies reference prices
// implements `PriceSource` and is injected at construction, so tests can swap
// in a fixed table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Instrument, Timestamp};

/// Reference price lookup. `None` means no usable price this cycle.
pub trait PriceSource: Send {
    fn reference_price(&self, instrument: Instrument, now: Timestamp) -> Option<Decimal>;
}

/// A single price observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: Decimal,
    pub timestamp: Timestamp,
    /// Time to live in seconds before this price is considered stale
    pub ttl_seconds: u64,
}

impl PriceUpdate {
    pub fn new(price: Decimal, timestamp: Timestamp) -> Self {
        Self {
            price,
            timestamp,
            ttl_seconds: 3_600, // prices are scraped hourly upstream
        }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    pub fn is_stale(&self, now: Timestamp) -> bool {
        now > self.timestamp.plus_secs(self.ttl_seconds)
    }
}

/// Latest pushed price per instrument. stale entries read as missing.
#[derive(Debug, Clone, Default)]
pub struct CachedPriceFeed {
    latest: HashMap<Instrument, PriceUpdate>,
}

impl CachedPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the newer of the stored and submitted update
    pub fn submit(&mut self, instrument: Instrument, update: PriceUpdate) {
        match self.latest.get(&instrument) {
            Some(existing) if existing.timestamp > update.timestamp => {}
            _ => {
                self.latest.insert(instrument, update);
            }
        }
    }

    pub fn latest(&self, instrument: Instrument) -> Option<&PriceUpdate> {
        self.latest.get(&instrument)
    }
}

impl PriceSource for CachedPriceFeed {
    fn reference_price(&self, instrument: Instrument, now: Timestamp) -> Option<Decimal> {
        self.latest
            .get(&instrument)
            .filter(|update| !update.is_stale(now))
            .map(|update| update.price)
    }
}

/// Fixed prices that never go stale. for tests and the simulation.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    prices: HashMap<Instrument, Decimal>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, instrument: Instrument, price: Decimal) -> Self {
        self.prices.insert(instrument, price);
        self
    }

    pub fn set_price(&mut self, instrument: Instrument, price: Decimal) {
        self.prices.insert(instrument, price);
    }

    pub fn clear(&mut self, instrument: Instrument) {
        self.prices.remove(&instrument);
    }
}

impl PriceSource for StaticPriceSource {
    fn reference_price(&self, instrument: Instrument, _now: Timestamp) -> Option<Decimal> {
        self.prices.get(&instrument).copied()
    }
}

/// No feed configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPriceSource;

impl PriceSource for NoPriceSource {
    fn reference_price(&self, _instrument: Instrument, _now: Timestamp) -> Option<Decimal> {
        None
    }
}
