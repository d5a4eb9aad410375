//! Order types, trades and the price-time book index.
//!
//! Orders live in the store keyed by id. The book only indexes the active ones per
//! instrument and side, ordered so that iterating from the front always yields the
//! next order in strict price-time priority.

use crate::audit::TicketId;
use crate::types::{AccountId, Instrument, OrderId, Price, RuleId, Side, Timestamp, TradeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Limit order with specified price.
    Limit,
    /// Market order. Crosses any opposite order.
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Status implied by fill progress alone. cancellation is applied on top.
    pub fn from_fill(quantity: Decimal, filled: Decimal) -> Self {
        if filled.is_zero() {
            OrderStatus::Open
        } else if filled < quantity {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

/// A resting or historical order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    /// None for market orders
    pub price: Option<Price>,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    /// What is still locked against the owner: certificates for sells, cash for buys.
    pub reserved: Decimal,
    pub rule_id: Option<RuleId>,
    /// Ticket that documented the placement
    pub ticket_id: Option<TicketId>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    /// Resting notional. market orders carry no price and count as zero.
    pub fn remaining_notional(&self) -> Decimal {
        self.price
            .map(|p| p.notional(self.remaining()))
            .unwrap_or(Decimal::ZERO)
    }

    /// Record an execution. `filled` never passes `quantity`.
    pub fn fill(&mut self, quantity: Decimal) {
        debug_assert!(quantity <= self.remaining(), "cannot fill more than remaining");
        self.filled += quantity.min(self.remaining());
        self.status = OrderStatus::from_fill(self.quantity, self.filled);
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    /// Earlier order wins. equal timestamps fall back to insertion order.
    pub fn rests_before(&self, other: &Order) -> bool {
        (self.created_at, self.id) < (other.created_at, other.id)
    }
}

/// What a caller asks for. prices are rounded to tick on placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    /// Cash a market buy reserves up front
    #[serde(default)]
    pub estimated_notional: Option<Decimal>,
}

impl OrderRequest {
    pub fn limit(account_id: AccountId, instrument: Instrument, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            account_id,
            instrument,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            estimated_notional: None,
        }
    }

    pub fn market(account_id: AccountId, instrument: Instrument, side: Side, quantity: Decimal) -> Self {
        Self {
            account_id,
            instrument,
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            estimated_notional: None,
        }
    }

    pub fn with_estimated_notional(mut self, notional: Decimal) -> Self {
        self.estimated_notional = Some(notional);
        self
    }
}

/// Immutable result of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub instrument: Instrument,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub price: Price,
    pub quantity: Decimal,
    /// Manufactured between two liquidity providers to adjust resting liquidity
    pub internal: bool,
    pub ticket_id: TicketId,
    pub created_at: Timestamp,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.price.notional(self.quantity)
    }
}

/// Book ordering key. ascending iteration yields best first on both sides:
/// market orders lead, then bids by descending price and asks by ascending price,
/// then earliest timestamp, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BookKey {
    rank: Decimal,
    created_at: Timestamp,
    order_id: OrderId,
}

impl BookKey {
    fn for_order(order: &Order) -> Self {
        let rank = match (order.price, order.side) {
            (None, _) => Decimal::MIN,
            (Some(price), Side::Buy) => -price.value(),
            (Some(price), Side::Sell) => price.value(),
        };
        Self {
            rank,
            created_at: order.created_at,
            order_id: order.id,
        }
    }
}

impl PartialOrd for BookKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BookKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.order_id.cmp(&other.order_id))
    }
}

/// Priority index over the active orders of one instrument.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<BookKey, OrderId>,
    asks: BTreeMap<BookKey, OrderId>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: &Order) {
        let key = BookKey::for_order(order);
        match order.side {
            Side::Buy => self.bids.insert(key, order.id),
            Side::Sell => self.asks.insert(key, order.id),
        };
    }

    pub fn remove(&mut self, order: &Order) {
        let key = BookKey::for_order(order);
        match order.side {
            Side::Buy => self.bids.remove(&key),
            Side::Sell => self.asks.remove(&key),
        };
    }

    /// Order ids of one side in priority order.
    pub fn side(&self, side: Side) -> impl Iterator<Item = OrderId> + '_ {
        let map = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        map.values().copied()
    }

    pub fn len(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// A bid may execute against an ask when its limit reaches the ask's, or either
/// side is a market order.
pub fn crosses(bid: &Order, ask: &Order) -> bool {
    match (bid.price, ask.price) {
        (Some(b), Some(a)) => b >= a,
        _ => true,
    }
}

/// Trades print at the resting order's price. falls back to the aggressor's limit
/// when the resting order is a market order, then to the last trade price.
pub fn execution_price(bid: &Order, ask: &Order, last_trade: Option<Price>) -> Option<Price> {
    let (resting, aggressor) = if bid.rests_before(ask) { (bid, ask) } else { (ask, bid) };
    resting.price.or(aggressor.price).or(last_trade)
}

/// A single aggregated price level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub quantity: Decimal,
    pub cumulative_quantity: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookView {
    pub instrument: Instrument,
    /// Descending by price
    pub bids: Vec<BookLevel>,
    /// Ascending by price
    pub asks: Vec<BookLevel>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Decimal>,
}

impl OrderBookView {
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid.value() + ask.value()) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Group priority-ordered orders into price levels with running cumulative quantity.
/// market orders have no level and are skipped.
pub fn aggregate_levels<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Vec<BookLevel> {
    let mut levels: Vec<BookLevel> = Vec::new();

    for order in orders {
        let Some(price) = order.price else { continue };
        let remaining = order.remaining();

        match levels.last_mut() {
            Some(level) if level.price == price => {
                level.quantity += remaining;
                level.order_count += 1;
            }
            _ => levels.push(BookLevel {
                price,
                quantity: remaining,
                cumulative_quantity: Decimal::ZERO,
                order_count: 1,
            }),
        }
    }

    let mut running = Decimal::ZERO;
    for level in &mut levels {
        running += level.quantity;
        level.cumulative_quantity = running;
    }

    levels
}
