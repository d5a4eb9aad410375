// 11.1: notifications for the outside world. emitted after a unit of work commits,
// never before. delivery is fire-and-forget: a failing sink is logged and skipped.

use crate::liquidity::LiquidityStatus;
use crate::rules::ExecutionOutcome;
use crate::types::{AccountId, Instrument, OrderId, Price, RuleId, Side, Timestamp, TradeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub timestamp: Timestamp,
    pub payload: NotificationPayload,
}

impl Notification {
    pub fn new(id: NotificationId, timestamp: Timestamp, payload: NotificationPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    OrderPlaced(OrderPlacedEvent),
    OrderCancelled(OrderCancelledEvent),
    TradeExecuted(TradeExecutedEvent),
    LiquidityThresholdBreached(ThresholdBreachedEvent),
    RuleExecutionFailed(RuleFailedEvent),
}

impl NotificationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationPayload::OrderPlaced(_) => "order_placed",
            NotificationPayload::OrderCancelled(_) => "order_cancelled",
            NotificationPayload::TradeExecuted(_) => "trade_executed",
            NotificationPayload::LiquidityThresholdBreached(_) => "liquidity_threshold_breached",
            NotificationPayload::RuleExecutionFailed(_) => "rule_execution_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub instrument: Instrument,
    pub side: Side,
    pub price: Option<Price>,
    pub quantity: Decimal,
    pub rule_id: Option<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub released: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub trade_id: TradeId,
    pub instrument: Instrument,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub price: Price,
    pub quantity: Decimal,
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBreachedEvent {
    pub instrument: Instrument,
    pub side: Side,
    pub status: LiquidityStatus,
    pub current_notional: Decimal,
    pub max_notional: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailedEvent {
    pub rule_id: RuleId,
    pub outcome: ExecutionOutcome,
    pub reason: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Notification delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// External delivery channel (UI push, email). must not block the engine.
pub trait NotificationSink: Send {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// In-memory sink that keeps at most `capacity` notifications.
#[derive(Debug, Default)]
pub struct NotificationCollector {
    notifications: Vec<Notification>,
    capacity: usize,
}

impl NotificationCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            notifications: Vec::new(),
            capacity,
        }
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn count(&self, kind: &str) -> usize {
        self.notifications.iter().filter(|n| n.payload.kind() == kind).count()
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
    }

    pub fn push(&mut self, notification: Notification) {
        self.notifications.push(notification);
        if self.capacity > 0 && self.notifications.len() > self.capacity {
            let excess = self.notifications.len() - self.capacity;
            self.notifications.drain(..excess);
        }
    }
}

impl NotificationSink for NotificationCollector {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
        self.push(notification.clone());
        Ok(())
    }
}
