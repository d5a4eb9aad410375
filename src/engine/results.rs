// 8.0.2: result types and errors for engine operations.

use crate::account::AccountError;
use crate::audit::TicketId;
use crate::config::ConfigError;
use crate::liquidity::LiquidityError;
use crate::market::MarketError;
use crate::order::{Order, Trade};
use crate::rules::RuleConfigError;
use crate::store::StoreError;
use crate::types::{AccountId, AssetType, Instrument, OrderId, RuleId, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order as placed plus whatever the follow-up matching pass executed.
#[derive(Debug, Clone)]
pub struct OrderSubmission {
    pub order: Order,
    pub trades: Vec<Trade>,
}

impl OrderSubmission {
    pub fn filled_quantity(&self) -> Decimal {
        self.trades.iter().map(|t| t.quantity).sum()
    }
}

/// Machine readable failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientBalance,
    InvalidState,
    ValidationFailed,
    NoReferencePrice,
    ConcurrencyConflict,
    NotFound,
    NoCrossablePair,
    InvalidConfig,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Insufficient {asset} balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        asset: AssetType,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("No reference price available for {0}")]
    NoReferencePrice(Instrument),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Rule {0} not found")]
    RuleNotFound(RuleId),

    #[error("Instrument {0} not listed")]
    InstrumentNotFound(Instrument),

    #[error("Ticket {0} not found")]
    TicketNotFound(TicketId),

    #[error("No crossable pair for {side} side of {instrument}")]
    NoCrossablePair { instrument: Instrument, side: Side },

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Rule config error: {0}")]
    RuleConfig(#[from] RuleConfigError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Liquidity error: {0}")]
    Liquidity(#[from] LiquidityError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::ConcurrencyConflict(err.to_string())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::ValidationFailed(_)
            | EngineError::Market(_)
            | EngineError::RuleConfig(_)
            | EngineError::Account(_)
            | EngineError::Liquidity(_) => ErrorKind::ValidationFailed,
            EngineError::NoReferencePrice(_) => ErrorKind::NoReferencePrice,
            EngineError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            EngineError::AccountNotFound(_)
            | EngineError::OrderNotFound(_)
            | EngineError::RuleNotFound(_)
            | EngineError::InstrumentNotFound(_)
            | EngineError::TicketNotFound(_) => ErrorKind::NotFound,
            EngineError::NoCrossablePair { .. } => ErrorKind::NoCrossablePair,
            EngineError::Config(_) => ErrorKind::InvalidConfig,
        }
    }
}
