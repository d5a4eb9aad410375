//! Accounts, holdings and ledger records.
//!
//! A holding stores only the free quantity of one asset for one account. The
//! locked portion is never stored: it is the sum of what open orders still
//! reserve, so it cannot drift away from the order book.

use crate::audit::TicketId;
use crate::types::{AccountId, Actor, AssetType, Instrument, Timestamp, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Regular,
    LiquidityProvider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub kind: AccountKind,
    pub active: bool,
    /// Liquidity providers only. debits may overdraw the free balance.
    pub relaxed_balance_checks: bool,
    /// Instrument a liquidity provider quotes. auto-trade rules resolve their market from it.
    pub role: Option<Instrument>,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: AccountId, kind: AccountKind, timestamp: Timestamp) -> Self {
        Self {
            id,
            kind,
            active: true,
            relaxed_balance_checks: false,
            role: None,
            created_at: timestamp,
        }
    }

    pub fn is_liquidity_provider(&self) -> bool {
        self.kind == AccountKind::LiquidityProvider
    }

    pub fn allows_overdraft(&self) -> bool {
        self.is_liquidity_provider() && self.relaxed_balance_checks
    }
}

/// Stored balance row, keyed by (account, asset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub account_id: AccountId,
    pub asset: AssetType,
    /// Free quantity. the running sum of every ledger transaction on this row.
    pub quantity: Decimal,
    /// Bumped on every write. compare-and-swap guard against lost updates.
    pub version: u64,
    pub updated_at: Timestamp,
}

impl Holding {
    pub fn new(account_id: AccountId, asset: AssetType, timestamp: Timestamp) -> Self {
        Self {
            account_id,
            asset,
            quantity: Decimal::ZERO,
            version: 0,
            updated_at: timestamp,
        }
    }
}

/// What `get_balance` reports. `available = total - locked` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub available: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

impl BalanceView {
    pub fn new(available: Decimal, locked: Decimal) -> Self {
        Self {
            available,
            locked,
            total: available + locked,
        }
    }

    pub fn zero() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    LockForOrder,
    ReleaseFromOrder,
    TradeSettlement,
    ManualAdjustment,
}

impl TransactionKind {
    /// Kinds allowed to change how much of an asset exists in the system.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            TransactionKind::Deposit | TransactionKind::Withdrawal | TransactionKind::ManualAdjustment
        )
    }
}

/// Immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub asset: AssetType,
    /// Signed. credits positive, debits negative.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub kind: TransactionKind,
    pub ticket_id: TicketId,
    pub actor: Actor,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AccountError {
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Only liquidity provider accounts may relax balance checks ({0})")]
    RelaxedChecksNotAllowed(AccountId),

    #[error("Role instrument must be a certificate, got {0}")]
    InvalidRole(Instrument),
}

pub fn validate_amount(amount: Decimal) -> Result<(), AccountError> {
    if amount <= Decimal::ZERO {
        return Err(AccountError::NonPositiveAmount(amount));
    }
    Ok(())
}
