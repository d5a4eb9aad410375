//! Ledger: balances, credits and debits.
//!
//! Every posting writes the holding, one ledger transaction and one ticket inside
//! the caller's unit of work.

use super::core::Engine;
use super::results::EngineError;
use crate::account::{validate_amount, BalanceView, Holding, LedgerTransaction, TransactionKind};
use crate::audit::{AuditAction, EntityType, TicketDraft, TicketId};
use crate::types::{AccountId, Actor, AssetType, TransactionId};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, warn};

/// One balance change as requested by engine internals.
pub(super) struct Posting<'a> {
    pub account_id: AccountId,
    pub asset: AssetType,
    /// Signed. credits positive.
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub actor: &'a Actor,
    pub related: Option<&'a TicketId>,
    pub expected_version: Option<u64>,
}

impl Engine {
    /// Free, locked and total quantity of one asset.
    pub fn get_balance(&self, account_id: AccountId, asset: AssetType) -> Result<BalanceView, EngineError> {
        self.get_account(account_id)?;
        let available = self
            .store
            .holding(account_id, asset)
            .map(|h| h.quantity)
            .unwrap_or(Decimal::ZERO);
        Ok(BalanceView::new(available, self.locked(account_id, asset)))
    }

    pub fn balances(&self, account_id: AccountId) -> Result<Vec<(AssetType, BalanceView)>, EngineError> {
        AssetType::ALL
            .iter()
            .map(|asset| Ok((*asset, self.get_balance(account_id, *asset)?)))
            .collect()
    }

    /// Sum of what open orders still reserve against `asset`.
    pub fn locked(&self, account_id: AccountId, asset: AssetType) -> Decimal {
        self.store
            .open_orders_of(account_id)
            .filter(|order| order.instrument.lock_asset(order.side) == asset)
            .map(|order| order.reserved)
            .sum()
    }

    /// Version to pass to the checked mutators.
    pub fn holding_version(&self, account_id: AccountId, asset: AssetType) -> u64 {
        self.store.holding(account_id, asset).map(|h| h.version).unwrap_or(0)
    }

    pub fn transactions_for(&self, account_id: AccountId, asset: AssetType) -> Vec<&LedgerTransaction> {
        self.store
            .transactions()
            .iter()
            .filter(|tx| tx.account_id == account_id && tx.asset == asset)
            .collect()
    }

    /// Credit from an external workflow (deposit, manual adjustment). returns the new total.
    pub fn credit(
        &mut self,
        account_id: AccountId,
        asset: AssetType,
        amount: Decimal,
        kind: TransactionKind,
        actor: Actor,
        related: Option<TicketId>,
    ) -> Result<Decimal, EngineError> {
        self.external_posting(account_id, asset, amount, kind, actor, related, None)
    }

    /// Debit from an external workflow (withdrawal, manual adjustment). returns the new total.
    pub fn debit(
        &mut self,
        account_id: AccountId,
        asset: AssetType,
        amount: Decimal,
        kind: TransactionKind,
        actor: Actor,
        related: Option<TicketId>,
    ) -> Result<Decimal, EngineError> {
        self.external_posting(account_id, asset, -amount, kind, actor, related, None)
    }

    /// Like `credit`, but fails with `ConcurrencyConflict` when the holding moved past
    /// `expected_version`.
    pub fn credit_checked(
        &mut self,
        account_id: AccountId,
        asset: AssetType,
        amount: Decimal,
        kind: TransactionKind,
        actor: Actor,
        expected_version: u64,
    ) -> Result<Decimal, EngineError> {
        self.external_posting(account_id, asset, amount, kind, actor, None, Some(expected_version))
    }

    pub fn debit_checked(
        &mut self,
        account_id: AccountId,
        asset: AssetType,
        amount: Decimal,
        kind: TransactionKind,
        actor: Actor,
        expected_version: u64,
    ) -> Result<Decimal, EngineError> {
        self.external_posting(account_id, asset, -amount, kind, actor, None, Some(expected_version))
    }

    #[allow(clippy::too_many_arguments)]
    fn external_posting(
        &mut self,
        account_id: AccountId,
        asset: AssetType,
        signed_amount: Decimal,
        kind: TransactionKind,
        actor: Actor,
        related: Option<TicketId>,
        expected_version: Option<u64>,
    ) -> Result<Decimal, EngineError> {
        validate_amount(signed_amount.abs())?;

        let allowed = match kind {
            TransactionKind::ManualAdjustment => true,
            TransactionKind::Deposit => signed_amount > Decimal::ZERO,
            TransactionKind::Withdrawal => signed_amount < Decimal::ZERO,
            _ => false,
        };
        if !allowed {
            return Err(EngineError::ValidationFailed(format!(
                "{:?} cannot be posted as a {}",
                kind,
                if signed_amount > Decimal::ZERO { "credit" } else { "debit" }
            )));
        }

        self.atomically(|engine| {
            if let Some(related) = &related {
                engine.ticket(related)?;
            }
            engine.post(Posting {
                account_id,
                asset,
                amount: signed_amount,
                kind,
                actor: &actor,
                related: related.as_ref(),
                expected_version,
            })?;
            Ok(engine.get_balance(account_id, asset)?.total)
        })
    }

    /// Apply one posting. debits may not take the free balance below zero unless the
    /// account is a liquidity provider with relaxed checks.
    pub(super) fn post(&mut self, posting: Posting<'_>) -> Result<LedgerTransaction, EngineError> {
        let account = self.get_account(posting.account_id)?;
        let allows_overdraft = account.allows_overdraft();

        let holding = self
            .store
            .holding(posting.account_id, posting.asset)
            .cloned()
            .unwrap_or_else(|| Holding::new(posting.account_id, posting.asset, self.current_time));

        if let Some(expected) = posting.expected_version {
            if expected != holding.version {
                return Err(EngineError::ConcurrencyConflict(format!(
                    "holding {}/{} at version {}, caller read {}",
                    posting.account_id, posting.asset, holding.version, expected
                )));
            }
        }

        let before = holding.quantity;
        let after = before
            .checked_add(posting.amount)
            .ok_or_else(|| EngineError::ValidationFailed("balance overflows".to_string()))?;
        if posting.amount < Decimal::ZERO && after < Decimal::ZERO {
            if !allows_overdraft {
                return Err(EngineError::InsufficientBalance {
                    account: posting.account_id,
                    asset: posting.asset,
                    requested: -posting.amount,
                    available: before,
                });
            }
            warn!(
                account = %posting.account_id,
                asset = %posting.asset,
                balance = %after,
                "relaxed balance check: holding overdrawn"
            );
        }

        let action = if posting.amount >= Decimal::ZERO {
            AuditAction::BalanceCredited
        } else {
            AuditAction::BalanceDebited
        };
        let mut draft = TicketDraft::new(action, EntityType::Holding, posting.actor.clone())
            .entity(format!("{}/{}", posting.account_id, posting.asset))
            .payload(json!({ "amount": posting.amount, "kind": posting.kind }))
            .before(json!({ "quantity": before }))
            .after(json!({ "quantity": after }));
        if let Some(related) = posting.related {
            draft = draft.related(related.clone());
        }
        let ticket_id = self.issue(draft);

        let mut updated = holding;
        updated.quantity = after;
        updated.updated_at = self.current_time;
        self.store.write_holding(updated)?;

        let transaction = LedgerTransaction {
            id: TransactionId(self.next_transaction_id),
            account_id: posting.account_id,
            asset: posting.asset,
            amount: posting.amount,
            balance_before: before,
            balance_after: after,
            kind: posting.kind,
            ticket_id,
            actor: posting.actor.clone(),
            created_at: self.current_time,
        };
        self.next_transaction_id += 1;
        self.store.append_transaction(transaction.clone());

        debug!(
            account = %posting.account_id,
            asset = %posting.asset,
            amount = %posting.amount,
            kind = ?posting.kind,
            "ledger posting"
        );
        Ok(transaction)
    }
}
