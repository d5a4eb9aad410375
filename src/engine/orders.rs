//! Order placement and cancellation.

use super::core::{snapshot, Engine};
use super::ledger::Posting;
use super::results::{EngineError, OrderSubmission};
use crate::account::TransactionKind;
use crate::audit::{AuditAction, EntityType, TicketDraft};
use crate::events::{NotificationPayload, OrderCancelledEvent, OrderPlacedEvent};
use crate::order::{Order, OrderRequest, OrderStatus, OrderType};
use crate::types::{AccountId, Actor, OrderId, Price, RuleId, Side};
use rust_decimal::Decimal;
use tracing::info;

impl Engine {
    /// Generate a new order ID.
    fn next_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    /// Lock funds and rest the order. sells lock the certificate quantity, limit buys
    /// lock price x quantity in cash, market buys lock their estimated notional.
    pub fn place_order(&mut self, request: OrderRequest, actor: Actor) -> Result<Order, EngineError> {
        self.atomically(|engine| engine.place_order_inner(request, None, &actor))
    }

    /// Place and immediately run a matching pass on the instrument.
    pub fn submit_order(&mut self, request: OrderRequest, actor: Actor) -> Result<OrderSubmission, EngineError> {
        self.atomically(|engine| {
            let instrument = request.instrument;
            let placed = engine.place_order_inner(request, None, &actor)?;
            let trades = engine.run_matching(instrument, &actor)?;
            let order = engine.get_order(placed.id)?.clone();
            Ok(OrderSubmission { order, trades })
        })
    }

    pub(super) fn place_order_inner(
        &mut self,
        request: OrderRequest,
        rule_id: Option<RuleId>,
        actor: &Actor,
    ) -> Result<Order, EngineError> {
        let account = self.get_account(request.account_id)?;
        if !account.active {
            return Err(EngineError::InvalidState(format!(
                "account {} is deactivated",
                request.account_id
            )));
        }
        let config = self.market(request.instrument)?.config.clone();
        config.validate_quantity(request.quantity)?;

        let price = match (request.order_type, request.price) {
            (OrderType::Limit, Some(raw)) => Some(config.round_price(raw)?),
            (OrderType::Limit, None) => {
                return Err(EngineError::ValidationFailed("limit order needs a price".to_string()));
            }
            (OrderType::Market, Some(_)) => {
                return Err(EngineError::ValidationFailed("market order cannot carry a price".to_string()));
            }
            (OrderType::Market, None) => None,
        };

        if let Some(price) = price {
            checked_notional(price, request.quantity)?;
        }
        let reserve = reservation(&request, price)?;
        let lock_asset = request.instrument.lock_asset(request.side);

        let order_ticket = self.issue(
            TicketDraft::new(AuditAction::OrderPlaced, EntityType::Order, actor.clone()).payload(snapshot(&request)),
        );
        let lock = self.post(Posting {
            account_id: request.account_id,
            asset: lock_asset,
            amount: -reserve,
            kind: TransactionKind::LockForOrder,
            actor,
            related: Some(&order_ticket),
            expected_version: None,
        })?;

        let order = Order {
            id: self.next_order_id(),
            account_id: request.account_id,
            instrument: request.instrument,
            side: request.side,
            order_type: request.order_type,
            price,
            quantity: request.quantity,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            reserved: reserve,
            rule_id,
            ticket_id: Some(order_ticket.clone()),
            version: 0,
            created_at: self.current_time,
            updated_at: self.current_time,
        };
        let order = self.store.write_order(order)?;

        self.backfill(&order_ticket, &order.id.to_string())?;
        self.link_tickets(&order_ticket, &[lock.ticket_id])?;

        info!(
            order_id = %order.id,
            account = %order.account_id,
            instrument = %order.instrument,
            side = %order.side,
            quantity = %order.quantity,
            price = ?order.price.map(|p| p.value()),
            "order placed"
        );
        self.notify(NotificationPayload::OrderPlaced(OrderPlacedEvent {
            order_id: order.id,
            account_id: order.account_id,
            instrument: order.instrument,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            rule_id,
        }));

        Ok(order)
    }

    /// Cancel an open or partially filled order and release what it still reserves.
    pub fn cancel_order(&mut self, order_id: OrderId, actor: Actor) -> Result<Order, EngineError> {
        self.atomically(|engine| engine.cancel_order_inner(order_id, None, &actor, "requested"))
    }

    /// Cancel only if the order is still at `expected_version`.
    pub fn cancel_order_checked(&mut self, order_id: OrderId, expected_version: u64, actor: Actor) -> Result<Order, EngineError> {
        self.atomically(|engine| engine.cancel_order_inner(order_id, Some(expected_version), &actor, "requested"))
    }

    pub(super) fn cancel_order_inner(
        &mut self,
        order_id: OrderId,
        expected_version: Option<u64>,
        actor: &Actor,
        reason: &str,
    ) -> Result<Order, EngineError> {
        let before = self.get_order(order_id)?.clone();
        if let Some(expected) = expected_version {
            if expected != before.version {
                return Err(EngineError::ConcurrencyConflict(format!(
                    "order {} at version {}, caller read {}",
                    order_id, before.version, expected
                )));
            }
        }
        if !before.is_active() {
            return Err(EngineError::InvalidState(format!(
                "order {} is {:?}, only open orders can be cancelled",
                order_id, before.status
            )));
        }

        let released = before.reserved;
        let mut after = before.clone();
        after.reserved = Decimal::ZERO;
        after.cancel();
        after.updated_at = self.current_time;

        let mut draft = TicketDraft::new(AuditAction::OrderCancelled, EntityType::Order, actor.clone())
            .entity(order_id)
            .payload(serde_json::json!({ "reason": reason, "released": released }))
            .before(snapshot(&before))
            .after(snapshot(&after));
        if let Some(placed) = &before.ticket_id {
            draft = draft.related(placed.clone());
        }
        let cancel_ticket = self.issue(draft);

        let order = self.store.write_order(after)?;

        if released > Decimal::ZERO {
            self.post(Posting {
                account_id: order.account_id,
                asset: order.instrument.lock_asset(order.side),
                amount: released,
                kind: TransactionKind::ReleaseFromOrder,
                actor,
                related: Some(&cancel_ticket),
                expected_version: None,
            })?;
        }

        info!(order_id = %order_id, released = %released, reason, "order cancelled");
        self.notify(NotificationPayload::OrderCancelled(OrderCancelledEvent {
            order_id,
            account_id: order.account_id,
            released,
        }));

        Ok(order)
    }

    pub fn get_order(&self, order_id: OrderId) -> Result<&Order, EngineError> {
        self.store.order(order_id).ok_or(EngineError::OrderNotFound(order_id))
    }

    pub fn open_orders(&self, account_id: AccountId) -> Vec<&Order> {
        self.store.open_orders_of(account_id).collect()
    }
}

/// Amount locked by a new order, in the lock asset's units.
fn reservation(request: &OrderRequest, price: Option<Price>) -> Result<Decimal, EngineError> {
    match (request.side, price) {
        (Side::Sell, _) => Ok(request.quantity),
        (Side::Buy, Some(price)) => checked_notional(price, request.quantity),
        (Side::Buy, None) => match request.estimated_notional {
            Some(notional) if notional > Decimal::ZERO => Ok(notional),
            _ => Err(EngineError::ValidationFailed(
                "market buy needs a positive estimated notional".to_string(),
            )),
        },
    }
}

/// price x quantity, or a validation error when the product does not fit a Decimal.
pub(super) fn checked_notional(price: Price, quantity: Decimal) -> Result<Decimal, EngineError> {
    price
        .checked_notional(quantity)
        .ok_or_else(|| EngineError::ValidationFailed("notional overflows".to_string()))
}
