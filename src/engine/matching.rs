//! Matching and trade settlement.

use super::core::Engine;
use super::ledger::Posting;
use super::orders::checked_notional;
use super::results::EngineError;
use crate::account::TransactionKind;
use crate::audit::{AuditAction, EntityType, TicketDraft};
use crate::events::{NotificationPayload, TradeExecutedEvent};
use crate::order::{aggregate_levels, crosses, execution_price, Order, OrderBookView, Trade};
use crate::types::{AccountId, Actor, AssetType, Instrument, OrderId, Price, Side, TradeId};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};

/// A crossing pair found in the book.
struct Cross {
    bid: OrderId,
    ask: OrderId,
    price: Price,
}

impl Engine {
    /// Execute every crossing pair in price-time priority. no crossing orders is a no-op.
    pub fn match_orders(&mut self, instrument: Instrument) -> Result<Vec<Trade>, EngineError> {
        self.atomically(|engine| engine.run_matching(instrument, &Actor::System))
    }

    pub(super) fn run_matching(&mut self, instrument: Instrument, actor: &Actor) -> Result<Vec<Trade>, EngineError> {
        let config = self.market(instrument)?.config.clone();
        let mut trades = Vec::new();

        while let Some(cross) = self.find_cross(instrument) {
            let bid = self.get_order(cross.bid)?.clone();
            let ask = self.get_order(cross.ask)?.clone();

            let mut quantity = config.floor_to_lot(bid.remaining().min(ask.remaining()));
            if bid.is_market() {
                // a market buy can only spend what it reserved
                let affordable = match bid.reserved.checked_div(cross.price.value()) {
                    Some(units) => config.floor_to_lot(units),
                    None => quantity,
                };
                if affordable.is_zero() {
                    self.cancel_order_inner(bid.id, None, actor, "reserve exhausted")?;
                    continue;
                }
                quantity = quantity.min(affordable);
            }
            if quantity.is_zero() {
                debug!(bid = %bid.id, ask = %ask.id, "crossing pair below one lot");
                break;
            }

            let trade = self.execute_trade(bid, ask, cross.price, quantity, false, actor)?;
            trades.push(trade);
        }

        Ok(trades)
    }

    /// Best bid, then best ask, skipping pairs owned by the same account.
    fn find_cross(&self, instrument: Instrument) -> Option<Cross> {
        let book = self.store.book(instrument)?;
        let last_trade = self.store.market(instrument).and_then(|m| m.last_trade_price);

        for bid_id in book.side(Side::Buy) {
            let Some(bid) = self.store.order(bid_id) else { continue };
            for ask_id in book.side(Side::Sell) {
                let Some(ask) = self.store.order(ask_id) else { continue };
                if !crosses(bid, ask) {
                    // asks only get worse from here
                    break;
                }
                if bid.account_id == ask.account_id {
                    continue;
                }
                if let Some(price) = execution_price(bid, ask, last_trade) {
                    return Some(Cross {
                        bid: bid.id,
                        ask: ask.id,
                        price,
                    });
                }
            }
        }
        None
    }

    /// Fill both orders, settle both accounts and record the trade.
    pub(super) fn execute_trade(
        &mut self,
        mut bid: Order,
        mut ask: Order,
        price: Price,
        quantity: Decimal,
        internal: bool,
        actor: &Actor,
    ) -> Result<Trade, EngineError> {
        let instrument = bid.instrument;
        let notional = checked_notional(price, quantity)?;

        let action = if internal {
            AuditAction::InternalTradeExecuted
        } else {
            AuditAction::TradeExecuted
        };
        let mut draft = TicketDraft::new(action, EntityType::Trade, actor.clone()).payload(json!({
            "buy_order": bid.id,
            "sell_order": ask.id,
            "price": price.value(),
            "quantity": quantity,
        }));
        for placed in [&bid.ticket_id, &ask.ticket_id].into_iter().flatten() {
            draft = draft.related(placed.clone());
        }
        let ticket = self.issue(draft);

        // seller: the lock is consumed, cash comes in
        ask.fill(quantity);
        ask.reserved -= quantity;
        let seller_leftover = take_leftover(&mut ask);
        ask.updated_at = self.current_time;
        let ask = self.store.write_order(ask)?;

        // buyer: consume the cash lock at the order's own limit
        let consumed = match bid.price {
            Some(limit) => checked_notional(limit, quantity)?,
            None => notional,
        };
        bid.fill(quantity);
        bid.reserved = (bid.reserved - consumed).max(Decimal::ZERO);
        let buyer_leftover = take_leftover(&mut bid);
        bid.updated_at = self.current_time;
        let bid = self.store.write_order(bid)?;

        let settle = |account_id: AccountId, asset: AssetType, amount: Decimal, kind: TransactionKind| Posting {
            account_id,
            asset,
            amount,
            kind,
            actor,
            related: Some(&ticket),
            expected_version: None,
        };

        self.post(settle(ask.account_id, AssetType::Cash, notional, TransactionKind::TradeSettlement))?;
        self.post(settle(bid.account_id, instrument.asset, quantity, TransactionKind::TradeSettlement))?;

        let improvement = consumed - notional;
        if improvement > Decimal::ZERO {
            self.post(settle(bid.account_id, AssetType::Cash, improvement, TransactionKind::ReleaseFromOrder))?;
        } else if improvement < Decimal::ZERO {
            // internal trades may print above the buyer's limit
            self.post(settle(bid.account_id, AssetType::Cash, improvement, TransactionKind::TradeSettlement))?;
        }
        if seller_leftover > Decimal::ZERO {
            self.post(settle(ask.account_id, instrument.asset, seller_leftover, TransactionKind::ReleaseFromOrder))?;
        }
        if buyer_leftover > Decimal::ZERO {
            self.post(settle(bid.account_id, AssetType::Cash, buyer_leftover, TransactionKind::ReleaseFromOrder))?;
        }

        let trade = Trade {
            id: TradeId(self.next_trade_id),
            instrument,
            buy_order_id: bid.id,
            sell_order_id: ask.id,
            buyer: bid.account_id,
            seller: ask.account_id,
            price,
            quantity,
            internal,
            ticket_id: ticket.clone(),
            created_at: self.current_time,
        };
        self.next_trade_id += 1;
        self.backfill(&ticket, &trade.id.to_string())?;
        self.store.append_trade(trade.clone());

        let mut market = self.market(instrument)?.clone();
        market.record_trade(price, quantity, self.current_time);
        self.store.put_market(market);

        info!(
            trade_id = %trade.id,
            instrument = %instrument,
            price = %price,
            quantity = %quantity,
            buyer = %trade.buyer,
            seller = %trade.seller,
            internal,
            "trade executed"
        );
        self.notify(NotificationPayload::TradeExecuted(TradeExecutedEvent {
            trade_id: trade.id,
            instrument,
            buyer: trade.buyer,
            seller: trade.seller,
            price,
            quantity,
            internal,
        }));

        Ok(trade)
    }

    /// Aggregated depth with best prices and spread.
    pub fn get_book(&self, instrument: Instrument) -> Result<OrderBookView, EngineError> {
        self.market(instrument)?;

        let (bids, asks) = match self.store.book(instrument) {
            Some(book) => {
                let side = |side| {
                    let orders: Vec<&Order> = book.side(side).filter_map(|id| self.store.order(id)).collect();
                    aggregate_levels(orders)
                };
                (side(Side::Buy), side(Side::Sell))
            }
            None => (Vec::new(), Vec::new()),
        };

        let best_bid = bids.first().map(|level| level.price);
        let best_ask = asks.first().map(|level| level.price);
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask.value() - bid.value()),
            _ => None,
        };

        Ok(OrderBookView {
            instrument,
            bids,
            asks,
            best_bid,
            best_ask,
            spread,
        })
    }

    pub fn trades(&self) -> &[Trade] {
        self.store.trades()
    }
}

/// A filled order keeps nothing locked. returns what was still reserved.
fn take_leftover(order: &mut Order) -> Decimal {
    if order.is_active() {
        return Decimal::ZERO;
    }
    std::mem::replace(&mut order.reserved, Decimal::ZERO)
}
