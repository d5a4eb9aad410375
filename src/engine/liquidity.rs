//! Liquidity target controller.

use super::core::{snapshot, Engine};
use super::results::EngineError;
use crate::audit::{AuditAction, EntityType, TicketDraft};
use crate::events::{NotificationPayload, ThresholdBreachedEvent};
use crate::liquidity::{
    ControllerAction, EnforcementReport, LiquidityMarketSettings, LiquidityStatus, LiquidityStatusReport,
};
use crate::order::{Order, Trade};
use crate::rules::uniform_decimal;
use crate::types::{Actor, Instrument, Price, Side};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl Engine {
    pub fn upsert_liquidity_settings(&mut self, mut settings: LiquidityMarketSettings, actor: Actor) -> Result<(), EngineError> {
        settings.validate()?;
        self.atomically(|engine| {
            engine.market(settings.instrument)?;
            settings.updated_at = engine.current_time;
            let before = engine.store.settings(settings.instrument, settings.side).cloned();

            let mut draft = TicketDraft::new(AuditAction::LiquiditySettingsUpdated, EntityType::LiquiditySettings, actor)
                .entity(format!("{}/{}", settings.instrument, settings.side))
                .after(snapshot(&settings));
            if let Some(before) = &before {
                draft = draft.before(snapshot(before));
            }
            engine.issue(draft);
            engine.store.put_settings(settings);
            Ok(())
        })
    }

    pub fn liquidity_settings(&self, instrument: Instrument, side: Side) -> Option<&LiquidityMarketSettings> {
        self.store.settings(instrument, side)
    }

    /// Resting limit orders of liquidity providers on one side, best first.
    fn provider_orders(&self, instrument: Instrument, side: Side) -> Vec<Order> {
        let Some(book) = self.store.book(instrument) else {
            return Vec::new();
        };
        book.side(side)
            .filter_map(|id| self.store.order(id))
            .filter(|order| !order.is_market())
            .filter(|order| {
                self.store
                    .account(order.account_id)
                    .map(|account| account.is_liquidity_provider())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Σ price x remaining over provider orders, and how many there are.
    pub fn resting_liquidity(&self, instrument: Instrument, side: Side) -> (Decimal, usize) {
        let orders = self.provider_orders(instrument, side);
        let notional = orders
            .iter()
            .map(Order::remaining_notional)
            .fold(Decimal::ZERO, |total, notional| total.saturating_add(notional));
        (notional, orders.len())
    }

    pub fn liquidity_status(&self, instrument: Instrument, side: Side) -> Result<LiquidityStatusReport, EngineError> {
        self.market(instrument)?;
        let (current, resting) = self.resting_liquidity(instrument, side);
        Ok(LiquidityStatusReport::build(
            instrument,
            side,
            current,
            resting,
            self.store.settings(instrument, side),
        ))
    }

    /// Drain a side that is above target or over its ceiling. internal trade failures
    /// end the pass early and are reported, not raised.
    pub fn enforce_liquidity(&mut self, instrument: Instrument, side: Side) -> Result<EnforcementReport, EngineError> {
        let before = self.liquidity_status(instrument, side)?;

        if before.status == LiquidityStatus::ExceedsMax {
            warn!(
                %instrument,
                %side,
                current = %before.current_notional,
                max = ?before.max_notional,
                "liquidity above hard maximum"
            );
            self.notify(NotificationPayload::LiquidityThresholdBreached(ThresholdBreachedEvent {
                instrument,
                side,
                status: before.status,
                current_notional: before.current_notional,
                max_notional: before.max_notional,
            }));
        }

        let mut attempts = 0;
        let mut trades = Vec::new();
        let mut failure = None;

        if let ControllerAction::Drain { max_attempts } = before.status.action(self.config.internal_trade_retries) {
            while attempts < max_attempts {
                if before.status == LiquidityStatus::ExceedsMax {
                    let (current, _) = self.resting_liquidity(instrument, side);
                    if before.max_notional.map_or(true, |max| current <= max) {
                        break;
                    }
                }
                attempts += 1;
                match self.atomically(|engine| engine.internal_trade(instrument, side)) {
                    Ok(trade) => trades.push(trade.id),
                    Err(err) => {
                        debug!(%instrument, %side, error = %err, "internal trade not possible");
                        failure = Some(err.to_string());
                        break;
                    }
                }
            }
        }

        let after = self.liquidity_status(instrument, side)?;
        if !trades.is_empty() {
            info!(
                %instrument,
                %side,
                trades = trades.len(),
                before = %before.current_notional,
                after = %after.current_notional,
                "liquidity drained"
            );
        }

        Ok(EnforcementReport {
            instrument,
            side,
            status_before: before.status,
            status_after: after.status,
            notional_before: before.current_notional,
            notional_after: after.current_notional,
            attempts,
            trades,
            failure,
        })
    }

    /// One forced trade between two different providers, priced inside the spread.
    pub fn execute_internal_trade(&mut self, instrument: Instrument, side: Side) -> Result<Trade, EngineError> {
        self.atomically(|engine| engine.internal_trade(instrument, side))
    }

    /// Best provider order on the `excess` side against the best counter order of
    /// another provider.
    pub(super) fn internal_trade(&mut self, instrument: Instrument, excess: Side) -> Result<Trade, EngineError> {
        let config = self.market(instrument)?.config.clone();
        let primaries = self.provider_orders(instrument, excess);
        let counters = self.provider_orders(instrument, excess.opposite());

        let (primary, counter) = primaries
            .iter()
            .find_map(|p| {
                counters
                    .iter()
                    .find(|c| c.account_id != p.account_id)
                    .map(|c| (p.clone(), c.clone()))
            })
            .ok_or(EngineError::NoCrossablePair { instrument, side: excess })?;

        let (bid, ask) = match primary.side {
            Side::Buy => (primary, counter),
            Side::Sell => (counter, primary),
        };
        let (Some(bid_price), Some(ask_price)) = (bid.price, ask.price) else {
            return Err(EngineError::NoCrossablePair { instrument, side: excess });
        };

        let low = bid_price.value().min(ask_price.value());
        let high = bid_price.value().max(ask_price.value());
        let drawn = uniform_decimal(&mut self.rng, low, high);
        let rounded = config.round_price(drawn)?.value().clamp(low, high);
        let price = Price::new(rounded).ok_or_else(|| EngineError::ValidationFailed(format!("internal trade price {}", rounded)))?;

        let quantity = config.floor_to_lot(bid.remaining().min(ask.remaining()));
        if quantity.is_zero() {
            return Err(EngineError::NoCrossablePair { instrument, side: excess });
        }

        self.execute_trade(bid, ask, price, quantity, true, &Actor::System)
    }
}
