// 8.6 engine/rules.rs: auto-trade rule CRUD and the execute cycle.
//
// A cycle runs in its own unit of work. whatever it fails with is turned into an
// execution outcome, the rule is rescheduled and the record is committed in a
// second unit, so a failing rule never loses its schedule.

use super::core::{snapshot, Engine};
use super::orders::checked_notional;
use super::results::{EngineError, ErrorKind};
use crate::audit::{AuditAction, EntityType, TicketDraft};
use crate::events::{NotificationPayload, RuleFailedEvent};
use crate::liquidity::{ControllerAction, LiquidityStatus};
use crate::order::{OrderRequest, OrderType};
use crate::rules::{
    compute_price, compute_quantity, deviation_pct, AutoTradeRule, ExecutionOutcome, PriceInputs, RuleConfig,
    RuleConfigError, RuleExecutionRecord, RuleState,
};
use crate::types::{AccountId, Actor, Instrument, OrderId, RuleId, Side};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};

/// What one cycle did, before it is stamped into a record.
struct Cycle {
    outcome: ExecutionOutcome,
    reason: Option<String>,
    status: Option<LiquidityStatus>,
    order_id: Option<OrderId>,
    trades: usize,
}

impl Cycle {
    fn skipped(status: LiquidityStatus, reason: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Skipped,
            reason: Some(reason.into()),
            status: Some(status),
            order_id: None,
            trades: 0,
        }
    }
}

impl Engine {
    // ---- CRUD ----

    /// Register a rule for a liquidity provider that has an instrument role.
    pub fn create_rule(&mut self, account_id: AccountId, config: RuleConfig, actor: Actor) -> Result<RuleId, EngineError> {
        config.validate()?;
        self.atomically(|engine| {
            let account = engine.get_account(account_id)?;
            if !account.is_liquidity_provider() {
                return Err(RuleConfigError::NotLiquidityProvider(account_id).into());
            }
            if account.role.is_none() {
                return Err(RuleConfigError::MissingRole(account_id).into());
            }

            let id = RuleId(engine.next_rule_id);
            engine.next_rule_id += 1;
            let rule = AutoTradeRule::new(id, account_id, config, engine.current_time);

            engine.issue(
                TicketDraft::new(AuditAction::RuleCreated, EntityType::Rule, actor)
                    .entity(id)
                    .after(snapshot(&rule)),
            );
            info!(rule_id = %id, account = %account_id, name = %rule.config.name, "rule created");
            engine.store.put_rule(rule);
            Ok(id)
        })
    }

    /// Replace a rule's configuration. schedule and counters are kept.
    pub fn update_rule(&mut self, rule_id: RuleId, config: RuleConfig, actor: Actor) -> Result<AutoTradeRule, EngineError> {
        config.validate()?;
        self.atomically(|engine| {
            let before = engine.rule(rule_id)?.clone();
            if before.state == RuleState::Executing {
                return Err(EngineError::InvalidState(format!("rule {} is executing", rule_id)));
            }

            let mut rule = before.clone();
            rule.config = config;
            rule.updated_at = engine.current_time;

            engine.issue(
                TicketDraft::new(AuditAction::RuleUpdated, EntityType::Rule, actor)
                    .entity(rule_id)
                    .before(snapshot(&before))
                    .after(snapshot(&rule)),
            );
            engine.store.put_rule(rule.clone());
            Ok(rule)
        })
    }

    /// Remove a rule. orders it already placed stay in the book.
    pub fn delete_rule(&mut self, rule_id: RuleId, actor: Actor) -> Result<(), EngineError> {
        self.atomically(|engine| {
            let before = engine.rule(rule_id)?.clone();
            engine.issue(
                TicketDraft::new(AuditAction::RuleDeleted, EntityType::Rule, actor)
                    .entity(rule_id)
                    .before(snapshot(&before)),
            );
            engine.store.remove_rule(rule_id);
            info!(rule_id = %rule_id, "rule deleted");
            Ok(())
        })
    }

    pub fn set_rule_enabled(&mut self, rule_id: RuleId, enabled: bool, actor: Actor) -> Result<(), EngineError> {
        self.atomically(|engine| {
            let before = engine.rule(rule_id)?.clone();
            if before.enabled == enabled {
                return Ok(());
            }
            let mut rule = before.clone();
            rule.enabled = enabled;
            rule.updated_at = engine.current_time;

            let action = if enabled {
                AuditAction::RuleEnabled
            } else {
                AuditAction::RuleDisabled
            };
            engine.issue(
                TicketDraft::new(action, EntityType::Rule, actor)
                    .entity(rule_id)
                    .before(snapshot(&before))
                    .after(snapshot(&rule)),
            );
            engine.store.put_rule(rule);
            Ok(())
        })
    }

    pub fn rule(&self, rule_id: RuleId) -> Result<&AutoTradeRule, EngineError> {
        self.store.rule(rule_id).ok_or(EngineError::RuleNotFound(rule_id))
    }

    pub fn rules_for(&self, account_id: AccountId) -> Vec<&AutoTradeRule> {
        self.store.rules().filter(|rule| rule.account_id == account_id).collect()
    }

    pub fn executions_for(&self, rule_id: RuleId) -> Vec<&RuleExecutionRecord> {
        self.store
            .executions()
            .iter()
            .filter(|record| record.rule_id == rule_id)
            .collect()
    }

    // ---- execution ----

    /// Run one cycle of an enabled rule now, whether or not it is due. the returned
    /// record is also persisted. cycle failures are outcomes, not errors.
    pub fn execute_rule(&mut self, rule_id: RuleId) -> Result<RuleExecutionRecord, EngineError> {
        let rule = self.rule(rule_id)?.clone();
        if !rule.enabled {
            return Err(EngineError::InvalidState(format!("rule {} is disabled", rule_id)));
        }

        let mut executing = rule.clone();
        executing.state = RuleState::Executing;
        self.store.put_rule(executing);

        let cycle = match self.atomically(|engine| engine.rule_cycle(&rule)) {
            Ok(cycle) => cycle,
            Err(err) => {
                warn!(rule_id = %rule_id, error = %err, "rule execution failed");
                Cycle {
                    outcome: outcome_for(&err),
                    reason: Some(err.to_string()),
                    status: self.rule_side_status(&rule),
                    order_id: None,
                    trades: 0,
                }
            }
        };

        let delay = rule.config.interval.next_delay_millis(&mut self.rng);
        self.atomically(|engine| engine.finish_execution(rule_id, cycle, delay))
    }

    fn finish_execution(&mut self, rule_id: RuleId, cycle: Cycle, delay_millis: i64) -> Result<RuleExecutionRecord, EngineError> {
        let now = self.current_time;
        let mut rule = self.rule(rule_id)?.clone();
        rule.state = RuleState::Idle;
        rule.last_executed_at = Some(now);
        rule.next_execution_at = Some(now.plus_millis(delay_millis));
        rule.execution_count += 1;
        rule.updated_at = now;

        let mut draft = TicketDraft::new(AuditAction::RuleExecuted, EntityType::Rule, Actor::System)
            .entity(rule_id)
            .payload(json!({
                "outcome": cycle.outcome,
                "reason": cycle.reason,
                "order_id": cycle.order_id,
                "trades": cycle.trades,
            }));
        if let Some(placed) = cycle.order_id.and_then(|id| self.store.order(id)).and_then(|o| o.ticket_id.clone()) {
            draft = draft.related(placed);
        }
        let ticket_id = self.issue(draft);

        let record = RuleExecutionRecord {
            rule_id,
            executed_at: now,
            outcome: cycle.outcome,
            reason: cycle.reason,
            liquidity_status: cycle.status,
            order_id: cycle.order_id,
            trades: cycle.trades,
            ticket_id: Some(ticket_id),
        };

        if record.outcome.is_failure() {
            self.notify(NotificationPayload::RuleExecutionFailed(RuleFailedEvent {
                rule_id,
                outcome: record.outcome,
                reason: record.reason.clone().unwrap_or_default(),
            }));
        }
        info!(
            rule_id = %rule_id,
            outcome = ?record.outcome,
            trades = record.trades,
            next = %now.plus_millis(delay_millis),
            "rule executed"
        );

        self.store.put_rule(rule);
        self.store.append_execution(record.clone());
        Ok(record)
    }

    fn rule_instrument(&self, rule: &AutoTradeRule) -> Result<Instrument, EngineError> {
        let account = self.get_account(rule.account_id)?;
        account
            .role
            .ok_or_else(|| RuleConfigError::MissingRole(rule.account_id).into())
    }

    fn rule_side_status(&self, rule: &AutoTradeRule) -> Option<LiquidityStatus> {
        let instrument = self.rule_instrument(rule).ok()?;
        self.liquidity_status(instrument, rule.config.side).ok().map(|r| r.status)
    }

    fn rule_cycle(&mut self, rule: &AutoTradeRule) -> Result<Cycle, EngineError> {
        let account_id = rule.account_id;
        if !self.get_account(account_id)?.active {
            return Err(EngineError::InvalidState(format!("account {} is deactivated", account_id)));
        }
        let instrument = self.rule_instrument(rule)?;
        let side = rule.config.side;

        let report = self.liquidity_status(instrument, side)?;
        match report.status.action(self.config.internal_trade_retries) {
            ControllerAction::Hold => return Ok(Cycle::skipped(report.status, "liquidity within target band")),
            ControllerAction::Drain { .. } => {
                let enforcement = self.enforce_liquidity(instrument, side)?;
                if enforcement.drained() {
                    return Ok(Cycle {
                        outcome: ExecutionOutcome::InternalTrades,
                        reason: enforcement.failure,
                        status: Some(report.status),
                        order_id: None,
                        trades: enforcement.trades.len(),
                    });
                }
                let reason = enforcement.failure.unwrap_or_else(|| "nothing to drain".to_string());
                return Ok(Cycle::skipped(report.status, reason));
            }
            ControllerAction::PlaceOrder => {}
        }

        let config = self.market(instrument)?.config.clone();
        let settings = self.store.settings(instrument, side).cloned();
        let book = self.get_book(instrument)?;
        let inputs = PriceInputs {
            best_bid: book.best_bid.map(|p| p.value()),
            best_ask: book.best_ask.map(|p| p.value()),
            reference: self.prices.reference_price(instrument, self.current_time),
        };

        let raw_price = compute_price(&rule.config.price_mode, side, &inputs, &mut self.rng)
            .ok_or(EngineError::NoReferencePrice(instrument))?;
        if raw_price <= Decimal::ZERO {
            return Err(EngineError::ValidationFailed(format!("computed price {} is not positive", raw_price)));
        }
        let price = config.round_price(raw_price)?;

        let ceiling = rule
            .config
            .validation
            .max_price_deviation_pct
            .or(settings.as_ref().map(|s| s.price_deviation_pct));
        if let (Some(ceiling), Some(reference)) = (ceiling, inputs.reference.or_else(|| inputs.mid())) {
            let deviation = deviation_pct(price.value(), reference);
            if deviation > ceiling {
                return Err(EngineError::ValidationFailed(format!(
                    "price {} is {}% from reference {}, ceiling {}%",
                    price,
                    deviation.round_dp(2),
                    reference,
                    ceiling
                )));
            }
        }

        if let Some(max) = rule.config.validation.max_active_orders {
            let active = self
                .store
                .open_orders_of(account_id)
                .filter(|order| order.rule_id == Some(rule.id))
                .count();
            if active >= max as usize {
                return Err(EngineError::ValidationFailed(format!(
                    "rule has {} active orders, ceiling {}",
                    active, max
                )));
            }
        }

        let available = self.get_balance(account_id, instrument.lock_asset(side))?.available;
        let base = match side {
            Side::Sell => available,
            Side::Buy => available.checked_div(price.value()).unwrap_or(Decimal::MAX),
        };
        let mut quantity = config.floor_to_lot(compute_quantity(&rule.config.quantity_mode, base, &mut self.rng));
        if let Some(max_notional) = settings.as_ref().and_then(|s| s.max_order_notional) {
            if let Some(cap) = max_notional.checked_div(price.value()) {
                quantity = quantity.min(config.floor_to_lot(cap));
            }
        }
        if quantity < config.min_quantity {
            return Err(EngineError::ValidationFailed(format!(
                "quantity {} below instrument minimum {}",
                quantity, config.min_quantity
            )));
        }

        if let Some(settings) = &settings {
            let notional = checked_notional(price, quantity)?;
            if notional < settings.min_order_notional {
                return Err(EngineError::ValidationFailed(format!(
                    "order notional {} below minimum {}",
                    notional, settings.min_order_notional
                )));
            }
            let levels = match side {
                Side::Buy => &book.bids,
                Side::Sell => &book.asks,
            };
            let at_level = levels
                .iter()
                .find(|level| level.price == price)
                .map_or(0, |level| level.order_count);
            if at_level >= settings.max_orders_per_level as usize {
                return Err(EngineError::ValidationFailed(format!(
                    "price level {} already holds {} orders",
                    price, at_level
                )));
            }
        }

        let request = match rule.config.order_type {
            OrderType::Limit => OrderRequest::limit(account_id, instrument, side, price.value(), quantity),
            OrderType::Market => {
                let request = OrderRequest::market(account_id, instrument, side, quantity);
                match side {
                    Side::Buy => request.with_estimated_notional(checked_notional(price, quantity)?),
                    Side::Sell => request,
                }
            }
        };
        let actor = Actor::System;
        let order = self.place_order_inner(request, Some(rule.id), &actor)?;
        let trades = self.run_matching(instrument, &actor)?;
        debug!(rule_id = %rule.id, order_id = %order.id, trades = trades.len(), "rule order placed");

        Ok(Cycle {
            outcome: ExecutionOutcome::OrderPlaced,
            reason: None,
            status: Some(report.status),
            order_id: Some(order.id),
            trades: trades.len(),
        })
    }
}

fn outcome_for(err: &EngineError) -> ExecutionOutcome {
    match err.kind() {
        ErrorKind::InsufficientBalance => ExecutionOutcome::InsufficientBalance,
        ErrorKind::ValidationFailed => ExecutionOutcome::ValidationFailed,
        ErrorKind::NoReferencePrice => ExecutionOutcome::NoReferencePrice,
        _ => ExecutionOutcome::Failed,
    }
}
