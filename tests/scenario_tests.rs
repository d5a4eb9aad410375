//! Scenario tests
//!
//! End-to-end walks through the ledger, the book, the liquidity controller and
//! the audit trail, checking balances and tickets after every step.

use liquidity_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

// 2026-03-01T00:00:00Z
const START: i64 = 1_772_323_200;

fn rec() -> Instrument {
    Instrument::new(AssetType::Rec, MarketId(1))
}

fn engine() -> Engine {
    let mut engine = Engine::from_config(&ExchangeConfig::default()).unwrap();
    engine.set_time(Timestamp::from_secs(START));
    engine
}

fn funded(engine: &mut Engine, kind: AccountKind, asset: AssetType, amount: Decimal) -> AccountId {
    let id = engine.open_account(kind, Actor::admin("ops")).unwrap();
    if amount > Decimal::ZERO {
        engine
            .credit(id, asset, amount, TransactionKind::Deposit, Actor::admin("treasury"), None)
            .unwrap();
    }
    id
}

fn provider(engine: &mut Engine, asset: AssetType, amount: Decimal) -> AccountId {
    let id = funded(engine, AccountKind::LiquidityProvider, asset, amount);
    engine
        .configure_liquidity_provider(id, rec(), false, Actor::admin("ops"))
        .unwrap();
    id
}

/// Sell and buy flows from a plain deposit to a filled trade.
mod ledger_and_matching {
    use super::*;

    #[test]
    fn sell_order_locks_certificates() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(1000));

        let order = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10.00), dec!(400)), Actor::Account(a))
            .unwrap();

        let balance = engine.get_balance(a, AssetType::Rec).unwrap();
        assert_eq!(balance.available, dec!(600));
        assert_eq!(balance.locked, dec!(400));
        assert_eq!(balance.total, dec!(1000));
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[test]
    fn crossing_buy_fills_resting_ask() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(1000));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(10000));

        let ask = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10.00), dec!(400)), Actor::Account(a))
            .unwrap();
        let submission = engine
            .submit_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10.00), dec!(400)), Actor::Account(b))
            .unwrap();

        assert_eq!(submission.trades.len(), 1);
        let trade = &submission.trades[0];
        assert_eq!(trade.quantity, dec!(400));
        assert_eq!(trade.price.value(), dec!(10.00));
        assert!(!trade.internal);

        assert_eq!(engine.get_order(ask.id).unwrap().status, OrderStatus::Filled);
        assert_eq!(submission.order.status, OrderStatus::Filled);

        let a_rec = engine.get_balance(a, AssetType::Rec).unwrap();
        assert_eq!(a_rec.locked, Decimal::ZERO);
        assert_eq!(a_rec.total, dec!(600));
        assert_eq!(engine.get_balance(a, AssetType::Cash).unwrap().total, dec!(4000));

        assert_eq!(engine.get_balance(b, AssetType::Rec).unwrap().total, dec!(400));
        let b_cash = engine.get_balance(b, AssetType::Cash).unwrap();
        assert_eq!(b_cash.total, dec!(6000));
        assert_eq!(b_cash.locked, Decimal::ZERO);
    }

    #[test]
    fn price_improvement_is_released_to_buyer() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));

        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(9.50), dec!(100)), Actor::Account(a))
            .unwrap();
        let submission = engine
            .submit_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10.00), dec!(100)), Actor::Account(b))
            .unwrap();

        assert_eq!(submission.trades[0].price.value(), dec!(9.50));
        // paid 950, the extra 50 locked at the limit comes back
        assert_eq!(engine.get_balance(b, AssetType::Cash).unwrap().total, dec!(50));
        assert_eq!(engine.get_balance(b, AssetType::Cash).unwrap().locked, Decimal::ZERO);
    }

    #[test]
    fn resting_bid_sets_the_price() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));

        engine
            .place_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10.00), dec!(50)), Actor::Account(b))
            .unwrap();
        let submission = engine
            .submit_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(9.00), dec!(50)), Actor::Account(a))
            .unwrap();

        assert_eq!(submission.trades[0].price.value(), dec!(10.00));
        assert_eq!(engine.get_balance(a, AssetType::Cash).unwrap().total, dec!(500));
    }

    #[test]
    fn partial_fill_keeps_remainder_locked() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(1000));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(10000));

        let ask = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(400)), Actor::Account(a))
            .unwrap();
        engine
            .submit_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10), dec!(150)), Actor::Account(b))
            .unwrap();

        let ask = engine.get_order(ask.id).unwrap();
        assert_eq!(ask.status, OrderStatus::PartiallyFilled);
        assert_eq!(ask.remaining(), dec!(250));
        assert_eq!(engine.get_balance(a, AssetType::Rec).unwrap().locked, dec!(250));
    }

    #[test]
    fn price_time_priority() {
        let mut engine = engine();
        let early = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let late = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let cheap = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let buyer = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(10000));

        let first = engine
            .place_order(OrderRequest::limit(early, rec(), Side::Sell, dec!(10), dec!(50)), Actor::Account(early))
            .unwrap();
        engine.advance_time(1_000);
        let second = engine
            .place_order(OrderRequest::limit(late, rec(), Side::Sell, dec!(10), dec!(50)), Actor::Account(late))
            .unwrap();
        engine.advance_time(1_000);
        let best = engine
            .place_order(OrderRequest::limit(cheap, rec(), Side::Sell, dec!(9.90), dec!(50)), Actor::Account(cheap))
            .unwrap();

        let submission = engine
            .submit_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(10), dec!(120)), Actor::Account(buyer))
            .unwrap();

        let sells: Vec<OrderId> = submission.trades.iter().map(|t| t.sell_order_id).collect();
        assert_eq!(sells, vec![best.id, first.id, second.id]);
        assert_eq!(submission.trades[2].quantity, dec!(20));
    }

    #[test]
    fn self_trade_is_prevented() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        engine
            .credit(a, AssetType::Cash, dec!(1000), TransactionKind::Deposit, Actor::System, None)
            .unwrap();

        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))
            .unwrap();
        let submission = engine
            .submit_order(OrderRequest::limit(a, rec(), Side::Buy, dec!(11), dec!(10)), Actor::Account(a))
            .unwrap();

        assert!(submission.trades.is_empty());
        assert_eq!(engine.get_book(rec()).unwrap().bids.len(), 1);
        assert_eq!(engine.get_book(rec()).unwrap().asks.len(), 1);
    }

    #[test]
    fn matching_without_cross_is_noop() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(11), dec!(10)), Actor::Account(a))
            .unwrap();
        engine
            .place_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10), dec!(10)), Actor::Account(b))
            .unwrap();

        let tickets = engine.tickets().count();
        assert!(engine.match_orders(rec()).unwrap().is_empty());
        assert!(engine.match_orders(rec()).unwrap().is_empty());
        assert_eq!(engine.tickets().count(), tickets);
    }

    #[test]
    fn market_buy_spends_at_most_its_estimate() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(100)), Actor::Account(a))
            .unwrap();

        let submission = engine
            .submit_order(
                OrderRequest::market(b, rec(), Side::Buy, dec!(100)).with_estimated_notional(dec!(455)),
                Actor::Account(b),
            )
            .unwrap();

        // 455 buys 45 whole lots at 10, the rest is released
        assert_eq!(submission.filled_quantity(), dec!(45));
        let order = engine.get_order(submission.order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        let cash = engine.get_balance(b, AssetType::Cash).unwrap();
        assert_eq!(cash.total, dec!(550));
        assert_eq!(cash.locked, Decimal::ZERO);
    }

    #[test]
    fn market_buy_needs_estimate() {
        let mut engine = engine();
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        let err = engine
            .place_order(OrderRequest::market(b, rec(), Side::Buy, dec!(10)), Actor::Account(b))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn market_sell_takes_best_bid() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        engine
            .place_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(9.80), dec!(30)), Actor::Account(b))
            .unwrap();

        let submission = engine
            .submit_order(OrderRequest::market(a, rec(), Side::Sell, dec!(30)), Actor::Account(a))
            .unwrap();
        assert_eq!(submission.trades[0].price.value(), dec!(9.80));
        assert_eq!(engine.get_balance(a, AssetType::Cash).unwrap().total, dec!(294));
    }

    #[test]
    fn insufficient_balance_changes_nothing() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let tickets = engine.tickets().count();

        let err = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(101)), Actor::Account(a))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        assert_eq!(engine.get_balance(a, AssetType::Rec).unwrap().available, dec!(100));
        assert!(engine.open_orders(a).is_empty());
        assert_eq!(engine.tickets().count(), tickets);
    }

    #[test]
    fn oversized_notional_is_a_validation_error() {
        let mut engine = engine();
        let huge = dec!(1_000_000_000_000_000);
        let buyer = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        let seller = funded(&mut engine, AccountKind::Regular, AssetType::Rec, huge);
        let tickets = engine.tickets().count();
        let notifications = engine.notifications().len();

        let err = engine
            .place_order(OrderRequest::limit(buyer, rec(), Side::Buy, huge, huge), Actor::Account(buyer))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(err.to_string().contains("notional overflows"));

        let err = engine
            .place_order(OrderRequest::limit(seller, rec(), Side::Sell, huge, huge), Actor::Account(seller))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        assert!(engine.open_orders(buyer).is_empty());
        assert!(engine.open_orders(seller).is_empty());
        assert_eq!(engine.get_balance(seller, AssetType::Rec).unwrap().available, huge);
        assert_eq!(engine.tickets().count(), tickets);

        // the failed units closed cleanly, so the next commit still notifies
        engine
            .place_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(10), dec!(10)), Actor::Account(buyer))
            .unwrap();
        assert_eq!(engine.notifications().len(), notifications + 1);
    }

    #[test]
    fn prices_snap_to_tick_and_quantities_to_lot() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));

        let order = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10.004), dec!(10)), Actor::Account(a))
            .unwrap();
        assert_eq!(order.price.unwrap().value(), dec!(10.00));

        let err = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(2.5)), Actor::Account(a))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn deactivated_account_cannot_place() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        engine.set_account_active(a, false, Actor::admin("ops")).unwrap();

        let err = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn book_aggregates_levels() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(1000));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(10000));
        for (price, qty) in [(dec!(10.10), dec!(10)), (dec!(10.00), dec!(20)), (dec!(10.00), dec!(5))] {
            engine
                .place_order(OrderRequest::limit(a, rec(), Side::Sell, price, qty), Actor::Account(a))
                .unwrap();
        }
        engine
            .place_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(9.90), dec!(40)), Actor::Account(b))
            .unwrap();

        let book = engine.get_book(rec()).unwrap();
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.asks[0].price.value(), dec!(10.00));
        assert_eq!(book.asks[0].quantity, dec!(25));
        assert_eq!(book.asks[0].order_count, 2);
        assert_eq!(book.asks[1].cumulative_quantity, dec!(35));
        assert_eq!(book.best_bid.unwrap().value(), dec!(9.90));
        assert_eq!(book.spread, Some(dec!(0.10)));
        assert_eq!(book.mid_price(), Some(dec!(9.95)));
    }
}

mod cancellation {
    use super::*;

    #[test]
    fn cancel_releases_remaining_lock() {
        let mut engine = engine();
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        let bid = engine
            .place_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10), dec!(50)), Actor::Account(b))
            .unwrap();
        assert_eq!(engine.get_balance(b, AssetType::Cash).unwrap().locked, dec!(500));

        let cancelled = engine.cancel_order(bid.id, Actor::Account(b)).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let cash = engine.get_balance(b, AssetType::Cash).unwrap();
        assert_eq!(cash.available, dec!(1000));
        assert_eq!(cash.locked, Decimal::ZERO);
        assert!(engine.get_book(rec()).unwrap().bids.is_empty());
    }

    #[test]
    fn cancelling_terminal_order_fails_without_side_effects() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let ask = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))
            .unwrap();
        engine.cancel_order(ask.id, Actor::Account(a)).unwrap();

        let transactions = engine.transactions_for(a, AssetType::Rec).len();
        let err = engine.cancel_order(ask.id, Actor::Account(a)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(engine.transactions_for(a, AssetType::Rec).len(), transactions);
        assert_eq!(engine.get_balance(a, AssetType::Rec).unwrap().available, dec!(100));
    }

    #[test]
    fn stale_version_conflicts() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        let ask = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(20)), Actor::Account(a))
            .unwrap();
        let read_version = ask.version;

        engine
            .submit_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10), dec!(5)), Actor::Account(b))
            .unwrap();

        let err = engine
            .cancel_order_checked(ask.id, read_version, Actor::Account(a))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);

        let current = engine.get_order(ask.id).unwrap().version;
        assert!(engine.cancel_order_checked(ask.id, current, Actor::Account(a)).is_ok());
    }
}

mod ledger {
    use super::*;

    #[test]
    fn only_external_kinds_can_be_posted() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(100));

        for kind in [TransactionKind::LockForOrder, TransactionKind::ReleaseFromOrder, TransactionKind::TradeSettlement] {
            let err = engine.credit(a, AssetType::Cash, dec!(1), kind, Actor::System, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        }
        assert!(engine
            .debit(a, AssetType::Cash, dec!(1), TransactionKind::Deposit, Actor::System, None)
            .is_err());
        assert!(engine
            .credit(a, AssetType::Cash, dec!(0), TransactionKind::Deposit, Actor::System, None)
            .is_err());
    }

    #[test]
    fn withdrawal_respects_locks() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(70)), Actor::Account(a))
            .unwrap();

        let err = engine
            .debit(a, AssetType::Rec, dec!(31), TransactionKind::Withdrawal, Actor::System, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        let total = engine
            .debit(a, AssetType::Rec, dec!(30), TransactionKind::Withdrawal, Actor::System, None)
            .unwrap();
        assert_eq!(total, dec!(70));
    }

    #[test]
    fn relaxed_provider_may_overdraw() {
        let mut engine = engine();
        let lp = provider(&mut engine, AssetType::Cash, Decimal::ZERO);
        assert!(engine
            .place_order(OrderRequest::limit(lp, rec(), Side::Buy, dec!(10), dec!(10)), Actor::Account(lp))
            .is_err());

        engine
            .configure_liquidity_provider(lp, rec(), true, Actor::admin("ops"))
            .unwrap();
        engine
            .place_order(OrderRequest::limit(lp, rec(), Side::Buy, dec!(10), dec!(10)), Actor::Account(lp))
            .unwrap();
        let cash = engine.get_balance(lp, AssetType::Cash).unwrap();
        assert_eq!(cash.available, dec!(-100));
        assert_eq!(cash.locked, dec!(100));
    }

    #[test]
    fn regular_accounts_cannot_relax_checks() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1));
        let err = engine
            .configure_liquidity_provider(a, rec(), true, Actor::admin("ops"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn checked_credit_detects_concurrent_write() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(100));
        let version = engine.holding_version(a, AssetType::Cash);

        engine
            .credit(a, AssetType::Cash, dec!(5), TransactionKind::Deposit, Actor::System, None)
            .unwrap();
        let err = engine
            .credit_checked(a, AssetType::Cash, dec!(5), TransactionKind::Deposit, Actor::System, version)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert_eq!(engine.get_balance(a, AssetType::Cash).unwrap().total, dec!(105));
    }

    #[test]
    fn every_posting_has_one_line_and_one_ticket() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(100));
        engine
            .debit(a, AssetType::Cash, dec!(40), TransactionKind::Withdrawal, Actor::admin("treasury"), None)
            .unwrap();

        let lines = engine.transactions_for(a, AssetType::Cash);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].balance_before, dec!(100));
        assert_eq!(lines[1].balance_after, dec!(60));

        let ticket = engine.ticket(&lines[1].ticket_id).unwrap();
        assert_eq!(ticket.action, AuditAction::BalanceDebited);
        assert_eq!(ticket.actor, Actor::admin("treasury"));
    }
}

mod liquidity_controller {
    use super::*;

    fn target(engine: &mut Engine, side: Side, target: Decimal, max: Option<Decimal>) {
        let mut settings = LiquidityMarketSettings::new(rec(), side, target);
        settings.max_notional = max;
        engine.upsert_liquidity_settings(settings, Actor::admin("ops")).unwrap();
    }

    #[test]
    fn status_bands() {
        let mut engine = engine();
        assert_eq!(
            engine.liquidity_status(rec(), Side::Sell).unwrap().status,
            LiquidityStatus::NoTarget
        );

        target(&mut engine, Side::Sell, dec!(100000), Some(dec!(200000)));
        let lp = provider(&mut engine, AssetType::Rec, dec!(50000));
        engine
            .place_order(OrderRequest::limit(lp, rec(), Side::Sell, dec!(10), dec!(6000)), Actor::Account(lp))
            .unwrap();

        let report = engine.liquidity_status(rec(), Side::Sell).unwrap();
        assert_eq!(report.current_notional, dec!(60000));
        assert_eq!(report.status, LiquidityStatus::BelowTarget);
        assert_eq!(report.suggested_order_notional, Some(dec!(40000)));

        engine
            .place_order(OrderRequest::limit(lp, rec(), Side::Sell, dec!(10), dec!(3800)), Actor::Account(lp))
            .unwrap();
        assert_eq!(engine.liquidity_status(rec(), Side::Sell).unwrap().status, LiquidityStatus::AtTarget);
    }

    #[test]
    fn regular_orders_do_not_count() {
        let mut engine = engine();
        target(&mut engine, Side::Sell, dec!(1000), None);
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(500));
        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(500)), Actor::Account(a))
            .unwrap();
        assert_eq!(engine.liquidity_status(rec(), Side::Sell).unwrap().current_notional, Decimal::ZERO);
    }

    #[test]
    fn exceeds_max_drains_until_under_ceiling() {
        let mut engine = engine();
        target(&mut engine, Side::Sell, dec!(100000), Some(dec!(200000)));
        let seller = provider(&mut engine, AssetType::Rec, dec!(30000));
        let buyer = provider(&mut engine, AssetType::Cash, dec!(100000));

        for _ in 0..21 {
            engine
                .place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(10), dec!(1000)), Actor::Account(seller))
                .unwrap();
        }
        for _ in 0..5 {
            engine
                .place_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(9.50), dec!(400)), Actor::Account(buyer))
                .unwrap();
        }
        assert_eq!(engine.liquidity_status(rec(), Side::Sell).unwrap().current_notional, dec!(210000));

        let report = engine.enforce_liquidity(rec(), Side::Sell).unwrap();
        assert_eq!(report.status_before, LiquidityStatus::ExceedsMax);
        assert!(report.notional_after <= dec!(200000));
        // 400 per trade at 10: three trades bring 210,000 under the ceiling
        assert_eq!(report.trades.len(), 3);
        assert_eq!(report.notional_after, dec!(198000));

        for id in &report.trades {
            let trade = engine.trades().iter().find(|t| t.id == *id).unwrap();
            assert!(trade.internal);
            assert!(trade.price.value() >= dec!(9.50) && trade.price.value() <= dec!(10));
            assert_ne!(trade.buyer, trade.seller);
        }
        assert_eq!(
            engine
                .notifications()
                .iter()
                .filter(|n| n.payload.kind() == "liquidity_threshold_breached")
                .count(),
            1
        );
    }

    #[test]
    fn retry_ceiling_bounds_the_drain() {
        let mut engine = engine();
        target(&mut engine, Side::Sell, dec!(100000), Some(dec!(200000)));
        let seller = provider(&mut engine, AssetType::Rec, dec!(30000));
        let buyer = provider(&mut engine, AssetType::Cash, dec!(100000));

        engine
            .place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(10), dec!(25000)), Actor::Account(seller))
            .unwrap();
        for _ in 0..10 {
            engine
                .place_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(9), dec!(10)), Actor::Account(buyer))
                .unwrap();
        }

        let report = engine.enforce_liquidity(rec(), Side::Sell).unwrap();
        assert_eq!(report.attempts, engine.config().internal_trade_retries);
        assert_eq!(report.trades.len(), 5);
        assert_eq!(report.status_after, LiquidityStatus::ExceedsMax);
    }

    #[test]
    fn no_counterparty_is_reported_not_raised() {
        let mut engine = engine();
        target(&mut engine, Side::Sell, dec!(1000), Some(dec!(2000)));
        let seller = provider(&mut engine, AssetType::Rec, dec!(500));
        engine
            .place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(10), dec!(300)), Actor::Account(seller))
            .unwrap();

        let report = engine.enforce_liquidity(rec(), Side::Sell).unwrap();
        assert_eq!(report.status_before, LiquidityStatus::ExceedsMax);
        assert!(report.trades.is_empty());
        assert!(report.failure.unwrap().contains("No crossable pair"));

        let err = engine.execute_internal_trade(rec(), Side::Sell).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCrossablePair);
    }

    #[test]
    fn above_target_makes_exactly_one_trade() {
        let mut engine = engine();
        target(&mut engine, Side::Buy, dec!(1000), None);
        let buyer = provider(&mut engine, AssetType::Cash, dec!(10000));
        let seller = provider(&mut engine, AssetType::Rec, dec!(1000));
        for _ in 0..3 {
            engine
                .place_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(5), dec!(100)), Actor::Account(buyer))
                .unwrap();
        }
        engine
            .place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(6), dec!(500)), Actor::Account(seller))
            .unwrap();

        let report = engine.enforce_liquidity(rec(), Side::Buy).unwrap();
        assert_eq!(report.status_before, LiquidityStatus::AboveTarget);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.notional_after, dec!(1000));
    }

    #[test]
    fn internal_trade_above_limit_charges_buyer_free_cash() {
        let mut engine = engine();
        let buyer = provider(&mut engine, AssetType::Cash, dec!(1000));
        let seller = provider(&mut engine, AssetType::Rec, dec!(100));
        engine
            .place_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(5), dec!(10)), Actor::Account(buyer))
            .unwrap();
        engine
            .place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(6), dec!(10)), Actor::Account(seller))
            .unwrap();

        let trade = engine.execute_internal_trade(rec(), Side::Sell).unwrap();
        let paid = trade.notional();
        let cash = engine.get_balance(buyer, AssetType::Cash).unwrap();
        assert_eq!(cash.locked, Decimal::ZERO);
        assert_eq!(cash.total, dec!(1000) - paid);
        assert_eq!(engine.get_balance(seller, AssetType::Cash).unwrap().total, paid);
    }

    #[test]
    fn invalid_settings_rejected() {
        let mut engine = engine();
        let bad = LiquidityMarketSettings::new(rec(), Side::Sell, dec!(1000)).with_max_notional(dec!(900));
        let err = engine.upsert_liquidity_settings(bad, Actor::admin("ops")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        let unlisted = Instrument::new(AssetType::Rec, MarketId(9));
        let err = engine
            .upsert_liquidity_settings(LiquidityMarketSettings::new(unlisted, Side::Sell, dec!(1)), Actor::System)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

mod atomicity {
    use super::*;

    #[test]
    fn failed_unit_rolls_everything_back() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let tickets = engine.tickets().count();
        let lines = engine.transactions_for(a, AssetType::Rec).len();

        let result: Result<(), EngineError> = engine.atomically(|e| {
            e.place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(60)), Actor::Account(a))?;
            e.place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(60)), Actor::Account(a))?;
            Ok(())
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InsufficientBalance);

        assert!(engine.open_orders(a).is_empty());
        assert!(engine.get_book(rec()).unwrap().asks.is_empty());
        assert_eq!(engine.get_balance(a, AssetType::Rec).unwrap().available, dec!(100));
        assert_eq!(engine.transactions_for(a, AssetType::Rec).len(), lines);
        assert_eq!(engine.tickets().count(), tickets);
    }

    #[test]
    fn notifications_wait_for_commit() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let before = engine.notifications().len();

        let _ = engine.atomically(|e| {
            e.place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))?;
            Err::<(), _>(EngineError::InvalidState("abort".to_string()))
        });
        assert_eq!(engine.notifications().len(), before);

        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))
            .unwrap();
        assert_eq!(engine.notifications().len(), before + 1);
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl NotificationSink for Recorder {
        fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
            self.0.lock().unwrap().push(notification.payload.kind().to_string());
            Ok(())
        }
    }

    struct Broken;

    impl NotificationSink for Broken {
        fn deliver(&mut self, _notification: &Notification) -> Result<(), DeliveryError> {
            Err(DeliveryError("smtp down".to_string()))
        }
    }

    #[test]
    fn failing_sink_never_blocks_the_engine() {
        let mut engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        engine.add_sink(Box::new(Broken));
        engine.add_sink(Box::new(Recorder(seen.clone())));

        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))
            .unwrap();
        engine
            .submit_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10), dec!(10)), Actor::Account(b))
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["order_placed", "order_placed", "trade_executed"]);
    }
}

mod audit_trail {
    use super::*;

    struct FixedSequencer(u64);

    impl TicketSequencer for FixedSequencer {
        fn next(&mut self, _year: i32) -> u64 {
            self.0 += 10;
            self.0
        }
    }

    #[test]
    fn ids_carry_prefix_year_and_sequence() {
        let mut engine = engine();
        funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(1));
        let ids: Vec<String> = engine.tickets().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["TX-2026-000001", "TX-2026-000002"]);

        let mut engine = Engine::new(EngineConfig::default()).with_sequencer(Box::new(FixedSequencer(0)));
        engine.set_time(Timestamp::from_secs(START));
        engine.open_account(AccountKind::Regular, Actor::System).unwrap();
        assert_eq!(engine.tickets().next().unwrap().id.as_str(), "TX-2026-000010");
    }

    #[test]
    fn trade_chain_reaches_the_locks() {
        let mut engine = engine();
        let a = funded(&mut engine, AccountKind::Regular, AssetType::Rec, dec!(100));
        let b = funded(&mut engine, AccountKind::Regular, AssetType::Cash, dec!(1000));
        let ask = engine
            .place_order(OrderRequest::limit(a, rec(), Side::Sell, dec!(10), dec!(10)), Actor::Account(a))
            .unwrap();
        let submission = engine
            .submit_order(OrderRequest::limit(b, rec(), Side::Buy, dec!(10), dec!(10)), Actor::Account(b))
            .unwrap();
        let trade = &submission.trades[0];

        let chain = engine.ticket_chain(&trade.ticket_id).unwrap();
        let actions: Vec<AuditAction> = chain.iter().map(|t| t.action).collect();
        assert_eq!(actions[0], AuditAction::TradeExecuted);
        assert!(actions.contains(&AuditAction::OrderPlaced));
        assert_eq!(actions.iter().filter(|a| **a == AuditAction::BalanceDebited).count(), 2);

        let placed = engine.tickets_for(EntityType::Order, &ask.id.to_string());
        assert_eq!(placed[0].action, AuditAction::OrderPlaced);
        assert_eq!(placed[0].id, ask.ticket_id.clone().unwrap());
        assert_eq!(
            engine.ticket(&trade.ticket_id).unwrap().entity_id.as_deref(),
            Some(trade.id.to_string().as_str())
        );
    }

    #[test]
    fn backfill_only_once_and_links_are_idempotent() {
        let mut engine = engine();
        let draft = TicketDraft::new(AuditAction::BalanceCredited, EntityType::Holding, Actor::admin("ops"));
        let first = engine.issue_ticket(draft.clone()).unwrap();
        let second = engine.issue_ticket(draft).unwrap();

        engine.backfill_entity_id(&first.id, "A1/CASH").unwrap();
        let err = engine.backfill_entity_id(&first.id, "A2/CASH").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        engine.link(&first.id, &[second.id.clone()]).unwrap();
        engine.link(&first.id, &[second.id.clone()]).unwrap();
        assert_eq!(engine.ticket(&first.id).unwrap().related, vec![second.id.clone()]);

        let missing = TicketId("TX-1999-000001".to_string());
        assert_eq!(engine.link(&first.id, &[missing]).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn external_credit_links_to_workflow_ticket() {
        let mut engine = engine();
        let a = engine.open_account(AccountKind::Regular, Actor::System).unwrap();
        let workflow = engine
            .issue_ticket(
                TicketDraft::new(AuditAction::BalanceCredited, EntityType::Holding, Actor::admin("treasury"))
                    .tag("deposit-workflow"),
            )
            .unwrap();

        engine
            .credit(a, AssetType::Cash, dec!(50), TransactionKind::Deposit, Actor::System, Some(workflow.id.clone()))
            .unwrap();
        let line = engine.transactions_for(a, AssetType::Cash)[0];
        assert_eq!(engine.ticket(&line.ticket_id).unwrap().related, vec![workflow.id]);
    }
}
