//! Certificate market liquidity simulation.
//!
//! Walks the engine through direct trading, the liquidity controller in both
//! directions, scheduled auto-trade rules and the audit trail they leave.

use liquidity_core::*;
use rust_decimal_macros::dec;

// 2026-01-01T00:00:00Z
const START: i64 = 1_767_225_600;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();

    println!("Certificate Market Liquidity Engine Simulation");
    println!("Ledger, Matching, Liquidity Targets, Auto-Trade Rules\n");

    scenario_1_basic_trading()?;
    scenario_2_book_depth()?;
    scenario_3_below_target()?;
    scenario_4_exceeds_max()?;
    scenario_5_scheduled_rules()?;
    scenario_6_audit_trail()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn rec() -> Instrument {
    Instrument::new(AssetType::Rec, MarketId(1))
}

fn new_engine() -> Result<Engine, EngineError> {
    let mut engine = Engine::from_config(&ExchangeConfig::default())?;
    engine.set_time(Timestamp::from_secs(START));
    Ok(engine)
}

fn deposit(engine: &mut Engine, account: AccountId, asset: AssetType, amount: rust_decimal::Decimal) -> Result<(), EngineError> {
    engine.credit(account, asset, amount, TransactionKind::Deposit, Actor::admin("treasury"), None)?;
    Ok(())
}

fn provider(engine: &mut Engine) -> Result<AccountId, EngineError> {
    let id = engine.open_account(AccountKind::LiquidityProvider, Actor::admin("ops"))?;
    engine.configure_liquidity_provider(id, rec(), false, Actor::admin("ops"))?;
    Ok(id)
}

/// Sell 400 @ 10.00, then a buyer lifts it.
fn scenario_1_basic_trading() -> Result<(), EngineError> {
    println!("Scenario 1: Basic Order Matching\n");

    let mut engine = new_engine()?;
    let alice = engine.open_account(AccountKind::Regular, Actor::admin("ops"))?;
    let bob = engine.open_account(AccountKind::Regular, Actor::admin("ops"))?;
    deposit(&mut engine, alice, AssetType::Rec, dec!(1000))?;
    deposit(&mut engine, bob, AssetType::Cash, dec!(10000))?;

    let ask = engine.place_order(
        OrderRequest::limit(alice, rec(), Side::Sell, dec!(10.00), dec!(400)),
        Actor::Account(alice),
    )?;
    let balance = engine.get_balance(alice, AssetType::Rec)?;
    println!("  Alice offers 400 REC @ 10.00 (order {})", ask.id);
    println!("  Alice REC: available {}, locked {}", balance.available, balance.locked);

    let submission = engine.submit_order(
        OrderRequest::limit(bob, rec(), Side::Buy, dec!(10.00), dec!(400)),
        Actor::Account(bob),
    )?;
    for trade in &submission.trades {
        println!("  Trade {}: {} @ {}", trade.id, trade.quantity, trade.price);
    }

    println!("  Alice order status: {:?}", engine.get_order(ask.id)?.status);
    println!("  Alice cash: {}", engine.get_balance(alice, AssetType::Cash)?.total);
    println!("  Bob REC: {}, cash: {}\n", engine.get_balance(bob, AssetType::Rec)?.total, engine.get_balance(bob, AssetType::Cash)?.total);
    Ok(())
}

/// Several makers at several levels, then a sweeping market buy.
fn scenario_2_book_depth() -> Result<(), EngineError> {
    println!("Scenario 2: Order Book Depth\n");

    let mut engine = new_engine()?;
    let makers = [
        engine.open_account(AccountKind::Regular, Actor::admin("ops"))?,
        engine.open_account(AccountKind::Regular, Actor::admin("ops"))?,
    ];
    let taker = engine.open_account(AccountKind::Regular, Actor::admin("ops"))?;
    for maker in makers {
        deposit(&mut engine, maker, AssetType::Rec, dec!(500))?;
    }
    deposit(&mut engine, taker, AssetType::Cash, dec!(5000))?;

    for (i, maker) in makers.iter().enumerate() {
        for level in 0..3 {
            let price = dec!(10.00) + rust_decimal::Decimal::from(level) * dec!(0.10);
            let quantity = dec!(50) + rust_decimal::Decimal::from(i as u32 * 10);
            engine.place_order(OrderRequest::limit(*maker, rec(), Side::Sell, price, quantity), Actor::Account(*maker))?;
        }
    }

    let book = engine.get_book(rec())?;
    for level in &book.asks {
        println!(
            "  ask {} x {} ({} orders, cumulative {})",
            level.price, level.quantity, level.order_count, level.cumulative_quantity
        );
    }

    let sweep = engine.submit_order(
        OrderRequest::market(taker, rec(), Side::Buy, dec!(150)).with_estimated_notional(dec!(1600)),
        Actor::Account(taker),
    )?;
    println!("  Market buy 150 filled {} over {} trades", sweep.filled_quantity(), sweep.trades.len());
    println!("  Taker cash left: {}\n", engine.get_balance(taker, AssetType::Cash)?.total);
    Ok(())
}

/// Target 100,000 with 60,000 resting: a rule tops the side up.
fn scenario_3_below_target() -> Result<(), EngineError> {
    println!("Scenario 3: Liquidity Below Target\n");

    let mut engine = new_engine()?;
    engine.set_price_source(Box::new(StaticPriceSource::new().with_price(rec(), dec!(10))));
    engine.upsert_liquidity_settings(
        LiquidityMarketSettings::new(rec(), Side::Sell, dec!(100000)).with_max_notional(dec!(200000)),
        Actor::admin("ops"),
    )?;

    let lp = provider(&mut engine)?;
    deposit(&mut engine, lp, AssetType::Rec, dec!(20000))?;
    engine.place_order(OrderRequest::limit(lp, rec(), Side::Sell, dec!(10), dec!(6000)), Actor::Account(lp))?;

    let status = engine.liquidity_status(rec(), Side::Sell)?;
    println!("  Resting {} vs target {:?}: {:?}", status.current_notional, status.target_notional, status.status);

    let rule = engine.create_rule(
        lp,
        RuleConfig {
            name: "REC ask ladder".to_string(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price_mode: PriceMode::SpreadFromBest { spread: dec!(0.05) },
            quantity_mode: QuantityMode::Fixed { quantity: dec!(4000) },
            interval: IntervalConfig::fixed(60),
            validation: RuleValidation::default(),
        },
        Actor::admin("ops"),
    )?;
    let record = engine.execute_rule(rule)?;
    println!("  Rule {} outcome: {:?}, order {:?}", rule, record.outcome, record.order_id);

    let status = engine.liquidity_status(rec(), Side::Sell)?;
    println!("  Resting now {}: {:?}\n", status.current_notional, status.status);
    Ok(())
}

/// 210,000 resting against a 200,000 ceiling: internal trades drain it.
fn scenario_4_exceeds_max() -> Result<(), EngineError> {
    println!("Scenario 4: Liquidity Above Maximum\n");

    let mut engine = new_engine()?;
    engine.upsert_liquidity_settings(
        LiquidityMarketSettings::new(rec(), Side::Sell, dec!(100000)).with_max_notional(dec!(200000)),
        Actor::admin("ops"),
    )?;

    let seller = provider(&mut engine)?;
    let buyer = provider(&mut engine)?;
    deposit(&mut engine, seller, AssetType::Rec, dec!(30000))?;
    deposit(&mut engine, buyer, AssetType::Cash, dec!(200000))?;

    for _ in 0..3 {
        engine.place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(10.50), dec!(6000)), Actor::Account(seller))?;
    }
    engine.place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(10.50), dec!(2000)), Actor::Account(seller))?;
    for _ in 0..4 {
        engine.place_order(OrderRequest::limit(buyer, rec(), Side::Buy, dec!(10.00), dec!(1000)), Actor::Account(buyer))?;
    }

    let report = engine.enforce_liquidity(rec(), Side::Sell)?;
    println!(
        "  {:?} -> {:?}: {} -> {} in {} internal trades",
        report.status_before,
        report.status_after,
        report.notional_before,
        report.notional_after,
        report.trades.len()
    );
    if let Some(reason) = &report.failure {
        println!("  Stopped early: {}", reason);
    }
    println!("  Breach notifications: {}\n", engine.notifications().iter().filter(|n| n.payload.kind() == "liquidity_threshold_breached").count());
    Ok(())
}

/// Two providers quote each other on a schedule for ten minutes.
fn scenario_5_scheduled_rules() -> Result<(), EngineError> {
    println!("Scenario 5: Scheduled Auto-Trade Rules\n");

    let mut engine = new_engine()?;
    engine.set_price_source(Box::new(StaticPriceSource::new().with_price(rec(), dec!(10))));
    for side in [Side::Buy, Side::Sell] {
        engine.upsert_liquidity_settings(
            LiquidityMarketSettings::new(rec(), side, dec!(20000)).with_order_bounds(dec!(100), Some(dec!(5000))),
            Actor::admin("ops"),
        )?;
    }

    let bidder = provider(&mut engine)?;
    let asker = provider(&mut engine)?;
    deposit(&mut engine, bidder, AssetType::Cash, dec!(100000))?;
    deposit(&mut engine, asker, AssetType::Rec, dec!(10000))?;

    let rule = |side: Side, price_mode: PriceMode| RuleConfig {
        name: format!("{} quoter", side),
        side,
        order_type: OrderType::Limit,
        price_mode,
        quantity_mode: QuantityMode::RandomInRange { min: dec!(100), max: dec!(400) },
        interval: IntervalConfig::random(45, 90).with_jitter(dec!(10)),
        validation: RuleValidation {
            max_active_orders: Some(20),
            max_price_deviation_pct: Some(dec!(5)),
        },
    };
    engine.create_rule(
        bidder,
        rule(Side::Buy, PriceMode::PercentageFromMarket { percentage: dec!(1) }),
        Actor::admin("ops"),
    )?;
    engine.create_rule(
        asker,
        rule(Side::Sell, PriceMode::RandomSpreadInRange { min_spread: dec!(0.05), max_spread: dec!(0.20) }),
        Actor::admin("ops"),
    )?;

    let scheduler = Scheduler::for_engine(&engine);
    let records = scheduler.run_for(&mut engine, 600);
    let placed = records.iter().filter(|r| r.outcome == ExecutionOutcome::OrderPlaced).count();
    let skipped = records.iter().filter(|r| r.outcome == ExecutionOutcome::Skipped).count();
    let failed = records.iter().filter(|r| r.outcome.is_failure()).count();
    println!("  {} executions: {} placed, {} skipped, {} failed", records.len(), placed, skipped, failed);

    for side in [Side::Buy, Side::Sell] {
        let status = engine.liquidity_status(rec(), side)?;
        println!("  {} side: {} resting over {} orders ({:?})", side, status.current_notional, status.resting_orders, status.status);
    }
    println!();
    Ok(())
}

/// Follow one trade back to the deposits behind it.
fn scenario_6_audit_trail() -> Result<(), EngineError> {
    println!("Scenario 6: Audit Trail\n");

    let mut engine = new_engine()?;
    let seller = engine.open_account(AccountKind::Regular, Actor::admin("ops"))?;
    let buyer = engine.open_account(AccountKind::Regular, Actor::admin("ops"))?;
    deposit(&mut engine, seller, AssetType::Rec, dec!(100))?;
    deposit(&mut engine, buyer, AssetType::Cash, dec!(1000))?;

    engine.place_order(OrderRequest::limit(seller, rec(), Side::Sell, dec!(9.80), dec!(50)), Actor::Account(seller))?;
    let submission = engine.submit_order(
        OrderRequest::limit(buyer, rec(), Side::Buy, dec!(10.00), dec!(50)),
        Actor::Account(buyer),
    )?;

    if let Some(trade) = submission.trades.first() {
        println!("  Trade {} documented by {}", trade.id, trade.ticket_id);
        for ticket in engine.ticket_chain(&trade.ticket_id)? {
            println!(
                "    {} {:?} {:?} {}",
                ticket.id,
                ticket.action,
                ticket.entity_type,
                ticket.entity_id.as_deref().unwrap_or("-")
            );
        }
    }
    println!("  {} tickets issued in total", engine.tickets().count());
    Ok(())
}
