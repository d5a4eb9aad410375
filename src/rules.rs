//! Auto-trade rules owned by liquidity provider accounts.
//!
//! Everything here is pure: configuration, validation, and the price, quantity
//! and interval arithmetic. The engine supplies book state and randomness and
//! does the placing (see `engine/rules.rs`).

use crate::audit::TicketId;
use crate::liquidity::LiquidityStatus;
use crate::order::OrderType;
use crate::types::{AccountId, OrderId, RuleId, Side, Timestamp};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a rule prices its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PriceMode {
    Fixed { price: Decimal },
    /// Best price on the rule's side, pushed away from the spread by a fixed amount.
    SpreadFromBest { spread: Decimal },
    /// Reference price moved by a percentage. buys go under, sells go over.
    PercentageFromMarket { percentage: Decimal },
    /// Like `SpreadFromBest` with the spread drawn uniformly from the range.
    RandomSpreadInRange { min_spread: Decimal, max_spread: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QuantityMode {
    Fixed { quantity: Decimal },
    /// Share of the available balance of the asset the order locks.
    PercentageOfBalance { percentage: Decimal },
    RandomInRange { min: Decimal, max: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IntervalMode {
    Fixed { seconds: u64 },
    Random { min_seconds: u64, max_seconds: u64 },
}

/// Longest interval a rule may wait between runs: one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub mode: IntervalMode,
    /// Perturbs each interval by up to this many percent either way.
    pub jitter_pct: Decimal,
}

impl IntervalConfig {
    pub fn fixed(seconds: u64) -> Self {
        Self {
            mode: IntervalMode::Fixed { seconds },
            jitter_pct: Decimal::ZERO,
        }
    }

    pub fn random(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            mode: IntervalMode::Random { min_seconds, max_seconds },
            jitter_pct: Decimal::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter_pct: Decimal) -> Self {
        self.jitter_pct = jitter_pct;
        self
    }

    /// Milliseconds until the next run. never below one second.
    pub fn next_delay_millis<R: Rng>(&self, rng: &mut R) -> i64 {
        let seconds = match self.mode {
            IntervalMode::Fixed { seconds } => seconds,
            IntervalMode::Random { min_seconds, max_seconds } => rng.gen_range(min_seconds..=max_seconds),
        };
        let base = Decimal::from(seconds) * Decimal::ONE_THOUSAND;

        let delay = if self.jitter_pct.is_zero() {
            base
        } else {
            let spread = base * self.jitter_pct / Decimal::ONE_HUNDRED;
            base + uniform_decimal(rng, -spread, spread)
        };

        delay.trunc().to_i64().unwrap_or(i64::MAX).max(1_000)
    }
}

/// Bounds checked before a rule places anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleValidation {
    pub max_active_orders: Option<u32>,
    /// Ceiling on |price - reference| / reference, percent
    pub max_price_deviation_pct: Option<Decimal>,
}

/// Everything an admin configures on a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price_mode: PriceMode,
    pub quantity_mode: QuantityMode,
    pub interval: IntervalConfig,
    #[serde(default)]
    pub validation: RuleValidation,
}

impl RuleConfig {
    pub fn validate(&self) -> Result<(), RuleConfigError> {
        match &self.price_mode {
            PriceMode::Fixed { price } => positive("price", *price)?,
            PriceMode::SpreadFromBest { spread } => non_negative("spread", *spread)?,
            PriceMode::PercentageFromMarket { percentage } => {
                if *percentage < Decimal::ZERO || *percentage >= Decimal::ONE_HUNDRED {
                    return Err(RuleConfigError::OutOfRange {
                        field: "percentage",
                        value: *percentage,
                    });
                }
            }
            PriceMode::RandomSpreadInRange { min_spread, max_spread } => {
                non_negative("min_spread", *min_spread)?;
                ordered("spread", *min_spread, *max_spread)?;
            }
        }

        match &self.quantity_mode {
            QuantityMode::Fixed { quantity } => positive("quantity", *quantity)?,
            QuantityMode::PercentageOfBalance { percentage } => percent("percentage", *percentage)?,
            QuantityMode::RandomInRange { min, max } => {
                positive("min", *min)?;
                ordered("quantity", *min, *max)?;
            }
        }

        match self.interval.mode {
            IntervalMode::Fixed { seconds } if seconds == 0 => {
                return Err(RuleConfigError::InvalidInterval("interval must be positive".to_string()));
            }
            IntervalMode::Random { min_seconds, max_seconds } if min_seconds == 0 || min_seconds > max_seconds => {
                return Err(RuleConfigError::InvalidInterval(format!(
                    "random interval needs 0 < min <= max, got {}..{}",
                    min_seconds, max_seconds
                )));
            }
            _ => {}
        }
        let longest = match self.interval.mode {
            IntervalMode::Fixed { seconds } => seconds,
            IntervalMode::Random { max_seconds, .. } => max_seconds,
        };
        if longest > MAX_INTERVAL_SECS {
            return Err(RuleConfigError::InvalidInterval(format!(
                "interval {}s exceeds the {}s ceiling",
                longest, MAX_INTERVAL_SECS
            )));
        }
        if self.interval.jitter_pct < Decimal::ZERO || self.interval.jitter_pct >= Decimal::ONE_HUNDRED {
            return Err(RuleConfigError::OutOfRange {
                field: "jitter_pct",
                value: self.interval.jitter_pct,
            });
        }

        if self.validation.max_active_orders == Some(0) {
            return Err(RuleConfigError::OutOfRange {
                field: "max_active_orders",
                value: Decimal::ZERO,
            });
        }
        if let Some(pct) = self.validation.max_price_deviation_pct {
            percent("max_price_deviation_pct", pct)?;
        }

        Ok(())
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<(), RuleConfigError> {
    if value <= Decimal::ZERO {
        return Err(RuleConfigError::NotPositive { field, value });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: Decimal) -> Result<(), RuleConfigError> {
    if value < Decimal::ZERO {
        return Err(RuleConfigError::OutOfRange { field, value });
    }
    Ok(())
}

fn percent(field: &'static str, value: Decimal) -> Result<(), RuleConfigError> {
    if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(RuleConfigError::OutOfRange { field, value });
    }
    Ok(())
}

fn ordered(field: &'static str, min: Decimal, max: Decimal) -> Result<(), RuleConfigError> {
    if min > max {
        return Err(RuleConfigError::InvertedRange { field, min, max });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Idle,
    Due,
    Executing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTradeRule {
    pub id: RuleId,
    pub account_id: AccountId,
    pub config: RuleConfig,
    pub enabled: bool,
    pub state: RuleState,
    pub last_executed_at: Option<Timestamp>,
    pub next_execution_at: Option<Timestamp>,
    pub execution_count: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AutoTradeRule {
    pub fn new(id: RuleId, account_id: AccountId, config: RuleConfig, timestamp: Timestamp) -> Self {
        Self {
            id,
            account_id,
            config,
            enabled: true,
            state: RuleState::Idle,
            last_executed_at: None,
            next_execution_at: None,
            execution_count: 0,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// A rule that never ran is due immediately.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.enabled && self.next_execution_at.map_or(true, |at| now >= at)
    }
}

/// Book and feed inputs for pricing a rule order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceInputs {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub reference: Option<Decimal>,
}

impl PriceInputs {
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn best(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.best_bid,
            Side::Sell => self.best_ask,
        }
    }

    /// Reference price, else mid, else whichever side has a quote.
    pub fn market_reference(&self) -> Option<Decimal> {
        self.reference
            .or_else(|| self.mid())
            .or(self.best_bid)
            .or(self.best_ask)
    }
}

/// Raw (unrounded) price for a rule order. `None` means no usable reference.
pub fn compute_price<R: Rng>(mode: &PriceMode, side: Side, inputs: &PriceInputs, rng: &mut R) -> Option<Decimal> {
    let away = |base: Decimal, spread: Decimal| match side {
        Side::Buy => base - spread,
        Side::Sell => base + spread,
    };

    match mode {
        PriceMode::Fixed { price } => Some(*price),
        PriceMode::SpreadFromBest { spread } => {
            let base = inputs.best(side).or(inputs.reference)?;
            Some(away(base, *spread))
        }
        PriceMode::PercentageFromMarket { percentage } => {
            let base = inputs.market_reference()?;
            Some(away(base, base * *percentage / Decimal::ONE_HUNDRED))
        }
        PriceMode::RandomSpreadInRange { min_spread, max_spread } => {
            let base = inputs.best(side).or(inputs.reference)?;
            Some(away(base, uniform_decimal(rng, *min_spread, *max_spread)))
        }
    }
}

/// Raw (unfloored) quantity. `available` is the free balance of the locked asset,
/// converted to certificate units for buys by the caller.
pub fn compute_quantity<R: Rng>(mode: &QuantityMode, available: Decimal, rng: &mut R) -> Decimal {
    match mode {
        QuantityMode::Fixed { quantity } => *quantity,
        QuantityMode::PercentageOfBalance { percentage } => {
            (available.max(Decimal::ZERO) / Decimal::ONE_HUNDRED * *percentage).max(Decimal::ZERO)
        }
        QuantityMode::RandomInRange { min, max } => uniform_decimal(rng, *min, *max),
    }
}

/// |price - reference| / reference in percent
pub fn deviation_pct(price: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    ((price - reference) / reference).abs() * Decimal::ONE_HUNDRED
}

const UNIFORM_STEPS: u64 = 1_000_000;

/// Uniform draw in [lo, hi] at one-in-a-million resolution.
pub fn uniform_decimal<R: Rng>(rng: &mut R, lo: Decimal, hi: Decimal) -> Decimal {
    if hi <= lo {
        return lo;
    }
    let step = rng.gen_range(0..=UNIFORM_STEPS);
    lo + (hi - lo) * Decimal::from(step) / Decimal::from(UNIFORM_STEPS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    OrderPlaced,
    InternalTrades,
    /// Side already inside its band
    Skipped,
    ValidationFailed,
    InsufficientBalance,
    NoReferencePrice,
    Failed,
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ExecutionOutcome::OrderPlaced | ExecutionOutcome::InternalTrades | ExecutionOutcome::Skipped
        )
    }
}

/// One persisted line per rule execution, success or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleExecutionRecord {
    pub rule_id: RuleId,
    pub executed_at: Timestamp,
    pub outcome: ExecutionOutcome,
    pub reason: Option<String>,
    pub liquidity_status: Option<LiquidityStatus>,
    pub order_id: Option<OrderId>,
    pub trades: usize,
    pub ticket_id: Option<TicketId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: Decimal },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: Decimal },

    #[error("{field} range inverted: {min} > {max}")]
    InvertedRange { field: &'static str, min: Decimal, max: Decimal },

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Account {0} is not a liquidity provider")]
    NotLiquidityProvider(AccountId),

    #[error("Account {0} has no instrument role")]
    MissingRole(AccountId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rust_decimal_macros::dec;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn config() -> RuleConfig {
        RuleConfig {
            name: "sell ladder".to_string(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price_mode: PriceMode::SpreadFromBest { spread: dec!(0.10) },
            quantity_mode: QuantityMode::Fixed { quantity: dec!(100) },
            interval: IntervalConfig::fixed(60),
            validation: RuleValidation::default(),
        }
    }

    #[test]
    fn valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rejects_bad_config() {
        let mut c = config();
        c.quantity_mode = QuantityMode::RandomInRange { min: dec!(10), max: dec!(5) };
        assert!(matches!(c.validate(), Err(RuleConfigError::InvertedRange { .. })));

        let mut c = config();
        c.quantity_mode = QuantityMode::PercentageOfBalance { percentage: dec!(150) };
        assert!(matches!(c.validate(), Err(RuleConfigError::OutOfRange { .. })));

        let mut c = config();
        c.interval = IntervalConfig::fixed(0);
        assert!(matches!(c.validate(), Err(RuleConfigError::InvalidInterval(_))));

        let mut c = config();
        c.interval = IntervalConfig::fixed(MAX_INTERVAL_SECS + 1);
        assert!(matches!(c.validate(), Err(RuleConfigError::InvalidInterval(_))));

        let mut c = config();
        c.interval = IntervalConfig::random(60, u64::MAX);
        assert!(matches!(c.validate(), Err(RuleConfigError::InvalidInterval(_))));

        let mut c = config();
        c.interval = IntervalConfig::fixed(MAX_INTERVAL_SECS);
        assert!(c.validate().is_ok());

        let mut c = config();
        c.interval = IntervalConfig::fixed(30).with_jitter(dec!(100));
        assert!(c.validate().is_err());

        let mut c = config();
        c.price_mode = PriceMode::Fixed { price: dec!(0) };
        assert!(matches!(c.validate(), Err(RuleConfigError::NotPositive { .. })));
    }

    #[test]
    fn spread_pricing_uses_own_side() {
        let inputs = PriceInputs {
            best_bid: Some(dec!(9.90)),
            best_ask: Some(dec!(10.10)),
            reference: Some(dec!(10)),
        };
        let mode = PriceMode::SpreadFromBest { spread: dec!(0.05) };
        assert_eq!(compute_price(&mode, Side::Sell, &inputs, &mut rng()), Some(dec!(10.15)));
        assert_eq!(compute_price(&mode, Side::Buy, &inputs, &mut rng()), Some(dec!(9.85)));

        // empty side falls back to the reference
        let one_sided = PriceInputs { best_ask: None, ..inputs };
        assert_eq!(compute_price(&mode, Side::Sell, &one_sided, &mut rng()), Some(dec!(10.05)));
    }

    #[test]
    fn percentage_pricing_fallbacks() {
        let mode = PriceMode::PercentageFromMarket { percentage: dec!(2) };
        let with_ref = PriceInputs { reference: Some(dec!(10)), ..Default::default() };
        assert_eq!(compute_price(&mode, Side::Buy, &with_ref, &mut rng()), Some(dec!(9.8)));

        let mid_only = PriceInputs {
            best_bid: Some(dec!(9)),
            best_ask: Some(dec!(11)),
            reference: None,
        };
        assert_eq!(compute_price(&mode, Side::Sell, &mid_only, &mut rng()), Some(dec!(10.2)));

        assert_eq!(compute_price(&mode, Side::Sell, &PriceInputs::default(), &mut rng()), None);
    }

    #[test]
    fn random_spread_within_range() {
        let mode = PriceMode::RandomSpreadInRange { min_spread: dec!(0.10), max_spread: dec!(0.50) };
        let inputs = PriceInputs { best_bid: Some(dec!(10)), ..Default::default() };
        let mut r = rng();
        for _ in 0..50 {
            let price = compute_price(&mode, Side::Buy, &inputs, &mut r).unwrap();
            assert!(price >= dec!(9.50) && price <= dec!(9.90), "price {}", price);
        }
    }

    #[test]
    fn quantity_modes() {
        let mut r = rng();
        assert_eq!(compute_quantity(&QuantityMode::Fixed { quantity: dec!(5) }, dec!(0), &mut r), dec!(5));
        assert_eq!(
            compute_quantity(&QuantityMode::PercentageOfBalance { percentage: dec!(25) }, dec!(1000), &mut r),
            dec!(250)
        );
        for _ in 0..50 {
            let q = compute_quantity(&QuantityMode::RandomInRange { min: dec!(10), max: dec!(20) }, dec!(0), &mut r);
            assert!(q >= dec!(10) && q <= dec!(20));
        }
    }

    #[test]
    fn interval_with_jitter() {
        let mut r = rng();
        assert_eq!(IntervalConfig::fixed(60).next_delay_millis(&mut r), 60_000);
        let jittered = IntervalConfig::fixed(100).with_jitter(dec!(10));
        for _ in 0..50 {
            let d = jittered.next_delay_millis(&mut r);
            assert!((90_000..=110_000).contains(&d), "delay {}", d);
        }
        let random = IntervalConfig::random(30, 90);
        for _ in 0..50 {
            let d = random.next_delay_millis(&mut r);
            assert!((30_000..=90_000).contains(&d));
        }
        // floor of one second
        let tiny = IntervalConfig::fixed(1).with_jitter(dec!(99));
        for _ in 0..20 {
            assert!(tiny.next_delay_millis(&mut r) >= 1_000);
        }
    }

    #[test]
    fn due_state() {
        let mut rule = AutoTradeRule::new(RuleId(1), AccountId(1), config(), Timestamp::from_millis(0));
        assert!(rule.is_due(Timestamp::from_millis(0)));
        rule.next_execution_at = Some(Timestamp::from_secs(60));
        assert!(!rule.is_due(Timestamp::from_secs(59)));
        assert!(rule.is_due(Timestamp::from_secs(60)));
        rule.enabled = false;
        assert!(!rule.is_due(Timestamp::from_secs(120)));
    }

    #[test]
    fn deviation() {
        assert_eq!(deviation_pct(dec!(11), dec!(10)), dec!(10));
        assert_eq!(deviation_pct(dec!(9), dec!(10)), dec!(10));
    }
}
