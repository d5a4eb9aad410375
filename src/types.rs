// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, assets, instruments, prices, timestamps, actors. each id is a newtype so the
// compiler catches type mixups.

use chrono::{Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

macro_rules! display_id {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }
        )*
    };
}

display_id! {
    MarketId => "M",
    AccountId => "A",
    OrderId => "O",
    TradeId => "T",
    RuleId => "R",
    TransactionId => "L",
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// 1.1: the fixed asset set. two certificate kinds trade against one cash currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Renewable energy certificate.
    Rec,
    /// Guarantee of origin certificate.
    GuaranteeOfOrigin,
    /// Settlement currency.
    Cash,
}

impl AssetType {
    pub const ALL: [AssetType; 3] = [AssetType::Rec, AssetType::GuaranteeOfOrigin, AssetType::Cash];

    pub fn is_certificate(&self) -> bool {
        !matches!(self, AssetType::Cash)
    }

    pub fn code(&self) -> &'static str {
        match self {
            AssetType::Rec => "REC",
            AssetType::GuaranteeOfOrigin => "GO",
            AssetType::Cash => "CASH",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// 1.2: what an order trades. a certificate asset listed on one market, quoted in cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub asset: AssetType,
    pub market: MarketId,
}

impl Instrument {
    pub fn new(asset: AssetType, market: MarketId) -> Self {
        Self { asset, market }
    }

    /// Asset a resting order of this side reserves.
    pub fn lock_asset(&self, side: Side) -> AssetType {
        match side {
            Side::Buy => AssetType::Cash,
            Side::Sell => self.asset,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset, self.market)
    }
}

// 1.3: price in cash per unit of certificate. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn notional(&self, quantity: Decimal) -> Decimal {
        self.0 * quantity
    }

    /// None when price x quantity does not fit a Decimal.
    pub fn checked_notional(&self, quantity: Decimal) -> Option<Decimal> {
        self.0.checked_mul(quantity)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.4: millisecond timestamp on the engine clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn plus_secs(&self, secs: u64) -> Self {
        let ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        self.plus_millis(ms)
    }

    /// Calendar year in UTC. ticket numbering restarts every year.
    pub fn year(&self) -> i32 {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .map(|dt| dt.year())
            .unwrap_or(1970)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// 1.5: who asked for a state change. every mutating call carries one for audit attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Admin(String),
    Account(AccountId),
}

impl Actor {
    pub fn admin(name: impl Into<String>) -> Self {
        Actor::Admin(name.into())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::Admin(name) => write!(f, "admin:{}", name),
            Actor::Account(id) => write!(f, "account:{}", id),
        }
    }
}
