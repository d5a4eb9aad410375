// liquidity-core: order matching and automated market-making for certificate markets.
// ledger-first architecture: every balance change is one posting, one ledger line
// and one audit ticket, committed together or not at all.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Side, AssetType, Instrument, Price, Timestamp, Actor
//   2.x  order.rs: orders, trades, price-time book index, depth aggregation
//   3.x  account.rs: accounts, holdings, balance views, ledger transactions
//   4.x  store.rs: keyed tables with savepoints, derived indexes
//   7.x  config.rs: engine knobs, instruments, liquidity targets, env presets
//   8.x  engine/: ledger, orders, matching, liquidity control, rules, scheduler
//   9.x  price_feed.rs: reference price sources
//   9.3  liquidity.rs: target bands and controller classification
//   9.4  rules.rs: auto-trade rule config, pricing and sizing
//   10.x api.rs: serializable command/query envelopes
//   11.x audit.rs: audit tickets and sequencing
//   11.1 events.rs: notifications and sinks
//   12.x market.rs: instrument grid + runtime state

// core modules
pub mod account;
pub mod audit;
pub mod engine;
pub mod events;
pub mod market;
pub mod order;
pub mod store;
pub mod types;

// market making modules
pub mod liquidity;
pub mod rules;

// integration modules
pub mod api;
pub mod config;
pub mod price_feed;

// re exports for convenience
pub use account::*;
pub use audit::*;
pub use engine::*;
pub use events::*;
pub use liquidity::*;
pub use market::*;
pub use order::*;
pub use rules::*;
pub use types::*;
pub use api::{ApiError, ApiResponse, EngineCommand, EngineQuery, ErrorCode};
pub use config::{ConfigError, Environment, ExchangeConfig, LiquidityTargetConfig};
pub use price_feed::{CachedPriceFeed, NoPriceSource, PriceSource, PriceUpdate, StaticPriceSource};
pub use store::{Store, StoreError};
