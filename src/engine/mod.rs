// 8.0: matching and liquidity engine. owns the store and every state change:
// ledger postings, orders and matching, liquidity control, rule execution and
// the audit trail. deterministic given a clock, a seed and a price source.

mod audit;
mod config;
mod core;
mod ledger;
mod liquidity;
mod matching;
mod orders;
mod results;
mod rules;
mod scheduler;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{EngineError, ErrorKind, OrderSubmission};
pub use scheduler::Scheduler;
