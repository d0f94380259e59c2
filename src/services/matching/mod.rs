//! Order matching
//!
//! Per-symbol order books behind a single synchronous `MatchingEngine`,
//! matched price-time priority with no fees. See `actor` for the
//! per-symbol single-writer wrapper used by callers that need
//! serialized access across concurrent tasks.

pub mod actor;
pub mod engine;
pub mod orderbook;
pub mod types;

pub use actor::{SymbolActorHandle, SymbolCommand};
pub use engine::MatchingEngine;
pub use orderbook::Orderbook;
pub use types::*;
