//! Polymarket Copy-Trading Bot Library
//!
//! Mirrors the trades of watched wallets into the operator's Safe proxy:
//!
//! 1. **Monitor**: polls each wallet's activity feed and emits every new
//!    trade exactly once, ignoring stale history.
//! 2. **Sizing**: scales the trade by our bankroll over the counterpart's
//!    pre-trade bankroll, recycling old resting orders when collateral is short.
//! 3. **Orders**: tracks resting orders, expires them after an hour.
//! 4. **Claims**: periodically redeems positions in resolved markets.

pub mod claim;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod monitor;
pub mod order_manager;
pub mod services;
pub mod sizing;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use claim::{ClaimEngine, ClaimReport, ClaimSettings};
pub use config::Config;
pub use error::{CopyError, Result};
pub use executor::{ExecutionResult, TradeExecutor};
pub use gateway::{ChainGateway, DataSource, ExchangeGateway, MultisigSigner};
pub use monitor::{MonitorSettings, SeenTransactions, TradeMonitor};
pub use order_manager::OrderManager;
pub use sizing::{SizingDecision, SizingEngine, SizingSettings, SkipReason};
pub use types::{ManagedOrder, OrderBook, OrderInstruction, Position, Side, TradeEvent};
