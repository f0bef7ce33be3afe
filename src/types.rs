//! Core types for the copy-trading pipeline

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trading side of an observed or placed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Anything that is not case-insensitively "buy" is a sell.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("buy") {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// An external trade observed on a watched wallet. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Unique key; processed at most once
    pub transaction_hash: String,
    pub token_id: String,
    pub condition_id: Option<String>,
    pub side: Side,
    /// Address whose bankroll the trade is measured against
    pub trader: String,
    /// Outcome tokens traded
    pub base_amount: Decimal,
    /// Collateral (USDC) traded
    pub quote_amount: Decimal,
    /// Execution price, when the source reported one
    pub price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    /// Watched wallet whose activity feed produced this event
    pub source_wallet: String,
    pub title: Option<String>,
}

impl TradeEvent {
    /// Log prefix of the hash; the whole hash when 12 bytes is not a char boundary
    pub fn short_hash(&self) -> &str {
        let hash = self.transaction_hash.as_str();
        hash.get(..12).unwrap_or(hash)
    }
}

/// An order this system placed and still considers live
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ManagedOrder {
    /// Collateral estimated to be locked by the order (fill-price approximation)
    pub fn estimated_value(&self) -> Decimal {
        self.price * self.size
    }

    /// Resting buys hold collateral; resting sells hold outcome tokens
    pub fn locks_collateral(&self) -> bool {
        self.side == Side::Buy
    }
}

/// One price level of an order book
#[derive(Debug, Clone, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Live order book for a token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Highest bid, independent of the order the API returned levels in
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids
            .iter()
            .map(|l| l.price)
            .filter(|p| *p > Decimal::ZERO)
            .max()
    }

    /// Lowest ask, independent of the order the API returned levels in
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks
            .iter()
            .map(|l| l.price)
            .filter(|p| *p > Decimal::ZERO)
            .min()
    }

    /// Price a marketable copy order would take from the book
    pub fn taking_price(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.best_ask(),
            Side::Sell => self.best_bid(),
        }
    }
}

/// Market metadata needed to decide whether a token is redeemable
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub condition_id: String,
    pub closed: bool,
    pub question: String,
}

/// Derived per claim cycle; never cached across cycles
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub token_id: String,
    pub condition_id: String,
    pub resolved: bool,
    pub balance: Decimal,
}

/// A concrete limit order to place
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInstruction {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

impl OrderInstruction {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Result of an authorized on-chain call
#[derive(Debug, Clone, PartialEq)]
pub struct CallReceipt {
    pub transaction_hash: String,
}
