//! Narrow interfaces to the external collaborators.
//!
//! The core pipeline only talks to the exchange, the chain and the data API
//! through these traits; concrete adapters live in `services`.

use crate::error::Result;
use crate::types::{CallReceipt, MarketInfo, OrderBook, OrderInstruction};
use alloy::primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

/// Order book queries, order placement/cancellation, market metadata
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn order_book(&self, token_id: &str) -> Result<OrderBook>;

    /// Create, sign and post a resting limit order. Returns the exchange order id.
    async fn place_order(&self, order: &OrderInstruction) -> Result<String>;

    /// Fails with `CopyError::NotFound` when the order is already filled or cancelled.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn market(&self, token_id: &str) -> Result<MarketInfo>;
}

/// Balance queries and authorized contract calls
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Collateral (USDC) balance of `address`
    async fn balance(&self, address: &str) -> Result<Decimal>;

    /// Conditional-token balances, one per (account, token) pair
    async fn batch_balance(&self, accounts: &[String], token_ids: &[String]) -> Result<Vec<Decimal>>;

    /// Native gas-token balance of `address`
    async fn native_balance(&self, address: &str) -> Result<Decimal>;

    /// Execute `data` against `to` through the multisig signer.
    /// `label` names the call in relay metadata and logs.
    async fn execute_authorized_call(&self, to: Address, data: Vec<u8>, label: &str) -> Result<CallReceipt>;
}

/// Loosely-structured JSON feeds from the public data API
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn activity(&self, wallet: &str, limit: usize) -> Result<Vec<Value>>;

    async fn positions(&self, user: &str, limit: usize) -> Result<Vec<Value>>;

    async fn trades(&self, user: &str, limit: usize) -> Result<Vec<Value>>;
}

/// Signs and submits a privileged call on behalf of the operator's multisig.
/// Signature construction and submission are entirely the signer's concern.
#[async_trait]
pub trait MultisigSigner: Send + Sync {
    async fn execute(&self, to: Address, calldata: &[u8], label: &str) -> Result<CallReceipt>;
}
