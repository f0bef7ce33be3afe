//! Claim Engine: redeems winning positions once their markets resolve.
//!
//! Positions come from the data API (or recent trade history when that is
//! empty), market state from the position record or the exchange, and
//! balances from a single ERC-1155 `balanceOfBatch` call. Each cycle stands
//! alone; a failed redemption is simply attempted again next cycle.

use crate::error::{CopyError, Result};
use crate::gateway::{ChainGateway, DataSource, ExchangeGateway};
use crate::services::ctf;
use crate::types::Position;
use alloy::primitives::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const POSITIONS_PAGE_SIZE: usize = 200;
/// Below this native balance the relay may fail to land transactions
const LOW_GAS_THRESHOLD: Decimal = dec!(0.01);

#[derive(Debug, Clone)]
pub struct ClaimSettings {
    /// Account holding the positions
    pub proxy_wallet: String,
    pub collateral: Address,
    pub ctf: Address,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimReport {
    /// Resolved positions found this cycle
    pub resolved: usize,
    /// Condition ids redeemed
    pub redeemed: Vec<String>,
    /// Condition ids whose redemption failed
    pub failed: Vec<String>,
    pub low_gas: bool,
}

/// A token we may hold, before market state is known
#[derive(Debug, Clone)]
struct Candidate {
    token_id: String,
    condition_id: Option<String>,
    closed: bool,
}

pub struct ClaimEngine {
    exchange: Arc<dyn ExchangeGateway>,
    chain: Arc<dyn ChainGateway>,
    data: Arc<dyn DataSource>,
    settings: ClaimSettings,
}

impl ClaimEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        chain: Arc<dyn ChainGateway>,
        data: Arc<dyn DataSource>,
        settings: ClaimSettings,
    ) -> Self {
        Self {
            exchange,
            chain,
            data,
            settings,
        }
    }

    /// Run the claim loop
    pub async fn run(&self, interval: Duration) {
        info!("[Claim] Claim engine started (interval: {:?})", interval);

        loop {
            match self.check_and_claim().await {
                Ok(report) if !report.redeemed.is_empty() || !report.failed.is_empty() => {
                    info!(
                        "[Claim] Cycle done: {} resolved, {} redeemed, {} failed",
                        report.resolved,
                        report.redeemed.len(),
                        report.failed.len()
                    );
                }
                Ok(report) => debug!("[Claim] Nothing to redeem ({} resolved)", report.resolved),
                Err(e) => error!("[Claim] Claim cycle failed: {}", e),
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// One claim cycle
    pub async fn check_and_claim(&self) -> Result<ClaimReport> {
        let mut report = ClaimReport::default();

        let candidates = self.discover().await?;
        let positions = self.resolve(candidates).await?;
        report.resolved = positions.len();

        let mut attempted = HashSet::new();
        for position in positions.iter().filter(|p| p.balance > Decimal::ZERO) {
            if !attempted.insert(position.condition_id.clone()) {
                continue;
            }

            info!(
                "[Claim] Redeeming condition {} (token {} balance {})",
                position.condition_id, position.token_id, position.balance
            );
            match self.redeem(&position.condition_id).await {
                Ok(tx_hash) => {
                    info!("[Claim] Redeemed {} in {}", position.condition_id, tx_hash);
                    report.redeemed.push(position.condition_id.clone());
                }
                Err(e) => {
                    warn!("[Claim] Redeem {} failed, retrying next cycle: {}", position.condition_id, e);
                    report.failed.push(position.condition_id.clone());
                }
            }
        }

        match self.chain.native_balance(&self.settings.proxy_wallet).await {
            Ok(balance) if balance < LOW_GAS_THRESHOLD => {
                warn!("[Claim] Proxy wallet native balance low: {}", balance);
                report.low_gas = true;
            }
            Ok(_) => {}
            Err(e) => warn!("[Claim] Could not read native balance: {}", e),
        }

        Ok(report)
    }

    /// Positions first; recent trades when positions are unavailable.
    async fn discover(&self) -> Result<Vec<Candidate>> {
        let proxy = &self.settings.proxy_wallet;
        let records = match self.data.positions(proxy, POSITIONS_PAGE_SIZE).await {
            Ok(positions) if !positions.is_empty() => positions,
            Ok(_) => {
                debug!("[Claim] No positions listed, falling back to trade history");
                self.data.trades(proxy, POSITIONS_PAGE_SIZE).await?
            }
            Err(e) => {
                warn!("[Claim] Positions query failed ({}), falling back to trade history", e);
                self.data.trades(proxy, POSITIONS_PAGE_SIZE).await?
            }
        };

        let mut seen = HashSet::new();
        Ok(records
            .iter()
            .filter_map(candidate_from_record)
            .filter(|c| seen.insert(c.token_id.clone()))
            .collect())
    }

    /// Fill in missing market state and read balances for closed markets.
    async fn resolve(&self, candidates: Vec<Candidate>) -> Result<Vec<Position>> {
        let mut closed = Vec::new();

        for mut candidate in candidates {
            if candidate.condition_id.is_none() || !candidate.closed {
                match self.exchange.market(&candidate.token_id).await {
                    Ok(market) => {
                        candidate.condition_id = candidate.condition_id.or(Some(market.condition_id));
                        candidate.closed = candidate.closed || market.closed;
                    }
                    Err(e) => debug!("[Claim] Market lookup failed for {}: {}", candidate.token_id, e),
                }
            }

            if let (Some(condition_id), true) = (candidate.condition_id, candidate.closed) {
                closed.push(Position {
                    token_id: candidate.token_id,
                    condition_id,
                    resolved: true,
                    balance: Decimal::ZERO,
                });
            }
        }

        if closed.is_empty() {
            return Ok(closed);
        }

        let token_ids: Vec<String> = closed.iter().map(|p| p.token_id.clone()).collect();
        let accounts = vec![self.settings.proxy_wallet.clone(); token_ids.len()];
        let balances = self.chain.batch_balance(&accounts, &token_ids).await?;

        for (position, balance) in closed.iter_mut().zip(balances) {
            position.balance = balance;
        }
        Ok(closed)
    }

    async fn redeem(&self, condition_id: &str) -> Result<String> {
        let data = ctf::encode_redeem(self.settings.collateral, condition_id)?;
        let receipt = self
            .chain
            .execute_authorized_call(self.settings.ctf, data, &format!("CTF redeem {}", condition_id))
            .await
            .map_err(|e| match e {
                CopyError::Redemption(_) => e,
                other => CopyError::Redemption(other.to_string()),
            })?;
        Ok(receipt.transaction_hash)
    }
}

fn candidate_from_record(record: &Value) -> Option<Candidate> {
    let token_id = ["asset", "tokenId", "position_id"]
        .iter()
        .find_map(|key| id_field(record, key))?;

    let condition_id = ["conditionId", "condition_id"]
        .iter()
        .find_map(|key| id_field(record, key));

    let flag = |v: Option<&Value>| v.and_then(Value::as_bool).unwrap_or(false);
    let closed = flag(record.get("market").and_then(|m| m.get("closed")))
        || flag(record.get("closed"))
        || flag(record.get("redeemable"));

    Some(Candidate {
        token_id,
        condition_id,
        closed,
    })
}

fn id_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
