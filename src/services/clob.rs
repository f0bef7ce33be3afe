//! CLOB exchange gateway: order books, GTC limit orders, cancellation and
//! Gamma market metadata.

use super::clob_errors;
use super::http::HttpFetcher;
use crate::error::{CopyError, Result};
use crate::sizing::snap_to_tick;
use crate::gateway::ExchangeGateway;
use crate::types::{BookLevel, MarketInfo, OrderBook, OrderInstruction, Side};
use alloy::primitives::U256;
use alloy::signers::{local::PrivateKeySigner, Signer};
use async_trait::async_trait;
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::Normal;
use polymarket_client_sdk::clob::types::{
    AssetType, OrderType as ClobOrderType, Side as ClobSide, SignatureType,
    request::UpdateBalanceAllowanceRequest,
};
use polymarket_client_sdk::clob::{Client as ClobClient, Config as ClobConfig};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{debug, info, warn};

const POLYGON_CHAIN_ID: u64 = 137;

type AuthenticatedClient = ClobClient<Authenticated<Normal>>;

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: Option<String>,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    question: String,
}

/// Order sizes carry at most two decimals on the CLOB; round up so the
/// notional never drops under the exchange minimum.
pub fn normalize_size(size: Decimal) -> Decimal {
    size.round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
}

pub struct ClobGateway {
    client: AuthenticatedClient,
    signer: PrivateKeySigner,
    fetcher: HttpFetcher,
    clob_url: String,
    gamma_url: String,
}

impl ClobGateway {
    /// Authenticate against the CLOB with GnosisSafe signatures so the
    /// Safe proxy, not the bare EOA, is the maker and funder.
    pub async fn connect(
        clob_url: &str,
        gamma_url: &str,
        private_key: &str,
        fetcher: HttpFetcher,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| CopyError::Validation(format!("invalid private key: {}", e)))?;
        let signer = signer.with_chain_id(Some(POLYGON_CHAIN_ID));

        let clob_config = ClobConfig::builder().use_server_time(true).build();

        let client = ClobClient::new(clob_url, clob_config)
            .map_err(|e| sdk_error("client init", e))?
            .authentication_builder(&signer)
            .signature_type(SignatureType::GnosisSafe)
            .authenticate()
            .await
            .map_err(|e| sdk_error("authentication", e))?;

        info!("CLOB client authenticated for EOA {:?}", signer.address());

        Ok(Self {
            client,
            signer,
            fetcher,
            clob_url: clob_url.trim_end_matches('/').to_string(),
            gamma_url: gamma_url.trim_end_matches('/').to_string(),
        })
    }

    /// Ask the CLOB to re-read on-chain collateral and conditional allowances.
    pub async fn refresh_allowances(&self) -> Result<()> {
        for asset_type in [AssetType::Collateral, AssetType::Conditional] {
            let label = format!("{:?}", asset_type);
            let req = UpdateBalanceAllowanceRequest::builder()
                .asset_type(asset_type)
                .build();
            match self.client.update_balance_allowance(req).await {
                Ok(()) => info!("CLOB cache: {} allowance refreshed", label),
                Err(e) => {
                    warn!("CLOB cache: failed to refresh {}: {}", label, e);
                    return Err(sdk_error("allowance refresh", e));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for ClobGateway {
    async fn order_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book?token_id={}", self.clob_url, token_id);
        let raw: RawBook = self.fetcher.fetch_json(&url).await?;

        let to_levels = |levels: Vec<RawLevel>| {
            levels
                .into_iter()
                .map(|l| BookLevel { price: l.price, size: l.size })
                .collect()
        };

        Ok(OrderBook {
            bids: to_levels(raw.bids),
            asks: to_levels(raw.asks),
        })
    }

    async fn place_order(&self, order: &OrderInstruction) -> Result<String> {
        let token_id = U256::from_str_radix(&order.token_id, 10)
            .map_err(|e| CopyError::Validation(format!("invalid token id {}: {}", order.token_id, e)))?;
        let price = snap_to_tick(order.price);
        let size = normalize_size(order.size);
        let side = match order.side {
            Side::Buy => ClobSide::Buy,
            Side::Sell => ClobSide::Sell,
        };

        debug!(
            "Placing GTC {} token={} price={} size={}",
            order.side, order.token_id, price, size
        );

        let unsigned = self
            .client
            .limit_order()
            .token_id(token_id)
            .size(size)
            .side(side)
            .price(price)
            .order_type(ClobOrderType::GTC)
            .build()
            .await
            .map_err(|e| sdk_error("order build", e))?;

        let signed = self
            .client
            .sign(&self.signer, unsigned)
            .await
            .map_err(|e| sdk_error("order sign", e))?;

        let response = self
            .client
            .post_order(signed)
            .await
            .map_err(|e| sdk_error("order post", e))?;

        if response.order_id.is_empty() {
            return Err(clob_errors::from_message("order post returned no order id"));
        }

        Ok(response.order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let response = self
            .client
            .cancel_order(order_id)
            .await
            .map_err(|e| sdk_error("cancel", e))?;

        if let Some(reason) = response.not_canceled.get(order_id) {
            return Err(clob_errors::from_message(reason));
        }

        Ok(())
    }

    async fn market(&self, token_id: &str) -> Result<MarketInfo> {
        let url = format!("{}/markets?clob_token_ids={}", self.gamma_url, token_id);
        let markets: Vec<GammaMarket> = self.fetcher.fetch_json(&url).await?;

        let market = markets
            .into_iter()
            .next()
            .ok_or_else(|| CopyError::NotFound(format!("no market for token {}", token_id)))?;
        let condition_id = market
            .condition_id
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CopyError::Validation(format!("market for token {} has no condition id", token_id)))?;

        Ok(MarketInfo {
            condition_id,
            closed: market.closed,
            question: market.question,
        })
    }
}

fn sdk_error(stage: &str, err: impl std::fmt::Display) -> CopyError {
    clob_errors::from_message(&format!("{} failed: {}", stage, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_size_rounds_up() {
        assert_eq!(normalize_size(dec!(12.5)), dec!(12.5));
        assert_eq!(normalize_size(dec!(2.524753)), dec!(2.53));
    }

    #[test]
    fn test_book_parses_string_prices() {
        let raw: RawBook = serde_json::from_str(
            r#"{"bids":[{"price":"0.39","size":"100"}],"asks":[{"price":"0.41","size":"50.5"}]}"#,
        )
        .unwrap();
        assert_eq!(raw.bids[0].price, dec!(0.39));
        assert_eq!(raw.asks[0].size, dec!(50.5));
    }

    #[test]
    fn test_gamma_market_parses() {
        let markets: Vec<GammaMarket> = serde_json::from_str(
            r#"[{"conditionId":"0xabc","closed":true,"question":"Will it rain?"}]"#,
        )
        .unwrap();
        assert_eq!(markets[0].condition_id.as_deref(), Some("0xabc"));
        assert!(markets[0].closed);
    }
}
