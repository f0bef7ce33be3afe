//! Polygon JSON-RPC chain gateway
//!
//! Read paths are plain `eth_call` / `eth_getBalance` requests retried like
//! any other fetch; privileged writes are delegated to the multisig signer,
//! when one is configured.

use super::clob_errors;
use super::ctf;
use super::retry::{with_retry, RetryConfig};
use crate::error::{CopyError, Result};
use crate::gateway::{ChainGateway, MultisigSigner};
use crate::types::CallReceipt;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct RpcChainGateway {
    client: reqwest::Client,
    rpc_url: String,
    collateral: Address,
    ctf: Address,
    signer: Option<Arc<dyn MultisigSigner>>,
    retry: RetryConfig,
}

impl RpcChainGateway {
    pub fn new(
        rpc_url: impl Into<String>,
        collateral: Address,
        ctf: Address,
        signer: Option<Arc<dyn MultisigSigner>>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            collateral,
            ctf,
            signer,
            retry: RetryConfig::fetch(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> Result<String> {
        with_retry(&self.retry, method, || self.rpc_once(method, &params)).await
    }

    async fn rpc_once(&self, method: &str, params: &serde_json::Value) -> Result<String> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self.client.post(&self.rpc_url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(clob_errors::from_response(status.as_u16(), &body));
        }

        let json: serde_json::Value = response.json().await?;

        if let Some(error) = json.get("error") {
            return Err(CopyError::Chain(format!("{} error: {}", method, error)));
        }

        json.get("result")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| CopyError::Chain(format!("{} returned no result", method)))
    }

    async fn eth_call(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let params = serde_json::json!([
            {
                "to": format!("{:?}", to),
                "data": format!("0x{}", hex::encode(calldata)),
            },
            "latest"
        ]);
        let result = self.rpc("eth_call", params).await?;
        hex::decode(result.strip_prefix("0x").unwrap_or(&result))
            .map_err(|e| CopyError::Chain(format!("eth_call returned invalid hex: {}", e)))
    }

    /// Collateral allowance granted by `owner` to `spender`
    pub async fn allowance(&self, owner: &str, spender: &str) -> Result<Decimal> {
        let calldata = ctf::encode_erc20_allowance(ctf::parse_address(owner)?, ctf::parse_address(spender)?);
        let output = self.eth_call(self.collateral, calldata).await?;
        Ok(ctf::from_raw_token_amount(word_to_u256(&output)?))
    }
}

#[async_trait]
impl ChainGateway for RpcChainGateway {
    async fn balance(&self, address: &str) -> Result<Decimal> {
        let calldata = ctf::encode_erc20_balance(ctf::parse_address(address)?);
        let output = self.eth_call(self.collateral, calldata).await?;
        let balance = ctf::from_raw_token_amount(word_to_u256(&output)?);
        debug!("USDC balance of {}: {}", address, balance);
        Ok(balance)
    }

    async fn batch_balance(&self, accounts: &[String], token_ids: &[String]) -> Result<Vec<Decimal>> {
        if accounts.len() != token_ids.len() {
            return Err(CopyError::Validation(format!(
                "balanceOfBatch needs equal lengths, got {} accounts and {} ids",
                accounts.len(),
                token_ids.len()
            )));
        }
        if accounts.is_empty() {
            return Ok(Vec::new());
        }

        let accounts = accounts
            .iter()
            .map(|a| ctf::parse_address(a))
            .collect::<Result<Vec<_>>>()?;
        let ids = token_ids
            .iter()
            .map(|t| ctf::parse_token_id(t))
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .eth_call(self.ctf, ctf::encode_balance_of_batch(accounts, ids))
            .await?;
        let raw = ctf::decode_balance_of_batch(&output)?;
        Ok(raw.into_iter().map(ctf::from_raw_token_amount).collect())
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        let params = serde_json::json!([format!("{:?}", ctf::parse_address(address)?), "latest"]);
        let result = self.rpc("eth_getBalance", params).await?;
        let hex_str = result.strip_prefix("0x").unwrap_or(&result);
        let raw = U256::from_str_radix(hex_str, 16)
            .map_err(|e| CopyError::Chain(format!("eth_getBalance returned {}: {}", result, e)))?;
        Ok(ctf::from_raw_native_amount(raw))
    }

    async fn execute_authorized_call(&self, to: Address, data: Vec<u8>, label: &str) -> Result<CallReceipt> {
        match &self.signer {
            Some(signer) => signer.execute(to, &data, label).await,
            None => Err(CopyError::Chain("no multisig signer configured".to_string())),
        }
    }
}

/// First 32-byte word of an ABI return value
fn word_to_u256(output: &[u8]) -> Result<U256> {
    if output.len() < 32 {
        return Err(CopyError::Chain(format!(
            "expected 32-byte return value, got {} bytes",
            output.len()
        )));
    }
    Ok(U256::from_be_slice(&output[..32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::retry::Backoff;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request (headers plus Content-Length body)
    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// JSON-RPC node that drops the first `drops` connections, then answers
    async fn flaky_node(drops: usize, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let n = seen.fetch_add(1, Ordering::SeqCst);
                if n < drops {
                    drop(stream);
                    continue;
                }
                read_request(&mut stream).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (url, connections)
    }

    fn gateway(url: &str) -> RpcChainGateway {
        RpcChainGateway::new(url, Address::ZERO, Address::ZERO, None)
            .unwrap()
            .with_retry_config(RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff: Backoff::Linear,
            })
    }

    const HOLDER: &str = "0x1111111111111111111111111111111111111111";

    #[tokio::test]
    async fn test_rpc_retries_dropped_connection() {
        let (url, connections) = flaky_node(1, r#"{"jsonrpc":"2.0","id":1,"result":"0xde0b6b3a7640000"}"#).await;

        let balance = gateway(&url).native_balance(HOLDER).await.unwrap();

        assert_eq!(balance, Decimal::ONE);
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rpc_error_reply_not_retried() {
        let (url, connections) =
            flaky_node(0, r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#).await;

        let result = gateway(&url).native_balance(HOLDER).await;

        assert!(matches!(result, Err(CopyError::Chain(_))));
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_authorized_call_needs_signer() {
        let result = gateway("http://127.0.0.1:1")
            .execute_authorized_call(Address::ZERO, vec![0x01], "CTF redeem 0xcond")
            .await;
        assert!(matches!(result, Err(CopyError::Chain(_))));
    }

    #[test]
    fn test_word_to_u256() {
        let mut word = [0u8; 32];
        word[31] = 0x40;
        word[30] = 0x42;
        assert_eq!(word_to_u256(&word).unwrap(), U256::from(0x4240u64));
        assert!(word_to_u256(&[0u8; 4]).is_err());
    }
}
