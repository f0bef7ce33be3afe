//! Gasless Safe execution through the Polymarket builder relay
//!
//! The call is wrapped in an EIP-712 `SafeTx`, signed by the operator's EOA
//! with eth_sign semantics (v + 4), submitted to the relay's `/submit`
//! endpoint with builder HMAC auth, then polled until mined or failed.

use crate::error::{CopyError, Result};
use crate::gateway::MultisigSigner;
use crate::types::CallReceipt;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::signers::{local::PrivateKeySigner, Signer};
use alloy::sol_types::{eip712_domain, SolStruct};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const CHAIN_ID: u64 = 137;
/// Safe Proxy Factory on Polygon
const SAFE_FACTORY: Address = alloy::primitives::address!("aacfeea03eb1561c4e67d661e40682bd20e3541b");
const SAFE_INIT_CODE_HASH: B256 =
    alloy::primitives::b256!("2bce2127ff07fb632d16c8347c4ebf501f4841168bed00d9e6ef715ddb6fcecf");

const POLL_ATTEMPTS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

alloy::sol! {
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

/// Builder API credentials for the relay
#[derive(Debug, Clone)]
pub struct BuilderCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Derive the Polymarket Safe proxy address for an EOA.
/// CREATE2: keccak256(0xff ++ factory ++ keccak256(pad32(eoa)) ++ init_code_hash)[12:]
pub fn derive_safe_wallet(eoa: Address) -> Address {
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(eoa.as_slice());
    let salt = keccak256(padded);
    SAFE_FACTORY.create2(salt, SAFE_INIT_CODE_HASH)
}

/// EIP-712 hash of a zero-value, zero-gas CALL from `safe` to `to`
pub fn safe_tx_hash(safe: Address, to: Address, calldata: &[u8], nonce: U256) -> B256 {
    let tx = SafeTx {
        to,
        value: U256::ZERO,
        data: Bytes::copy_from_slice(calldata),
        operation: 0,
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        nonce,
    };
    let domain = eip712_domain! {
        chain_id: CHAIN_ID,
        verifying_contract: safe,
    };
    tx.eip712_signing_hash(&domain)
}

pub struct SafeRelaySigner {
    client: reqwest::Client,
    relayer_url: String,
    signer: PrivateKeySigner,
    safe: Address,
    credentials: BuilderCredentials,
}

impl SafeRelaySigner {
    pub fn new(
        relayer_url: impl Into<String>,
        signer: PrivateKeySigner,
        safe: Address,
        credentials: BuilderCredentials,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            relayer_url: relayer_url.into().trim_end_matches('/').to_string(),
            signer,
            safe,
            credentials,
        })
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(&'static str, String)>> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let payload = format!("{}{}{}{}", timestamp, method, path, body);
        let signature = compute_hmac(&self.credentials.secret, &payload)?;

        Ok(vec![
            ("POLY_BUILDER_TIMESTAMP", timestamp),
            ("POLY_BUILDER_SIGNATURE", signature),
            ("POLY_BUILDER_API_KEY", self.credentials.api_key.clone()),
            ("POLY_BUILDER_PASSPHRASE", self.credentials.passphrase.clone()),
        ])
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let mut request = self.client.get(format!("{}{}", self.relayer_url, path));
        for (name, value) in self.auth_headers("GET", path, "")? {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopyError::Chain(format!("relay GET {} failed ({}): {}", path, status, body)));
        }
        Ok(response.json().await?)
    }

    async fn nonce(&self) -> Result<U256> {
        let path = format!("/nonce?address={}&type=SAFE", self.signer.address());
        let body = self.get(&path).await?;

        let raw = match body.get("nonce") {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            other => {
                return Err(CopyError::Chain(format!("unexpected nonce format: {:?}", other)));
            }
        };
        U256::from_str_radix(&raw, 10)
            .map_err(|e| CopyError::Chain(format!("invalid relay nonce {}: {}", raw, e)))
    }

    /// Sign the Safe hash with personal_sign and shift v into Safe's eth_sign range (31/32)
    async fn sign_packed(&self, hash: B256) -> Result<String> {
        let signature = self
            .signer
            .sign_message(hash.as_slice())
            .await
            .map_err(|e| CopyError::Chain(format!("failed to sign Safe transaction: {}", e)))?;

        let mut packed = Vec::with_capacity(65);
        packed.extend_from_slice(&signature.r().to_be_bytes::<32>());
        packed.extend_from_slice(&signature.s().to_be_bytes::<32>());
        packed.push(if signature.v() { 32 } else { 31 });
        Ok(format!("0x{}", hex::encode(packed)))
    }

    async fn submit(&self, to: Address, calldata: &[u8], label: &str) -> Result<String> {
        let nonce = self.nonce().await?;
        let signature = self.sign_packed(safe_tx_hash(self.safe, to, calldata, nonce)).await?;
        debug!("[Relay] nonce={} safe={}", nonce, self.safe);

        let zero = format!("{:?}", Address::ZERO);
        let body = serde_json::json!({
            "type": "SAFE",
            "from": format!("{:?}", self.signer.address()),
            "to": format!("{:?}", to),
            "proxyWallet": format!("{:?}", self.safe),
            "data": format!("0x{}", hex::encode(calldata)),
            "signature": signature,
            "value": "0",
            "nonce": nonce.to_string(),
            "signatureParams": {
                "gasPrice": "0",
                "operation": "0",
                "safeTxnGas": "0",
                "baseGas": "0",
                "gasToken": zero,
                "refundReceiver": zero
            },
            "metadata": label
        })
        .to_string();

        let mut request = self
            .client
            .post(format!("{}/submit", self.relayer_url))
            .header("Content-Type", "application/json");
        for (name, value) in self.auth_headers("POST", "/submit", &body)? {
            request = request.header(name, value);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CopyError::Chain(format!("relay submit failed ({}): {}", status, error_body)));
        }

        #[derive(Deserialize)]
        struct SubmitResponse {
            #[serde(default, rename = "transactionID")]
            transaction_id: Option<String>,
        }

        let submitted: SubmitResponse = response.json().await?;
        submitted
            .transaction_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CopyError::Chain("relay returned no transaction id".to_string()))
    }

    async fn wait_for(&self, tx_id: &str) -> Result<CallReceipt> {
        let path = format!("/transaction?id={}", tx_id);

        for attempt in 1..=POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let txns = match self.get(&path).await {
                Ok(serde_json::Value::Array(txns)) => txns,
                Ok(_) => continue,
                Err(e) => {
                    debug!("[Relay] poll {}/{} for {} failed: {}", attempt, POLL_ATTEMPTS, tx_id, e);
                    continue;
                }
            };
            let Some(txn) = txns.first() else { continue };

            let state = txn.get("state").and_then(|s| s.as_str()).unwrap_or("");
            let tx_hash = txn
                .get("transactionHash")
                .and_then(|h| h.as_str())
                .map(str::to_string);

            match state {
                "STATE_MINED" | "STATE_CONFIRMED" => {
                    return Ok(CallReceipt {
                        transaction_hash: tx_hash.unwrap_or_else(|| tx_id.to_string()),
                    });
                }
                "STATE_FAILED" | "STATE_INVALID" => {
                    return Err(CopyError::Chain(format!(
                        "relay transaction {} ended in {} (hash {:?})",
                        tx_id, state, tx_hash
                    )));
                }
                _ => {}
            }
        }

        Err(CopyError::Chain(format!(
            "relay transaction {} not confirmed after {} polls",
            tx_id, POLL_ATTEMPTS
        )))
    }
}

#[async_trait]
impl MultisigSigner for SafeRelaySigner {
    async fn execute(&self, to: Address, calldata: &[u8], label: &str) -> Result<CallReceipt> {
        info!(
            "[Relay] {}: safe={} target={} calldata_len={}",
            label,
            self.safe,
            to,
            calldata.len()
        );

        let tx_id = self.submit(to, calldata, label).await?;
        info!("[Relay] {} submitted: tx_id={}", label, tx_id);

        let receipt = self.wait_for(&tx_id).await;
        match &receipt {
            Ok(r) => info!("[Relay] {} confirmed: tx={}", label, r.transaction_hash),
            Err(e) => warn!("[Relay] {} failed: {}", label, e),
        }
        receipt
    }
}

/// HMAC-SHA256 over the request, keyed by the base64 builder secret
fn compute_hmac(secret: &str, payload: &str) -> Result<String> {
    let engines = [
        base64::engine::general_purpose::URL_SAFE_NO_PAD,
        base64::engine::general_purpose::URL_SAFE,
        base64::engine::general_purpose::STANDARD,
    ];
    let key = engines
        .iter()
        .find_map(|engine| engine.decode(secret).ok())
        .ok_or_else(|| CopyError::Validation("builder secret is not valid base64".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| CopyError::Validation(format!("invalid HMAC key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(base64::engine::general_purpose::URL_SAFE.encode(mac.finalize().into_bytes()))
}
