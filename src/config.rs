//! Configuration management for the copy-trading bot

use crate::services::ctf::{CTF_ADDRESS, USDC_ADDRESS};
use crate::services::safe_relay::BuilderCredentials;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Operator EOA private key (hex)
    pub private_key: String,

    /// Operator EOA address
    pub public_address: String,

    /// Safe proxy that holds collateral and positions
    pub proxy_wallet: String,

    /// Polygon RPC URL for balance queries
    pub rpc_url: String,

    /// Wallets whose trades are copied
    pub trader_wallets: Vec<String>,

    pub clob_http_url: String,
    pub data_api_url: String,
    pub gamma_api_url: String,
    pub relayer_url: String,

    pub usdc_contract_address: String,
    pub ctf_token_address: String,

    /// Pause between monitor cycles
    pub fetch_interval_seconds: u64,

    /// Activity older than this is ignored
    pub too_old_timestamp_seconds: u64,

    /// Order-post attempts per trade
    pub retry_limit: u32,

    /// Skip every trade without sizing it
    pub pause_trading: bool,

    /// Fallback ratio when the counterpart bankroll is unknown
    pub copy_ratio: Decimal,

    pub claim_interval_seconds: u64,
    pub claim_enabled: bool,

    /// Builder relay credentials (required when claims are enabled)
    pub builder: Option<BuilderCredentials>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{} is not defined", key));

        let private_key = required("PRIVATE_KEY")?;
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| anyhow::anyhow!("PRIVATE_KEY is invalid: {}", e))?;

        let public_address = match get("PUBLIC_ADDRESS") {
            Some(addr) => validate_address("PUBLIC_ADDRESS", &addr)?,
            None => format!("{:?}", signer.address()),
        };

        let proxy_wallet = validate_address("PROXY_WALLET", &required("PROXY_WALLET")?)?;
        let rpc_url = required("RPC_URL")?;

        let trader_wallets = required("TRADER_WALLETS")?
            .split(',')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(|w| validate_address("TRADER_WALLETS", w))
            .collect::<Result<Vec<_>>>()?;
        if trader_wallets.is_empty() {
            anyhow::bail!("TRADER_WALLETS must list at least one wallet");
        }

        let clob_http_url = get("CLOB_HTTP_URL")
            .unwrap_or_else(|| "https://clob.polymarket.com".to_string());
        let data_api_url = get("DATA_API_URL")
            .unwrap_or_else(|| "https://data-api.polymarket.com".to_string());
        let gamma_api_url = get("GAMMA_API_URL")
            .unwrap_or_else(|| "https://gamma-api.polymarket.com".to_string());
        let relayer_url = get("RELAYER_URL")
            .unwrap_or_else(|| "https://relayer-v2.polymarket.com".to_string());

        let usdc_contract_address = validate_address(
            "USDC_CONTRACT_ADDRESS",
            &get("USDC_CONTRACT_ADDRESS").unwrap_or_else(|| USDC_ADDRESS.to_string()),
        )?;
        let ctf_token_address = validate_address(
            "CTF_TOKEN_ADDRESS",
            &get("CTF_TOKEN_ADDRESS").unwrap_or_else(|| CTF_ADDRESS.to_string()),
        )?;

        let fetch_interval_seconds = parse_or("FETCH_INTERVAL", get("FETCH_INTERVAL"), 10)?;
        let too_old_timestamp_seconds = parse_or("TOO_OLD_TIMESTAMP", get("TOO_OLD_TIMESTAMP"), 3600)?;
        let retry_limit = parse_or("RETRY_LIMIT", get("RETRY_LIMIT"), 3)?;
        let claim_interval_seconds = parse_or("CLAIM_INTERVAL_SECONDS", get("CLAIM_INTERVAL_SECONDS"), 300)?;

        let pause_trading = get("PAUSE_TRADING")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        let claim_enabled = get("CLAIM_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let copy_ratio = match get("COPY_RATIO") {
            Some(v) => Decimal::from_str(&v).with_context(|| format!("COPY_RATIO is not a number: {}", v))?,
            None => Decimal::ONE,
        };
        if copy_ratio <= Decimal::ZERO {
            anyhow::bail!("COPY_RATIO must be positive, got {}", copy_ratio);
        }

        let builder = match (
            get("POLY_BUILDER_API_KEY"),
            get("POLY_BUILDER_SECRET"),
            get("POLY_BUILDER_PASSPHRASE"),
        ) {
            (Some(api_key), Some(secret), Some(passphrase)) => Some(BuilderCredentials {
                api_key,
                secret,
                passphrase,
            }),
            _ => None,
        };

        // Validate configuration
        if claim_enabled && builder.is_none() {
            anyhow::bail!(
                "POLY_BUILDER_API_KEY, POLY_BUILDER_SECRET and POLY_BUILDER_PASSPHRASE are required when CLAIM_ENABLED"
            );
        }

        Ok(Self {
            private_key,
            public_address,
            proxy_wallet,
            rpc_url,
            trader_wallets,
            clob_http_url,
            data_api_url,
            gamma_api_url,
            relayer_url,
            usdc_contract_address,
            ctf_token_address,
            fetch_interval_seconds,
            too_old_timestamp_seconds,
            retry_limit,
            pause_trading,
            copy_ratio,
            claim_interval_seconds,
            claim_enabled,
            builder,
        })
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_seconds)
    }

    pub fn claim_interval(&self) -> Duration {
        Duration::from_secs(self.claim_interval_seconds)
    }

    pub fn max_event_age(&self) -> Duration {
        Duration::from_secs(self.too_old_timestamp_seconds)
    }
}

fn validate_address(key: &str, value: &str) -> Result<String> {
    Address::from_str(value)
        .map_err(|e| anyhow::anyhow!("{} has an invalid address {}: {}", key, value, e))?;
    Ok(value.to_string())
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a number, got {}: {}", key, v, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    const KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";
    const PROXY: &str = "0x1111111111111111111111111111111111111111";
    const TRADER_A: &str = "0x2222222222222222222222222222222222222222";
    const TRADER_B: &str = "0x3333333333333333333333333333333333333333";

    fn base_env() -> HashMap<String, String> {
        [
            ("PRIVATE_KEY", KEY),
            ("PROXY_WALLET", PROXY),
            ("RPC_URL", "https://polygon-rpc.com"),
            ("TRADER_WALLETS", TRADER_A),
            ("POLY_BUILDER_API_KEY", "key"),
            ("POLY_BUILDER_SECRET", "c2VjcmV0"),
            ("POLY_BUILDER_PASSPHRASE", "pass"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<String, String>) -> Result<Config> {
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.fetch_interval_seconds, 10);
        assert_eq!(config.too_old_timestamp_seconds, 3600);
        assert_eq!(config.retry_limit, 3);
        assert!(!config.pause_trading);
        assert_eq!(config.copy_ratio, dec!(1));
        assert_eq!(config.claim_interval_seconds, 300);
        assert!(config.claim_enabled);
        assert_eq!(config.usdc_contract_address, USDC_ADDRESS);
        assert_eq!(config.clob_http_url, "https://clob.polymarket.com");
        assert!(config.public_address.starts_with("0x"));
    }

    #[test]
    fn test_trader_wallet_list() {
        let mut env = base_env();
        env.insert("TRADER_WALLETS".into(), format!(" {} , {} ,", TRADER_A, TRADER_B));
        let config = load(&env).unwrap();
        assert_eq!(config.trader_wallets, vec![TRADER_A.to_string(), TRADER_B.to_string()]);
    }

    #[test]
    fn test_missing_required_is_fatal() {
        for key in ["PRIVATE_KEY", "PROXY_WALLET", "RPC_URL", "TRADER_WALLETS"] {
            let mut env = base_env();
            env.remove(key);
            let err = load(&env).unwrap_err().to_string();
            assert!(err.contains(key), "{} -> {}", key, err);
        }
    }

    #[test]
    fn test_invalid_address_is_fatal() {
        let mut env = base_env();
        env.insert("PROXY_WALLET".into(), "0x1234".into());
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_builder_credentials_only_needed_for_claims() {
        let mut env = base_env();
        env.remove("POLY_BUILDER_SECRET");
        assert!(load(&env).is_err());

        env.insert("CLAIM_ENABLED".into(), "false".into());
        let config = load(&env).unwrap();
        assert!(!config.claim_enabled);
        assert!(config.builder.is_none());
    }

    #[test]
    fn test_overrides() {
        let mut env = base_env();
        env.insert("PAUSE_TRADING".into(), "TRUE".into());
        env.insert("COPY_RATIO".into(), "0.25".into());
        env.insert("FETCH_INTERVAL".into(), "2".into());
        let config = load(&env).unwrap();
        assert!(config.pause_trading);
        assert_eq!(config.copy_ratio, dec!(0.25));
        assert_eq!(config.fetch_interval(), Duration::from_secs(2));

        env.insert("RETRY_LIMIT".into(), "many".into());
        assert!(load(&env).is_err());
    }
}
