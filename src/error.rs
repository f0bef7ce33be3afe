//! Error taxonomy shared by the gateways and the core pipeline.
//!
//! Every variant is caught at the boundary of the unit that can make a local
//! decision (skip this record, this wallet, this trade, this redemption).
//! None of them terminates the monitor loop or the claim timer.

use crate::services::clob_errors::ExchangeRejection;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CopyError>;

#[derive(Debug, Clone, Error)]
pub enum CopyError {
    /// Transport failure: timeout, connection reset, 5xx.
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by upstream API")]
    RateLimited,

    /// A single malformed record or payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// The exchange rejected the request.
    #[error("exchange rejected request: {0}")]
    Exchange(ExchangeRejection),

    /// Cancel target is unknown to the exchange (already filled or cancelled).
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("redemption failed: {0}")]
    Redemption(String),

    /// JSON-RPC or ABI decoding failure.
    #[error("chain error: {0}")]
    Chain(String),
}

impl CopyError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CopyError::Network(_) | CopyError::RateLimited)
    }
}

impl From<reqwest::Error> for CopyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CopyError::Network("request timed out".to_string())
        } else if err.is_connect() {
            CopyError::Network("connection failed".to_string())
        } else if err.is_decode() {
            CopyError::Validation(format!("malformed response body: {}", err))
        } else {
            CopyError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CopyError {
    fn from(err: serde_json::Error) -> Self {
        CopyError::Validation(err.to_string())
    }
}
