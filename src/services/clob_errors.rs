//! CLOB API Error Classification
//!
//! Turns exchange error responses (HTTP status + body, or SDK error text)
//! into `CopyError` so callers can tell transient failures from rejections
//! and "order not found" cancels from everything else.

use crate::error::CopyError;
use serde::Deserialize;
use std::fmt;

/// Reasons the exchange refuses an order or request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeRejection {
    /// Not enough collateral or allowance behind the order
    InsufficientBalance,
    /// Price not on a valid tick boundary
    InvalidTickSize,
    /// Order size below the market minimum
    OrderSizeTooSmall,
    /// Market closed or not accepting orders
    MarketClosed,
    /// API key or signature rejected
    AuthenticationFailed,
    Unknown { status: u16, message: String },
}

impl fmt::Display for ExchangeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeRejection::InsufficientBalance => write!(f, "insufficient balance or allowance"),
            ExchangeRejection::InvalidTickSize => write!(f, "price not on a valid tick"),
            ExchangeRejection::OrderSizeTooSmall => write!(f, "order size below minimum"),
            ExchangeRejection::MarketClosed => write!(f, "market not accepting orders"),
            ExchangeRejection::AuthenticationFailed => write!(f, "authentication failed"),
            ExchangeRejection::Unknown { status, message } => write!(f, "status {}: {}", status, message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClobErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorMsg")]
    error_msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Classify an HTTP error response from the CLOB, data or Gamma API.
pub fn from_response(status: u16, body: &str) -> CopyError {
    let message = serde_json::from_str::<ClobErrorResponse>(body)
        .ok()
        .and_then(|parsed| parsed.error.or(parsed.error_msg).or(parsed.message))
        .unwrap_or_else(|| body.to_string());

    if status == 404 {
        return CopyError::NotFound(message);
    }
    if status >= 500 {
        return CopyError::Network(format!("upstream {}: {}", status, message));
    }
    classify(status, &message)
}

/// Classify an error message that carries no reliable status code
/// (SDK errors, `not_canceled` reasons).
pub fn from_message(message: &str) -> CopyError {
    classify(0, message)
}

fn classify(status: u16, message: &str) -> CopyError {
    let msg = message.to_lowercase();

    if status == 429 || msg.contains("rate limit") || msg.contains("too many requests") {
        return CopyError::RateLimited;
    }

    if msg.contains("timed out") || msg.contains("timeout") || msg.contains("connection") {
        return CopyError::Network(message.to_string());
    }

    if msg.contains("not found")
        || msg.contains("already canceled")
        || msg.contains("already cancelled")
        || msg.contains("matched")
        || msg.contains("does not exist")
    {
        return CopyError::NotFound(message.to_string());
    }

    let rejection = if status == 401
        || status == 403
        || msg.contains("unauthorized")
        || msg.contains("invalid api key")
        || msg.contains("invalid signature")
    {
        ExchangeRejection::AuthenticationFailed
    } else if msg.contains("insufficient") || msg.contains("not enough") || msg.contains("allowance") {
        ExchangeRejection::InsufficientBalance
    } else if msg.contains("tick") {
        ExchangeRejection::InvalidTickSize
    } else if msg.contains("size") && (msg.contains("small") || msg.contains("minimum") || msg.contains("lower than")) {
        ExchangeRejection::OrderSizeTooSmall
    } else if msg.contains("closed") || msg.contains("not accepting") {
        ExchangeRejection::MarketClosed
    } else {
        ExchangeRejection::Unknown {
            status,
            message: message.to_string(),
        }
    };

    CopyError::Exchange(rejection)
}
