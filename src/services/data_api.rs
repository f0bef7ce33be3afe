//! Polymarket data API: wallet activity, positions and trade history

use super::http::HttpFetcher;
use crate::error::{CopyError, Result};
use crate::gateway::DataSource;
use async_trait::async_trait;
use serde_json::Value;

pub struct DataApiClient {
    fetcher: HttpFetcher,
    base_url: String,
}

impl DataApiClient {
    pub fn new(fetcher: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_list(&self, path: &str, user: &str, limit: usize) -> Result<Vec<Value>> {
        let url = format!("{}/{}?user={}&limit={}", self.base_url, path, user, limit);
        match self.fetcher.fetch_json::<Value>(&url).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(CopyError::Validation(format!(
                "expected array from /{}, got {}",
                path,
                type_name(&other)
            ))),
        }
    }
}

#[async_trait]
impl DataSource for DataApiClient {
    async fn activity(&self, wallet: &str, limit: usize) -> Result<Vec<Value>> {
        self.fetch_list("activity", wallet, limit).await
    }

    async fn positions(&self, user: &str, limit: usize) -> Result<Vec<Value>> {
        self.fetch_list("positions", user, limit).await
    }

    async fn trades(&self, user: &str, limit: usize) -> Result<Vec<Value>> {
        self.fetch_list("trades", user, limit).await
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
