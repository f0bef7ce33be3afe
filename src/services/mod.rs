//! Concrete adapters for the exchange, the chain and the data API

pub mod chain;
pub mod clob;
pub mod clob_errors;
pub mod ctf;
pub mod data_api;
pub mod http;
pub mod retry;
pub mod safe_relay;

pub use chain::RpcChainGateway;
pub use clob::ClobGateway;
pub use data_api::DataApiClient;
pub use http::HttpFetcher;
pub use safe_relay::{BuilderCredentials, SafeRelaySigner};
