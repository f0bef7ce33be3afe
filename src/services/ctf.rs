//! Conditional Token Framework (CTF) and collateral ABI encoding
//!
//! Positions and USDC both use 6 decimals on Polygon. Binary markets
//! redeem with index sets [1, 2] against a zero parent collection.

use crate::error::{CopyError, Result};
use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use rust_decimal::Decimal;
use std::str::FromStr;

/// CTF contract on Polygon
pub const CTF_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";
/// USDC.e on Polygon (6 decimals)
pub const USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
/// CTF Exchange, the spender that needs collateral allowance
pub const CTF_EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

pub const BINARY_INDEX_SETS: [u32; 2] = [1, 2];

const TOKEN_DECIMALS: u32 = 6;
const NATIVE_DECIMALS: u32 = 18;

pub mod conditional {
    alloy::sol! {
        function redeemPositions(
            address collateralToken,
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] indexSets
        );

        function balanceOfBatch(address[] accounts, uint256[] ids) external view returns (uint256[]);
    }
}

// ERC-20 collateral has its own balanceOf(address); keep it apart from the
// ERC-1155 surface above.
pub mod erc20 {
    alloy::sol! {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}

/// ABI-encode `redeemPositions(collateral, 0x0, conditionId, [1, 2])`
pub fn encode_redeem(collateral: Address, condition_id: &str) -> Result<Vec<u8>> {
    let call = conditional::redeemPositionsCall {
        collateralToken: collateral,
        parentCollectionId: B256::ZERO,
        conditionId: parse_condition_id(condition_id)?,
        indexSets: BINARY_INDEX_SETS.iter().map(|&i| U256::from(i)).collect(),
    };
    Ok(call.abi_encode())
}

pub fn encode_balance_of_batch(accounts: Vec<Address>, ids: Vec<U256>) -> Vec<u8> {
    conditional::balanceOfBatchCall { accounts, ids }.abi_encode()
}

pub fn decode_balance_of_batch(output: &[u8]) -> Result<Vec<U256>> {
    conditional::balanceOfBatchCall::abi_decode_returns(output)
        .map_err(|e| CopyError::Chain(format!("balanceOfBatch decode failed: {}", e)))
}

pub fn encode_erc20_balance(owner: Address) -> Vec<u8> {
    erc20::balanceOfCall { owner }.abi_encode()
}

pub fn encode_erc20_allowance(owner: Address, spender: Address) -> Vec<u8> {
    erc20::allowanceCall { owner, spender }.abi_encode()
}

/// Parse condition_id hex string to B256
pub fn parse_condition_id(condition_id: &str) -> Result<B256> {
    let hex_str = condition_id.strip_prefix("0x").unwrap_or(condition_id);
    let bytes = hex::decode(hex_str)
        .map_err(|e| CopyError::Validation(format!("invalid condition id hex: {}", e)))?;
    if bytes.len() != 32 {
        return Err(CopyError::Validation(format!(
            "condition id must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

/// CLOB token ids are decimal strings of the ERC-1155 position id
pub fn parse_token_id(token_id: &str) -> Result<U256> {
    U256::from_str_radix(token_id, 10)
        .map_err(|e| CopyError::Validation(format!("invalid token id {}: {}", token_id, e)))
}

pub fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|e| CopyError::Validation(format!("invalid address {}: {}", address, e)))
}

/// Raw 6-decimal units to whole tokens
pub fn from_raw_token_amount(raw: U256) -> Decimal {
    scale_down(raw, TOKEN_DECIMALS)
}

/// Raw wei to whole native tokens
pub fn from_raw_native_amount(raw: U256) -> Decimal {
    scale_down(raw, NATIVE_DECIMALS)
}

fn scale_down(raw: U256, decimals: u32) -> Decimal {
    let raw_decimal = Decimal::from_str(&raw.to_string()).unwrap_or(Decimal::ZERO);
    raw_decimal / Decimal::from(10u64.pow(decimals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CONDITION: &str = "0x9915bea232fa12b20058f9cea1187ea51366352bf833393676cd0db557a58249";

    #[test]
    fn test_redeem_calldata_layout() {
        let usdc: Address = USDC_ADDRESS.parse().unwrap();
        let data = encode_redeem(usdc, CONDITION).unwrap();

        assert_eq!(&data[..4], conditional::redeemPositionsCall::SELECTOR.as_slice());
        // 4 head words + array length + two index sets
        assert_eq!(data.len(), 4 + 32 * 4 + 32 + 32 * 2);
        assert_eq!(data[data.len() - 33], 1);
        assert_eq!(data[data.len() - 1], 2);
    }

    #[test]
    fn test_condition_id_must_be_32_bytes() {
        assert!(parse_condition_id(CONDITION).is_ok());
        assert!(parse_condition_id("0x1234").is_err());
        assert!(parse_condition_id("not-hex").is_err());
    }

    #[test]
    fn test_raw_amount_scaling() {
        assert_eq!(from_raw_token_amount(U256::from(12_345_678u64)), dec!(12.345678));
        assert_eq!(
            from_raw_native_amount(U256::from(10_000_000_000_000_000u64)),
            dec!(0.01)
        );
    }
}
