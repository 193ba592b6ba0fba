//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks, transactions and new-head notifications
//! returned from Ethereum JSON-RPC endpoints, plus the unit and address
//! helpers shared by the rest of the crate.

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// Wei per ether (10^18).
const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

/// Ethereum block with full transaction details.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// List of transactions in the block, in block order
    #[serde(rename = "transactions", default)]
    pub transactions: Vec<BlockTransaction>,
}

/// A transaction as it appears inside a full block.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTransaction {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Sender address (hex string in JSON)
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Recipient address (None for contract creation, hex string in JSON)
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,
}

impl BlockTransaction {
    /// Check if this is a contract creation transaction (to is None).
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// Header delivered by a `newHeads` subscription. Only the number is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockHeader {
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,
}

/// Convert a wei amount to ether.
///
/// The integer part is converted separately from the sub-ether remainder so
/// that ordinary balances keep full precision after the decimal point.
pub fn wei_to_ether(wei: U256) -> f64 {
    let unit = U256::from(WEI_PER_ETHER);
    let whole = u128::try_from(wei / unit).unwrap_or(u128::MAX);
    // remainder < 10^18 always fits in u64
    let frac = u64::try_from(wei % unit).unwrap_or(0);
    whole as f64 + frac as f64 / WEI_PER_ETHER as f64
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix, in any letter case.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!("Address must be 20 bytes (40 hex chars), got {} bytes", bytes.len());
    }

    Ok(Address::from_slice(&bytes))
}

/// Parse a hex quantity (`"0x1a"`) into a u64. Empty quantities are zero.
pub fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16).with_context(|| format!("Invalid hex quantity: {}", s))
}

/// Parse a hex quantity into a U256. Empty quantities are zero.
pub fn parse_hex_u256(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).with_context(|| format!("Invalid hex quantity: {}", s))?;
    if bytes.len() > 32 {
        anyhow::bail!("U256 value too large (max 32 bytes), got {} bytes", bytes.len());
    }
    Ok(U256::from_be_slice(&bytes))
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u256(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_address(&s).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to Address. `null`, missing and `"0x"`
/// all mean no recipient.
fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) if !s.strip_prefix("0x").unwrap_or(&s).is_empty() => {
            parse_address(&s).map(Some).map_err(serde::de::Error::custom)
        }
        _ => Ok(None),
    }
}
