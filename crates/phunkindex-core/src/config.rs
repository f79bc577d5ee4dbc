//! Indexer configuration.
//!
//! Loadable from a JSON file or from environment variables; environment
//! variables win when both are present.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Configuration for one indexer instance (one chain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Numeric chain id (1 = mainnet, 11155111 = sepolia, …).
    pub chain_id: u64,
    /// First block ever indexed for this deployment.
    pub origin_block: u64,
    /// JSON-RPC endpoint, e.g. `https://eth-mainnet.example/v1/…`.
    pub rpc_url: String,
    /// Ethscriptions provider endpoint used to validate batch transfers.
    #[serde(default)]
    pub provider_url: String,
    /// Marketplace (escrow) contract address.
    pub market_address: String,
    pub auction_address: String,
    pub points_address: String,
    pub bridge_address: String,
    /// Escrow address; defaults to the marketplace address.
    #[serde(default)]
    pub escrow_address: String,
    /// Path to the sha → token-id dictionary (JSON array).
    #[serde(default)]
    pub collection_path: String,
    /// Blocks behind head before an entry is confirmed.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Length of the processed-block window.
    #[serde(default = "default_block_history")]
    pub block_history: usize,
    /// Delay between attempts on a failing block, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Attempts per block before the error is fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Head polling interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-call RPC timeout in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_confirmations() -> u64 {
    6
}
fn default_block_history() -> usize {
    30
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    12_000
}
fn default_rpc_timeout_ms() -> u64 {
    30_000
}

impl IndexerConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| IndexError::Other(format!("config {}: {e}", path.as_ref().display())))?;
        serde_json::from_str(&raw).map_err(|e| IndexError::Other(format!("config parse: {e}")))
    }

    /// Load from environment variables. Required: `CHAIN_ID`, `ORIGIN_BLOCK`,
    /// `RPC_URL`, `MARKET_ADDRESS`, `AUCTION_ADDRESS`, `POINTS_ADDRESS`,
    /// `BRIDGE_ADDRESS`.
    pub fn from_env() -> Result<Self, IndexError> {
        Ok(Self {
            chain_id: required_u64("CHAIN_ID")?,
            origin_block: required_u64("ORIGIN_BLOCK")?,
            rpc_url: required("RPC_URL")?,
            provider_url: env::var("PROVIDER_URL").unwrap_or_default(),
            market_address: required("MARKET_ADDRESS")?,
            auction_address: required("AUCTION_ADDRESS")?,
            points_address: required("POINTS_ADDRESS")?,
            bridge_address: required("BRIDGE_ADDRESS")?,
            escrow_address: env::var("ESCROW_ADDRESS").unwrap_or_default(),
            collection_path: env::var("COLLECTION_PATH").unwrap_or_default(),
            confirmations: optional_u64("CONFIRMATIONS", default_confirmations())?,
            block_history: optional_u64("BLOCK_HISTORY", default_block_history() as u64)? as usize,
            retry_delay_ms: optional_u64("RETRY_DELAY_MS", default_retry_delay_ms())?,
            max_attempts: optional_u64("MAX_ATTEMPTS", default_max_attempts() as u64)? as u32,
            poll_interval_ms: optional_u64("POLL_INTERVAL_MS", default_poll_interval_ms())?,
            rpc_timeout_ms: optional_u64("RPC_TIMEOUT_MS", default_rpc_timeout_ms())?,
        })
    }

    /// The escrow address — falls back to the marketplace address, which
    /// holds listed phunks.
    pub fn escrow(&self) -> &str {
        if self.escrow_address.is_empty() {
            &self.market_address
        } else {
            &self.escrow_address
        }
    }
}

fn required(key: &str) -> Result<String, IndexError> {
    env::var(key).map_err(|_| IndexError::Other(format!("missing env var {key}")))
}

fn required_u64(key: &str) -> Result<u64, IndexError> {
    required(key)?
        .parse()
        .map_err(|e| IndexError::Other(format!("env var {key}: {e}")))
}

fn optional_u64(key: &str, default: u64) -> Result<u64, IndexError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| IndexError::Other(format!("env var {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
