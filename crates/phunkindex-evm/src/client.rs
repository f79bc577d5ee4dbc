//! Chain client — read-only JSON-RPC access.
//!
//! Fetches blocks with transactions and receipts (`eth_getBlockByNumber` +
//! HTTP-batched `eth_getTransactionReceipt`), performs `eth_call` view
//! queries, and validates ethscription ids against the ethscriptions
//! provider endpoint. Transient failures retry with exponential backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{keccak256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use phunkindex_core::types::BlockSummary;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RetryPolicy, RpcError};

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A raw EVM log as returned in a transaction receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn log_index_u64(&self) -> u64 {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// A raw transaction as returned by `eth_getBlockByNumber(_, true)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creations.
    pub to: Option<String>,
    pub input: String,
    pub value: String,
    #[serde(rename = "transactionIndex")]
    pub transaction_index: String,
}

impl RawTransaction {
    pub fn index_u64(&self) -> u64 {
        parse_hex_u64(&self.transaction_index)
    }
}

/// A raw transaction receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

impl RawReceipt {
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1"))
    }
}

/// A block header plus its transactions and receipts, in transaction-index
/// order.
#[derive(Debug, Clone)]
pub struct FullBlock {
    pub summary: BlockSummary,
    pub txs: Vec<(RawTransaction, RawReceipt)>,
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

/// Convert a hex quantity (`0x…`) to its decimal string form.
pub fn hex_to_dec(s: &str) -> String {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    if trimmed.is_empty() {
        return "0".into();
    }
    U256::from_str_radix(trimmed, 16)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| "0".into())
}

// ─── Client trait ────────────────────────────────────────────────────────────

/// Read-only chain access used by the pipeline.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Canonical hash of the block at `number`, `None` if unknown.
    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError>;

    /// Block header plus `(tx, receipt)` pairs; `None` if the block does
    /// not exist (yet).
    async fn block_with_receipts(&self, number: u64) -> Result<Option<FullBlock>, RpcError>;

    /// `eth_call` against `to` with raw calldata; returns the raw output.
    async fn call(&self, to: &str, data: Vec<u8>) -> Result<Vec<u8>, RpcError>;

    /// Returns the subset of `hash_ids` that are real, uniquely inscribed
    /// ethscriptions, per the ethscriptions provider.
    async fn validate_ethscriptions(&self, hash_ids: &[String]) -> Result<Vec<String>, RpcError>;

    /// `points(address)` view call on the points contract.
    async fn points_balance(&self, contract: &str, user: &str) -> Result<u64, RpcError> {
        let mut data = selector("points(address)");
        data.extend_from_slice(&encode_address(user)?);
        let out = self.call(contract, data).await?;
        decode_u64(&out)
    }

    /// `activeMultiplier()` view call on the points contract.
    async fn active_multiplier(&self, contract: &str) -> Result<u64, RpcError> {
        let out = self.call(contract, selector("activeMultiplier()")).await?;
        decode_u64(&out)
    }
}

/// First four bytes of the keccak-256 of a canonical signature.
fn selector(signature: &str) -> Vec<u8> {
    keccak256(signature.as_bytes())[..4].to_vec()
}

/// ABI-encode an address argument (left-padded to 32 bytes).
fn encode_address(addr: &str) -> Result<[u8; 32], RpcError> {
    let raw = hex::decode(addr.strip_prefix("0x").unwrap_or(addr))
        .map_err(|e| RpcError::Other(format!("bad address {addr}: {e}")))?;
    if raw.len() != 20 {
        return Err(RpcError::Other(format!("bad address length: {addr}")));
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&raw);
    Ok(word)
}

/// Decode a uint256 return value, saturating to u64.
fn decode_u64(out: &[u8]) -> Result<u64, RpcError> {
    if out.len() < 32 {
        return Err(RpcError::Incomplete("short eth_call return".into()));
    }
    let value = U256::from_be_slice(&out[..32]);
    Ok(u64::try_from(value).unwrap_or(u64::MAX))
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

/// HTTP JSON-RPC chain client with retry.
pub struct HttpChainClient {
    rpc_url: String,
    /// Ethscriptions provider endpoint; empty disables batch validation.
    provider_url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    timeout_ms: u64,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(
        rpc_url: impl Into<String>,
        provider_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            provider_url: provider_url.into(),
            http,
            retry,
            timeout_ms: timeout.as_millis() as u64,
            next_id: AtomicU64::new(1),
        })
    }

    fn request(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout { ms: self.timeout_ms }
        } else {
            RpcError::Http(e.to_string())
        }
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let resp = self
            .http
            .post(&self.rpc_url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))
    }

    /// Send one request with the retry policy applied.
    async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = self.request(method, params);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => return resp.into_result().map_err(RpcError::Rpc),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            method,
                            error = %e,
                            "retrying RPC request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// True HTTP batch: all requests as one JSON array. Responses are
    /// re-ordered to match the request order.
    async fn rpc_batch(&self, reqs: Vec<JsonRpcRequest>) -> Result<Vec<Value>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&reqs)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(RpcError::Http(format!("HTTP {status} on batch")));
        }

        let mut responses: Vec<JsonRpcResponse> =
            resp.json().await.map_err(|e| RpcError::Http(e.to_string()))?;
        responses.sort_by_key(|r| r.id);

        let mut out = Vec::with_capacity(reqs.len());
        for (req, resp) in reqs.iter().zip(responses) {
            if resp.id != req.id {
                return Err(RpcError::Incomplete("batch response id mismatch".into()));
            }
            out.push(resp.into_result().map_err(RpcError::Rpc)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.rpc("eth_blockNumber", vec![]).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::Incomplete("eth_blockNumber: non-string result".into()))?;
        Ok(parse_hex_u64(hex))
    }

    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        let result = self
            .rpc(
                "eth_getBlockByNumber",
                vec![json!(format!("0x{number:x}")), json!(false)],
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(result["hash"].as_str().map(str::to_string))
    }

    async fn block_with_receipts(&self, number: u64) -> Result<Option<FullBlock>, RpcError> {
        let result = self
            .rpc(
                "eth_getBlockByNumber",
                vec![json!(format!("0x{number:x}")), json!(true)],
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let summary = BlockSummary {
            number: parse_hex_u64(field_str(&result, "number")?),
            hash: field_str(&result, "hash")?.to_string(),
            parent_hash: field_str(&result, "parentHash")?.to_string(),
            timestamp: parse_hex_u64(field_str(&result, "timestamp")?) as i64,
        };

        let txs: Vec<RawTransaction> = match result.get("transactions") {
            Some(v) if v.is_array() => serde_json::from_value(v.clone())?,
            _ => vec![],
        };

        // One batched round-trip for all receipts of the block.
        let reqs: Vec<JsonRpcRequest> = txs
            .iter()
            .map(|tx| self.request("eth_getTransactionReceipt", vec![json!(tx.hash)]))
            .collect();
        let receipts = self.rpc_batch(reqs).await?;

        let mut pairs = Vec::with_capacity(txs.len());
        for (tx, raw) in txs.into_iter().zip(receipts) {
            if raw.is_null() {
                return Err(RpcError::Incomplete(format!(
                    "missing receipt for {}",
                    tx.hash
                )));
            }
            let receipt: RawReceipt = serde_json::from_value(raw)?;
            pairs.push((tx, receipt));
        }
        pairs.sort_by_key(|(tx, _)| tx.index_u64());

        Ok(Some(FullBlock {
            summary,
            txs: pairs,
        }))
    }

    async fn call(&self, to: &str, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let result = self
            .rpc(
                "eth_call",
                vec![
                    json!({ "to": to, "data": format!("0x{}", hex::encode(data)) }),
                    json!("latest"),
                ],
            )
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::Incomplete("eth_call: non-string result".into()))?;
        hex::decode(hex.strip_prefix("0x").unwrap_or(hex))
            .map_err(|e| RpcError::Other(format!("eth_call output: {e}")))
    }

    async fn validate_ethscriptions(&self, hash_ids: &[String]) -> Result<Vec<String>, RpcError> {
        if hash_ids.is_empty() {
            return Ok(vec![]);
        }
        if self.provider_url.is_empty() {
            return Err(RpcError::Other("ethscriptions provider not configured".into()));
        }

        #[derive(Serialize)]
        struct ValidateRequest<'a> {
            #[serde(rename = "hashIds")]
            hash_ids: &'a [String],
        }
        #[derive(Deserialize)]
        struct ValidateResponse {
            #[serde(rename = "validHashIds")]
            valid_hash_ids: Vec<String>,
        }

        let resp = self
            .http
            .post(&self.provider_url)
            .json(&ValidateRequest { hash_ids })
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            return Err(RpcError::Http(format!(
                "provider HTTP {}",
                resp.status().as_u16()
            )));
        }

        let parsed: ValidateResponse =
            resp.json().await.map_err(|e| RpcError::Http(e.to_string()))?;
        Ok(parsed.valid_hash_ids)
    }
}

fn field_str<'a>(v: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    v[key]
        .as_str()
        .ok_or_else(|| RpcError::Incomplete(format!("block field '{key}' missing")))
}
