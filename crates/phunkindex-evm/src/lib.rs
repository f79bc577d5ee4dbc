//! phunkindex-evm — JSON-RPC chain access and event decoding.
//!
//! The chain client fetches blocks with transactions and receipts, performs
//! view calls, and validates batch-transferred ethscription ids against the
//! ethscriptions provider. The decoders turn calldata and receipt logs into
//! the closed, strongly-typed event vocabulary the engine consumes — raw
//! log data never crosses this crate's boundary.

pub mod calldata;
pub mod client;
pub mod events;
pub mod rpc;

pub use calldata::{classify_calldata, CalldataAction};
pub use client::{ChainClient, FullBlock, HttpChainClient, RawLog, RawReceipt, RawTransaction};
pub use events::{addr_hex, b256_hex, ChainEvent, LogDecoder};
pub use rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RetryConfig, RetryPolicy, RpcError};
