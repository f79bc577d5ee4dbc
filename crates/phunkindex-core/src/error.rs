//! Error types for the indexing pipeline.

use thiserror::Error;

/// Errors that can occur while indexing.
#[derive(Debug, Error)]
pub enum IndexError {
    /// RPC transport failure (timeout, connection reset, 5xx).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The requested block does not exist yet — the head may have moved
    /// past a reorg. Retried with a delay.
    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("storage error: {0}")]
    Store(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// Parent-hash discontinuity against the processed-block window.
    #[error("reorg detected at block {block_number}: expected parent {expected}, got {actual}")]
    ReorgDetected {
        block_number: u64,
        expected: String,
        actual: String,
    },

    /// The fork point lies behind a confirmed block — the window cannot
    /// roll back that far.
    #[error("reorg reaches past confirmed block {block_number}")]
    ReorgPastConfirmed { block_number: u64 },

    /// The bridge contract emitted `HashLocked` but the row could not be
    /// locked. Bridge inconsistency fails the whole block.
    #[error("bridge lock failed for ethscription {hash_id}")]
    BridgeLockFailed { hash_id: String },

    #[error("block {block_number} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        block_number: u64,
        attempts: u32,
        reason: String,
    },

    /// The sha → token-id dictionary could not be loaded at startup.
    #[error("collection dictionary: {0}")]
    Collection(String),

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Returns `true` if the error is transient and the block should be
    /// retried after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::BlockNotFound(_))
    }

    /// Returns `true` if this is a reorg (recoverable by walking back).
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDetected { .. })
    }

    /// Fatal errors stop the coordinator; the supervisor restarts it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReorgPastConfirmed { .. }
                | Self::BridgeLockFailed { .. }
                | Self::RetriesExhausted { .. }
                | Self::Collection(_)
        )
    }
}
