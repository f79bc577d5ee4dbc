//! Shared types for the indexing pipeline.
//!
//! Addresses and 32-byte hashes are carried as lowercase `0x…` hex strings;
//! wei amounts as decimal strings (they exceed u64).

use serde::{Deserialize, Serialize};

/// The zero address, used for `from`/`to` slots that do not apply.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Case-insensitive address comparison.
pub fn same_addr(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A minimal summary of a block — enough for progress tracking and the
/// reorg window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── Ethscription ─────────────────────────────────────────────────────────────

/// A minted inscription record. `hash_id` is the transaction hash of the
/// creating transaction; `sha` is the SHA-256 of the normalized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ethscription {
    pub hash_id: String,
    pub sha: String,
    /// Small integer assigned by the pre-seeded sha → token-id dictionary.
    pub token_id: i64,
    pub creator: String,
    /// Current holder. Never null — transitions only through the ownership
    /// state machine.
    pub owner: String,
    /// The address that owned it immediately before `owner`; `None` only
    /// at creation.
    pub prev_owner: Option<String>,
    /// Creating block timestamp.
    pub created_at: i64,
    /// Bridge escrow flag.
    pub locked: bool,
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// The closed vocabulary of domain events written to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Transfer,
    PhunkBought,
    PhunkOffered,
    PhunkNoLongerForSale,
    PhunkBidEntered,
    PhunkBidWithdrawn,
    AuctionCreated,
    AuctionBid,
    AuctionExtended,
    AuctionSettled,
}

impl EventKind {
    /// Stable string form used in the events table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Transfer => "transfer",
            Self::PhunkBought => "PhunkBought",
            Self::PhunkOffered => "PhunkOffered",
            Self::PhunkNoLongerForSale => "PhunkNoLongerForSale",
            Self::PhunkBidEntered => "PhunkBidEntered",
            Self::PhunkBidWithdrawn => "PhunkBidWithdrawn",
            Self::AuctionCreated => "AuctionCreated",
            Self::AuctionBid => "AuctionBid",
            Self::AuctionExtended => "AuctionExtended",
            Self::AuctionSettled => "AuctionSettled",
        }
    }

    /// Parse the stable string form back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "created" => Self::Created,
            "transfer" => Self::Transfer,
            "PhunkBought" => Self::PhunkBought,
            "PhunkOffered" => Self::PhunkOffered,
            "PhunkNoLongerForSale" => Self::PhunkNoLongerForSale,
            "PhunkBidEntered" => Self::PhunkBidEntered,
            "PhunkBidWithdrawn" => Self::PhunkBidWithdrawn,
            "AuctionCreated" => Self::AuctionCreated,
            "AuctionBid" => Self::AuctionBid,
            "AuctionExtended" => Self::AuctionExtended,
            "AuctionSettled" => Self::AuctionSettled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row in the append-only event log.
///
/// `tx_id` is unique and idempotent across re-processing: the transaction
/// hash joined with a stable index (log index for log events, transaction
/// index for calldata events, batch position for batch entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub tx_id: String,
    pub kind: EventKind,
    pub hash_id: String,
    pub from: String,
    /// Zero address when not applicable.
    pub to: String,
    /// Decimal string of wei.
    pub value: String,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_index: u64,
    pub tx_hash: String,
    /// Position that makes `tx_id` unique within the transaction.
    pub stable_index: u64,
    pub block_timestamp: i64,
}

impl EventRecord {
    /// The idempotency key for an event.
    pub fn tx_id_for(tx_hash: &str, stable_index: u64) -> String {
        format!("{}:{stable_index}", tx_hash.to_ascii_lowercase())
    }
}

// ─── Marketplace ──────────────────────────────────────────────────────────────

/// An active sell offer. At most one per `hash_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub hash_id: String,
    pub seller: String,
    /// Decimal wei.
    pub min_value: String,
    /// Targeted buyer, `None` for an open listing.
    pub to_address: Option<String>,
    pub block_number: u64,
    pub created_at: i64,
}

/// An active buy offer. At most one per `hash_id`; replaced, never stacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub hash_id: String,
    pub bidder: String,
    /// Decimal wei.
    pub value: String,
    pub block_number: u64,
    pub created_at: i64,
}

// ─── Auctions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub auction_id: u64,
    pub hash_id: String,
    pub start_time: u64,
    pub end_time: u64,
    /// Decimal wei; zero until a parameter-update event supplies it.
    pub reserve_price: String,
    pub min_bid_increment_pct: u64,
    pub time_buffer: u64,
    /// Decimal wei.
    pub highest_bid: String,
    pub highest_bidder: Option<String>,
    pub settled: bool,
    pub block_number: u64,
}

/// One entry in an auction's bid history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionBidEntry {
    pub auction_id: u64,
    pub bidder: String,
    pub value: String,
    pub block_number: u64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
