//! phunkindex-store — datastore backends.
//!
//! The [`Store`] trait is the only datastore surface the pipeline sees.
//! Backends: [`MemoryStore`] for tests and ephemeral runs, [`SqliteStore`]
//! for persistence.
//!
//! Correctness leans on two properties rather than cross-row transactions:
//! unique constraints on `hash_id` / `sha`, and the `tx_id` idempotency key
//! on events — re-applying a block is a no-op.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

use phunkindex_core::collection::CollectionItem;
use phunkindex_core::error::IndexError;
use phunkindex_core::types::{Auction, AuctionBidEntry, Bid, Ethscription, EventRecord, Listing};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Operations the derived-state writers and the coordinator need.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Ethscriptions ──────────────────────────────────────────────────

    async fn add_ethscription(&self, record: Ethscription) -> Result<(), IndexError>;
    async fn ethscription_by_hash(&self, hash_id: &str)
        -> Result<Option<Ethscription>, IndexError>;
    async fn ethscription_by_sha(&self, sha: &str) -> Result<Option<Ethscription>, IndexError>;

    /// Compare-and-set ownership update: succeeds only if the current
    /// owner matches `expected_owner` (case-insensitive), moving the old
    /// owner into `prev_owner`.
    async fn update_owner(
        &self,
        hash_id: &str,
        expected_owner: &str,
        new_owner: &str,
    ) -> Result<bool, IndexError>;

    /// Mark an ethscription as bridge-escrowed. `false` if no row exists.
    async fn lock_ethscription(&self, hash_id: &str) -> Result<bool, IndexError>;
    async fn unlock_ethscription(&self, hash_id: &str) -> Result<bool, IndexError>;

    // ── Event log ──────────────────────────────────────────────────────

    /// Append events; rows whose `tx_id` already exists are skipped.
    async fn add_events(&self, events: &[EventRecord]) -> Result<(), IndexError>;

    /// Events for one ethscription ordered by
    /// `(block_number, tx_index, stable_index)`.
    async fn events_for_hash(&self, hash_id: &str) -> Result<Vec<EventRecord>, IndexError>;

    async fn event_count(&self) -> Result<u64, IndexError>;

    // ── Listings & bids ────────────────────────────────────────────────

    async fn upsert_listing(&self, listing: Listing) -> Result<(), IndexError>;
    async fn get_listing(&self, hash_id: &str) -> Result<Option<Listing>, IndexError>;
    /// Returns `true` if a listing was actually removed.
    async fn remove_listing(&self, hash_id: &str) -> Result<bool, IndexError>;

    async fn upsert_bid(&self, bid: Bid) -> Result<(), IndexError>;
    async fn get_bid(&self, hash_id: &str) -> Result<Option<Bid>, IndexError>;
    async fn remove_bid(&self, hash_id: &str) -> Result<bool, IndexError>;

    // ── Auctions ───────────────────────────────────────────────────────

    async fn create_auction(&self, auction: Auction) -> Result<(), IndexError>;
    async fn get_auction(&self, auction_id: u64) -> Result<Option<Auction>, IndexError>;
    /// Record a bid: updates the auction's highest bid and appends to the
    /// bid history.
    async fn create_auction_bid(&self, entry: AuctionBidEntry) -> Result<(), IndexError>;
    async fn extend_auction(&self, auction_id: u64, end_time: u64) -> Result<(), IndexError>;
    async fn settle_auction(
        &self,
        auction_id: u64,
        winner: &str,
        amount: &str,
    ) -> Result<(), IndexError>;

    // ── Users & points ─────────────────────────────────────────────────

    async fn get_or_create_user(&self, address: &str, created_at: i64) -> Result<(), IndexError>;
    async fn update_user_points(&self, address: &str, points: u64) -> Result<(), IndexError>;
    async fn user_points(&self, address: &str) -> Result<Option<u64>, IndexError>;

    // ── Sha dictionary ─────────────────────────────────────────────────

    async fn seed_collection(&self, items: &[CollectionItem]) -> Result<(), IndexError>;
    /// Returns the token id when `sha` belongs to the collection.
    async fn check_ethscription_sha(&self, sha: &str) -> Result<Option<i64>, IndexError>;

    // ── Checkpoint ─────────────────────────────────────────────────────

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>, IndexError>;
    async fn update_last_block(
        &self,
        chain_id: u64,
        number: u64,
        timestamp: i64,
    ) -> Result<(), IndexError>;

    // ── Reorg recovery ─────────────────────────────────────────────────

    /// Delete all derived rows above `block_number` and restore ownership
    /// by replaying the surviving event log. Resets the checkpoint to
    /// `block_number` if it had advanced past it.
    async fn rollback_to(&self, chain_id: u64, block_number: u64) -> Result<(), IndexError>;
}

/// Ownership as reconstructed from the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedOwner {
    pub owner: String,
    pub prev_owner: Option<String>,
    /// Whether a `created` event survives in the log.
    pub created: bool,
}

/// Replay ownership from an event log sorted by
/// `(block_number, tx_index, stable_index)`.
///
/// Only `created` and `transfer` events move ownership; every other kind
/// is derived state about the same hash.
pub fn replay_ownership(events: &[EventRecord]) -> HashMap<String, ReplayedOwner> {
    use phunkindex_core::types::EventKind;

    let mut owners: HashMap<String, ReplayedOwner> = HashMap::new();
    for event in events {
        match event.kind {
            EventKind::Created => {
                owners.insert(
                    event.hash_id.clone(),
                    ReplayedOwner {
                        owner: event.to.clone(),
                        prev_owner: None,
                        created: true,
                    },
                );
            }
            EventKind::Transfer => {
                if let Some(state) = owners.get_mut(&event.hash_id) {
                    state.prev_owner = Some(event.from.clone());
                    state.owner = event.to.clone();
                }
            }
            _ => {}
        }
    }
    owners
}
