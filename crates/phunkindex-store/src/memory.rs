//! In-memory storage backend.
//!
//! Holds the whole derived view in RAM behind a single mutex. Used for
//! tests and short-lived runs; all data is lost when the process exits.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use phunkindex_core::collection::CollectionItem;
use phunkindex_core::error::IndexError;
use phunkindex_core::types::{Auction, AuctionBidEntry, Bid, Ethscription, EventRecord, Listing};

use crate::{replay_ownership, Store};

#[derive(Default)]
struct Inner {
    ethscriptions: HashMap<String, Ethscription>,
    /// sha → hash_id
    sha_index: HashMap<String, String>,
    events: Vec<EventRecord>,
    event_ids: HashSet<String>,
    listings: HashMap<String, Listing>,
    bids: HashMap<String, Bid>,
    auctions: HashMap<u64, Auction>,
    auction_bids: Vec<AuctionBidEntry>,
    /// address → (created_at, points)
    users: HashMap<String, (i64, u64)>,
    collection: HashMap<String, i64>,
    /// chain_id → (block_number, updated_at)
    checkpoints: HashMap<u64, (u64, i64)>,
}

/// In-memory indexer store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(s: &str) -> String {
    s.to_ascii_lowercase()
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_ethscription(&self, record: Ethscription) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        let hash_id = key(&record.hash_id);
        if inner.ethscriptions.contains_key(&hash_id) || inner.sha_index.contains_key(&record.sha)
        {
            return Err(IndexError::Store(format!(
                "duplicate ethscription {hash_id}"
            )));
        }
        inner.sha_index.insert(record.sha.clone(), hash_id.clone());
        inner.ethscriptions.insert(hash_id, record);
        Ok(())
    }

    async fn ethscription_by_hash(
        &self,
        hash_id: &str,
    ) -> Result<Option<Ethscription>, IndexError> {
        Ok(self.inner.lock().unwrap().ethscriptions.get(&key(hash_id)).cloned())
    }

    async fn ethscription_by_sha(&self, sha: &str) -> Result<Option<Ethscription>, IndexError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sha_index
            .get(sha)
            .and_then(|h| inner.ethscriptions.get(h))
            .cloned())
    }

    async fn update_owner(
        &self,
        hash_id: &str,
        expected_owner: &str,
        new_owner: &str,
    ) -> Result<bool, IndexError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.ethscriptions.get_mut(&key(hash_id)) {
            Some(record) if record.owner.eq_ignore_ascii_case(expected_owner) => {
                record.prev_owner = Some(std::mem::replace(&mut record.owner, key(new_owner)));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_ethscription(&self, hash_id: &str) -> Result<bool, IndexError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.ethscriptions.get_mut(&key(hash_id)) {
            Some(record) => {
                record.locked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unlock_ethscription(&self, hash_id: &str) -> Result<bool, IndexError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.ethscriptions.get_mut(&key(hash_id)) {
            Some(record) => {
                record.locked = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_events(&self, events: &[EventRecord]) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        for event in events {
            if inner.event_ids.insert(event.tx_id.clone()) {
                inner.events.push(event.clone());
            }
        }
        Ok(())
    }

    async fn events_for_hash(&self, hash_id: &str) -> Result<Vec<EventRecord>, IndexError> {
        let inner = self.inner.lock().unwrap();
        let hash_id = key(hash_id);
        let mut events: Vec<EventRecord> = inner
            .events
            .iter()
            .filter(|e| e.hash_id == hash_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.tx_index, e.stable_index));
        Ok(events)
    }

    async fn event_count(&self) -> Result<u64, IndexError> {
        Ok(self.inner.lock().unwrap().events.len() as u64)
    }

    async fn upsert_listing(&self, listing: Listing) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        inner.listings.insert(key(&listing.hash_id), listing);
        Ok(())
    }

    async fn get_listing(&self, hash_id: &str) -> Result<Option<Listing>, IndexError> {
        Ok(self.inner.lock().unwrap().listings.get(&key(hash_id)).cloned())
    }

    async fn remove_listing(&self, hash_id: &str) -> Result<bool, IndexError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .listings
            .remove(&key(hash_id))
            .is_some())
    }

    async fn upsert_bid(&self, bid: Bid) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        inner.bids.insert(key(&bid.hash_id), bid);
        Ok(())
    }

    async fn get_bid(&self, hash_id: &str) -> Result<Option<Bid>, IndexError> {
        Ok(self.inner.lock().unwrap().bids.get(&key(hash_id)).cloned())
    }

    async fn remove_bid(&self, hash_id: &str) -> Result<bool, IndexError> {
        Ok(self.inner.lock().unwrap().bids.remove(&key(hash_id)).is_some())
    }

    async fn create_auction(&self, auction: Auction) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        inner.auctions.insert(auction.auction_id, auction);
        Ok(())
    }

    async fn get_auction(&self, auction_id: u64) -> Result<Option<Auction>, IndexError> {
        Ok(self.inner.lock().unwrap().auctions.get(&auction_id).cloned())
    }

    async fn create_auction_bid(&self, entry: AuctionBidEntry) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(auction) = inner.auctions.get_mut(&entry.auction_id) {
            auction.highest_bid = entry.value.clone();
            auction.highest_bidder = Some(entry.bidder.clone());
        }
        inner.auction_bids.push(entry);
        Ok(())
    }

    async fn extend_auction(&self, auction_id: u64, end_time: u64) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(auction) = inner.auctions.get_mut(&auction_id) {
            auction.end_time = end_time;
        }
        Ok(())
    }

    async fn settle_auction(
        &self,
        auction_id: u64,
        winner: &str,
        amount: &str,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(auction) = inner.auctions.get_mut(&auction_id) {
            auction.settled = true;
            auction.highest_bidder = Some(key(winner));
            auction.highest_bid = amount.to_string();
        }
        Ok(())
    }

    async fn get_or_create_user(&self, address: &str, created_at: i64) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        inner.users.entry(key(address)).or_insert((created_at, 0));
        Ok(())
    }

    async fn update_user_points(&self, address: &str, points: u64) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .users
            .entry(key(address))
            .and_modify(|(_, p)| *p = points)
            .or_insert((0, points));
        Ok(())
    }

    async fn user_points(&self, address: &str) -> Result<Option<u64>, IndexError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .get(&key(address))
            .map(|(_, p)| *p))
    }

    async fn seed_collection(&self, items: &[CollectionItem]) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        for item in items {
            inner.collection.insert(item.sha.clone(), item.token_id);
        }
        Ok(())
    }

    async fn check_ethscription_sha(&self, sha: &str) -> Result<Option<i64>, IndexError> {
        Ok(self.inner.lock().unwrap().collection.get(sha).copied())
    }

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>, IndexError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .checkpoints
            .get(&chain_id)
            .map(|(n, _)| *n))
    }

    async fn update_last_block(
        &self,
        chain_id: u64,
        number: u64,
        timestamp: i64,
    ) -> Result<(), IndexError> {
        self.inner
            .lock()
            .unwrap()
            .checkpoints
            .insert(chain_id, (number, timestamp));
        Ok(())
    }

    async fn rollback_to(&self, chain_id: u64, block_number: u64) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();

        inner.events.retain(|e| e.block_number <= block_number);
        let surviving: HashSet<String> = inner.events.iter().map(|e| e.tx_id.clone()).collect();
        inner.event_ids = surviving;
        inner.listings.retain(|_, l| l.block_number <= block_number);
        inner.bids.retain(|_, b| b.block_number <= block_number);
        inner.auctions.retain(|_, a| a.block_number <= block_number);
        inner
            .auction_bids
            .retain(|b| b.block_number <= block_number);

        // Ownership is a pure function of the event log: replay it.
        let mut events = inner.events.clone();
        events.sort_by_key(|e| (e.block_number, e.tx_index, e.stable_index));
        let owners = replay_ownership(&events);

        let stale: Vec<String> = inner
            .ethscriptions
            .keys()
            .filter(|hash| !owners.get(*hash).map(|o| o.created).unwrap_or(false))
            .cloned()
            .collect();
        for hash in stale {
            if let Some(record) = inner.ethscriptions.remove(&hash) {
                inner.sha_index.remove(&record.sha);
            }
        }
        for (hash, state) in &owners {
            if let Some(record) = inner.ethscriptions.get_mut(hash) {
                record.owner = state.owner.clone();
                record.prev_owner = state.prev_owner.clone();
            }
        }

        if let Some((n, _)) = inner.checkpoints.get_mut(&chain_id) {
            if *n > block_number {
                *n = block_number;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phunkindex_core::types::EventKind;

    fn scription(hash: &str, sha: &str, owner: &str) -> Ethscription {
        Ethscription {
            hash_id: hash.into(),
            sha: sha.into(),
            token_id: 1,
            creator: "0xcreator".into(),
            owner: owner.into(),
            prev_owner: None,
            created_at: 0,
            locked: false,
        }
    }

    fn event(kind: EventKind, hash: &str, from: &str, to: &str, block: u64) -> EventRecord {
        let tx_hash = format!("0x{block:064x}");
        EventRecord {
            tx_id: EventRecord::tx_id_for(&tx_hash, 0),
            kind,
            hash_id: hash.into(),
            from: from.into(),
            to: to.into(),
            value: "0".into(),
            block_number: block,
            block_hash: format!("0xb{block:x}"),
            tx_index: 0,
            tx_hash,
            stable_index: 0,
            block_timestamp: block as i64,
        }
    }

    #[tokio::test]
    async fn owner_cas_requires_current_owner() {
        let store = MemoryStore::new();
        store
            .add_ethscription(scription("0xH1", "sha1", "0xAAA"))
            .await
            .unwrap();

        // Wrong expected owner — no change.
        assert!(!store.update_owner("0xh1", "0xzzz", "0xbbb").await.unwrap());
        // Case-insensitive match succeeds.
        assert!(store.update_owner("0xH1", "0xaaa", "0xbbb").await.unwrap());

        let record = store.ethscription_by_hash("0xh1").await.unwrap().unwrap();
        assert_eq!(record.owner, "0xbbb");
        assert_eq!(record.prev_owner.as_deref(), Some("0xAAA"));
    }

    #[tokio::test]
    async fn duplicate_sha_rejected() {
        let store = MemoryStore::new();
        store
            .add_ethscription(scription("0xh1", "sha1", "0xaaa"))
            .await
            .unwrap();
        let dup = store.add_ethscription(scription("0xh2", "sha1", "0xbbb")).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn events_idempotent_on_tx_id() {
        let store = MemoryStore::new();
        let e = event(EventKind::Transfer, "0xh1", "0xa", "0xb", 100);
        store.add_events(&[e.clone()]).await.unwrap();
        store.add_events(&[e.clone()]).await.unwrap();
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_replays_ownership() {
        let store = MemoryStore::new();
        store
            .add_ethscription(scription("0xh1", "sha1", "0xaaa"))
            .await
            .unwrap();
        store
            .add_events(&[event(EventKind::Created, "0xh1", "0xcreator", "0xaaa", 100)])
            .await
            .unwrap();

        // Transfer at block 101, then roll it back.
        assert!(store.update_owner("0xh1", "0xaaa", "0xbbb").await.unwrap());
        store
            .add_events(&[event(EventKind::Transfer, "0xh1", "0xaaa", "0xbbb", 101)])
            .await
            .unwrap();
        store.update_last_block(1, 101, 0).await.unwrap();

        store.rollback_to(1, 100).await.unwrap();

        let record = store.ethscription_by_hash("0xh1").await.unwrap().unwrap();
        assert_eq!(record.owner, "0xaaa");
        assert_eq!(record.prev_owner, None);
        assert_eq!(store.event_count().await.unwrap(), 1);
        assert_eq!(store.last_block(1).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn rollback_drops_ethscriptions_created_above_fork() {
        let store = MemoryStore::new();
        store
            .add_ethscription(scription("0xh2", "sha2", "0xccc"))
            .await
            .unwrap();
        store
            .add_events(&[event(EventKind::Created, "0xh2", "0xcreator", "0xccc", 105)])
            .await
            .unwrap();

        store.rollback_to(1, 100).await.unwrap();

        assert!(store.ethscription_by_hash("0xh2").await.unwrap().is_none());
        // The sha is free again for a future creation.
        assert!(store.ethscription_by_sha("sha2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_and_bid_are_single_slot() {
        let store = MemoryStore::new();
        let listing = Listing {
            hash_id: "0xh1".into(),
            seller: "0xaaa".into(),
            min_value: "100".into(),
            to_address: None,
            block_number: 100,
            created_at: 0,
        };
        store.upsert_listing(listing.clone()).await.unwrap();
        store
            .upsert_listing(Listing {
                seller: "0xbbb".into(),
                ..listing
            })
            .await
            .unwrap();
        assert_eq!(
            store.get_listing("0xh1").await.unwrap().unwrap().seller,
            "0xbbb"
        );

        assert!(store.remove_listing("0xh1").await.unwrap());
        assert!(!store.remove_listing("0xh1").await.unwrap());
    }
}
