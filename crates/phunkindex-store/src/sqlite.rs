//! SQLite storage backend.
//!
//! Persists the full derived view to a single SQLite file. Uses `sqlx`
//! with WAL mode for concurrent read performance. Event idempotency rides
//! on the `tx_id` primary key (`INSERT OR IGNORE`).

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use phunkindex_core::collection::CollectionItem;
use phunkindex_core::error::IndexError;
use phunkindex_core::types::{
    Auction, AuctionBidEntry, Bid, Ethscription, EventKind, EventRecord, Listing,
};

use crate::{replay_ownership, Store};

/// SQLite-backed indexer store.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn db_err(e: impl std::fmt::Display) -> IndexError {
    IndexError::Store(e.to_string())
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    pub async fn open(path: &str) -> Result<Self, IndexError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the pool is
    /// dropped — ideal for tests.
    ///
    /// Capped at a single connection: every pooled connection would
    /// otherwise see its own empty `:memory:` database.
    pub async fn in_memory() -> Result<Self, IndexError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        let statements = [
            "PRAGMA journal_mode=WAL;",
            "CREATE TABLE IF NOT EXISTS ethscriptions (
                hash_id     TEXT PRIMARY KEY,
                sha         TEXT NOT NULL UNIQUE,
                token_id    INTEGER NOT NULL,
                creator     TEXT NOT NULL,
                owner       TEXT NOT NULL,
                prev_owner  TEXT,
                created_at  INTEGER NOT NULL,
                locked      INTEGER NOT NULL DEFAULT 0
            );",
            "CREATE TABLE IF NOT EXISTS events (
                tx_id           TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                hash_id         TEXT NOT NULL,
                from_addr       TEXT NOT NULL,
                to_addr         TEXT NOT NULL,
                value           TEXT NOT NULL,
                block_number    INTEGER NOT NULL,
                block_hash      TEXT NOT NULL,
                tx_index        INTEGER NOT NULL,
                tx_hash         TEXT NOT NULL,
                stable_index    INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_events_hash
                 ON events (hash_id, block_number, tx_index, stable_index);",
            "CREATE INDEX IF NOT EXISTS idx_events_block ON events (block_number);",
            "CREATE TABLE IF NOT EXISTS listings (
                hash_id      TEXT PRIMARY KEY,
                seller       TEXT NOT NULL,
                min_value    TEXT NOT NULL,
                to_address   TEXT,
                block_number INTEGER NOT NULL,
                created_at   INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS bids (
                hash_id      TEXT PRIMARY KEY,
                bidder       TEXT NOT NULL,
                value        TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                created_at   INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS auctions (
                auction_id            INTEGER PRIMARY KEY,
                hash_id               TEXT NOT NULL,
                start_time            INTEGER NOT NULL,
                end_time              INTEGER NOT NULL,
                reserve_price         TEXT NOT NULL,
                min_bid_increment_pct INTEGER NOT NULL,
                time_buffer           INTEGER NOT NULL,
                highest_bid           TEXT NOT NULL,
                highest_bidder        TEXT,
                settled               INTEGER NOT NULL DEFAULT 0,
                block_number          INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS auction_bids (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                auction_id   INTEGER NOT NULL,
                bidder       TEXT NOT NULL,
                value        TEXT NOT NULL,
                block_number INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS users (
                address    TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                points     INTEGER NOT NULL DEFAULT 0
            );",
            "CREATE TABLE IF NOT EXISTS collection (
                sha      TEXT PRIMARY KEY,
                token_id INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     INTEGER PRIMARY KEY,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }
}

fn row_to_ethscription(row: &sqlx::sqlite::SqliteRow) -> Ethscription {
    Ethscription {
        hash_id: row.get("hash_id"),
        sha: row.get("sha"),
        token_id: row.get("token_id"),
        creator: row.get("creator"),
        owner: row.get("owner"),
        prev_owner: row.get("prev_owner"),
        created_at: row.get("created_at"),
        locked: row.get::<i64, _>("locked") != 0,
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<EventRecord, IndexError> {
    let kind_str: String = row.get("kind");
    let kind = EventKind::parse(&kind_str)
        .ok_or_else(|| IndexError::Store(format!("unknown event kind '{kind_str}'")))?;
    Ok(EventRecord {
        tx_id: row.get("tx_id"),
        kind,
        hash_id: row.get("hash_id"),
        from: row.get("from_addr"),
        to: row.get("to_addr"),
        value: row.get("value"),
        block_number: row.get::<i64, _>("block_number") as u64,
        block_hash: row.get("block_hash"),
        tx_index: row.get::<i64, _>("tx_index") as u64,
        tx_hash: row.get("tx_hash"),
        stable_index: row.get::<i64, _>("stable_index") as u64,
        block_timestamp: row.get("block_timestamp"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_ethscription(&self, record: Ethscription) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO ethscriptions
             (hash_id, sha, token_id, creator, owner, prev_owner, created_at, locked)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.hash_id.to_ascii_lowercase())
        .bind(&record.sha)
        .bind(record.token_id)
        .bind(&record.creator)
        .bind(&record.owner)
        .bind(&record.prev_owner)
        .bind(record.created_at)
        .bind(record.locked as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn ethscription_by_hash(
        &self,
        hash_id: &str,
    ) -> Result<Option<Ethscription>, IndexError> {
        let row = sqlx::query("SELECT * FROM ethscriptions WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_ethscription))
    }

    async fn ethscription_by_sha(&self, sha: &str) -> Result<Option<Ethscription>, IndexError> {
        let row = sqlx::query("SELECT * FROM ethscriptions WHERE sha = ?")
            .bind(sha)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_ethscription))
    }

    async fn update_owner(
        &self,
        hash_id: &str,
        expected_owner: &str,
        new_owner: &str,
    ) -> Result<bool, IndexError> {
        let result = sqlx::query(
            "UPDATE ethscriptions
             SET prev_owner = owner, owner = ?
             WHERE hash_id = ? AND lower(owner) = lower(?)",
        )
        .bind(new_owner.to_ascii_lowercase())
        .bind(hash_id.to_ascii_lowercase())
        .bind(expected_owner)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn lock_ethscription(&self, hash_id: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("UPDATE ethscriptions SET locked = 1 WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock_ethscription(&self, hash_id: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("UPDATE ethscriptions SET locked = 0 WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_events(&self, events: &[EventRecord]) -> Result<(), IndexError> {
        for event in events {
            sqlx::query(
                "INSERT OR IGNORE INTO events
                 (tx_id, kind, hash_id, from_addr, to_addr, value, block_number,
                  block_hash, tx_index, tx_hash, stable_index, block_timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.tx_id)
            .bind(event.kind.as_str())
            .bind(&event.hash_id)
            .bind(&event.from)
            .bind(&event.to)
            .bind(&event.value)
            .bind(event.block_number as i64)
            .bind(&event.block_hash)
            .bind(event.tx_index as i64)
            .bind(&event.tx_hash)
            .bind(event.stable_index as i64)
            .bind(event.block_timestamp)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn events_for_hash(&self, hash_id: &str) -> Result<Vec<EventRecord>, IndexError> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE hash_id = ?
             ORDER BY block_number, tx_index, stable_index",
        )
        .bind(hash_id.to_ascii_lowercase())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn event_count(&self) -> Result<u64, IndexError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn upsert_listing(&self, listing: Listing) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT OR REPLACE INTO listings
             (hash_id, seller, min_value, to_address, block_number, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(listing.hash_id.to_ascii_lowercase())
        .bind(&listing.seller)
        .bind(&listing.min_value)
        .bind(&listing.to_address)
        .bind(listing.block_number as i64)
        .bind(listing.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_listing(&self, hash_id: &str) -> Result<Option<Listing>, IndexError> {
        let row = sqlx::query("SELECT * FROM listings WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| Listing {
            hash_id: r.get("hash_id"),
            seller: r.get("seller"),
            min_value: r.get("min_value"),
            to_address: r.get("to_address"),
            block_number: r.get::<i64, _>("block_number") as u64,
            created_at: r.get("created_at"),
        }))
    }

    async fn remove_listing(&self, hash_id: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("DELETE FROM listings WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_bid(&self, bid: Bid) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT OR REPLACE INTO bids
             (hash_id, bidder, value, block_number, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bid.hash_id.to_ascii_lowercase())
        .bind(&bid.bidder)
        .bind(&bid.value)
        .bind(bid.block_number as i64)
        .bind(bid.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_bid(&self, hash_id: &str) -> Result<Option<Bid>, IndexError> {
        let row = sqlx::query("SELECT * FROM bids WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| Bid {
            hash_id: r.get("hash_id"),
            bidder: r.get("bidder"),
            value: r.get("value"),
            block_number: r.get::<i64, _>("block_number") as u64,
            created_at: r.get("created_at"),
        }))
    }

    async fn remove_bid(&self, hash_id: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("DELETE FROM bids WHERE hash_id = ?")
            .bind(hash_id.to_ascii_lowercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_auction(&self, auction: Auction) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT OR REPLACE INTO auctions
             (auction_id, hash_id, start_time, end_time, reserve_price,
              min_bid_increment_pct, time_buffer, highest_bid, highest_bidder,
              settled, block_number)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(auction.auction_id as i64)
        .bind(auction.hash_id.to_ascii_lowercase())
        .bind(auction.start_time as i64)
        .bind(auction.end_time as i64)
        .bind(&auction.reserve_price)
        .bind(auction.min_bid_increment_pct as i64)
        .bind(auction.time_buffer as i64)
        .bind(&auction.highest_bid)
        .bind(&auction.highest_bidder)
        .bind(auction.settled as i64)
        .bind(auction.block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_auction(&self, auction_id: u64) -> Result<Option<Auction>, IndexError> {
        let row = sqlx::query("SELECT * FROM auctions WHERE auction_id = ?")
            .bind(auction_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| Auction {
            auction_id: r.get::<i64, _>("auction_id") as u64,
            hash_id: r.get("hash_id"),
            start_time: r.get::<i64, _>("start_time") as u64,
            end_time: r.get::<i64, _>("end_time") as u64,
            reserve_price: r.get("reserve_price"),
            min_bid_increment_pct: r.get::<i64, _>("min_bid_increment_pct") as u64,
            time_buffer: r.get::<i64, _>("time_buffer") as u64,
            highest_bid: r.get("highest_bid"),
            highest_bidder: r.get("highest_bidder"),
            settled: r.get::<i64, _>("settled") != 0,
            block_number: r.get::<i64, _>("block_number") as u64,
        }))
    }

    async fn create_auction_bid(&self, entry: AuctionBidEntry) -> Result<(), IndexError> {
        sqlx::query(
            "UPDATE auctions SET highest_bid = ?, highest_bidder = ? WHERE auction_id = ?",
        )
        .bind(&entry.value)
        .bind(&entry.bidder)
        .bind(entry.auction_id as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO auction_bids (auction_id, bidder, value, block_number)
             VALUES (?, ?, ?, ?)",
        )
        .bind(entry.auction_id as i64)
        .bind(&entry.bidder)
        .bind(&entry.value)
        .bind(entry.block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn extend_auction(&self, auction_id: u64, end_time: u64) -> Result<(), IndexError> {
        sqlx::query("UPDATE auctions SET end_time = ? WHERE auction_id = ?")
            .bind(end_time as i64)
            .bind(auction_id as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn settle_auction(
        &self,
        auction_id: u64,
        winner: &str,
        amount: &str,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "UPDATE auctions SET settled = 1, highest_bidder = ?, highest_bid = ?
             WHERE auction_id = ?",
        )
        .bind(winner.to_ascii_lowercase())
        .bind(amount)
        .bind(auction_id as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_or_create_user(&self, address: &str, created_at: i64) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT OR IGNORE INTO users (address, created_at, points) VALUES (?, ?, 0)",
        )
        .bind(address.to_ascii_lowercase())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_user_points(&self, address: &str, points: u64) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO users (address, created_at, points) VALUES (?, 0, ?)
             ON CONFLICT(address) DO UPDATE SET points = excluded.points",
        )
        .bind(address.to_ascii_lowercase())
        .bind(points as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn user_points(&self, address: &str) -> Result<Option<u64>, IndexError> {
        let row = sqlx::query("SELECT points FROM users WHERE address = ?")
            .bind(address.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get::<i64, _>("points") as u64))
    }

    async fn seed_collection(&self, items: &[CollectionItem]) -> Result<(), IndexError> {
        for item in items {
            sqlx::query("INSERT OR REPLACE INTO collection (sha, token_id) VALUES (?, ?)")
                .bind(&item.sha)
                .bind(item.token_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn check_ethscription_sha(&self, sha: &str) -> Result<Option<i64>, IndexError> {
        let row = sqlx::query("SELECT token_id FROM collection WHERE sha = ?")
            .bind(sha)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("token_id")))
    }

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>, IndexError> {
        let row = sqlx::query("SELECT block_number FROM checkpoints WHERE chain_id = ?")
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get::<i64, _>("block_number") as u64))
    }

    async fn update_last_block(
        &self,
        chain_id: u64,
        number: u64,
        timestamp: i64,
    ) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (chain_id, block_number, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(chain_id as i64)
        .bind(number as i64)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        debug!(chain_id, block = number, "checkpoint saved");
        Ok(())
    }

    async fn rollback_to(&self, chain_id: u64, block_number: u64) -> Result<(), IndexError> {
        let n = block_number as i64;
        for sql in [
            "DELETE FROM events WHERE block_number > ?",
            "DELETE FROM listings WHERE block_number > ?",
            "DELETE FROM bids WHERE block_number > ?",
            "DELETE FROM auction_bids WHERE block_number > ?",
            "DELETE FROM auctions WHERE block_number > ?",
        ] {
            sqlx::query(sql).bind(n).execute(&self.pool).await.map_err(db_err)?;
        }

        // Ownership is a pure function of the event log: replay what's left.
        let rows = sqlx::query(
            "SELECT * FROM events ORDER BY block_number, tx_index, stable_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let events: Vec<EventRecord> = rows
            .iter()
            .map(row_to_event)
            .collect::<Result<_, _>>()?;
        let owners = replay_ownership(&events);

        let hash_rows = sqlx::query("SELECT hash_id FROM ethscriptions")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        for row in hash_rows {
            let hash_id: String = row.get("hash_id");
            match owners.get(&hash_id) {
                Some(state) if state.created => {
                    sqlx::query(
                        "UPDATE ethscriptions SET owner = ?, prev_owner = ? WHERE hash_id = ?",
                    )
                    .bind(&state.owner)
                    .bind(&state.prev_owner)
                    .bind(&hash_id)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err)?;
                }
                _ => {
                    sqlx::query("DELETE FROM ethscriptions WHERE hash_id = ?")
                        .bind(&hash_id)
                        .execute(&self.pool)
                        .await
                        .map_err(db_err)?;
                }
            }
        }

        sqlx::query(
            "UPDATE checkpoints SET block_number = ? WHERE chain_id = ? AND block_number > ?",
        )
        .bind(n)
        .bind(chain_id as i64)
        .bind(n)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(chain_id, block_number, "rolled back derived state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scription(hash: &str, sha: &str, owner: &str) -> Ethscription {
        Ethscription {
            hash_id: hash.into(),
            sha: sha.into(),
            token_id: 7,
            creator: "0xcreator".into(),
            owner: owner.into(),
            prev_owner: None,
            created_at: 1_700_000_000,
            locked: false,
        }
    }

    fn event(kind: EventKind, hash: &str, from: &str, to: &str, block: u64, stable: u64) -> EventRecord {
        let tx_hash = format!("0x{block:x}{stable:x}");
        EventRecord {
            tx_id: EventRecord::tx_id_for(&tx_hash, stable),
            kind,
            hash_id: hash.into(),
            from: from.into(),
            to: to.into(),
            value: "0".into(),
            block_number: block,
            block_hash: format!("0xb{block:x}"),
            tx_index: 0,
            tx_hash,
            stable_index: stable,
            block_timestamp: block as i64,
        }
    }

    #[tokio::test]
    async fn ethscription_roundtrip_and_sha_unique() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .add_ethscription(scription("0xH1", "sha1", "0xaaa"))
            .await
            .unwrap();

        let by_hash = store.ethscription_by_hash("0xh1").await.unwrap().unwrap();
        assert_eq!(by_hash.token_id, 7);
        let by_sha = store.ethscription_by_sha("sha1").await.unwrap().unwrap();
        assert_eq!(by_sha.hash_id, "0xh1");

        // Same sha again violates the unique constraint.
        assert!(store
            .add_ethscription(scription("0xh2", "sha1", "0xbbb"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn owner_cas() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .add_ethscription(scription("0xh1", "sha1", "0xAAA"))
            .await
            .unwrap();

        assert!(!store.update_owner("0xh1", "0xzzz", "0xbbb").await.unwrap());
        assert!(store.update_owner("0xh1", "0xaaa", "0xbbb").await.unwrap());

        let record = store.ethscription_by_hash("0xh1").await.unwrap().unwrap();
        assert_eq!(record.owner, "0xbbb");
        assert_eq!(record.prev_owner.as_deref(), Some("0xAAA"));
    }

    #[tokio::test]
    async fn events_idempotent_and_ordered() {
        let store = SqliteStore::in_memory().await.unwrap();
        let e1 = event(EventKind::Created, "0xh1", "0xc", "0xa", 100, 0);
        let e2 = event(EventKind::Transfer, "0xh1", "0xa", "0xb", 101, 3);

        store.add_events(&[e2.clone(), e1.clone()]).await.unwrap();
        store.add_events(&[e1.clone()]).await.unwrap(); // replayed
        assert_eq!(store.event_count().await.unwrap(), 2);

        let events = store.events_for_hash("0xh1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Created);
        assert_eq!(events[1].kind, EventKind::Transfer);
        assert_eq!(events[1].stable_index, 3);
    }

    #[tokio::test]
    async fn lock_unlock() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(!store.lock_ethscription("0xmissing").await.unwrap());

        store
            .add_ethscription(scription("0xh1", "sha1", "0xaaa"))
            .await
            .unwrap();
        assert!(store.lock_ethscription("0xh1").await.unwrap());
        assert!(store.ethscription_by_hash("0xh1").await.unwrap().unwrap().locked);
        assert!(store.unlock_ethscription("0xh1").await.unwrap());
        assert!(!store.ethscription_by_hash("0xh1").await.unwrap().unwrap().locked);
    }

    #[tokio::test]
    async fn auction_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_auction(Auction {
                auction_id: 9,
                hash_id: "0xh1".into(),
                start_time: 100,
                end_time: 200,
                reserve_price: "0".into(),
                min_bid_increment_pct: 0,
                time_buffer: 0,
                highest_bid: "0".into(),
                highest_bidder: None,
                settled: false,
                block_number: 50,
            })
            .await
            .unwrap();

        store
            .create_auction_bid(AuctionBidEntry {
                auction_id: 9,
                bidder: "0xbidder".into(),
                value: "5000".into(),
                block_number: 51,
            })
            .await
            .unwrap();
        store.extend_auction(9, 260).await.unwrap();
        store.settle_auction(9, "0xwinner", "5000").await.unwrap();

        let auction = store.get_auction(9).await.unwrap().unwrap();
        assert!(auction.settled);
        assert_eq!(auction.end_time, 260);
        assert_eq!(auction.highest_bidder.as_deref(), Some("0xwinner"));
    }

    #[tokio::test]
    async fn points_and_users() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.get_or_create_user("0xUser", 1000).await.unwrap();
        store.get_or_create_user("0xuser", 2000).await.unwrap(); // no-op
        assert_eq!(store.user_points("0xuser").await.unwrap(), Some(0));

        store.update_user_points("0xuser", 250).await.unwrap();
        assert_eq!(store.user_points("0xUSER").await.unwrap(), Some(250));
    }

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.last_block(1).await.unwrap(), None);
        store.update_last_block(1, 100, 0).await.unwrap();
        store.update_last_block(1, 101, 12).await.unwrap();
        assert_eq!(store.last_block(1).await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn rollback_restores_ownership_and_checkpoint() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .add_ethscription(scription("0xh1", "sha1", "0xaaa"))
            .await
            .unwrap();
        store
            .add_events(&[event(EventKind::Created, "0xh1", "0xc", "0xaaa", 100, 0)])
            .await
            .unwrap();

        assert!(store.update_owner("0xh1", "0xaaa", "0xbbb").await.unwrap());
        store
            .add_events(&[event(EventKind::Transfer, "0xh1", "0xaaa", "0xbbb", 101, 0)])
            .await
            .unwrap();
        store
            .upsert_listing(Listing {
                hash_id: "0xh1".into(),
                seller: "0xbbb".into(),
                min_value: "1".into(),
                to_address: None,
                block_number: 102,
                created_at: 0,
            })
            .await
            .unwrap();
        store.update_last_block(1, 102, 0).await.unwrap();

        store.rollback_to(1, 100).await.unwrap();

        let record = store.ethscription_by_hash("0xh1").await.unwrap().unwrap();
        assert_eq!(record.owner, "0xaaa");
        assert_eq!(record.prev_owner, None);
        assert!(store.get_listing("0xh1").await.unwrap().is_none());
        assert_eq!(store.event_count().await.unwrap(), 1);
        assert_eq!(store.last_block(1).await.unwrap(), Some(100));
    }
}
