//! Per-block transaction processing.
//!
//! For each successful transaction: classify the calldata (creation,
//! direct transfer, ESIP-5 batch), then walk the receipt logs in
//! `log_index` order through the typed decoders. Ownership moves only
//! through [`BlockProcessor::apply_transfer`]; every accepted mutation
//! appends an idempotent row to the event log.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use phunkindex_core::config::IndexerConfig;
use phunkindex_core::error::IndexError;
use phunkindex_core::types::{
    same_addr, Auction, AuctionBidEntry, Bid, Ethscription, EventKind, EventRecord, Listing,
    ZERO_ADDRESS,
};
use phunkindex_evm::calldata::{classify_calldata, CalldataAction};
use phunkindex_evm::client::{hex_to_dec, ChainClient, FullBlock, RawLog, RawTransaction};
use phunkindex_evm::events::{addr_hex, b256_hex, ChainEvent, LogDecoder};
use phunkindex_store::Store;

/// Applies one block's transactions to the derived state.
pub struct BlockProcessor {
    store: Arc<dyn Store>,
    client: Arc<dyn ChainClient>,
    decoder: LogDecoder,
    points_address: String,
    escrow_address: String,
}

impl BlockProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn ChainClient>,
        config: &IndexerConfig,
    ) -> Self {
        Self {
            decoder: LogDecoder::new(
                &config.market_address,
                &config.auction_address,
                &config.points_address,
                &config.bridge_address,
            ),
            points_address: config.points_address.clone(),
            escrow_address: config.escrow().to_ascii_lowercase(),
            store,
            client,
        }
    }

    /// Process every transaction of `block` in transaction-index order,
    /// logs in log-index order within each transaction.
    pub async fn process_block(&self, block: &FullBlock) -> Result<(), IndexError> {
        let mut points_users: BTreeSet<String> = BTreeSet::new();

        for (tx, receipt) in &block.txs {
            if !receipt.is_success() || tx.input.len() <= 2 {
                continue;
            }

            match classify_calldata(&tx.input) {
                CalldataAction::Creation { sha, .. } => {
                    self.handle_creation(block, tx, &sha).await?;
                }
                CalldataAction::Transfer(hash_id) => {
                    if let Some(to) = &tx.to {
                        self.apply_transfer(
                            block,
                            tx,
                            &hash_id,
                            &tx.from.to_ascii_lowercase(),
                            &to.to_ascii_lowercase(),
                            hex_to_dec(&tx.value),
                            None,
                            tx.index_u64(),
                        )
                        .await?;
                    }
                }
                CalldataAction::Batch(words) => {
                    self.handle_batch(block, tx, &words).await?;
                }
                // A foreign `data:` payload drops the transaction outright,
                // logs included.
                CalldataAction::IgnoreTx => continue,
                CalldataAction::Skip => {}
            }

            for log in &receipt.logs {
                if log.is_removed() {
                    continue;
                }
                if let Some(event) = self.decoder.decode(log) {
                    self.handle_log_event(block, tx, log, event, &mut points_users)
                        .await?;
                }
            }
        }

        self.sync_points(block, &points_users).await;
        Ok(())
    }

    // ── Creation ───────────────────────────────────────────────────────

    async fn handle_creation(
        &self,
        block: &FullBlock,
        tx: &RawTransaction,
        sha: &str,
    ) -> Result<(), IndexError> {
        let Some(token_id) = self.store.check_ethscription_sha(sha).await? else {
            debug!(sha, "sha not in collection; ignoring");
            return Ok(());
        };
        if self.store.ethscription_by_sha(sha).await?.is_some() {
            // First inscription wins.
            debug!(sha, "sha already inscribed; ignoring");
            return Ok(());
        }

        let hash_id = tx.hash.to_ascii_lowercase();
        let creator = tx.from.to_ascii_lowercase();
        let owner = tx
            .to
            .as_deref()
            .unwrap_or(ZERO_ADDRESS)
            .to_ascii_lowercase();

        self.store
            .add_ethscription(Ethscription {
                hash_id: hash_id.clone(),
                sha: sha.to_string(),
                token_id,
                creator: creator.clone(),
                owner: owner.clone(),
                prev_owner: None,
                created_at: block.summary.timestamp,
                locked: false,
            })
            .await?;
        self.store
            .get_or_create_user(&owner, block.summary.timestamp)
            .await?;

        info!(%hash_id, token_id, %owner, "ethscription created");
        self.emit(
            block,
            tx,
            EventKind::Created,
            &hash_id,
            &creator,
            &owner,
            hex_to_dec(&tx.value),
            tx.index_u64(),
        )
        .await
    }

    // ── Transfers ──────────────────────────────────────────────────────

    async fn handle_batch(
        &self,
        block: &FullBlock,
        tx: &RawTransaction,
        words: &[String],
    ) -> Result<(), IndexError> {
        let valid = self
            .client
            .validate_ethscriptions(words)
            .await
            .map_err(|e| IndexError::Rpc(e.to_string()))?;
        let valid: BTreeSet<String> = valid.into_iter().map(|h| h.to_ascii_lowercase()).collect();

        let Some(to) = &tx.to else { return Ok(()) };
        for (position, word) in words.iter().enumerate() {
            if !valid.contains(&word.to_ascii_lowercase()) {
                continue;
            }
            self.apply_transfer(
                block,
                tx,
                word,
                &tx.from.to_ascii_lowercase(),
                &to.to_ascii_lowercase(),
                hex_to_dec(&tx.value),
                None,
                position as u64,
            )
            .await?;
        }
        Ok(())
    }

    /// The ownership state machine. All three guards must hold or the
    /// transfer is rejected silently — that is the normal way invalid
    /// transfers die.
    #[allow(clippy::too_many_arguments)]
    async fn apply_transfer(
        &self,
        block: &FullBlock,
        tx: &RawTransaction,
        hash_id: &str,
        from: &str,
        to: &str,
        value: String,
        prev_owner_hint: Option<String>,
        stable_index: u64,
    ) -> Result<bool, IndexError> {
        // Existence.
        let Some(record) = self.store.ethscription_by_hash(hash_id).await? else {
            debug!(hash_id, "transfer of unknown ethscription; skipping");
            return Ok(false);
        };
        // Transferrer must be the current owner.
        if !same_addr(&record.owner, from) {
            debug!(hash_id, from, owner = %record.owner, "transfer by non-owner; skipping");
            return Ok(false);
        }
        // Previous-owner agreement, when both sides are known.
        if let (Some(hint), Some(prev)) = (&prev_owner_hint, &record.prev_owner) {
            if !same_addr(hint, prev) {
                debug!(hash_id, %hint, prev = %prev, "prev-owner mismatch; skipping");
                return Ok(false);
            }
        }

        if !self.store.update_owner(hash_id, from, to).await? {
            return Ok(false);
        }
        self.store
            .get_or_create_user(to, block.summary.timestamp)
            .await?;
        self.emit(
            block,
            tx,
            EventKind::Transfer,
            hash_id,
            from,
            to,
            value,
            stable_index,
        )
        .await?;
        Ok(true)
    }

    // ── Log-driven events ──────────────────────────────────────────────

    async fn handle_log_event(
        &self,
        block: &FullBlock,
        tx: &RawTransaction,
        log: &RawLog,
        event: ChainEvent,
        points_users: &mut BTreeSet<String>,
    ) -> Result<(), IndexError> {
        let log_index = log.log_index_u64();
        match event {
            ChainEvent::Esip1Transfer { recipient, hash_id } => {
                // The emitting contract is the transferrer.
                self.apply_transfer(
                    block,
                    tx,
                    &b256_hex(&hash_id),
                    &log.address.to_ascii_lowercase(),
                    &addr_hex(&recipient),
                    hex_to_dec(&tx.value),
                    None,
                    log_index,
                )
                .await?;
            }
            ChainEvent::Esip2Transfer {
                previous_owner,
                recipient,
                hash_id,
            } => {
                self.apply_transfer(
                    block,
                    tx,
                    &b256_hex(&hash_id),
                    &log.address.to_ascii_lowercase(),
                    &addr_hex(&recipient),
                    hex_to_dec(&tx.value),
                    Some(addr_hex(&previous_owner)),
                    log_index,
                )
                .await?;
            }

            ChainEvent::PhunkOffered {
                hash_id,
                to_address,
                min_value,
            } => {
                let hash_id = b256_hex(&hash_id);
                let Some(record) = self.store.ethscription_by_hash(&hash_id).await? else {
                    debug!(%hash_id, "offer for unknown ethscription; skipping");
                    return Ok(());
                };
                let seller = tx.from.to_ascii_lowercase();
                // A listing only exists while the escrow holds the phunk.
                if !same_addr(&record.owner, &self.escrow_address) {
                    self.store.remove_listing(&hash_id).await?;
                    debug!(%hash_id, owner = %record.owner, "offer outside escrow; listing removed");
                    return Ok(());
                }
                // Stale-listing rule: an offer not placed by the legitimate
                // previous owner invalidates whatever listing exists.
                if let Some(prev) = &record.prev_owner {
                    if !same_addr(prev, &seller) {
                        self.store.remove_listing(&hash_id).await?;
                        debug!(%hash_id, %seller, prev_owner = %prev, "stale listing removed");
                        return Ok(());
                    }
                }
                let to_addr = addr_hex(&to_address);
                self.store
                    .upsert_listing(Listing {
                        hash_id: hash_id.clone(),
                        seller: seller.clone(),
                        min_value: min_value.to_string(),
                        to_address: (to_addr != ZERO_ADDRESS).then(|| to_addr.clone()),
                        block_number: block.summary.number,
                        created_at: block.summary.timestamp,
                    })
                    .await?;
                self.emit(
                    block,
                    tx,
                    EventKind::PhunkOffered,
                    &hash_id,
                    &seller,
                    &to_addr,
                    min_value.to_string(),
                    log_index,
                )
                .await?;
            }
            ChainEvent::PhunkBought {
                hash_id,
                from_address,
                to_address,
                value,
            } => {
                let hash_id = b256_hex(&hash_id);
                // A buy racing a cancellation removes nothing and is not
                // surfaced.
                if self.store.remove_listing(&hash_id).await? {
                    let buyer = addr_hex(&to_address);
                    self.store
                        .get_or_create_user(&buyer, block.summary.timestamp)
                        .await?;
                    self.emit(
                        block,
                        tx,
                        EventKind::PhunkBought,
                        &hash_id,
                        &addr_hex(&from_address),
                        &buyer,
                        value.to_string(),
                        log_index,
                    )
                    .await?;
                }
            }
            ChainEvent::PhunkNoLongerForSale { hash_id } => {
                let hash_id = b256_hex(&hash_id);
                let record = self.store.ethscription_by_hash(&hash_id).await?;
                let removed = self.store.remove_listing(&hash_id).await?;
                let by_prev_owner = record
                    .and_then(|r| r.prev_owner)
                    .map(|prev| same_addr(&prev, &tx.from))
                    .unwrap_or(false);
                if removed && by_prev_owner {
                    self.emit(
                        block,
                        tx,
                        EventKind::PhunkNoLongerForSale,
                        &hash_id,
                        &tx.from.to_ascii_lowercase(),
                        ZERO_ADDRESS,
                        "0".into(),
                        log_index,
                    )
                    .await?;
                }
            }
            ChainEvent::PhunkBidEntered {
                hash_id,
                from_address,
                value,
            } => {
                let hash_id = b256_hex(&hash_id);
                let bidder = addr_hex(&from_address);
                self.store
                    .upsert_bid(Bid {
                        hash_id: hash_id.clone(),
                        bidder: bidder.clone(),
                        value: value.to_string(),
                        block_number: block.summary.number,
                        created_at: block.summary.timestamp,
                    })
                    .await?;
                self.store
                    .get_or_create_user(&bidder, block.summary.timestamp)
                    .await?;
                self.emit(
                    block,
                    tx,
                    EventKind::PhunkBidEntered,
                    &hash_id,
                    &bidder,
                    ZERO_ADDRESS,
                    value.to_string(),
                    log_index,
                )
                .await?;
            }
            ChainEvent::PhunkBidWithdrawn {
                hash_id,
                from_address,
                value,
            } => {
                let hash_id = b256_hex(&hash_id);
                self.store.remove_bid(&hash_id).await?;
                self.emit(
                    block,
                    tx,
                    EventKind::PhunkBidWithdrawn,
                    &hash_id,
                    &addr_hex(&from_address),
                    ZERO_ADDRESS,
                    value.to_string(),
                    log_index,
                )
                .await?;
            }

            ChainEvent::AuctionCreated {
                hash_id,
                auction_id,
                start_time,
                end_time,
                owner,
            } => {
                let hash_id = b256_hex(&hash_id);
                self.store
                    .create_auction(Auction {
                        auction_id,
                        hash_id: hash_id.clone(),
                        start_time,
                        end_time,
                        reserve_price: "0".into(),
                        min_bid_increment_pct: 0,
                        time_buffer: 0,
                        highest_bid: "0".into(),
                        highest_bidder: None,
                        settled: false,
                        block_number: block.summary.number,
                    })
                    .await?;
                self.emit(
                    block,
                    tx,
                    EventKind::AuctionCreated,
                    &hash_id,
                    &addr_hex(&owner),
                    ZERO_ADDRESS,
                    "0".into(),
                    log_index,
                )
                .await?;
            }
            ChainEvent::AuctionBid {
                hash_id,
                auction_id,
                sender,
                value,
                extended: _,
            } => {
                let hash_id = b256_hex(&hash_id);
                let bidder = addr_hex(&sender);
                self.store
                    .create_auction_bid(AuctionBidEntry {
                        auction_id,
                        bidder: bidder.clone(),
                        value: value.to_string(),
                        block_number: block.summary.number,
                    })
                    .await?;
                self.store
                    .get_or_create_user(&bidder, block.summary.timestamp)
                    .await?;
                self.emit(
                    block,
                    tx,
                    EventKind::AuctionBid,
                    &hash_id,
                    &bidder,
                    ZERO_ADDRESS,
                    value.to_string(),
                    log_index,
                )
                .await?;
            }
            ChainEvent::AuctionExtended {
                hash_id,
                auction_id,
                end_time,
            } => {
                let hash_id = b256_hex(&hash_id);
                self.store.extend_auction(auction_id, end_time).await?;
                self.emit(
                    block,
                    tx,
                    EventKind::AuctionExtended,
                    &hash_id,
                    ZERO_ADDRESS,
                    ZERO_ADDRESS,
                    "0".into(),
                    log_index,
                )
                .await?;
            }
            ChainEvent::AuctionSettled {
                hash_id,
                auction_id,
                winner,
                amount,
            } => {
                let hash_id = b256_hex(&hash_id);
                let winner = addr_hex(&winner);
                self.store
                    .settle_auction(auction_id, &winner, &amount.to_string())
                    .await?;
                // Move ownership to the winner under the usual guards. The
                // settle row itself records the movement, so no separate
                // transfer event is written for the same log.
                let mut seller = ZERO_ADDRESS.to_string();
                if let Some(record) = self.store.ethscription_by_hash(&hash_id).await? {
                    seller = record.owner.clone();
                    if !same_addr(&record.owner, &winner) {
                        if self.store.update_owner(&hash_id, &record.owner, &winner).await? {
                            self.store
                                .get_or_create_user(&winner, block.summary.timestamp)
                                .await?;
                        }
                    }
                }
                self.emit(
                    block,
                    tx,
                    EventKind::AuctionSettled,
                    &hash_id,
                    &seller,
                    &winner,
                    amount.to_string(),
                    log_index,
                )
                .await?;
            }

            ChainEvent::PointsAdded { user, amount: _ } => {
                let user = addr_hex(&user);
                self.store
                    .get_or_create_user(&user, block.summary.timestamp)
                    .await?;
                points_users.insert(user);
            }

            ChainEvent::HashLocked {
                prev_owner,
                hash_id,
                nonce,
                value: _,
            } => {
                let hash_id = b256_hex(&hash_id);
                if !self.store.lock_ethscription(&hash_id).await? {
                    // The contract says it locked something we don't have.
                    return Err(IndexError::BridgeLockFailed { hash_id });
                }
                info!(
                    %hash_id,
                    prev_owner = %addr_hex(&prev_owner),
                    nonce = %nonce,
                    "ethscription locked for bridge-out"
                );
            }
            ChainEvent::HashUnlocked {
                prev_owner: _,
                hash_id,
            } => {
                self.store.unlock_ethscription(&b256_hex(&hash_id)).await?;
            }
        }
        Ok(())
    }

    // ── Points ─────────────────────────────────────────────────────────

    /// Best-effort per-block refresh of on-chain point totals. Failures
    /// are logged and swallowed; any later points event re-syncs the
    /// same address.
    async fn sync_points(&self, block: &FullBlock, users: &BTreeSet<String>) {
        for user in users {
            match self.client.points_balance(&self.points_address, user).await {
                Ok(points) => {
                    if let Err(e) = self.store.update_user_points(user, points).await {
                        warn!(%user, error = %e, "failed to store user points");
                    }
                }
                Err(e) => {
                    warn!(
                        %user,
                        block = block.summary.number,
                        error = %e,
                        "points view call failed"
                    );
                }
            }
        }
    }

    // ── Event log ──────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        block: &FullBlock,
        tx: &RawTransaction,
        kind: EventKind,
        hash_id: &str,
        from: &str,
        to: &str,
        value: String,
        stable_index: u64,
    ) -> Result<(), IndexError> {
        let tx_hash = tx.hash.to_ascii_lowercase();
        self.store
            .add_events(&[EventRecord {
                tx_id: EventRecord::tx_id_for(&tx_hash, stable_index),
                kind,
                hash_id: hash_id.to_ascii_lowercase(),
                from: from.to_ascii_lowercase(),
                to: to.to_ascii_lowercase(),
                value,
                block_number: block.summary.number,
                block_hash: block.summary.hash.clone(),
                tx_index: tx.index_u64(),
                tx_hash,
                stable_index,
                block_timestamp: block.summary.timestamp,
            }])
            .await
    }
}
