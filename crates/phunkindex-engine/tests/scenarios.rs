//! End-to-end pipeline scenarios: mock chain client + in-memory store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::keccak256;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use phunkindex_core::collection::CollectionItem;
use phunkindex_core::config::IndexerConfig;
use phunkindex_core::types::{BlockSummary, Ethscription, EventKind, EventRecord, Listing};
use phunkindex_engine::{BlockProcessor, Coordinator};
use phunkindex_evm::client::{ChainClient, FullBlock, RawLog, RawReceipt, RawTransaction};
use phunkindex_evm::rpc::RpcError;
use phunkindex_store::{MemoryStore, Store};

const MARKET: &str = "0x1111111111111111111111111111111111111111";
const AUCTION: &str = "0x2222222222222222222222222222222222222222";
const POINTS: &str = "0x3333333333333333333333333333333333333333";
const BRIDGE: &str = "0x4444444444444444444444444444444444444444";

const AAA: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const BBB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const CCC: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

// ─── Mock chain client ───────────────────────────────────────────────────────

#[derive(Default)]
struct MockChain {
    blocks: Mutex<HashMap<u64, FullBlock>>,
    head: AtomicU64,
    valid: Mutex<HashSet<String>>,
    points: Mutex<HashMap<String, u64>>,
}

impl MockChain {
    fn insert_block(&self, block: FullBlock) {
        self.head.fetch_max(block.summary.number, Ordering::SeqCst);
        self.blocks
            .lock()
            .unwrap()
            .insert(block.summary.number, block);
    }

    /// Replace the canonical chain wholesale (reorg simulation).
    fn replace_chain(&self, blocks: Vec<FullBlock>) {
        let mut map = self.blocks.lock().unwrap();
        map.clear();
        let mut head = 0;
        for block in blocks {
            head = head.max(block.summary.number);
            map.insert(block.summary.number, block);
        }
        drop(map);
        self.head.store(head, Ordering::SeqCst);
    }

    fn mark_valid(&self, hash_id: &str) {
        self.valid.lock().unwrap().insert(hash_id.to_string());
    }

    fn set_points(&self, user: &str, points: u64) {
        self.points.lock().unwrap().insert(user.to_string(), points);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_hash(&self, number: u64) -> Result<Option<String>, RpcError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&number)
            .map(|b| b.summary.hash.clone()))
    }

    async fn block_with_receipts(&self, number: u64) -> Result<Option<FullBlock>, RpcError> {
        Ok(self.blocks.lock().unwrap().get(&number).cloned())
    }

    async fn call(&self, _to: &str, _data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        Ok(vec![0u8; 32])
    }

    async fn validate_ethscriptions(&self, hash_ids: &[String]) -> Result<Vec<String>, RpcError> {
        let valid = self.valid.lock().unwrap();
        Ok(hash_ids
            .iter()
            .filter(|h| valid.contains(h.as_str()))
            .cloned()
            .collect())
    }

    async fn points_balance(&self, _contract: &str, user: &str) -> Result<u64, RpcError> {
        Ok(*self.points.lock().unwrap().get(user).unwrap_or(&0))
    }
}

// ─── Builders ────────────────────────────────────────────────────────────────

fn config() -> IndexerConfig {
    IndexerConfig {
        chain_id: 1,
        origin_block: 100,
        rpc_url: "http://localhost:0".into(),
        provider_url: String::new(),
        market_address: MARKET.into(),
        auction_address: AUCTION.into(),
        points_address: POINTS.into(),
        bridge_address: BRIDGE.into(),
        escrow_address: String::new(),
        collection_path: String::new(),
        confirmations: 6,
        block_history: 30,
        retry_delay_ms: 10,
        max_attempts: 2,
        poll_interval_ms: 50,
        rpc_timeout_ms: 1_000,
    }
}

fn block_hash(number: u64) -> String {
    format!("0xb{number:x}")
}

fn block(number: u64, txs: Vec<(RawTransaction, RawReceipt)>) -> FullBlock {
    FullBlock {
        summary: BlockSummary {
            number,
            hash: block_hash(number),
            parent_hash: block_hash(number - 1),
            timestamp: number as i64 * 12,
        },
        txs,
    }
}

fn tx(hash: &str, from: &str, to: Option<&str>, input: String, index: u64) -> RawTransaction {
    RawTransaction {
        hash: hash.into(),
        from: from.into(),
        to: to.map(String::from),
        input,
        value: "0x0".into(),
        transaction_index: format!("0x{index:x}"),
    }
}

fn receipt(logs: Vec<RawLog>) -> RawReceipt {
    RawReceipt {
        status: Some("0x1".into()),
        logs,
    }
}

fn utf8_input(payload: &str) -> String {
    format!("0x{}", hex::encode(payload.as_bytes()))
}

fn tx_hash(tag: u8) -> String {
    format!("0x{}", hex::encode([tag; 32]))
}

fn sig_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

fn addr_topic(addr: &str) -> String {
    let raw = hex::decode(addr.strip_prefix("0x").unwrap()).unwrap();
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&raw);
    format!("0x{}", hex::encode(word))
}

fn u64_word(v: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&v.to_be_bytes());
    word
}

fn data_of(words: &[[u8; 32]]) -> String {
    let mut out = String::from("0x");
    for w in words {
        out.push_str(&hex::encode(w));
    }
    out
}

fn log(address: &str, index: u64, topics: Vec<String>, data: String) -> RawLog {
    RawLog {
        address: address.into(),
        topics,
        data,
        log_index: format!("0x{index:x}"),
        removed: None,
    }
}

async fn seed_scription(store: &MemoryStore, hash_id: &str, owner: &str, prev: Option<&str>) {
    store
        .add_ethscription(Ethscription {
            hash_id: hash_id.into(),
            sha: format!("sha-{hash_id}"),
            token_id: 1,
            creator: AAA.into(),
            owner: owner.into(),
            prev_owner: prev.map(String::from),
            created_at: 0,
            locked: false,
        })
        .await
        .unwrap();
}

fn processor(store: &Arc<MemoryStore>, chain: &Arc<MockChain>) -> BlockProcessor {
    BlockProcessor::new(store.clone(), chain.clone(), &config())
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn s1_creation_with_dictionary_sha() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());

    let payload = "data:image/svg+xml,<svg><rect/></svg>";
    let sha = hex::encode(Sha256::digest(payload.as_bytes()));
    store
        .seed_collection(&[CollectionItem {
            sha: sha.clone(),
            token_id: 42,
        }])
        .await
        .unwrap();

    let hash = tx_hash(0x11);
    let b = block(
        100,
        vec![(
            tx(&hash, AAA, Some(BBB), utf8_input(payload), 0),
            receipt(vec![]),
        )],
    );
    processor(&store, &chain).process_block(&b).await.unwrap();

    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, BBB);
    assert_eq!(row.prev_owner, None);
    assert_eq!(row.token_id, 42);
    assert_eq!(row.creator, AAA);

    let events = store.events_for_hash(&hash).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Created);
    assert_eq!(events[0].to, BBB);
}

#[tokio::test]
async fn creation_ignored_when_sha_unknown_or_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    // Unknown sha — dictionary miss is silent.
    let b = block(
        100,
        vec![(
            tx(
                &tx_hash(0x21),
                AAA,
                Some(BBB),
                utf8_input("data:image/svg+xml,<svg>unknown</svg>"),
                0,
            ),
            receipt(vec![]),
        )],
    );
    proc.process_block(&b).await.unwrap();
    assert_eq!(store.event_count().await.unwrap(), 0);

    // Known sha inscribed twice — first inscription wins.
    let payload = "data:image/svg+xml,<svg>dup</svg>";
    let sha = hex::encode(Sha256::digest(payload.as_bytes()));
    store
        .seed_collection(&[CollectionItem { sha, token_id: 7 }])
        .await
        .unwrap();

    let first = tx_hash(0x22);
    let second = tx_hash(0x23);
    let b = block(
        101,
        vec![
            (tx(&first, AAA, Some(BBB), utf8_input(payload), 0), receipt(vec![])),
            (tx(&second, CCC, Some(CCC), utf8_input(payload), 1), receipt(vec![])),
        ],
    );
    proc.process_block(&b).await.unwrap();

    assert!(store.ethscription_by_hash(&first).await.unwrap().is_some());
    assert!(store.ethscription_by_hash(&second).await.unwrap().is_none());
    assert_eq!(store.event_count().await.unwrap(), 1);
}

#[tokio::test]
async fn s2_s3_direct_transfer_guards() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0x31);
    seed_scription(&store, &hash, BBB, None).await;

    // S2: owner sends — accepted.
    let b = block(
        100,
        vec![(
            tx(&tx_hash(0x32), BBB, Some(CCC), hash.clone(), 0),
            receipt(vec![]),
        )],
    );
    proc.process_block(&b).await.unwrap();
    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, CCC);
    assert_eq!(row.prev_owner.as_deref(), Some(BBB));
    assert_eq!(store.events_for_hash(&hash).await.unwrap().len(), 1);

    // S3: non-owner sends — silently rejected, no event.
    let b = block(
        101,
        vec![(
            tx(&tx_hash(0x33), AAA, Some(BBB), hash.clone(), 0),
            receipt(vec![]),
        )],
    );
    proc.process_block(&b).await.unwrap();
    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, CCC);
    assert_eq!(store.events_for_hash(&hash).await.unwrap().len(), 1);
}

#[tokio::test]
async fn s4_batch_transfer_validates_and_keeps_positions() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let w1 = tx_hash(0x41);
    let w2 = tx_hash(0x42);
    let w3 = tx_hash(0x43);
    seed_scription(&store, &w1, BBB, None).await;
    seed_scription(&store, &w3, BBB, None).await;
    chain.mark_valid(&w1);
    chain.mark_valid(&w3);

    let input = format!("0x{}{}{}", &w1[2..], &w2[2..], &w3[2..]);
    let b = block(
        100,
        vec![(tx(&tx_hash(0x44), BBB, Some(CCC), input, 0), receipt(vec![]))],
    );
    proc.process_block(&b).await.unwrap();

    let e1 = store.events_for_hash(&w1).await.unwrap();
    let e3 = store.events_for_hash(&w3).await.unwrap();
    assert_eq!(e1.len(), 1);
    assert_eq!(e1[0].stable_index, 0);
    assert_eq!(e3.len(), 1);
    assert_eq!(e3[0].stable_index, 2);
    assert!(store.events_for_hash(&w2).await.unwrap().is_empty());

    assert_eq!(
        store.ethscription_by_hash(&w1).await.unwrap().unwrap().owner,
        CCC
    );
    assert_eq!(
        store.ethscription_by_hash(&w3).await.unwrap().unwrap().owner,
        CCC
    );
}

#[tokio::test]
async fn esip2_transfer_respects_prev_owner_hint() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0x51);
    // Market escrow owns it; AAA was the previous owner.
    seed_scription(&store, &hash, MARKET, Some(AAA)).await;

    let esip2 = "ethscriptions_protocol_TransferEthscriptionForPreviousOwner(address,address,bytes32)";

    // Hint disagrees — rejected.
    let bad = log(
        MARKET,
        0,
        vec![
            sig_topic(esip2),
            addr_topic(BBB), // claimed previous owner
            addr_topic(CCC),
            hash.clone(),
        ],
        "0x".into(),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0x52), BBB, Some(MARKET), "0xdead".into(), 0), receipt(vec![bad]))],
    );
    proc.process_block(&b).await.unwrap();
    assert_eq!(
        store.ethscription_by_hash(&hash).await.unwrap().unwrap().owner,
        MARKET
    );

    // Hint agrees — accepted; transferrer is the emitting contract.
    let good = log(
        MARKET,
        0,
        vec![
            sig_topic(esip2),
            addr_topic(AAA),
            addr_topic(CCC),
            hash.clone(),
        ],
        "0x".into(),
    );
    let b = block(
        101,
        vec![(tx(&tx_hash(0x53), AAA, Some(MARKET), "0xdead".into(), 0), receipt(vec![good]))],
    );
    proc.process_block(&b).await.unwrap();
    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, CCC);
    assert_eq!(row.prev_owner.as_deref(), Some(MARKET));
}

#[tokio::test]
async fn s5_stale_listing_is_deleted_without_event() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0x61);
    seed_scription(&store, &hash, MARKET, Some(AAA)).await;
    store
        .upsert_listing(Listing {
            hash_id: hash.clone(),
            seller: AAA.into(),
            min_value: "1".into(),
            to_address: None,
            block_number: 99,
            created_at: 0,
        })
        .await
        .unwrap();

    // BBB (not the previous owner) offers the phunk.
    let offered = log(
        MARKET,
        0,
        vec![
            sig_topic("PhunkOffered(bytes32,uint256,address)"),
            hash.clone(),
            addr_topic("0x0000000000000000000000000000000000000000"),
        ],
        data_of(&[u64_word(1_000_000_000_000_000_000)]),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0x62), BBB, Some(MARKET), "0xdead".into(), 0), receipt(vec![offered]))],
    );
    proc.process_block(&b).await.unwrap();

    assert!(store.get_listing(&hash).await.unwrap().is_none());
    assert!(store.events_for_hash(&hash).await.unwrap().is_empty());
}

#[tokio::test]
async fn legitimate_offer_then_bought() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0x71);
    seed_scription(&store, &hash, MARKET, Some(AAA)).await;

    let offered = log(
        MARKET,
        0,
        vec![
            sig_topic("PhunkOffered(bytes32,uint256,address)"),
            hash.clone(),
            addr_topic("0x0000000000000000000000000000000000000000"),
        ],
        data_of(&[u64_word(500)]),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0x72), AAA, Some(MARKET), "0xdead".into(), 0), receipt(vec![offered]))],
    );
    proc.process_block(&b).await.unwrap();

    let listing = store.get_listing(&hash).await.unwrap().unwrap();
    assert_eq!(listing.seller, AAA);
    assert_eq!(listing.min_value, "500");
    assert_eq!(listing.to_address, None);

    // Buy removes the listing and is surfaced exactly once.
    let bought = log(
        MARKET,
        1,
        vec![
            sig_topic("PhunkBought(bytes32,uint256,address,address)"),
            hash.clone(),
            addr_topic(AAA),
            addr_topic(CCC),
        ],
        data_of(&[u64_word(500)]),
    );
    let b = block(
        101,
        vec![(tx(&tx_hash(0x73), CCC, Some(MARKET), "0xdead".into(), 0), receipt(vec![bought.clone()]))],
    );
    proc.process_block(&b).await.unwrap();
    assert!(store.get_listing(&hash).await.unwrap().is_none());

    let kinds: Vec<EventKind> = store
        .events_for_hash(&hash)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::PhunkOffered, EventKind::PhunkBought]);

    // A second buy racing the first removes nothing and emits nothing.
    let b = block(
        102,
        vec![(tx(&tx_hash(0x74), CCC, Some(MARKET), "0xdead".into(), 0), receipt(vec![bought]))],
    );
    proc.process_block(&b).await.unwrap();
    assert_eq!(store.events_for_hash(&hash).await.unwrap().len(), 2);
}

#[tokio::test]
async fn bids_replace_never_stack() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0x81);
    seed_scription(&store, &hash, MARKET, Some(AAA)).await;

    let bid = |who: &str, value: u64, li: u64| {
        log(
            MARKET,
            li,
            vec![
                sig_topic("PhunkBidEntered(bytes32,uint256,address)"),
                hash.clone(),
                addr_topic(who),
            ],
            data_of(&[u64_word(value)]),
        )
    };
    let b = block(
        100,
        vec![(
            tx(&tx_hash(0x82), BBB, Some(MARKET), "0xdead".into(), 0),
            receipt(vec![bid(BBB, 100, 0), bid(CCC, 200, 1)]),
        )],
    );
    proc.process_block(&b).await.unwrap();

    let current = store.get_bid(&hash).await.unwrap().unwrap();
    assert_eq!(current.bidder, CCC);
    assert_eq!(current.value, "200");

    let withdrawn = log(
        MARKET,
        0,
        vec![
            sig_topic("PhunkBidWithdrawn(bytes32,uint256,address)"),
            hash.clone(),
            addr_topic(CCC),
        ],
        data_of(&[u64_word(200)]),
    );
    let b = block(
        101,
        vec![(tx(&tx_hash(0x83), CCC, Some(MARKET), "0xdead".into(), 0), receipt(vec![withdrawn]))],
    );
    proc.process_block(&b).await.unwrap();
    assert!(store.get_bid(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn auction_settle_moves_ownership() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0x91);
    seed_scription(&store, &hash, AUCTION, Some(AAA)).await;

    let created = log(
        AUCTION,
        0,
        vec![
            sig_topic("AuctionCreated(bytes32,uint256,uint256,uint256,address)"),
            hash.clone(),
            format!("0x{}", hex::encode(u64_word(5))),
        ],
        data_of(&[u64_word(1_000), u64_word(2_000), addr_word(AAA)]),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0x92), AAA, Some(AUCTION), "0xdead".into(), 0), receipt(vec![created]))],
    );
    proc.process_block(&b).await.unwrap();
    assert!(!store.get_auction(5).await.unwrap().unwrap().settled);

    let settled = log(
        AUCTION,
        0,
        vec![
            sig_topic("AuctionSettled(bytes32,uint256,address,uint256)"),
            hash.clone(),
            format!("0x{}", hex::encode(u64_word(5))),
        ],
        data_of(&[addr_word(CCC), u64_word(9_000)]),
    );
    let b = block(
        101,
        vec![(tx(&tx_hash(0x93), CCC, Some(AUCTION), "0xdead".into(), 0), receipt(vec![settled]))],
    );
    proc.process_block(&b).await.unwrap();

    let auction = store.get_auction(5).await.unwrap().unwrap();
    assert!(auction.settled);
    assert_eq!(auction.highest_bidder.as_deref(), Some(CCC));

    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, CCC);
    assert_eq!(row.prev_owner.as_deref(), Some(AUCTION));
}

#[tokio::test]
async fn points_added_syncs_from_view_call() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    chain.set_points(BBB, 77);
    let proc = processor(&store, &chain);

    let added = log(
        POINTS,
        0,
        vec![sig_topic("PointsAdded(address,uint256)"), addr_topic(BBB)],
        data_of(&[u64_word(10)]),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0xa1), BBB, Some(POINTS), "0xdead".into(), 0), receipt(vec![added]))],
    );
    proc.process_block(&b).await.unwrap();

    // Stored total is the on-chain view value, not the log amount.
    assert_eq!(store.user_points(BBB).await.unwrap(), Some(77));
}

#[tokio::test]
async fn bridge_lock_unknown_hash_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let locked = log(
        BRIDGE,
        0,
        vec![
            sig_topic("HashLocked(address,bytes32,uint256,uint256)"),
            addr_topic(AAA),
            tx_hash(0xb1),
        ],
        data_of(&[u64_word(1), u64_word(0)]),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0xb2), AAA, Some(BRIDGE), "0xdead".into(), 0), receipt(vec![locked]))],
    );
    let err = proc.process_block(&b).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn bridge_lock_and_unlock_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0xb3);
    seed_scription(&store, &hash, AAA, None).await;

    let locked = log(
        BRIDGE,
        0,
        vec![
            sig_topic("HashLocked(address,bytes32,uint256,uint256)"),
            addr_topic(AAA),
            hash.clone(),
        ],
        data_of(&[u64_word(1), u64_word(0)]),
    );
    let b = block(
        100,
        vec![(tx(&tx_hash(0xb4), AAA, Some(BRIDGE), "0xdead".into(), 0), receipt(vec![locked]))],
    );
    proc.process_block(&b).await.unwrap();
    assert!(store.ethscription_by_hash(&hash).await.unwrap().unwrap().locked);

    let unlocked = log(
        BRIDGE,
        0,
        vec![
            sig_topic("HashUnlocked(address,bytes32)"),
            addr_topic(AAA),
            hash.clone(),
        ],
        "0x".into(),
    );
    let b = block(
        101,
        vec![(tx(&tx_hash(0xb5), AAA, Some(BRIDGE), "0xdead".into(), 0), receipt(vec![unlocked]))],
    );
    proc.process_block(&b).await.unwrap();
    assert!(!store.ethscription_by_hash(&hash).await.unwrap().unwrap().locked);
}

#[tokio::test]
async fn replaying_a_block_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let proc = processor(&store, &chain);

    let hash = tx_hash(0xc1);
    seed_scription(&store, &hash, BBB, None).await;
    let b = block(
        100,
        vec![(
            tx(&tx_hash(0xc2), BBB, Some(CCC), hash.clone(), 0),
            receipt(vec![]),
        )],
    );
    proc.process_block(&b).await.unwrap();
    proc.process_block(&b).await.unwrap();

    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, CCC);
    assert_eq!(row.prev_owner.as_deref(), Some(BBB));
    assert_eq!(store.events_for_hash(&hash).await.unwrap().len(), 1);
}

fn addr_word(addr: &str) -> [u8; 32] {
    let raw = hex::decode(addr.strip_prefix("0x").unwrap()).unwrap();
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&raw);
    word
}

// ─── S6: reorg recovery through the coordinator ──────────────────────────────

#[tokio::test]
async fn s6_reorg_walk_back_restores_end_of_fork_state() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());

    // A phunk created at block 90 (event log carries the creation so the
    // replay can restore it).
    let hash = tx_hash(0xd1);
    seed_scription(&store, &hash, AAA, None).await;
    store
        .add_events(&[EventRecord {
            tx_id: EventRecord::tx_id_for(&tx_hash(0xd0), 0),
            kind: EventKind::Created,
            hash_id: hash.clone(),
            from: AAA.into(),
            to: AAA.into(),
            value: "0".into(),
            block_number: 90,
            block_hash: block_hash(90),
            tx_index: 0,
            tx_hash: tx_hash(0xd0),
            stable_index: 0,
            block_timestamp: 90 * 12,
        }])
        .await
        .unwrap();

    // Canonical chain: 100 (empty), 101 (transfers the phunk), 102 (empty).
    let b100 = block(100, vec![]);
    let b101 = block(
        101,
        vec![(
            tx(&tx_hash(0xd2), AAA, Some(BBB), hash.clone(), 0),
            receipt(vec![]),
        )],
    );
    let b102 = block(102, vec![]);
    chain.insert_block(b100.clone());
    chain.insert_block(b101);
    chain.insert_block(b102);

    let mut coordinator = Coordinator::new(
        config(),
        chain.clone(),
        store.clone(),
        CancellationToken::new(),
    );
    for number in 100..=102 {
        coordinator.handle_block(number).await.unwrap();
    }
    assert_eq!(
        store.ethscription_by_hash(&hash).await.unwrap().unwrap().owner,
        BBB
    );
    assert_eq!(store.last_block(1).await.unwrap(), Some(102));

    // The chain reorganizes: 101 is replaced by 101' (different hash, same
    // parent 100) and 102 disappears.
    let b101_prime = FullBlock {
        summary: BlockSummary {
            number: 101,
            hash: "0xb65prime".into(),
            parent_hash: block_hash(100),
            timestamp: 101 * 12,
        },
        txs: vec![],
    };
    chain.replace_chain(vec![b100, b101_prime]);

    // The head subscription re-announces 101; the duplicate check spots
    // the hash mismatch and walks back to 100.
    coordinator.handle_block(101).await.unwrap();

    let row = store.ethscription_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(row.owner, AAA, "ownership restored to end-of-100 state");
    assert_eq!(row.prev_owner, None);
    assert_eq!(store.last_block(1).await.unwrap(), Some(100));
    // Only the creation event survives.
    assert_eq!(store.events_for_hash(&hash).await.unwrap().len(), 1);

    // 101' then processes cleanly on the new chain.
    coordinator.handle_block(101).await.unwrap();
    assert_eq!(store.last_block(1).await.unwrap(), Some(101));
}

#[tokio::test]
async fn block_not_found_retries_then_exhausts() {
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(MockChain::default());
    let mut coordinator = Coordinator::new(
        config(), // max_attempts = 2, retry_delay_ms = 10
        chain,
        store,
        CancellationToken::new(),
    );

    let err = coordinator.handle_block(500).await.unwrap_err();
    assert!(matches!(err, phunkindex_core::IndexError::RetriesExhausted { attempts: 2, .. }));
}
