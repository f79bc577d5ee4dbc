//! Typed log decoders for the recognized event vocabularies.
//!
//! Topic0 values are computed from canonical signatures with keccak-256 at
//! construction. Every decoder produces a variant of the closed
//! [`ChainEvent`] enum; malformed logs (wrong topic count, short data)
//! decode to `None` and never abort a block.

use alloy_primitives::{keccak256, Address, B256, U256};
use std::collections::HashMap;

use crate::client::RawLog;

// ESIP transfer events (any emitting contract).
const ESIP1_SIG: &str = "ethscriptions_protocol_TransferEthscription(address,bytes32)";
const ESIP2_SIG: &str =
    "ethscriptions_protocol_TransferEthscriptionForPreviousOwner(address,address,bytes32)";

// Marketplace contract.
const PHUNK_OFFERED_SIG: &str = "PhunkOffered(bytes32,uint256,address)";
const PHUNK_BOUGHT_SIG: &str = "PhunkBought(bytes32,uint256,address,address)";
const PHUNK_NO_LONGER_FOR_SALE_SIG: &str = "PhunkNoLongerForSale(bytes32)";
const PHUNK_BID_ENTERED_SIG: &str = "PhunkBidEntered(bytes32,uint256,address)";
const PHUNK_BID_WITHDRAWN_SIG: &str = "PhunkBidWithdrawn(bytes32,uint256,address)";

// Auction contract.
const AUCTION_CREATED_SIG: &str = "AuctionCreated(bytes32,uint256,uint256,uint256,address)";
const AUCTION_BID_SIG: &str = "AuctionBid(bytes32,uint256,address,uint256,bool)";
const AUCTION_EXTENDED_SIG: &str = "AuctionExtended(bytes32,uint256,uint256)";
const AUCTION_SETTLED_SIG: &str = "AuctionSettled(bytes32,uint256,address,uint256)";

// Points contract.
const POINTS_ADDED_SIG: &str = "PointsAdded(address,uint256)";

// Bridge contract.
const HASH_LOCKED_SIG: &str = "HashLocked(address,bytes32,uint256,uint256)";
const HASH_UNLOCKED_SIG: &str = "HashUnlocked(address,bytes32)";

/// A decoded contract event, strongly typed before any downstream code
/// runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Esip1Transfer {
        recipient: Address,
        hash_id: B256,
    },
    Esip2Transfer {
        previous_owner: Address,
        recipient: Address,
        hash_id: B256,
    },
    PhunkOffered {
        hash_id: B256,
        to_address: Address,
        min_value: U256,
    },
    PhunkBought {
        hash_id: B256,
        from_address: Address,
        to_address: Address,
        value: U256,
    },
    PhunkNoLongerForSale {
        hash_id: B256,
    },
    PhunkBidEntered {
        hash_id: B256,
        from_address: Address,
        value: U256,
    },
    PhunkBidWithdrawn {
        hash_id: B256,
        from_address: Address,
        value: U256,
    },
    AuctionCreated {
        hash_id: B256,
        auction_id: u64,
        start_time: u64,
        end_time: u64,
        owner: Address,
    },
    AuctionBid {
        hash_id: B256,
        auction_id: u64,
        sender: Address,
        value: U256,
        extended: bool,
    },
    AuctionExtended {
        hash_id: B256,
        auction_id: u64,
        end_time: u64,
    },
    AuctionSettled {
        hash_id: B256,
        auction_id: u64,
        winner: Address,
        amount: U256,
    },
    PointsAdded {
        user: Address,
        amount: U256,
    },
    HashLocked {
        prev_owner: Address,
        hash_id: B256,
        nonce: U256,
        value: U256,
    },
    HashUnlocked {
        prev_owner: Address,
        hash_id: B256,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventSig {
    Esip1,
    Esip2,
    PhunkOffered,
    PhunkBought,
    PhunkNoLongerForSale,
    PhunkBidEntered,
    PhunkBidWithdrawn,
    AuctionCreated,
    AuctionBid,
    AuctionExtended,
    AuctionSettled,
    PointsAdded,
    HashLocked,
    HashUnlocked,
}

/// Decodes receipt logs into [`ChainEvent`]s.
///
/// ESIP transfers match on topic0 alone; contract vocabularies additionally
/// require the configured emitting address.
pub struct LogDecoder {
    topics: HashMap<B256, EventSig>,
    market_address: String,
    auction_address: String,
    points_address: String,
    bridge_address: String,
}

impl LogDecoder {
    pub fn new(
        market_address: &str,
        auction_address: &str,
        points_address: &str,
        bridge_address: &str,
    ) -> Self {
        let mut topics = HashMap::new();
        for (sig, kind) in [
            (ESIP1_SIG, EventSig::Esip1),
            (ESIP2_SIG, EventSig::Esip2),
            (PHUNK_OFFERED_SIG, EventSig::PhunkOffered),
            (PHUNK_BOUGHT_SIG, EventSig::PhunkBought),
            (PHUNK_NO_LONGER_FOR_SALE_SIG, EventSig::PhunkNoLongerForSale),
            (PHUNK_BID_ENTERED_SIG, EventSig::PhunkBidEntered),
            (PHUNK_BID_WITHDRAWN_SIG, EventSig::PhunkBidWithdrawn),
            (AUCTION_CREATED_SIG, EventSig::AuctionCreated),
            (AUCTION_BID_SIG, EventSig::AuctionBid),
            (AUCTION_EXTENDED_SIG, EventSig::AuctionExtended),
            (AUCTION_SETTLED_SIG, EventSig::AuctionSettled),
            (POINTS_ADDED_SIG, EventSig::PointsAdded),
            (HASH_LOCKED_SIG, EventSig::HashLocked),
            (HASH_UNLOCKED_SIG, EventSig::HashUnlocked),
        ] {
            topics.insert(keccak256(sig.as_bytes()), kind);
        }
        Self {
            topics,
            market_address: market_address.to_ascii_lowercase(),
            auction_address: auction_address.to_ascii_lowercase(),
            points_address: points_address.to_ascii_lowercase(),
            bridge_address: bridge_address.to_ascii_lowercase(),
        }
    }

    /// Decode a raw log. Returns `None` for unknown, misplaced or
    /// malformed events.
    pub fn decode(&self, log: &RawLog) -> Option<ChainEvent> {
        let topic0 = parse_topic(log, 0)?;
        let sig = *self.topics.get(&topic0)?;

        let decoded = match sig {
            // ESIP transfers are recognized from any emitting contract.
            EventSig::Esip1 => Some(ChainEvent::Esip1Transfer {
                recipient: topic_address(log, 1)?,
                hash_id: parse_topic(log, 2)?,
            }),
            EventSig::Esip2 => Some(ChainEvent::Esip2Transfer {
                previous_owner: topic_address(log, 1)?,
                recipient: topic_address(log, 2)?,
                hash_id: parse_topic(log, 3)?,
            }),
            EventSig::PhunkOffered if self.from(log, &self.market_address) => {
                Some(ChainEvent::PhunkOffered {
                    hash_id: parse_topic(log, 1)?,
                    to_address: topic_address(log, 2)?,
                    min_value: data_word_u256(log, 0)?,
                })
            }
            EventSig::PhunkBought if self.from(log, &self.market_address) => {
                Some(ChainEvent::PhunkBought {
                    hash_id: parse_topic(log, 1)?,
                    from_address: topic_address(log, 2)?,
                    to_address: topic_address(log, 3)?,
                    value: data_word_u256(log, 0)?,
                })
            }
            EventSig::PhunkNoLongerForSale if self.from(log, &self.market_address) => {
                Some(ChainEvent::PhunkNoLongerForSale {
                    hash_id: parse_topic(log, 1)?,
                })
            }
            EventSig::PhunkBidEntered if self.from(log, &self.market_address) => {
                Some(ChainEvent::PhunkBidEntered {
                    hash_id: parse_topic(log, 1)?,
                    from_address: topic_address(log, 2)?,
                    value: data_word_u256(log, 0)?,
                })
            }
            EventSig::PhunkBidWithdrawn if self.from(log, &self.market_address) => {
                Some(ChainEvent::PhunkBidWithdrawn {
                    hash_id: parse_topic(log, 1)?,
                    from_address: topic_address(log, 2)?,
                    value: data_word_u256(log, 0)?,
                })
            }
            EventSig::AuctionCreated if self.from(log, &self.auction_address) => {
                Some(ChainEvent::AuctionCreated {
                    hash_id: parse_topic(log, 1)?,
                    auction_id: topic_u64(log, 2)?,
                    start_time: data_word_u64(log, 0)?,
                    end_time: data_word_u64(log, 1)?,
                    owner: data_word_address(log, 2)?,
                })
            }
            EventSig::AuctionBid if self.from(log, &self.auction_address) => {
                Some(ChainEvent::AuctionBid {
                    hash_id: parse_topic(log, 1)?,
                    auction_id: topic_u64(log, 2)?,
                    sender: data_word_address(log, 0)?,
                    value: data_word_u256(log, 1)?,
                    extended: data_word_u256(log, 2)? != U256::ZERO,
                })
            }
            EventSig::AuctionExtended if self.from(log, &self.auction_address) => {
                Some(ChainEvent::AuctionExtended {
                    hash_id: parse_topic(log, 1)?,
                    auction_id: topic_u64(log, 2)?,
                    end_time: data_word_u64(log, 0)?,
                })
            }
            EventSig::AuctionSettled if self.from(log, &self.auction_address) => {
                Some(ChainEvent::AuctionSettled {
                    hash_id: parse_topic(log, 1)?,
                    auction_id: topic_u64(log, 2)?,
                    winner: data_word_address(log, 0)?,
                    amount: data_word_u256(log, 1)?,
                })
            }
            EventSig::PointsAdded if self.from(log, &self.points_address) => {
                Some(ChainEvent::PointsAdded {
                    user: topic_address(log, 1)?,
                    amount: data_word_u256(log, 0)?,
                })
            }
            EventSig::HashLocked if self.from(log, &self.bridge_address) => {
                Some(ChainEvent::HashLocked {
                    prev_owner: topic_address(log, 1)?,
                    hash_id: parse_topic(log, 2)?,
                    nonce: data_word_u256(log, 0)?,
                    value: data_word_u256(log, 1)?,
                })
            }
            EventSig::HashUnlocked if self.from(log, &self.bridge_address) => {
                Some(ChainEvent::HashUnlocked {
                    prev_owner: topic_address(log, 1)?,
                    hash_id: parse_topic(log, 2)?,
                })
            }
            // Known topic0 from the wrong contract address.
            _ => None,
        };

        if decoded.is_none() {
            tracing::debug!(
                address = %log.address,
                topics = log.topics.len(),
                "skipping unrecognized or malformed log"
            );
        }
        decoded
    }

    fn from(&self, log: &RawLog, address: &str) -> bool {
        log.address.eq_ignore_ascii_case(address)
    }
}

// ─── Topic / data helpers ────────────────────────────────────────────────────

fn parse_topic(log: &RawLog, index: usize) -> Option<B256> {
    let topic = log.topics.get(index)?;
    let raw = hex::decode(topic.strip_prefix("0x").unwrap_or(topic)).ok()?;
    (raw.len() == 32).then(|| B256::from_slice(&raw))
}

/// Indexed value types occupy a full 32-byte word; an address is its last
/// 20 bytes.
fn topic_address(log: &RawLog, index: usize) -> Option<Address> {
    parse_topic(log, index).map(|word| Address::from_slice(&word[12..]))
}

fn topic_u64(log: &RawLog, index: usize) -> Option<u64> {
    let word = parse_topic(log, index)?;
    u64::try_from(U256::from_be_slice(word.as_slice())).ok()
}

fn data_word(log: &RawLog, index: usize) -> Option<[u8; 32]> {
    let raw = hex::decode(log.data.strip_prefix("0x").unwrap_or(&log.data)).ok()?;
    let start = index * 32;
    raw.get(start..start + 32)
        .and_then(|slice| <[u8; 32]>::try_from(slice).ok())
}

fn data_word_u256(log: &RawLog, index: usize) -> Option<U256> {
    data_word(log, index).map(|w| U256::from_be_slice(&w))
}

fn data_word_u64(log: &RawLog, index: usize) -> Option<u64> {
    data_word_u256(log, index).and_then(|v| u64::try_from(v).ok())
}

fn data_word_address(log: &RawLog, index: usize) -> Option<Address> {
    data_word(log, index).map(|w| Address::from_slice(&w[12..]))
}

/// Lowercase `0x…` form of an address.
pub fn addr_hex(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr.as_slice()))
}

/// Lowercase `0x…` form of a 32-byte hash.
pub fn b256_hex(hash: &B256) -> String {
    format!("0x{}", hex::encode(hash.as_slice()))
}
