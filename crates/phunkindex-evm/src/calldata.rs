//! Calldata classification — creations, direct transfers, batch transfers.
//!
//! The decision runs on the raw input of a successful transaction:
//! a UTF-8 `data:` URI payload is a creation candidate, a single 32-byte
//! word is a direct transfer, a multiple of 32 bytes is an ESIP-5 batch.

use sha2::{Digest, Sha256};

/// Length of one calldata word in hex characters.
const WORD_HEX_LEN: usize = 64;

const SVG_PREFIX: &str = "data:image/svg+xml,";
const PNG_PREFIX: &str = "data:image/png;base64,";

/// What a transaction's calldata asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalldataAction {
    /// A recognized `data:` payload; `sha` is the SHA-256 of the
    /// null-stripped payload, lowercase hex.
    Creation { payload: String, sha: String },
    /// Exactly one 32-byte word — an ethscription hash id.
    Transfer(String),
    /// ESIP-5 batch: hash ids in calldata order.
    Batch(Vec<String>),
    /// A `data:` payload of some other MIME shape — the whole
    /// transaction, logs included, is ignored.
    IgnoreTx,
    /// Nothing to do for this calldata.
    Skip,
}

/// Classify a transaction's input (`0x…`).
pub fn classify_calldata(input: &str) -> CalldataAction {
    let hex_body = input.strip_prefix("0x").unwrap_or(input);
    if hex_body.is_empty() {
        return CalldataAction::Skip;
    }
    let Ok(bytes) = hex::decode(hex_body) else {
        return CalldataAction::Skip;
    };

    let cleaned = strip_nulls(&String::from_utf8_lossy(&bytes));
    if cleaned.starts_with(SVG_PREFIX) || cleaned.starts_with(PNG_PREFIX) {
        let sha = hex::encode(Sha256::digest(cleaned.as_bytes()));
        return CalldataAction::Creation {
            payload: cleaned,
            sha,
        };
    }
    if cleaned.starts_with("data:") {
        return CalldataAction::IgnoreTx;
    }

    if hex_body.len() == WORD_HEX_LEN {
        return CalldataAction::Transfer(word_at(hex_body, 0));
    }
    if hex_body.len() % WORD_HEX_LEN == 0 {
        let words = (0..hex_body.len() / WORD_HEX_LEN)
            .map(|i| word_at(hex_body, i))
            .collect();
        return CalldataAction::Batch(words);
    }

    CalldataAction::Skip
}

fn strip_nulls(s: &str) -> String {
    s.chars().filter(|&c| c != '\0').collect()
}

fn word_at(hex_body: &str, index: usize) -> String {
    let start = index * WORD_HEX_LEN;
    format!("0x{}", hex_body[start..start + WORD_HEX_LEN].to_ascii_lowercase())
}
