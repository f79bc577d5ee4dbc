//! The pre-seeded sha → token-id dictionary.
//!
//! A creation is only recognized if the SHA-256 of its payload appears in
//! this dictionary. The dictionary is loaded once at startup and seeded
//! into the store; an unloadable dictionary is fatal.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// One dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionItem {
    /// SHA-256 of the normalized payload, lowercase hex without `0x`.
    pub sha: String,
    pub token_id: i64,
}

/// Load the dictionary from a JSON array of `{sha, token_id}` objects.
pub fn load_collection(path: impl AsRef<Path>) -> Result<Vec<CollectionItem>, IndexError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| IndexError::Collection(format!("{}: {e}", path.display())))?;
    let items: Vec<CollectionItem> =
        serde_json::from_str(&raw).map_err(|e| IndexError::Collection(format!("parse: {e}")))?;
    if items.is_empty() {
        return Err(IndexError::Collection("dictionary is empty".into()));
    }
    Ok(items)
}
