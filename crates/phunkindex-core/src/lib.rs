//! phunkindex-core — foundation for the reorg-safe ethscription indexer.
//!
//! # Architecture
//!
//! ```text
//! Coordinator → BlockQueue      (durable FIFO, one worker per chain)
//!             → BlockWindow     (parent-hash chain, confirmation depth)
//!             → BlockProcessor  (classifier → decoders → state machine → writers)
//!             → Store backend   (memory / SQLite)
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod queue;
pub mod tracker;
pub mod types;

pub use collection::{load_collection, CollectionItem};
pub use config::IndexerConfig;
pub use error::IndexError;
pub use queue::{BlockQueue, QueueItem};
pub use tracker::{BlockWindow, ProcessedBlock};
pub use types::{
    Auction, AuctionBidEntry, Bid, BlockSummary, Ethscription, EventKind, EventRecord, Listing,
};
