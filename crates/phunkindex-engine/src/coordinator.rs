//! The coordinator — backfill-then-tail loop.
//!
//! Startup: clear and pause the queue, resume from the last checkpoint,
//! enqueue the gap up to head, resume, then follow new heads. Exactly one
//! worker consumes the queue, so blocks apply strictly in order. A failing
//! block is retried in place with a fixed delay until the attempt cap; a
//! parent-hash discontinuity triggers the reorg walk-back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use phunkindex_core::collection::load_collection;
use phunkindex_core::config::IndexerConfig;
use phunkindex_core::error::IndexError;
use phunkindex_core::queue::{BlockQueue, QueueItem};
use phunkindex_core::tracker::BlockWindow;
use phunkindex_evm::client::ChainClient;
use phunkindex_store::Store;

use crate::process::BlockProcessor;

enum Wake {
    Shutdown,
    Head(u64),
    Block(QueueItem),
}

pub struct Coordinator {
    config: IndexerConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    processor: BlockProcessor,
    queue: Arc<BlockQueue>,
    window: BlockWindow,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        config: IndexerConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor: BlockProcessor::new(store.clone(), client.clone(), &config),
            window: BlockWindow::new(config.block_history, config.confirmations),
            queue: Arc::new(BlockQueue::new()),
            config,
            client,
            store,
            cancel,
        }
    }

    /// Run until cancelled or a fatal error surfaces.
    pub async fn run(&mut self) -> Result<(), IndexError> {
        if !self.config.collection_path.is_empty() {
            let items = load_collection(&self.config.collection_path)?;
            self.store.seed_collection(&items).await?;
            info!(entries = items.len(), "collection dictionary seeded");
        }

        self.queue.clear();
        self.queue.pause();

        let start = match self.store.last_block(self.config.chain_id).await? {
            Some(last) => last + 1,
            None => self.config.origin_block,
        };
        let head = self
            .client
            .block_number()
            .await
            .map_err(|e| IndexError::Rpc(e.to_string()))?;
        let now = Utc::now().timestamp();
        for number in start..=head {
            self.queue.enqueue(number, now);
        }
        self.queue.resume();
        info!(start, head, backlog = self.queue.len(), "backfill enqueued");

        let mut heads = spawn_head_watcher(
            self.client.clone(),
            Duration::from_millis(self.config.poll_interval_ms),
            self.cancel.clone(),
        );

        loop {
            let queue = Arc::clone(&self.queue);
            let cancel = self.cancel.clone();
            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Shutdown,
                head = heads.recv() => match head {
                    Some(number) => Wake::Head(number),
                    None => Wake::Shutdown,
                },
                item = queue.pop() => Wake::Block(item),
            };

            match wake {
                Wake::Shutdown => {
                    self.queue.pause();
                    info!("coordinator shut down cleanly");
                    return Ok(());
                }
                Wake::Head(number) => {
                    self.queue.enqueue(number, Utc::now().timestamp());
                }
                Wake::Block(item) => {
                    if let Err(e) = self.handle_block(item.number).await {
                        error!(block = item.number, error = %e, "fatal indexing error");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Process one dequeued block with in-place retry and reorg recovery.
    pub async fn handle_block(&mut self, number: u64) -> Result<(), IndexError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.step(number).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_reorg() => {
                    warn!(block = number, error = %e, "reorg detected");
                    self.recover_reorg().await?;
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        return Err(IndexError::RetriesExhausted {
                            block_number: number,
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                    warn!(
                        block = number,
                        attempt,
                        error = %e,
                        "block attempt failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn step(&mut self, number: u64) -> Result<(), IndexError> {
        if let Some(last) = self.store.last_block(self.config.chain_id).await? {
            if number <= last {
                // Duplicate enqueue of a processed block. Still verify the
                // hash: a same-height replacement is how a shortening
                // reorg announces itself.
                if let Some(known) = self.window.get(number).map(|b| b.hash.clone()) {
                    let chain_hash = self
                        .client
                        .block_hash(number)
                        .await
                        .map_err(|e| IndexError::Rpc(e.to_string()))?;
                    if chain_hash.as_deref() != Some(known.as_str()) {
                        return Err(IndexError::ReorgDetected {
                            block_number: number,
                            expected: known,
                            actual: chain_hash.unwrap_or_default(),
                        });
                    }
                }
                debug!(block = number, "already processed; skipping");
                return Ok(());
            }
        }
        self.process_once(number).await
    }

    async fn process_once(&mut self, number: u64) -> Result<(), IndexError> {
        let block = self
            .client
            .block_with_receipts(number)
            .await
            .map_err(|e| IndexError::Rpc(e.to_string()))?
            .ok_or(IndexError::BlockNotFound(number))?;
        if block.summary.number != number {
            return Err(IndexError::Rpc(format!(
                "asked for block {number}, got {}",
                block.summary.number
            )));
        }

        // Parent-hash check before any mutation.
        if let Some(tip) = self.window.head() {
            if block.summary.parent_hash != tip.hash {
                return Err(IndexError::ReorgDetected {
                    block_number: number,
                    expected: tip.hash.clone(),
                    actual: block.summary.parent_hash.clone(),
                });
            }
        }

        self.processor.process_block(&block).await?;
        self.window.push(&block.summary)?;
        self.store
            .update_last_block(self.config.chain_id, number, block.summary.timestamp)
            .await?;
        debug!(block = number, txs = block.txs.len(), "block processed");
        Ok(())
    }

    /// Walk the window back to the last block whose hash the chain still
    /// agrees on, roll the store back to it, and re-enqueue from there.
    async fn recover_reorg(&mut self) -> Result<(), IndexError> {
        let mut fork: Option<u64> = None;
        for entry in self.window.walk_back() {
            let chain_hash = self
                .client
                .block_hash(entry.number)
                .await
                .map_err(|e| IndexError::Rpc(e.to_string()))?;
            if chain_hash.as_deref() == Some(entry.hash.as_str()) {
                fork = Some(entry.number);
                break;
            }
            if entry.confirmed {
                return Err(IndexError::ReorgPastConfirmed {
                    block_number: entry.number,
                });
            }
        }
        let fork = fork.ok_or(IndexError::ReorgPastConfirmed {
            block_number: self.window.head().map(|b| b.number).unwrap_or_default(),
        })?;

        self.store.rollback_to(self.config.chain_id, fork).await?;
        self.window.rewind_to(fork)?;

        let head = self
            .client
            .block_number()
            .await
            .map_err(|e| IndexError::Rpc(e.to_string()))?;
        let now = Utc::now().timestamp();
        for number in (fork + 1)..=head {
            self.queue.enqueue(number, now);
        }
        info!(fork, head, "reorg recovery complete; re-enqueued");
        Ok(())
    }
}

/// Spawn the head watcher: polls the chain head and pushes every new
/// block number over the returned channel. Poll failures are logged and
/// the watcher keeps going — the FIFO queue serializes whatever arrives.
pub fn spawn_head_watcher(
    client: Arc<dyn ChainClient>,
    interval: Duration,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<u64> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut last_seen = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match client.block_number().await {
                Ok(head) if head > last_seen => {
                    let from = if last_seen == 0 { head } else { last_seen + 1 };
                    for number in from..=head {
                        if tx.send(number).is_err() {
                            return;
                        }
                    }
                    last_seen = head;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "head poll failed; will retry"),
            }
        }
    });
    rx
}
