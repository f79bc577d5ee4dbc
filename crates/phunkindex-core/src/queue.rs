//! Block work queue — FIFO of block numbers for a single chain.
//!
//! Enqueue is idempotent on the block number. Exactly one worker consumes
//! the queue, preserving block order. Durability comes from the checkpoint:
//! on startup the coordinator clears the queue and rebuilds it from
//! `last_block`.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

/// A queued unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueItem {
    pub number: u64,
    /// Unix timestamp of when the block number was discovered.
    pub discovered_at: i64,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    queued: HashSet<u64>,
    paused: bool,
}

/// FIFO queue of block numbers with pause/resume and idempotent enqueue.
#[derive(Default)]
pub struct BlockQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block number; a number already queued is a no-op.
    pub fn enqueue(&self, number: u64, discovered_at: i64) {
        let mut state = self.state.lock().unwrap();
        if state.queued.insert(number) {
            state.items.push_back(QueueItem {
                number,
                discovered_at,
            });
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out items until `resume`.
    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().unwrap().paused = false;
        self.notify.notify_one();
    }

    /// Drop all queued items.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.items.clear();
        state.queued.clear();
    }

    /// Wait for the next item; parks while the queue is empty or paused.
    pub async fn pop(&self) -> QueueItem {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    fn try_pop(&self) -> Option<QueueItem> {
        let mut state = self.state.lock().unwrap();
        if state.paused {
            return None;
        }
        let item = state.items.pop_front()?;
        state.queued.remove(&item.number);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }
}
