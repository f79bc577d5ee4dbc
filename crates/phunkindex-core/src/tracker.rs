//! Processed-block window — a bounded sequence of recent block headers
//! for parent-hash verification, reorg walk-back and confirmation.

use std::collections::VecDeque;

use crate::error::IndexError;
use crate::types::BlockSummary;

/// A processed block header held in the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBlock {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    /// Confirmed entries are no longer eligible for reorg rollback.
    pub confirmed: bool,
}

/// Sliding window of the last N processed headers.
///
/// `push` asserts that each new block extends the current tip; a mismatch
/// is a reorg. An entry becomes confirmed once it is `confirmation_depth`
/// blocks behind the newest entry.
pub struct BlockWindow {
    window: VecDeque<ProcessedBlock>,
    capacity: usize,
    confirmation_depth: u64,
}

impl BlockWindow {
    pub fn new(capacity: usize, confirmation_depth: u64) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            confirmation_depth,
        }
    }

    /// Append a newly processed block.
    ///
    /// Fails with `ReorgDetected` on a parent-hash discontinuity, without
    /// mutating the window.
    pub fn push(&mut self, block: &BlockSummary) -> Result<(), IndexError> {
        if let Some(tip) = self.window.back() {
            if block.number != tip.number + 1 || block.parent_hash != tip.hash {
                return Err(IndexError::ReorgDetected {
                    block_number: block.number,
                    expected: tip.hash.clone(),
                    actual: block.parent_hash.clone(),
                });
            }
        }

        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(ProcessedBlock {
            number: block.number,
            hash: block.hash.clone(),
            parent_hash: block.parent_hash.clone(),
            timestamp: block.timestamp,
            confirmed: false,
        });

        // Promote everything at confirmation depth behind the new tip.
        let tip_number = block.number;
        let depth = self.confirmation_depth;
        for entry in self.window.iter_mut() {
            if !entry.confirmed && tip_number.saturating_sub(entry.number) >= depth {
                entry.confirmed = true;
            }
        }
        Ok(())
    }

    /// The most recently processed block.
    pub fn head(&self) -> Option<&ProcessedBlock> {
        self.window.back()
    }

    /// The entry for `number`, if it is still in the window.
    pub fn get(&self, number: u64) -> Option<&ProcessedBlock> {
        self.window.iter().find(|b| b.number == number)
    }

    /// Entries newest-first, for reorg walk-back.
    pub fn walk_back(&self) -> impl Iterator<Item = &ProcessedBlock> {
        self.window.iter().rev()
    }

    /// Returns `true` if `number` is in the window and confirmed.
    pub fn is_confirmed(&self, number: u64) -> bool {
        self.window
            .iter()
            .any(|b| b.number == number && b.confirmed)
    }

    /// Discard everything after `number`.
    ///
    /// Fails with `ReorgPastConfirmed` if a confirmed entry would have to
    /// be discarded; the window is left untouched in that case.
    pub fn rewind_to(&mut self, number: u64) -> Result<(), IndexError> {
        if let Some(conf) = self
            .window
            .iter()
            .filter(|b| b.confirmed && b.number > number)
            .map(|b| b.number)
            .next()
        {
            return Err(IndexError::ReorgPastConfirmed { block_number: conf });
        }
        while matches!(self.window.back(), Some(back) if back.number > number) {
            self.window.pop_back();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> BlockSummary {
        BlockSummary {
            number,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: (number * 12) as i64,
        }
    }

    fn chain(window: &mut BlockWindow, from: u64, to: u64) {
        for i in from..=to {
            let parent = if i == from {
                "0x0".to_string()
            } else {
                format!("0x{}", i - 1)
            };
            window.push(&block(i, &format!("0x{i}"), &parent)).unwrap();
        }
    }

    #[test]
    fn push_normal_chain() {
        let mut window = BlockWindow::new(30, 6);
        chain(&mut window, 100, 102);
        assert_eq!(window.head().unwrap().number, 102);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn push_detects_reorg() {
        let mut window = BlockWindow::new(30, 6);
        chain(&mut window, 100, 101);
        let result = window.push(&block(102, "0xc2", "0xnot-101"));
        assert!(matches!(result, Err(IndexError::ReorgDetected { .. })));
        // Window untouched on failure
        assert_eq!(window.head().unwrap().number, 101);
    }

    #[test]
    fn capacity_enforced() {
        let mut window = BlockWindow::new(5, 6);
        chain(&mut window, 0, 9);
        assert_eq!(window.len(), 5);
        assert_eq!(window.head().unwrap().number, 9);
    }

    #[test]
    fn confirmation_at_depth() {
        let mut window = BlockWindow::new(30, 6);
        chain(&mut window, 100, 106);
        // 106 - 100 = 6 ≥ depth → 100 confirmed, 101 not yet
        assert!(window.is_confirmed(100));
        assert!(!window.is_confirmed(101));
        chain_extend(&mut window, 107);
        assert!(window.is_confirmed(101));
    }

    fn chain_extend(window: &mut BlockWindow, number: u64) {
        let parent = format!("0x{}", number - 1);
        window
            .push(&block(number, &format!("0x{number}"), &parent))
            .unwrap();
    }

    #[test]
    fn rewind_to_drops_unconfirmed() {
        let mut window = BlockWindow::new(30, 6);
        chain(&mut window, 100, 104);
        window.rewind_to(101).unwrap();
        assert_eq!(window.head().unwrap().number, 101);
    }

    #[test]
    fn rewind_past_confirmed_fails() {
        let mut window = BlockWindow::new(30, 6);
        chain(&mut window, 100, 110);
        // 100..=104 are confirmed (depth 6 behind 110)
        let err = window.rewind_to(102).unwrap_err();
        assert!(matches!(err, IndexError::ReorgPastConfirmed { .. }));
        // Window untouched
        assert_eq!(window.head().unwrap().number, 110);
    }
}
