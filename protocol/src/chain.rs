//! # Block Clock
//!
//! The vault anchors every queued withdrawal to the block it was queued in
//! and measures the withdrawal delay in blocks, so it needs a view of the
//! current height. [`BlockSource`] is that view; [`DevChain`] is the local
//! development chain used by tests and by the node's auto-miner, modelled on
//! a hardhat node where `evm_mine` advances the height by one.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::BlockNumber;

/// Read access to the host chain's current block height.
pub trait BlockSource: Send + Sync {
    /// The height at which the next state change will be recorded.
    fn current_block(&self) -> BlockNumber;
}

/// An in-process chain whose height only moves when asked to.
#[derive(Debug, Default)]
pub struct DevChain {
    height: AtomicU64,
}

impl DevChain {
    /// Starts a chain at `height`.
    pub fn at(height: BlockNumber) -> Self {
        Self {
            height: AtomicU64::new(height),
        }
    }

    /// Mines a single block and returns the new height.
    pub fn mine(&self) -> BlockNumber {
        self.height.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mines `n` blocks, the equivalent of `n` consecutive `evm_mine` calls.
    pub fn mine_blocks(&self, n: u64) -> BlockNumber {
        self.height.fetch_add(n, Ordering::SeqCst) + n
    }
}

impl BlockSource for DevChain {
    fn current_block(&self) -> BlockNumber {
        self.height.load(Ordering::SeqCst)
    }
}
