//! Append-only store of fixed-size byte blocks
//!
//! The store exists only to keep allocated blocks live; blocks are never
//! read back or indexed. It can be emptied in full, which also asks the
//! allocator to hand freed pages back to the operating system.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::usage;

/// Size of one stored block
pub const BLOCK_BYTES: usize = 1 << 20;

/// Process-wide ownership set of fixed-size byte blocks
pub struct MemoryStore {
    blocks: Mutex<Vec<Box<[u8]>>>,
    // Mirrors of the locked state, readable without taking the lock.
    held_bytes: AtomicU64,
    held_blocks: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            held_bytes: AtomicU64::new(0),
            held_blocks: AtomicUsize::new(0),
        }
    }

    /// Append one block, keeping it live until the next `release_all`
    pub async fn append(&self, block: Box<[u8]>) {
        let mut blocks = self.blocks.lock().await;
        self.held_bytes.fetch_add(block.len() as u64, Ordering::Relaxed);
        self.held_blocks.fetch_add(1, Ordering::Relaxed);
        blocks.push(block);
    }

    /// Drop every held block and request that freed pages go back to the
    /// OS immediately. Returns the number of blocks released.
    pub async fn release_all(&self) -> usize {
        let mut blocks = self.blocks.lock().await;
        let released = blocks.len();
        *blocks = Vec::new();
        self.held_bytes.store(0, Ordering::Relaxed);
        self.held_blocks.store(0, Ordering::Relaxed);
        drop(blocks);

        // Dropping the blocks only marks them free inside the allocator;
        // the purge hands the pages back to the OS.
        if let Err(e) = usage::release_os_pages() {
            warn!("failed to return freed pages to the OS: {}", e);
        }

        info!(released_blocks = released, "memory store released");
        released
    }

    /// Total bytes currently held
    pub fn held_bytes(&self) -> u64 {
        self.held_bytes.load(Ordering::Relaxed)
    }

    /// Number of blocks currently held
    pub fn block_count(&self) -> usize {
        self.held_blocks.load(Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) async fn block(&self, index: usize) -> Option<Box<[u8]>> {
        self.blocks.lock().await.get(index).cloned()
    }
}
