//! Bounded batch allocation against the configured ceiling

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::{AllocConfig, PacingMode};
use crate::metrics;
use crate::store::{BLOCK_BYTES, MemoryStore};
use crate::usage::UsageProbe;

/// Appends batches of random-filled blocks to the store, skipping the
/// whole batch once reported usage reaches the ceiling.
pub struct Allocator {
    store: Arc<MemoryStore>,
    usage: Arc<dyn UsageProbe>,
    batch_size: u32,
    ceiling_mib: u64,
    pacing: PacingMode,
    // Holding the source for the whole batch also serializes the ceiling
    // check against concurrent batches.
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Allocator {
    /// Allocator drawing block contents from OS entropy
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, usage: Arc<dyn UsageProbe>, config: &AllocConfig) -> Self {
        Self::with_rng(store, usage, config, Box::new(OsRng))
    }

    /// Allocator with a caller-supplied random source
    #[must_use]
    pub fn with_rng(
        store: Arc<MemoryStore>,
        usage: Arc<dyn UsageProbe>,
        config: &AllocConfig,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            store,
            usage,
            batch_size: config.batch_size,
            ceiling_mib: config.ceiling_mib,
            pacing: config.pacing,
            rng: Mutex::new(rng),
        }
    }

    /// Allocate one batch of blocks unless reported usage has reached the
    /// ceiling. The ceiling is evaluated once per call, not per block, so
    /// a single batch may overshoot it by up to `batch_size` MiB.
    ///
    /// Failures never reach the caller: a failing random source aborts the
    /// remainder of the batch and blocks already appended stay live.
    pub async fn run(&self) {
        let mut rng = self.rng.lock().await;

        let snapshot = match self.usage.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("cannot read memory statistics, skipping batch: {}", e);
                return;
            }
        };
        if snapshot.allocated_mib() >= self.ceiling_mib {
            info!(
                allocated_mib = snapshot.allocated_mib(),
                ceiling_mib = self.ceiling_mib,
                "allocation ceiling reached, skipping batch"
            );
            return;
        }

        for done in 0..self.batch_size {
            // Random contents keep every block unique, so nothing below the
            // allocator can deduplicate or zero-page the growth away.
            let mut block = vec![0u8; BLOCK_BYTES].into_boxed_slice();
            if let Err(e) = rng.try_fill_bytes(&mut block) {
                metrics::record_random_failure();
                error!(
                    "random source failed after {} of {} blocks, aborting batch: {}",
                    done, self.batch_size, e
                );
                break;
            }
            self.store.append(block).await;
            metrics::record_block_allocated();

            if self.pacing == PacingMode::Paced {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UsageSnapshot;
    use anyhow::Result;

    struct EmptyUsage;

    impl UsageProbe for EmptyUsage {
        fn snapshot(&self) -> Result<UsageSnapshot> {
            Ok(UsageSnapshot {
                allocated_bytes: 0,
                resident_bytes: 0,
                epoch: 0,
            })
        }
    }

    #[tokio::test]
    async fn sequential_blocks_are_not_identical() {
        let store = Arc::new(MemoryStore::new());
        let config = AllocConfig {
            batch_size: 2,
            ceiling_mib: 1000,
            pacing: PacingMode::Fast,
        };
        let allocator = Allocator::new(Arc::clone(&store), Arc::new(EmptyUsage), &config);

        allocator.run().await;

        assert_eq!(store.block_count(), 2);
        let first = store.block(0).await.expect("first block present");
        let second = store.block(1).await.expect("second block present");
        assert!(
            first != second,
            "blocks must be filled with fresh random bytes each time"
        );
    }
}
