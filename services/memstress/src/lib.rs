//! Memstress Service
//!
//! Diagnostic HTTP service that synthetically grows and releases process
//! memory, for exercising memory-limit enforcement, autoscaling, and OOM
//! handling in container orchestration environments:
//! - Bounded allocation batches of random-filled 1 MiB blocks
//! - Configurable ceiling above which allocation is skipped
//! - Live allocator statistics reporting
//! - Prometheus metrics for scraping

use std::future::Future;

use anyhow::Result;

pub mod allocator;
pub mod config;
pub mod metrics;
pub mod server;
pub mod store;
pub mod usage;

pub use allocator::Allocator;
pub use config::{AllocConfig, MemStressConfig, MonitoringConfig, PacingMode, ServerConfig};
pub use server::{AppState, MemStressServer};
pub use store::{BLOCK_BYTES, MemoryStore};
pub use usage::{BYTES_PER_MIB, JemallocUsage, UsageProbe, UsageSnapshot};

// The heap runs under jemalloc so usage reports and the ceiling check read
// the same allocator that owns the stored blocks.
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Start the service and serve until `shutdown` resolves.
pub async fn start_server(
    config: MemStressConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    MemStressServer::new(config).start(shutdown).await
}
