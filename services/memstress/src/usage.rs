//! Live allocator statistics
//!
//! Reports are always read fresh from jemalloc; nothing is cached. The
//! snapshot's `epoch` is jemalloc's statistics refresh counter, advanced
//! once per snapshot.

use anyhow::{Result, anyhow};
use tikv_jemalloc_ctl::{epoch, stats};

/// Bytes per MiB, the unit used in every report
pub const BYTES_PER_MIB: u64 = 1 << 20;

// mallctl path purging every arena; 4096 is MALLCTL_ARENAS_ALL.
const ARENA_PURGE_ALL: &[u8] = b"arena.4096.purge\0";

/// Point-in-time view of allocator statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Bytes in live heap allocations
    pub allocated_bytes: u64,
    /// Bytes in pages the allocator holds from the OS
    pub resident_bytes: u64,
    /// Statistics refresh cycles completed so far
    pub epoch: u64,
}

impl UsageSnapshot {
    /// Allocated bytes in whole MiB, truncated
    #[must_use]
    pub const fn allocated_mib(&self) -> u64 {
        self.allocated_bytes / BYTES_PER_MIB
    }

    /// Resident bytes in whole MiB, truncated
    #[must_use]
    pub const fn resident_mib(&self) -> u64 {
        self.resident_bytes / BYTES_PER_MIB
    }

    /// Render the fixed three-field usage line
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Alloc = {} MiB\tResident = {} MiB\tEpoch = {}",
            self.allocated_mib(),
            self.resident_mib(),
            self.epoch
        )
    }
}

/// Source of usage snapshots
pub trait UsageProbe: Send + Sync {
    /// Take a fresh snapshot of allocator statistics
    fn snapshot(&self) -> Result<UsageSnapshot>;
}

/// Probe backed by the process-wide jemalloc statistics
pub struct JemallocUsage;

impl UsageProbe for JemallocUsage {
    fn snapshot(&self) -> Result<UsageSnapshot> {
        // jemalloc caches its statistics; advancing the epoch refreshes
        // them so every snapshot is current.
        let epoch_count =
            epoch::advance().map_err(|e| anyhow!("failed to advance stats epoch: {}", e))?;
        let allocated =
            stats::allocated::read().map_err(|e| anyhow!("failed to read allocated bytes: {}", e))?;
        let resident =
            stats::resident::read().map_err(|e| anyhow!("failed to read resident bytes: {}", e))?;

        Ok(UsageSnapshot {
            allocated_bytes: allocated as u64,
            resident_bytes: resident as u64,
            epoch: epoch_count,
        })
    }
}

/// Ask jemalloc to purge dirty pages from every arena, returning freed
/// memory to the OS instead of retaining it for reuse.
pub fn release_os_pages() -> Result<()> {
    // SAFETY: the name is a valid null-terminated mallctl path; the purge
    // operation takes no input or output, so all data pointers are null.
    let ret = unsafe {
        tikv_jemalloc_sys::mallctl(
            ARENA_PURGE_ALL.as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(anyhow!("mallctl arena purge failed with errno {}", ret))
    }
}
