//! Shared test doubles
#![allow(dead_code)]

use anyhow::Result;
use memstress::usage::{UsageProbe, UsageSnapshot};
use rand::RngCore;

/// Probe reporting a pinned allocated figure
pub struct FixedUsage(pub u64);

impl UsageProbe for FixedUsage {
    fn snapshot(&self) -> Result<UsageSnapshot> {
        Ok(UsageSnapshot {
            allocated_bytes: self.0,
            resident_bytes: self.0,
            epoch: 1,
        })
    }
}

/// Random source that serves a fixed number of fills, then fails
pub struct FlakyRng {
    pub ok_fills: usize,
    pub served: usize,
}

impl FlakyRng {
    pub fn failing_after(ok_fills: usize) -> Self {
        Self {
            ok_fills,
            served: 0,
        }
    }
}

impl RngCore for FlakyRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0xAB);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        if self.served < self.ok_fills {
            self.served += 1;
            dest.fill(0xAB);
            Ok(())
        } else {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source exhausted",
            )))
        }
    }
}

/// Whole MiB as bytes
pub fn mib(n: u64) -> u64 {
    n * 1024 * 1024
}
