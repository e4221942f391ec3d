//! Configuration for the memstress service

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Service configuration, immutable after startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemStressConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Allocation behavior
    pub alloc: AllocConfig,
    /// Metrics recorder configuration
    pub monitoring: MonitoringConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

/// Allocation behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocConfig {
    /// Blocks (1 MiB each) appended per consume call
    pub batch_size: u32,
    /// Reported allocation, in MiB, at which new batches are skipped
    pub ceiling_mib: u64,
    /// Whether blocks within a batch are appended back-to-back or one per second
    pub pacing: PacingMode,
}

/// Metrics recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between recorder ticks
    pub tick_seconds: u64,
}

/// Pacing of block appends within one allocation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    /// Append blocks back-to-back
    Fast,
    /// Sleep one second between appends, throttling visible growth
    Paced,
}

impl FromStr for PacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Self::Fast),
            "paced" => Ok(Self::Paced),
            other => Err(anyhow!("unknown pacing mode '{}', expected fast or paced", other)),
        }
    }
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Paced => write!(f, "paced"),
        }
    }
}

impl Default for MemStressConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            alloc: AllocConfig {
                batch_size: 50,
                ceiling_mib: 1000,
                pacing: PacingMode::Fast,
            },
            monitoring: MonitoringConfig { tick_seconds: 2 },
        }
    }
}

impl MemStressConfig {
    /// Load configuration from a file, with `MEMSTRESS_`-prefixed
    /// environment variables layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MEMSTRESS"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Get server address
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
