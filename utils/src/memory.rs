use std::fmt::{Display, Formatter, Result as FmtResult};

use bytesize::ByteSize;
use tracing::{info, warn};

/// Process memory as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub physical: u64,
    pub virtual_mem: u64,
}

impl Display for MemoryUsage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "rss={} virt={}",
            ByteSize::b(self.physical),
            ByteSize::b(self.virtual_mem)
        )
    }
}

/// Returns the current memory usage, if the platform exposes it.
pub fn memory_usage() -> Option<MemoryUsage> {
    memory_stats::memory_stats().map(|stats| MemoryUsage {
        physical: stats.physical_mem as u64,
        virtual_mem: stats.virtual_mem as u64,
    })
}

/// Logs the current memory usage under `label`.
pub fn log_memory_usage(label: &str) {
    match memory_usage() {
        Some(usage) => info!("{label}: {usage}"),
        None => warn!("{label}: memory usage unavailable on this platform"),
    }
}
