//! Small helpers shared by the workspace crates.

mod memory;

pub use memory::{MemoryUsage, log_memory_usage, memory_usage};
use thousands::Separable;

/// Formats a count with thousands separators, e.g. `16384` as `16,384`.
pub fn format_count(n: usize) -> String {
    n.separate_with_commas()
}
