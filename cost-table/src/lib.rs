//! Latency cost tables for channel-pruning search.
//!
//! For every layer position of a reference convolutional architecture, a sweep
//! measures the latency of a minimal network for each `(in_channels,
//! out_channels)` pair and stores the results as a 2-D table.

pub mod error;
pub mod position;
pub mod sampler;
pub mod store;
pub mod sweep;
pub mod table;
pub mod timing;
pub mod unit;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{CostTableError, Result};
pub use position::{Architecture, LayerKind, LayerPosition, NetFamily, PositionSelection};
pub use sampler::{CellScope, LatencySampler, MeasureMethod, SamplerConfig};
pub use store::{TableFormat, TableStore};
pub use sweep::{Sweep, SweepConfig};
pub use table::{CostTable, CostTableCollection, TableBuilder};
pub use unit::{InferenceUnit, UnitSpec};
