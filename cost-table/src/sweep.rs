//! The sweep driver: measures every channel configuration of the selected positions.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::{
    CostTableError, Result,
    position::{Architecture, LayerPosition, PositionSelection},
    sampler::{CellScope, LatencySampler},
    store::TableStore,
    table::{CostTable, CostTableCollection, TableBuilder},
    timing::DEFAULT_SAMPLES,
    unit::UnitSpec,
};

/// What to sweep and how many samples each cell takes.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub architecture: Architecture,
    pub selection: PositionSelection,
    pub samples: usize,
    /// Images per timed forward pass.
    pub batch: usize,
}

impl SweepConfig {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            selection: PositionSelection::All,
            samples: DEFAULT_SAMPLES,
            batch: 1,
        }
    }
}

/// A validated sweep over a fixed list of positions.
#[derive(Clone, Debug)]
pub struct Sweep {
    positions: Vec<LayerPosition>,
    samples: usize,
    batch: usize,
}

impl Sweep {
    /// Enumerates and selects the positions; every configuration error surfaces here.
    pub fn new(config: &SweepConfig) -> Result<Self> {
        let positions = config
            .selection
            .select(config.architecture.positions()?)?;
        Self::from_positions(positions, config.samples, config.batch)
    }

    pub fn from_positions(positions: Vec<LayerPosition>, samples: usize, batch: usize) -> Result<Self> {
        if samples == 0 {
            return Err(CostTableError::Config("samples must be positive".into()));
        }
        if batch == 0 {
            return Err(CostTableError::Config("batch size must be positive".into()));
        }
        if let Some(p) = positions
            .iter()
            .find(|p| p.max_in_channels == 0 || p.max_out_channels == 0 || p.width == 0)
        {
            return Err(CostTableError::Config(format!(
                "position {} has an empty channel range or feature map",
                p.name
            )));
        }
        Ok(Self {
            positions,
            samples,
            batch,
        })
    }

    pub fn positions(&self) -> &[LayerPosition] {
        &self.positions
    }

    /// Number of measurements the whole sweep takes.
    pub fn num_measurements(&self) -> usize {
        self.positions.iter().map(LayerPosition::num_measurements).sum()
    }

    /// Sweeps every position; the first failing cell aborts the whole sweep.
    pub fn run<S: LatencySampler + ?Sized>(&self, sampler: &mut S) -> Result<CostTableCollection> {
        info!(
            "sweeping {} position(s), {} measurements of {} samples with {}",
            self.positions.len(),
            utils::format_count(self.num_measurements()),
            self.samples,
            sampler.name()
        );
        let mut collection = CostTableCollection::default();
        for (i, position) in self.positions.iter().enumerate() {
            let table = self.sweep_position(position, sampler)?;
            collection.insert(position.name.clone(), table)?;
            info!(
                "{} table(s) out of {} done ({})",
                i + 1,
                self.positions.len(),
                position.name
            );
            utils::log_memory_usage("memory after position");
        }
        Ok(collection)
    }

    /// Sweeps, then saves the collection under `save_file`. Nothing is written
    /// when the sweep fails.
    pub fn run_and_save<S: LatencySampler + ?Sized>(
        &self,
        sampler: &mut S,
        store: &TableStore,
        save_file: &str,
    ) -> Result<PathBuf> {
        let collection = self.run(sampler)?;
        store.save(save_file, &collection)
    }

    pub fn sweep_position<S: LatencySampler + ?Sized>(
        &self,
        position: &LayerPosition,
        sampler: &mut S,
    ) -> Result<CostTable> {
        info!(
            "sweeping {}: {} width={} in<={} out<={}",
            position.name,
            position.kind,
            position.width,
            position.max_in_channels,
            position.max_out_channels
        );
        let mut table = TableBuilder::new(position.max_in_channels, position.max_out_channels)?;
        for in_channels in 1..=position.max_in_channels {
            if position.kind.is_head() {
                // out channels are fixed to the number of classes
                let spec = UnitSpec::for_cell(position, in_channels, position.max_out_channels, self.batch);
                let seconds = self.measure_cell(sampler, position, &spec)?;
                table.fill_row(in_channels, seconds)?;
            } else {
                for out_channels in 1..=position.max_out_channels {
                    let spec = UnitSpec::for_cell(position, in_channels, out_channels, self.batch);
                    let seconds = self.measure_cell(sampler, position, &spec)?;
                    table.set(in_channels, out_channels, seconds)?;
                }
            }
            debug!(
                "{}: {in_channels} input channels out of {}",
                position.name, position.max_in_channels
            );
        }
        table.finish()
    }

    fn measure_cell<S: LatencySampler + ?Sized>(
        &self,
        sampler: &mut S,
        position: &LayerPosition,
        spec: &UnitSpec,
    ) -> Result<f64> {
        let mut scope = CellScope::new(sampler);
        let seconds = scope.measure(spec, self.samples)?;
        if !(seconds.is_finite() && seconds >= 0.0) {
            return Err(CostTableError::InvalidMeasurement {
                position: position.name.clone(),
                in_channels: spec.in_channels,
                out_channels: spec.out_channels,
                value: seconds,
            });
        }
        Ok(seconds)
    }
}
