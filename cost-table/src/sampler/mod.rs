//! Latency samplers: the measurement backends a sweep can use.

pub mod external;
pub mod in_process;

use std::{
    ops::{Deref, DerefMut},
    path::PathBuf,
};

use burn::backend::NdArray;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

pub use external::{ExternalRuntime, ExternalSampler, parse_latency_micros};
pub use in_process::{BurnSampler, TractSampler};

use crate::{Result, unit::UnitSpec};

/// Turns a unit description into a latency estimate.
pub trait LatencySampler {
    /// Builds the unit described by `unit`, measures it `samples` times and
    /// returns the latency in seconds.
    fn measure(&mut self, unit: &UnitSpec, samples: usize) -> Result<f64>;

    /// Drops every resource held for the last measured unit (networks,
    /// compiled plans, staged files). Called after each sweep cell.
    fn release(&mut self) {}

    fn name(&self) -> &'static str;
}

impl<S: LatencySampler + ?Sized> LatencySampler for Box<S> {
    fn measure(&mut self, unit: &UnitSpec, samples: usize) -> Result<f64> {
        (**self).measure(unit, samples)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Scope of one sweep cell; releases the sampler's resources when dropped,
/// including when the measurement failed.
pub struct CellScope<'a, S: LatencySampler + ?Sized> {
    sampler: &'a mut S,
}

impl<'a, S: LatencySampler + ?Sized> CellScope<'a, S> {
    pub fn new(sampler: &'a mut S) -> Self {
        Self { sampler }
    }
}

impl<S: LatencySampler + ?Sized> Deref for CellScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.sampler
    }
}

impl<S: LatencySampler + ?Sized> DerefMut for CellScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.sampler
    }
}

impl<S: LatencySampler + ?Sized> Drop for CellScope<'_, S> {
    fn drop(&mut self) {
        self.sampler.release();
    }
}

/// How latencies are measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub enum MeasureMethod {
    /// burn on the ndarray backend, timed in-process.
    #[display("burn")]
    Burn,
    /// tract, timed in-process.
    #[display("tract")]
    Tract,
    /// External mobile runtime benchmark binary.
    #[display("external-mobile")]
    ExternalMobile,
    /// External desktop runtime benchmark binary.
    #[display("external-desktop")]
    ExternalDesktop,
}

/// Everything needed to build any of the samplers.
#[derive(Clone, Debug)]
pub struct SamplerConfig {
    pub method: MeasureMethod,
    /// Seed of the generator for inputs and weights; random when absent.
    pub seed: Option<u64>,
    pub staging_dir: PathBuf,
    pub mobile_benchmark: PathBuf,
    pub desktop_benchmark: PathBuf,
}

impl SamplerConfig {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn build(&self) -> Result<Box<dyn LatencySampler>> {
        let sampler: Box<dyn LatencySampler> = match self.method {
            MeasureMethod::Burn => {
                Box::new(BurnSampler::<NdArray>::new(Default::default(), self.rng()))
            }
            MeasureMethod::Tract => Box::new(TractSampler::new(self.rng())),
            MeasureMethod::ExternalMobile => Box::new(ExternalSampler::new(
                ExternalRuntime::Mobile,
                self.mobile_benchmark.clone(),
                self.staging_dir.clone(),
                self.rng(),
            )?),
            MeasureMethod::ExternalDesktop => Box::new(ExternalSampler::new(
                ExternalRuntime::Desktop,
                self.desktop_benchmark.clone(),
                self.staging_dir.clone(),
                self.rng(),
            )?),
        };
        Ok(sampler)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{position::LayerKind, testing::RecordingSampler};

    fn unit() -> UnitSpec {
        UnitSpec {
            kind: LayerKind::ConvBlock { stride: 1 },
            in_channels: 1,
            out_channels: 1,
            width: 4,
            batch: 1,
        }
    }

    #[test]
    fn test_cell_scope_releases_on_success() -> anyhow::Result<()> {
        let mut sampler = RecordingSampler::constant(0.5);
        {
            let mut scope = CellScope::new(&mut sampler);
            assert_eq!(scope.measure(&unit(), 3)?, 0.5);
        }
        assert_eq!(sampler.releases(), 1);
        Ok(())
    }

    #[test]
    fn test_cell_scope_releases_on_failure() {
        let mut sampler = RecordingSampler::constant(0.5).failing_at(1, 1);
        {
            let mut scope = CellScope::new(&mut sampler);
            assert!(scope.measure(&unit(), 3).is_err());
        }
        assert_eq!(sampler.releases(), 1);
    }

    #[test]
    fn test_config_builds_in_process_samplers() -> anyhow::Result<()> {
        let mut config = SamplerConfig {
            method: MeasureMethod::Burn,
            seed: Some(1),
            staging_dir: std::env::temp_dir(),
            mobile_benchmark: "benchmark_model".into(),
            desktop_benchmark: "benchmark_model".into(),
        };
        assert_eq!(config.build()?.name(), "burn");
        config.method = MeasureMethod::Tract;
        assert_eq!(config.build()?.name(), "tract");
        Ok(())
    }
}
