//! Samplers timing the forward pass inside this process.

use burn::{backend::NdArray, tensor::backend::Backend};
use rand::rngs::StdRng;
use tracing::trace;

use super::LatencySampler;
use crate::{
    Result,
    timing::median_latency,
    unit::{UnitSpec, burn_net::BurnUnit, tract_plan::TractUnit},
};

/// Measures burn modules on backend `B`.
pub struct BurnSampler<B: Backend = NdArray> {
    device: B::Device,
    rng: StdRng,
    current: Option<BurnUnit<B>>,
}

impl<B: Backend> BurnSampler<B> {
    pub fn new(device: B::Device, rng: StdRng) -> Self {
        Self {
            device,
            rng,
            current: None,
        }
    }
}

impl<B: Backend> LatencySampler for BurnSampler<B> {
    fn measure(&mut self, unit: &UnitSpec, samples: usize) -> Result<f64> {
        // a previous cell may have been measured without a scope
        self.current = None;
        let built = self.current.insert(BurnUnit::build(unit, &self.device)?);
        median_latency(&*built, samples, &mut self.rng)
    }

    fn release(&mut self) {
        if self.current.take().is_some() {
            trace!("released burn unit");
        }
    }

    fn name(&self) -> &'static str {
        "burn"
    }
}

/// Measures tract plans compiled from the exported ONNX graph.
pub struct TractSampler {
    rng: StdRng,
    current: Option<TractUnit>,
}

impl TractSampler {
    pub fn new(rng: StdRng) -> Self {
        Self { rng, current: None }
    }
}

impl LatencySampler for TractSampler {
    fn measure(&mut self, unit: &UnitSpec, samples: usize) -> Result<f64> {
        self.current = None;
        let built = self.current.insert(TractUnit::build(unit, &mut self.rng)?);
        median_latency(&*built, samples, &mut self.rng)
    }

    fn release(&mut self) {
        if self.current.take().is_some() {
            trace!("released tract plan");
        }
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
