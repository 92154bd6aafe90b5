use crate::{CostTableError, Result, sampler::LatencySampler, unit::UnitSpec};

/// Sampler returning a fixed latency and recording every call.
pub struct RecordingSampler {
    latency: f64,
    fail_at: Option<(usize, usize)>,
    calls: Vec<UnitSpec>,
    releases: usize,
    live: bool,
}

impl RecordingSampler {
    pub fn constant(latency: f64) -> Self {
        Self {
            latency,
            fail_at: None,
            calls: vec![],
            releases: 0,
            live: false,
        }
    }

    /// Makes the unit with these channel counts fail to build.
    pub fn failing_at(mut self, in_channels: usize, out_channels: usize) -> Self {
        self.fail_at = Some((in_channels, out_channels));
        self
    }

    pub fn calls(&self) -> &[UnitSpec] {
        &self.calls
    }

    pub fn releases(&self) -> usize {
        self.releases
    }
}

impl LatencySampler for RecordingSampler {
    fn measure(&mut self, unit: &UnitSpec, _samples: usize) -> Result<f64> {
        assert!(!self.live, "unit of the previous cell was never released");
        self.live = true;
        self.calls.push(*unit);
        if self.fail_at == Some((unit.in_channels, unit.out_channels)) {
            return Err(CostTableError::Backend(format!(
                "injected failure at ({}, {})",
                unit.in_channels, unit.out_channels
            )));
        }
        unit.validate()?;
        Ok(self.latency)
    }

    fn release(&mut self) {
        self.live = false;
        self.releases += 1;
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
