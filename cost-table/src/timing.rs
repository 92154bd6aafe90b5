//! Single-inference timer and median aggregation of repeated samples.

use std::time::{Duration, Instant};

use rand::Rng;
use statrs::statistics::{Data, Median};
use tracing::trace;

use crate::{CostTableError, Result, unit::InferenceUnit};

pub const DEFAULT_SAMPLES: usize = 11;

/// Times exactly one forward pass of `unit` on an already prepared `input`.
pub fn time_inference<U: InferenceUnit>(unit: &U, input: U::Input) -> Result<Duration> {
    let start = Instant::now();
    unit.infer(input)?;
    Ok(start.elapsed())
}

/// Median of `samples`, the mean of the two middle values for even lengths.
pub fn median(samples: &[f64]) -> f64 {
    Data::new(samples.to_vec()).median()
}

/// Median absolute deviation from the median.
pub fn median_absolute_deviation(samples: &[f64]) -> f64 {
    let center = median(samples);
    let deviations: Vec<f64> = samples.iter().map(|s| (s - center).abs()).collect();
    median(&deviations)
}

/// Takes `samples` timings of `unit`, each on fresh random input, and returns
/// the median in seconds.
pub fn median_latency<U, R>(unit: &U, samples: usize, rng: &mut R) -> Result<f64>
where
    U: InferenceUnit,
    R: Rng + ?Sized,
{
    let measures = collect_samples(unit, samples, rng)?;
    Ok(median(&measures))
}

/// Raw timings in seconds, one per fresh random input.
pub fn collect_samples<U, R>(unit: &U, samples: usize, rng: &mut R) -> Result<Vec<f64>>
where
    U: InferenceUnit,
    R: Rng + ?Sized,
{
    if samples == 0 {
        return Err(CostTableError::Config(
            "at least one sample per measurement is required".into(),
        ));
    }
    let mut measures = Vec::with_capacity(samples);
    for _ in 0..samples {
        let input = unit.random_input(rng)?;
        let elapsed = time_inference(unit, input)?;
        measures.push(elapsed.as_secs_f64());
    }
    trace!(
        "samples: median={:.3e}s mad={:.3e}s",
        median(&measures),
        median_absolute_deviation(&measures)
    );
    Ok(measures)
}
