//! Sampler delegating to an external benchmark executable.
//!
//! The unit is staged as an ONNX file and the executable is run with
//! `--graph=<file> --min_secs=0 --warmup_min_secs=0 --num_runs=<samples>`.
//! It must exit successfully and print the mean latency in microseconds as the
//! only content of its last non-empty stdout line.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use rand::rngs::StdRng;
use tracing::{debug, warn};

use super::LatencySampler;
use crate::{
    CostTableError, Result,
    unit::{UnitSpec, onnx},
};

const STAGED_MODEL: &str = "model.onnx";
const MICROS_PER_SECOND: f64 = 1e6;

/// Which benchmark tool flavour is driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalRuntime {
    /// Infers the input layer from the model file.
    Mobile,
    /// Needs the input layer shape and type on the command line.
    Desktop,
}

pub struct ExternalSampler {
    runtime: ExternalRuntime,
    executable: PathBuf,
    staging_dir: PathBuf,
    rng: StdRng,
    staged: Option<PathBuf>,
}

impl ExternalSampler {
    pub fn new(
        runtime: ExternalRuntime,
        executable: PathBuf,
        staging_dir: PathBuf,
        rng: StdRng,
    ) -> Result<Self> {
        fs::create_dir_all(&staging_dir)?;
        Ok(Self {
            runtime,
            executable,
            staging_dir,
            rng,
            staged: None,
        })
    }

    fn command(&self, model: &Path, unit: &UnitSpec, samples: usize) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg(format!("--graph={}", model.display()))
            .arg("--min_secs=0")
            .arg("--warmup_min_secs=0")
            .arg(format!("--num_runs={samples}"));
        if self.runtime == ExternalRuntime::Desktop {
            let [n, c, h, w] = unit.input_shape();
            command
                .arg(format!("--input_layer_shape={n},{c},{h},{w}"))
                .arg("--input_layer_type=float");
        }
        command
    }
}

impl LatencySampler for ExternalSampler {
    fn measure(&mut self, unit: &UnitSpec, samples: usize) -> Result<f64> {
        if samples == 0 {
            return Err(CostTableError::Config(
                "at least one sample per measurement is required".into(),
            ));
        }
        let bytes = onnx::export_bytes(unit, &mut self.rng)?;
        let model = self.staging_dir.join(STAGED_MODEL);
        // recorded first so a partially written file is still released
        self.staged = Some(model.clone());
        fs::write(&model, bytes)?;

        let output = self
            .command(&model, unit, samples)
            .output()
            .map_err(|source| CostTableError::Spawn {
                path: self.executable.clone(),
                source,
            })?;
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CostTableError::ExternalProcess {
                path: self.executable.clone(),
                status: output.status,
                output: combined.trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let micros = parse_latency_micros(&stdout)?;
        debug!("{} reported {micros}us", self.executable.display());
        Ok(micros / MICROS_PER_SECOND)
    }

    fn release(&mut self) {
        if let Some(model) = self.staged.take() {
            if let Err(e) = fs::remove_file(&model) {
                warn!("could not remove staged model {}: {e}", model.display());
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.runtime {
            ExternalRuntime::Mobile => "external-mobile",
            ExternalRuntime::Desktop => "external-desktop",
        }
    }
}

/// Reads the latency in microseconds from the last non-empty line of `output`,
/// which must hold a single non-negative number.
pub fn parse_latency_micros(output: &str) -> Result<f64> {
    let line = output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| CostTableError::UnparseableOutput(output.to_string()))?;
    match line.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(CostTableError::UnparseableOutput(line.to_string())),
    }
}
