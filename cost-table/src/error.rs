//! Error type shared by every stage of a sweep.

use std::{io, path::PathBuf, process::ExitStatus};

#[derive(thiserror::Error, Debug)]
pub enum CostTableError {
    /// Rejected before any measurement starts.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The factory was asked for a unit it cannot build.
    #[error("invalid inference unit: {0}")]
    InvalidUnit(String),
    #[error("measurement {value} for {position} ({in_channels}, {out_channels}) is not a finite non-negative latency")]
    InvalidMeasurement {
        position: String,
        in_channels: usize,
        out_channels: usize,
        value: f64,
    },
    /// Inconsistent use of a table under construction.
    #[error("cost table error: {0}")]
    Table(String),
    #[error("inference backend failed: {0}")]
    Backend(String),
    #[error("failed to launch {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} exited with {status}: {output}")]
    ExternalProcess {
        path: PathBuf,
        status: ExitStatus,
        output: String,
    },
    #[error("could not read a latency from benchmark output: {0:?}")]
    UnparseableOutput(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CostTableError {
    pub(crate) fn backend<E: std::fmt::Debug>(error: E) -> Self {
        CostTableError::Backend(format!("{error:?}"))
    }
}

pub type Result<T, E = CostTableError> = std::result::Result<T, E>;
