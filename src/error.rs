//! Error definitions for the trigger table synthesizer.
use thiserror::Error;

/// Failures detected while synthesizing a trigger program.
///
/// Every variant is raised before any hardware is touched. The synthesizer is
/// deterministic, so retrying with the same inputs reproduces the same error.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    /// Malformed segment bounds, step counts or durations.
    #[error("invalid scan geometry: {0}")]
    InvalidGeometry(String),
    /// Zero, non-finite or missing axis resolution.
    #[error("invalid axis configuration: {0}")]
    InvalidAxisConfig(String),
    #[error("a trigger program must contain at least one row")]
    EmptyProgram,
    #[error("trigger program needs {rows} rows but the sequencer holds {capacity}")]
    CapacityExceeded { rows: usize, capacity: usize },
    /// A row whose trigger condition and comparator position disagree.
    #[error("row {index} is malformed: {reason}")]
    MalformedRow { index: usize, reason: String },
    /// A position that does not fit in the 32-bit comparator.
    #[error("position {position} does not fit in the comparator at resolution {resolution}")]
    PositionOutOfRange { position: f64, resolution: f64 },
    /// A duration that cannot be expressed as a whole number of sequencer ticks.
    #[error("invalid timing: {0}")]
    InvalidTiming(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
