//! Error types for the kpu-rust-core library.
//!
//! Every operation in the planner returns `PlanResult<T>`. A plan is a one-shot
//! offline transform: any error aborts the whole build and no partial plan is
//! returned.

use thiserror::Error;

/// All possible error conditions raised while building a network plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// Unsupported kernel size, activation kind, pooling configuration,
    /// or a malformed weight byte width list.
    #[error("unsupported configuration: {0}")]
    Configuration(String),

    /// A calibrated range with no positive span.
    #[error("degenerate calibration range for `{tensor}`: min={min}, max={max}")]
    Calibration {
        tensor: String,
        min: f64,
        max: f64,
    },

    /// A value that does not fit its declared fixed-point field.
    #[error("value {value} does not fit a {bits}-bit field: {reason}")]
    Representation {
        value: f64,
        bits: u32,
        reason: &'static str,
    },

    /// The layer list does not follow `header, (conv [pool])*`.
    #[error("malformed layer sequence at index {index}: {reason}")]
    Sequence { index: usize, reason: String },

    /// The evaluation oracle failed for a tensor.
    #[error("evaluation of `{tensor}` failed: {message}")]
    Oracle { tensor: String, message: String },

    /// Tensor shape metadata disagrees with the layer's parameters.
    #[error("shape mismatch for `{tensor}`: expected {expected}, got {actual}")]
    Shape {
        tensor: String,
        expected: usize,
        actual: usize,
    },
}

impl PlanError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PlanError::Configuration(msg.into())
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
