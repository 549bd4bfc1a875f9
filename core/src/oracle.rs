//! The evaluation oracle seam.
//!
//! Calibration needs sampled tensor values; producing them means running the
//! trained graph, which lives outside this crate. Implementations must be
//! deterministic: the same tensor and sample set yield the same values.

use std::collections::HashMap;

use crate::error::{PlanError, PlanResult};
use crate::tensor::TensorRef;

pub trait EvaluationOracle {
    /// Whatever identifies the calibration batch for this oracle.
    type SampleSet: ?Sized;

    /// Evaluate `tensor` over `samples`, returning every sampled value.
    fn evaluate(&self, tensor: &TensorRef, samples: &Self::SampleSet) -> PlanResult<Vec<f32>>;
}

/// Replays tensor values recorded per calibration example.
///
/// The sample set is a list of example indices; the returned values are the
/// concatenation of each selected example's recording, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordedOracle {
    recordings: HashMap<String, Vec<Vec<f32>>>,
}

impl RecordedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one array per calibration example for `tensor`.
    pub fn record(&mut self, tensor: impl Into<String>, per_example: Vec<Vec<f32>>) -> &mut Self {
        self.recordings.insert(tensor.into(), per_example);
        self
    }

    /// Record a tensor whose value does not depend on the example (weights).
    pub fn record_constant(&mut self, tensor: impl Into<String>, values: Vec<f32>, examples: usize) -> &mut Self {
        self.record(tensor, vec![values; examples])
    }

    pub fn examples(&self, tensor: &str) -> usize {
        self.recordings.get(tensor).map_or(0, Vec::len)
    }
}

impl EvaluationOracle for RecordedOracle {
    type SampleSet = [usize];

    fn evaluate(&self, tensor: &TensorRef, samples: &[usize]) -> PlanResult<Vec<f32>> {
        let recording = self.recordings.get(&tensor.name).ok_or_else(|| PlanError::Oracle {
            tensor: tensor.name.clone(),
            message: "no recording for tensor".into(),
        })?;
        let mut values = Vec::new();
        for &idx in samples {
            let example = recording.get(idx).ok_or_else(|| PlanError::Oracle {
                tensor: tensor.name.clone(),
                message: format!("example {idx} not recorded ({} available)", recording.len()),
            })?;
            values.extend_from_slice(example);
        }
        Ok(values)
    }
}
