//! Range calibration and affine quantization.
//!
//! Ranges are the true observed extrema over the calibration set. There is no
//! percentile clipping, so one outlier sample widens the whole layer's range
//! and costs resolution everywhere else.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::hardware::ACTIVATION_LEVELS;
use crate::oracle::EvaluationOracle;
use crate::tensor::TensorRef;

// =============================================================================
// Range
// =============================================================================

/// Observed `[min, max]` of a tensor. Always `max > min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    /// Validate a range; `label` names the tensor in the error.
    pub fn checked(label: &str, min: f64, max: f64) -> PlanResult<Self> {
        if !min.is_finite() || !max.is_finite() || max - min <= 0.0 {
            return Err(PlanError::Calibration {
                tensor: label.to_string(),
                min,
                max,
            });
        }
        Ok(Self { min, max })
    }

    /// The `[0, 1]` range assumed for a normalized input image.
    pub const fn unit() -> Self {
        Self { min: 0.0, max: 1.0 }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::unit()
    }
}

/// Evaluate `tensor` over the calibration set and return its extrema.
pub fn observe<O: EvaluationOracle + ?Sized>(
    oracle: &O,
    tensor: &TensorRef,
    samples: &O::SampleSet,
) -> PlanResult<Range> {
    let mut values = oracle.evaluate(tensor, samples)?;
    if values.is_empty() {
        return Err(PlanError::Oracle {
            tensor: tensor.name.clone(),
            message: "no values returned".into(),
        });
    }
    values.sort_by(f32::total_cmp);
    let min = values[0] as f64;
    let max = values[values.len() - 1] as f64;
    debug!(tensor = %tensor.name, count = values.len(), min, max, "observed range");
    Range::checked(&tensor.name, min, max)
}

// =============================================================================
// Affine quantization
// =============================================================================

/// `q = (v - bias) / scale`, clamped to `[0, max_code]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineQuant {
    pub bias: f64,
    pub scale: f64,
    pub max_code: u32,
}

impl AffineQuant {
    /// 8-bit activations: 255 steps across the range.
    pub fn for_activations(range: Range) -> Self {
        Self {
            bias: range.min,
            scale: range.span() / ACTIVATION_LEVELS as f64,
            max_code: ACTIVATION_LEVELS,
        }
    }

    /// Weights stored on `byte_width` bytes.
    ///
    /// The scale divides by `2^(8 * byte_width)` while codes stop one short,
    /// so the largest weight lands on the top code after clamping.
    pub fn for_weights(range: Range, byte_width: u8) -> Self {
        let levels = 1u64 << (8 * byte_width as u32);
        Self {
            bias: range.min,
            scale: range.span() / levels as f64,
            max_code: (levels - 1) as u32,
        }
    }

    pub fn quantize(&self, value: f64) -> u32 {
        ((value - self.bias) / self.scale)
            .round()
            .clamp(0.0, self.max_code as f64) as u32
    }

    pub fn dequantize(&self, code: u32) -> f64 {
        code as f64 * self.scale + self.bias
    }

    /// `bias / scale`: the zero offset expressed in quantization steps.
    pub fn offset_steps(&self) -> f64 {
        self.bias / self.scale
    }
}
