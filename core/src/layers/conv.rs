//! Convolution layer record: trained parameters plus calibration handles.

use crate::error::{PlanError, PlanResult};
use crate::tensor::TensorRef;

/// Per-output-channel batch-norm statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormParams {
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
    pub gamma: Vec<f32>,
    pub beta: Vec<f32>,
}

impl BatchNormParams {
    /// Statistics that reduce the fold to `x + bias`.
    pub fn identity(bias: &[f32]) -> Self {
        let n = bias.len();
        Self {
            mean: vec![0.0; n],
            variance: vec![1.0; n],
            gamma: vec![1.0; n],
            beta: bias.to_vec(),
        }
    }

    pub fn channels(&self) -> usize {
        self.beta.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvConfig {
    pub stride: usize,
    /// Activation name as written in the network definition.
    pub activation: String,
}

/// A convolution (plain or depth-wise) with its trained parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvLayer {
    pub name: String,
    /// Kernel in HWIO order, flattened row-major.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub batch_norm: Option<BatchNormParams>,
    pub config: ConvConfig,
    /// Convolution input, NHWC.
    pub input: TensorRef,
    /// Kernel tensor, HWIO.
    pub kernel: TensorRef,
    /// Convolution output before the activation, NHWC.
    pub output: TensorRef,
    /// Activation output, NHWC.
    pub activation: TensorRef,
}

impl ConvLayer {
    pub fn batch_normalize(&self) -> bool {
        self.batch_norm.is_some()
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel.shape.dims[0]
    }

    pub fn in_channels(&self) -> usize {
        self.kernel.shape.dims[2]
    }

    pub fn out_channels(&self) -> usize {
        self.output.shape.channels()
    }

    /// Batch-norm statistics, or the identity fold over the layer bias.
    pub fn folding_params(&self) -> BatchNormParams {
        self.batch_norm
            .clone()
            .unwrap_or_else(|| BatchNormParams::identity(&self.bias))
    }

    /// Check that shapes and parameter lengths agree.
    pub fn validate(&self, depth_wise: bool) -> PlanResult<()> {
        let [kh, kw, ich, mult] = self.kernel.shape.dims;
        if kh != kw {
            return Err(PlanError::config(format!(
                "layer `{}`: non-square {kh}x{kw} kernel",
                self.name
            )));
        }
        for tensor in [&self.input, &self.kernel, &self.output, &self.activation] {
            if let Some(&dim) = tensor.shape.dims.iter().find(|&&d| d == 0) {
                return Err(PlanError::Shape {
                    tensor: tensor.name.clone(),
                    expected: 1,
                    actual: dim,
                });
            }
        }
        if self.config.stride == 0 {
            return Err(PlanError::config(format!("layer `{}`: zero stride", self.name)));
        }
        if self.weights.len() != self.kernel.shape.total() {
            return Err(PlanError::Shape {
                tensor: self.kernel.name.clone(),
                expected: self.kernel.shape.total(),
                actual: self.weights.len(),
            });
        }
        let och = self.out_channels();
        let kernel_och = if depth_wise { ich * mult } else { mult };
        if kernel_och != och {
            return Err(PlanError::Shape {
                tensor: self.output.name.clone(),
                expected: kernel_och,
                actual: och,
            });
        }
        if self.input.shape.channels() != ich {
            return Err(PlanError::Shape {
                tensor: self.input.name.clone(),
                expected: ich,
                actual: self.input.shape.channels(),
            });
        }
        let params = self.folding_params();
        // Without batch-norm, `beta` is the layer bias.
        for (label, len) in [
            ("mean", params.mean.len()),
            ("variance", params.variance.len()),
            ("gamma", params.gamma.len()),
            ("beta", params.beta.len()),
        ] {
            if len != och {
                return Err(PlanError::Shape {
                    tensor: format!("{}/{label}", self.name),
                    expected: och,
                    actual: len,
                });
            }
        }
        Ok(())
    }
}
