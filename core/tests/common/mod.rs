//! Shared fixtures: small convolution records and a recorded oracle.

#![allow(dead_code)]

use kpu_rust_core::*;

/// Calibration examples recorded for every tensor.
pub const EXAMPLES: usize = 2;
pub const ALL_SAMPLES: [usize; EXAMPLES] = [0, 1];

pub struct ConvFixture<'a> {
    pub name: &'a str,
    pub kernel: usize,
    pub ich: usize,
    pub och: usize,
    pub height: usize,
    pub width: usize,
    pub stride: usize,
    pub activation: &'a str,
}

impl<'a> ConvFixture<'a> {
    pub fn new(name: &'a str, kernel: usize, ich: usize, och: usize) -> Self {
        Self {
            name,
            kernel,
            ich,
            och,
            height: 8,
            width: 8,
            stride: 1,
            activation: "linear",
        }
    }

    pub fn spatial(mut self, height: usize, width: usize) -> Self {
        self.height = height;
        self.width = width;
        self
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn activation(mut self, activation: &'a str) -> Self {
        self.activation = activation;
        self
    }

    pub fn weight_count(&self) -> usize {
        self.kernel * self.kernel * self.ich * self.och
    }

    /// Evenly spread weights over `[-0.5, 0.5]`.
    pub fn ramp_weights(&self) -> Vec<f32> {
        let n = self.weight_count();
        (0..n)
            .map(|i| -0.5 + i as f32 / (n - 1).max(1) as f32)
            .collect()
    }

    pub fn build(&self, weights: Vec<f32>, bias: Vec<f32>) -> ConvLayer {
        let oh = self.height / self.stride;
        let ow = self.width / self.stride;
        ConvLayer {
            name: self.name.to_string(),
            weights,
            bias,
            batch_norm: None,
            config: ConvConfig {
                stride: self.stride,
                activation: self.activation.to_string(),
            },
            input: TensorRef::new(
                format!("{}/x", self.name),
                Shape::nhwc(1, self.height, self.width, self.ich),
            ),
            kernel: TensorRef::new(
                format!("{}/w", self.name),
                Shape::hwio(self.kernel, self.kernel, self.ich, self.och),
            ),
            output: TensorRef::new(format!("{}/y", self.name), Shape::nhwc(1, oh, ow, self.och)),
            activation: TensorRef::new(
                format!("{}/act", self.name),
                Shape::nhwc(1, oh, ow, self.och),
            ),
        }
    }
}

/// Record a layer's weights and the activation samples the graph would produce.
pub fn record_layer(oracle: &mut RecordedOracle, layer: &ConvLayer, activation: [Vec<f32>; EXAMPLES]) {
    oracle.record_constant(layer.kernel.name.clone(), layer.weights.clone(), EXAMPLES);
    oracle.record(layer.activation.name.clone(), activation.to_vec());
}

pub fn pool_after(layer: &ConvLayer, size: usize, stride: usize) -> PoolLayer {
    let [n, h, w, c] = layer.output.shape.dims;
    PoolLayer::max(
        format!("{}/pool", layer.name),
        size,
        stride,
        TensorRef::new(
            format!("{}/pool", layer.name),
            Shape::nhwc(n, h / stride, w / stride, c),
        ),
    )
}
