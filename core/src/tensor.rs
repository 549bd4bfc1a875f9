//! Tensor handles and shapes.
//!
//! The planner never owns activations. It only names graph tensors and
//! carries their static shapes; values come from the evaluation oracle.

use serde::{Deserialize, Serialize};

/// A 4-D shape.
///
/// Image tensors are NHWC (`[batch, height, width, channels]`), kernels are
/// HWIO (`[kernel_h, kernel_w, in_channels, out_channels]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub dims: [usize; 4],
}

impl Shape {
    pub const fn nhwc(n: usize, h: usize, w: usize, c: usize) -> Self {
        Self { dims: [n, h, w, c] }
    }

    pub const fn hwio(kh: usize, kw: usize, i: usize, o: usize) -> Self {
        Self { dims: [kh, kw, i, o] }
    }

    pub fn total(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn height(&self) -> usize {
        self.dims[1]
    }

    pub fn width(&self) -> usize {
        self.dims[2]
    }

    pub fn channels(&self) -> usize {
        self.dims[3]
    }
}

/// A named graph tensor with its static shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorRef {
    pub name: String,
    pub shape: Shape,
}

impl TensorRef {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self { name: name.into(), shape }
    }
}
