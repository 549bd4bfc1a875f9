//! Pooling layer record.
//!
//! The KPU pools in the write-back path of the convolution it follows, so a
//! pooling record never stands alone in a plan.

use crate::tensor::TensorRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Average,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolLayer {
    pub name: String,
    pub kind: PoolKind,
    /// Square window edge.
    pub size: usize,
    pub stride: usize,
    /// Pooled output, NHWC.
    pub output: TensorRef,
}

impl PoolLayer {
    /// Square max-pooling window.
    pub fn max(name: impl Into<String>, size: usize, stride: usize, output: TensorRef) -> Self {
        Self {
            name: name.into(),
            kind: PoolKind::Max,
            size,
            stride,
            output,
        }
    }
}
