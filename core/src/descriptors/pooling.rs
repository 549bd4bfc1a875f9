//! Pooling opcodes.

use serde::Serialize;

use crate::error::{PlanError, PlanResult};
use crate::layers::{PoolKind, PoolLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolDescriptor {
    pub opcode: u32,
}

/// Max-pool opcode for a square `size` window moved by `stride`.
pub fn max_pool_opcode(size: usize, stride: usize) -> PlanResult<u32> {
    match (size, stride) {
        (2, 2) => Ok(1),
        (2, 1) => Ok(9),
        _ => Err(PlanError::config(format!(
            "max pooling {size}x{size} with stride {stride}"
        ))),
    }
}

pub fn pool_descriptor(layer: &PoolLayer) -> PlanResult<PoolDescriptor> {
    match layer.kind {
        PoolKind::Max => Ok(PoolDescriptor {
            opcode: max_pool_opcode(layer.size, layer.stride)?,
        }),
        PoolKind::Average => Err(PlanError::config(format!(
            "average pooling `{}`",
            layer.name
        ))),
    }
}
