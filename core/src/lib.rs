//! # kpu-rust-core: Fixed-point planner for KPU convolution accelerators
//!
//! Turns a trained, calibrated convolutional network into per-layer
//! descriptors for a KPU-style accelerator (multiply-then-shift arithmetic,
//! 8-bit activations, 1- or 2-byte weights).
//!
//! ## Architecture
//!
//! - **Fixed-point math**: `(mantissa, shift)` factorization and checked
//!   two's-complement fields
//! - **Calibration**: observed min/max ranges through an evaluation oracle
//! - **Descriptors**: conv quantization, batch-norm folding, activation
//!   tables, pooling opcodes and layer geometry
//! - **Plan**: the `header, (conv [pool])*` walk that threads each layer's
//!   output range into the next
//!
//! ## Usage
//!
//! ```ignore
//! use kpu_rust_core::*;
//!
//! let mut oracle = RecordedOracle::new();
//! oracle.record("conv0/w", vec![weights.clone()]);
//! oracle.record("conv0/act", vec![sampled_activations]);
//!
//! let layers = vec![LayerRecord::NetworkHeader, LayerRecord::Convolution(conv0)];
//! let plan = build_plan(&layers, &oracle, &[0], &PlanOptions::default())?;
//! writer.write(&plan)?;
//! ```

pub mod calibration;
pub mod descriptors;
pub mod error;
pub mod hardware;
pub mod layers;
pub mod math;
pub mod oracle;
pub mod plan;
pub mod tensor;

// Re-export primary types
pub use calibration::{observe, AffineQuant, Range};
pub use descriptors::{
    ActivationTable, BnChannel, BnDescriptor, Breakpoint, ConvDescriptor, LayerDescriptor,
    PoolDescriptor,
};
pub use error::{PlanError, PlanResult};
pub use layers::{
    ActivationKind, BatchNormParams, ConvConfig, ConvLayer, LayerRecord, PoolKind, PoolLayer,
};
pub use math::{
    decode_twos_complement, encode_twos_complement, factorize, normalize_to_unit,
    FixedPointScale, TwosComplement,
};
pub use oracle::{EvaluationOracle, RecordedOracle};
pub use plan::{build_plan, NetworkPlan, PlanOptions};
pub use tensor::{Shape, TensorRef};
