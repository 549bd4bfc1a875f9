//! Batch-norm folding.
//!
//! Per output channel, the conv accumulator (in `swsx` units) goes through
//!
//! ```text
//! out = acc * swsx * gamma / var + (beta - gamma * mean / var)
//! ```
//!
//! scaled by [`FIXED_POINT_GAIN`] so the multiplier fits 24 bits and the
//! addend 32 bits.

use serde::Serialize;
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::hardware::{FIXED_POINT_GAIN, NORM_ADD_BITS, SCALE_FIELD_BITS};
use crate::layers::BatchNormParams;
use crate::math::{FixedPointScale, TwosComplement};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BnChannel {
    pub norm_mul: TwosComplement,
    pub norm_add: TwosComplement,
    pub norm_shift: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BnDescriptor {
    pub load_para: u32,
    pub channels: Vec<BnChannel>,
}

impl BnDescriptor {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Fold one channel's `(scale, bias)` into hardware fields.
pub fn fold_channel(scale: f64, bias: f64) -> PlanResult<BnChannel> {
    let mul = FixedPointScale::fit(scale, SCALE_FIELD_BITS)?;
    if !bias.is_finite() {
        return Err(PlanError::Representation {
            value: bias,
            bits: NORM_ADD_BITS,
            reason: "not a finite number",
        });
    }
    Ok(BnChannel {
        norm_mul: TwosComplement::new(mul.mantissa, SCALE_FIELD_BITS)?,
        norm_add: TwosComplement::new(bias.round() as i64, NORM_ADD_BITS)?,
        norm_shift: mul.shift,
    })
}

pub fn fold_batch_norm(params: &BatchNormParams, swsx: f64) -> PlanResult<BnDescriptor> {
    let n = params.channels();
    for (label, len) in [
        ("mean", params.mean.len()),
        ("variance", params.variance.len()),
        ("gamma", params.gamma.len()),
    ] {
        if len != n {
            return Err(PlanError::Shape {
                tensor: format!("batch norm {label}"),
                expected: n,
                actual: len,
            });
        }
    }
    let channels = (0..n)
        .map(|c| {
            let gamma = params.gamma[c] as f64;
            let var = params.variance[c] as f64;
            let mean = params.mean[c] as f64;
            let beta = params.beta[c] as f64;
            let scale = swsx * gamma / var * FIXED_POINT_GAIN;
            let bias = (beta - gamma * mean / var) * FIXED_POINT_GAIN;
            fold_channel(scale, bias)
        })
        .collect::<PlanResult<Vec<_>>>()?;

    debug!(channels = channels.len(), swsx, "folded batch norm");
    Ok(BnDescriptor {
        load_para: 1,
        channels,
    })
}
