//! Activation table fitting.
//!
//! The KPU's activation unit evaluates a 16-segment piecewise-linear
//! function. Each segment starts at `x` (in the batch-norm output domain,
//! i.e. scaled by [`FIXED_POINT_GAIN`]) with an 8-bit output `y` and a slope
//! stored as `mantissa >> shift`.
//!
//! Breakpoints are spaced evenly in the *output* range and mapped back
//! through the activation's inverse, with extra anchors at `0` (the leaky
//! knee) and at `max_y`. A sentinel segment starting at the most negative
//! `x` holds the output at `min_y`.

use serde::Serialize;
use tracing::{debug, warn};

use crate::calibration::{observe, AffineQuant, Range};
use crate::error::{PlanError, PlanResult};
use crate::hardware::{ACTIVATION_SENTINEL_X, ACTIVATION_TABLE_LEN, FIXED_POINT_GAIN};
use crate::layers::{ActivationKind, ConvLayer};
use crate::math::{FixedPointScale, TwosComplement};
use crate::oracle::EvaluationOracle;

/// Evenly spaced output samples before the anchors are added.
const EVEN_SAMPLES: usize = 14;

/// Width of the segment start field.
pub const ACTIVATION_X_BITS: u32 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub x: i64,
    pub y: u8,
    pub slope_shift: u32,
    pub slope_mantissa: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationTable {
    pub kind: ActivationKind,
    /// Observed output range of the activation.
    pub range: Range,
    pub breakpoints: Vec<Breakpoint>,
}

impl ActivationTable {
    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}

/// Real-valued `(x, y, slope)` segments of `kind` across `range`.
fn segments(kind: ActivationKind, range: Range) -> Vec<(f64, f64, f64)> {
    let step = range.span() / EVEN_SAMPLES as f64;
    let mut ys: Vec<f64> = (0..EVEN_SAMPLES)
        .map(|i| range.min + i as f64 * step)
        .chain([0.0, range.max])
        .collect();
    ys.sort_by(f64::total_cmp);

    let before = ys.len();
    ys.dedup();
    if ys.len() != before {
        warn!(
            kind = kind.name(),
            dropped = before - ys.len(),
            "duplicate activation anchors removed"
        );
    }

    let xs: Vec<f64> = ys.iter().map(|&y| kind.inverse(y)).collect();
    (0..ys.len() - 1)
        .map(|i| {
            let slope = match kind {
                ActivationKind::Linear => 1.0,
                ActivationKind::Leaky => (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]),
            };
            (xs[i], ys[i], slope)
        })
        .take(ACTIVATION_TABLE_LEN - 1)
        .collect()
}

/// Build the quantized table of `kind` for an observed output `range`.
pub fn build_table(kind: ActivationKind, range: Range) -> PlanResult<ActivationTable> {
    let y_quant = AffineQuant::for_activations(range);
    let y_steps = 1.0 / y_quant.scale;

    let mut breakpoints = Vec::with_capacity(ACTIVATION_TABLE_LEN);
    breakpoints.push(Breakpoint {
        x: ACTIVATION_SENTINEL_X,
        y: 0,
        slope_shift: 0,
        slope_mantissa: 0,
    });

    for (x, y, slope) in segments(kind, range) {
        if slope == 0.0 {
            warn!(kind = kind.name(), x, "activation segment has zero slope");
        }
        let x_fixed = (x * FIXED_POINT_GAIN).round() as i64;
        TwosComplement::new(x_fixed, ACTIVATION_X_BITS)?;
        let slope = FixedPointScale::fit_slope(slope / FIXED_POINT_GAIN * y_steps)?;
        breakpoints.push(Breakpoint {
            x: x_fixed,
            y: y_quant.quantize(y) as u8,
            slope_shift: slope.shift,
            slope_mantissa: slope.mantissa,
        });
    }

    if breakpoints.windows(2).any(|w| w[0].x >= w[1].x) {
        return Err(PlanError::Calibration {
            tensor: format!("{} activation", kind.name()),
            min: range.min,
            max: range.max,
        });
    }

    debug!(
        kind = kind.name(),
        min_y = range.min,
        max_y = range.max,
        entries = breakpoints.len(),
        "fitted activation table"
    );
    Ok(ActivationTable {
        kind,
        range,
        breakpoints,
    })
}

/// Observe a convolution's activation output and fit its table.
pub fn fit_activation<O: EvaluationOracle + ?Sized>(
    layer: &ConvLayer,
    oracle: &O,
    samples: &O::SampleSet,
) -> PlanResult<ActivationTable> {
    let kind = ActivationKind::from_name(&layer.config.activation)?;
    let range = observe(oracle, &layer.activation, samples)?;
    build_table(kind, range)
}
