//! Convolution quantizer.
//!
//! Weights and inputs are both affine-quantized, so the accelerator computes
//! `sum(w_q * x_q)` and corrects with cross terms:
//!
//! ```text
//! sum((w_q*sw + bw)(x_q*sx + bx)) / (sw*sx)
//!   = sum(w_q*x_q) + (bw/sw)*sum(x_q) + (bx/sx)*sum(w_q) + k*k*(bw/sw)*(bx/sx)
//! ```
//!
//! `arg_x` multiplies the input sum and `arg_w` the weight sum. The leftover
//! `sw*sx` factor (`swsx`) is handed to the batch-norm fold.

use serde::Serialize;
use tracing::debug;

use crate::calibration::{observe, AffineQuant, Range};
use crate::error::{PlanError, PlanResult};
use crate::hardware::{row_group, LINE_BUFFER_ROWS, LINE_WIDTH, SCALE_FIELD_BITS, WEIGHT_LOAD_CHANNELS};
use crate::layers::ConvLayer;
use crate::math::FixedPointScale;
use crate::oracle::EvaluationOracle;

/// Width of the conv additive field.
pub const ARG_ADD_BITS: u32 = 40;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvDescriptor {
    pub depth_wise_layer: bool,
    pub kernel_size: usize,
    /// `0` for 1x1, `1` for 3x3.
    pub kernel_type: u32,
    pub pad_type: u32,
    pub bypass_conv: u32,
    pub load_coor: u32,
    /// Set when the convolution does not run at stride 1.
    pub first_stride: bool,

    pub i_row_wid: usize,
    pub i_col_high: usize,
    pub i_ch_num: usize,
    pub o_ch_num: usize,
    pub coef_group: u32,
    pub row_switch_addr: usize,
    pub channel_switch_addr: usize,
    /// Weight cache loads needed to cover every output channel.
    pub load_time: usize,

    pub weight_byte_width: u8,
    pub input_range: Range,
    pub weight_range: Range,
    pub input_quant: AffineQuant,
    pub weight_quant: AffineQuant,
    /// Quantized kernel, output-channel major (`[o][i][h][w]`).
    pub weights: Vec<u32>,

    pub arg_x: FixedPointScale,
    pub arg_w: FixedPointScale,
    pub arg_add: i64,
    /// Fill value for padded border pixels, in input quantization steps.
    pub pad_value: f64,
    /// `scale_w * scale_x`.
    pub swsx: f64,
}

pub fn kernel_type(kernel_size: usize) -> PlanResult<u32> {
    match kernel_size {
        1 => Ok(0),
        3 => Ok(1),
        other => Err(PlanError::config(format!(
            "kernel size {other} (only 1x1 and 3x3 are supported)"
        ))),
    }
}

/// Number of weight cache loads for `och` output channels of `ich` inputs.
pub fn load_time(kernel_size: usize, ich: usize, och: usize) -> PlanResult<usize> {
    if ich == 0 {
        return Err(PlanError::config("zero input channels"));
    }
    let per_load = match kernel_size {
        3 => WEIGHT_LOAD_CHANNELS / ich,
        1 => WEIGHT_LOAD_CHANNELS * 8 / ich,
        other => return Err(PlanError::config(format!("kernel size {other}"))),
    };
    if per_load == 0 {
        return Err(PlanError::config(format!(
            "{ich} input channels exceed one weight cache load"
        )));
    }
    Ok(och.div_ceil(per_load))
}

/// Round the conv additive term and check it fits the signed 40-bit field.
pub fn arg_add_field(value: f64) -> PlanResult<i64> {
    if !value.is_finite() {
        return Err(PlanError::Representation {
            value,
            bits: ARG_ADD_BITS,
            reason: "not a finite number",
        });
    }
    let rounded = value.round();
    let half = (1i64 << (ARG_ADD_BITS - 1)) as f64;
    if rounded < -half || rounded >= half {
        return Err(PlanError::Representation {
            value,
            bits: ARG_ADD_BITS,
            reason: "conv additive term overflows",
        });
    }
    Ok(rounded as i64)
}

/// Transpose an HWIO kernel into `[o][i][h][w]` order.
fn reorder_output_major(codes: &[u32], dims: [usize; 4]) -> Vec<u32> {
    let [kh, kw, ich, och] = dims;
    let mut out = Vec::with_capacity(codes.len());
    for o in 0..och {
        for i in 0..ich {
            for h in 0..kh {
                for w in 0..kw {
                    out.push(codes[((h * kw + w) * ich + i) * och + o]);
                }
            }
        }
    }
    out
}

/// Quantize one convolution given the range of its input.
pub fn quantize_conv<O: EvaluationOracle + ?Sized>(
    layer: &ConvLayer,
    depth_wise: bool,
    weight_byte_width: u8,
    input_range: Range,
    oracle: &O,
    samples: &O::SampleSet,
) -> PlanResult<ConvDescriptor> {
    layer.validate(depth_wise)?;
    let kernel_size = layer.kernel_size();
    let kernel_type = kernel_type(kernel_size)?;

    let weight_range = observe(oracle, &layer.kernel, samples)?;
    let weight_quant = AffineQuant::for_weights(weight_range, weight_byte_width);
    let input_quant = AffineQuant::for_activations(input_range);

    let codes: Vec<u32> = layer
        .weights
        .iter()
        .map(|&w| weight_quant.quantize(w as f64))
        .collect();
    let weights = reorder_output_major(&codes, layer.kernel.shape.dims);

    let i_row_wid = layer.input.shape.width();
    let i_col_high = layer.input.shape.height();
    let i_ch_num = layer.in_channels();
    let o_ch_num = layer.out_channels();
    let row_switch_addr = i_row_wid.div_ceil(LINE_WIDTH);
    let load_time = load_time(kernel_size, i_ch_num, o_ch_num)?;

    let first_stride = layer.config.stride != 1;
    let working_rows = if first_stride {
        i_col_high as f64 / 2.0
    } else {
        i_col_high as f64
    };
    if working_rows >= LINE_BUFFER_ROWS as f64 {
        return Err(PlanError::config(format!(
            "layer `{}`: {working_rows} working rows exceed the {LINE_BUFFER_ROWS}-row line buffer",
            layer.name
        )));
    }

    let bx_div_sx = input_quant.offset_steps();
    let bw_div_sw = weight_quant.offset_steps();
    let arg_x = FixedPointScale::fit(bw_div_sw, SCALE_FIELD_BITS)?;
    let arg_w = FixedPointScale::fit(bx_div_sx, SCALE_FIELD_BITS)?;

    let arg_add = arg_add_field((kernel_size * kernel_size) as f64 * bw_div_sw * bx_div_sx)?;
    let swsx = weight_quant.scale * input_quant.scale;

    debug!(
        layer = %layer.name,
        kernel_size,
        load_time,
        w_min = weight_range.min,
        w_max = weight_range.max,
        arg_x = arg_x.mantissa,
        shr_x = arg_x.shift,
        arg_w = arg_w.mantissa,
        shr_w = arg_w.shift,
        swsx,
        "quantized convolution"
    );

    Ok(ConvDescriptor {
        depth_wise_layer: depth_wise,
        kernel_size,
        kernel_type,
        pad_type: 0,
        bypass_conv: 0,
        load_coor: 1,
        first_stride,
        i_row_wid,
        i_col_high,
        i_ch_num,
        o_ch_num,
        coef_group: row_group(i_row_wid),
        row_switch_addr,
        channel_switch_addr: i_col_high * row_switch_addr,
        load_time,
        weight_byte_width,
        input_range,
        weight_range,
        input_quant,
        weight_quant,
        weights,
        arg_x,
        arg_w,
        arg_add,
        pad_value: -bx_div_sx,
        swsx,
    })
}
