//! Layer aggregation: one KPU layer = conv + batch-norm + activation
//! (+ pooling), plus the write-back and weight-cache geometry.

use serde::Serialize;

use crate::error::{PlanError, PlanResult};
use crate::hardware::{row_group, DMA_BURST_SIZE, LINE_WIDTH, WEIGHT_CACHE_BYTES};
use crate::layers::{ConvLayer, PoolLayer};
use crate::tensor::Shape;

use super::activation::ActivationTable;
use super::batchnorm::BnDescriptor;
use super::conv::ConvDescriptor;
use super::pooling::PoolDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerDescriptor {
    pub index: usize,
    pub name: String,
    pub conv: ConvDescriptor,
    pub bn: BnDescriptor,
    pub act: ActivationTable,
    pub pool: Option<PoolDescriptor>,

    /// Written-back image, after pooling when present.
    pub output_shape: Shape,
    pub o_row_wid: usize,
    pub o_col_high: usize,
    pub o_ch_num: usize,
    pub wb_group: u32,
    pub wb_row_switch_addr: usize,
    pub wb_channel_switch_addr: usize,
    pub channel_byte_num: usize,

    /// Kernel bytes of one output channel.
    pub o_ch_weights_size: usize,
    /// Same, padded to the weight cache's row layout.
    pub o_ch_weights_size_pad: usize,
    /// Output channels whose kernels fit one weight cache load.
    pub o_ch_num_coef: usize,
    pub para_size: usize,

    pub dma_total_byte: usize,
    pub dma_burst_size: u32,
    pub int_en: u32,
    pub send_data_out: u32,
}

/// Per-output-channel kernel bytes, unpadded and padded.
pub fn weight_cache_footprint(
    kernel_shape: Shape,
    depth_wise: bool,
    byte_width: u8,
) -> PlanResult<(usize, usize)> {
    let [kh, kw, ich, _] = kernel_shape.dims;
    let size = if depth_wise {
        kh * kw * byte_width as usize
    } else {
        kh * kw * ich * byte_width as usize
    };
    // 1x1 kernels are packed eight to a 9-slot cache row.
    let padded = match kh {
        1 => size.div_ceil(8) * 9,
        3 => size,
        other => {
            return Err(PlanError::config(format!("kernel footprint {other}")));
        }
    };
    Ok((size, padded))
}

pub struct LayerParts {
    pub conv: ConvDescriptor,
    pub bn: BnDescriptor,
    pub act: ActivationTable,
    pub pool: Option<PoolDescriptor>,
}

pub fn aggregate(
    index: usize,
    layer: &ConvLayer,
    pool_layer: Option<&PoolLayer>,
    parts: LayerParts,
) -> PlanResult<LayerDescriptor> {
    let output_shape = pool_layer.map_or(layer.output.shape, |p| p.output.shape);
    let LayerParts { conv, bn, act, pool } = parts;

    let (o_ch_weights_size, o_ch_weights_size_pad) =
        weight_cache_footprint(layer.kernel.shape, conv.depth_wise_layer, conv.weight_byte_width)?;
    if o_ch_weights_size_pad == 0 {
        return Err(PlanError::Shape {
            tensor: layer.kernel.name.clone(),
            expected: 1,
            actual: 0,
        });
    }
    let o_ch_num = output_shape.channels();
    let o_ch_num_coef = (WEIGHT_CACHE_BYTES / o_ch_weights_size_pad).min(o_ch_num);
    if o_ch_num_coef == 0 {
        return Err(PlanError::config(format!(
            "layer `{}`: {o_ch_weights_size_pad} kernel bytes per channel exceed the weight cache",
            layer.name
        )));
    }

    let o_row_wid = output_shape.width();
    let o_col_high = output_shape.height();
    let wb_row_switch_addr = o_row_wid.div_ceil(LINE_WIDTH);

    Ok(LayerDescriptor {
        index,
        name: layer.name.clone(),
        conv,
        bn,
        act,
        pool,
        output_shape,
        o_row_wid,
        o_col_high,
        o_ch_num,
        wb_group: row_group(o_row_wid),
        wb_row_switch_addr,
        wb_channel_switch_addr: o_col_high * wb_row_switch_addr,
        channel_byte_num: o_row_wid * o_col_high,
        o_ch_weights_size,
        o_ch_weights_size_pad,
        o_ch_num_coef,
        para_size: o_ch_num_coef * o_ch_weights_size,
        dma_total_byte: o_row_wid * o_col_high * o_ch_num,
        dma_burst_size: DMA_BURST_SIZE,
        int_en: 0,
        send_data_out: 0,
    })
}
