//! NetworkPlan: walk the layer list and emit one descriptor per KPU layer.
//!
//! ```text
//! header → conv [pool] → conv [pool] → ... → done
//! ```
//!
//! Each convolution is quantized against the activation range fitted for the
//! layer before it, so layers are planned strictly in order.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::calibration::Range;
use crate::descriptors::{
    aggregate, fit_activation, fold_batch_norm, pool_descriptor, quantize_conv, LayerDescriptor,
    LayerParts,
};
use crate::error::{PlanError, PlanResult};
use crate::layers::{ConvLayer, LayerRecord, PoolLayer};
use crate::oracle::EvaluationOracle;

/// Weight byte width used when no per-layer list is given.
pub const DEFAULT_WEIGHT_BYTE_WIDTH: u8 = 2;

/// Caller-selected planning options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    /// Bytes per weight (1 or 2), one entry per convolution.
    pub weight_byte_widths: Option<Vec<u8>>,
    /// Range of the network input image.
    pub input_range: Range,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            weight_byte_widths: None,
            input_range: Range::unit(),
        }
    }
}

impl PlanOptions {
    pub fn with_weight_byte_widths(mut self, widths: Vec<u8>) -> Self {
        self.weight_byte_widths = Some(widths);
        self
    }

    pub fn with_input_range(mut self, range: Range) -> Self {
        self.input_range = range;
        self
    }

    /// One validated byte width per convolution in `layers`.
    pub fn resolve_byte_widths(&self, layers: &[LayerRecord]) -> PlanResult<Vec<u8>> {
        let convs = layers.iter().filter(|l| l.is_convolution()).count();
        let widths = match &self.weight_byte_widths {
            None => return Ok(vec![DEFAULT_WEIGHT_BYTE_WIDTH; convs]),
            Some(widths) => widths,
        };
        if widths.len() != convs {
            return Err(PlanError::config(format!(
                "{} weight byte widths for {convs} convolution layers",
                widths.len()
            )));
        }
        if let Some(bad) = widths.iter().find(|&&w| w != 1 && w != 2) {
            return Err(PlanError::config(format!("weight byte width {bad}")));
        }
        Ok(widths.clone())
    }
}

/// Ordered KPU layer descriptors, one per convolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkPlan {
    pub layers: Vec<LayerDescriptor>,
}

impl NetworkPlan {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, idx: usize) -> Option<&LayerDescriptor> {
        self.layers.get(idx)
    }

    /// Activation range of the last layer, i.e. the network output.
    pub fn output_range(&self) -> Option<Range> {
        self.layers.last().map(|l| l.act.range)
    }
}

enum State<'l> {
    ExpectHeader,
    ExpectConv,
    ExpectOptionalPool {
        conv: &'l ConvLayer,
        depth_wise: bool,
    },
    Done,
}

/// Quantize one layer's conv, batch-norm and activation.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(conv, pool, oracle, samples), fields(name = %conv.name))]
fn plan_layer<O: EvaluationOracle + ?Sized>(
    index: usize,
    conv: &ConvLayer,
    depth_wise: bool,
    pool: Option<&PoolLayer>,
    byte_width: u8,
    input_range: Range,
    oracle: &O,
    samples: &O::SampleSet,
) -> PlanResult<LayerDescriptor> {
    let conv_desc = quantize_conv(conv, depth_wise, byte_width, input_range, oracle, samples)?;
    let bn = fold_batch_norm(&conv.folding_params(), conv_desc.swsx)?;
    let act = fit_activation(conv, oracle, samples)?;
    let pool_desc = pool.map(pool_descriptor).transpose()?;
    let layer = aggregate(
        index,
        conv,
        pool,
        LayerParts {
            conv: conv_desc,
            bn,
            act,
            pool: pool_desc,
        },
    )?;
    info!(
        out_min = layer.act.range.min,
        out_max = layer.act.range.max,
        pooled = layer.pool.is_some(),
        "planned layer"
    );
    Ok(layer)
}

/// Build the plan for `layers`, calibrating against `samples`.
pub fn build_plan<O: EvaluationOracle + ?Sized>(
    layers: &[LayerRecord],
    oracle: &O,
    samples: &O::SampleSet,
    options: &PlanOptions,
) -> PlanResult<NetworkPlan> {
    let widths = options.resolve_byte_widths(layers)?;
    let mut records = layers.iter().enumerate().peekable();
    let mut planned: Vec<LayerDescriptor> = Vec::with_capacity(widths.len());
    let mut input_range = Range::checked(
        "network input",
        options.input_range.min,
        options.input_range.max,
    )?;
    let mut state = State::ExpectHeader;

    loop {
        state = match state {
            State::ExpectHeader => match records.next() {
                Some((_, LayerRecord::NetworkHeader)) => State::ExpectConv,
                Some((index, other)) => {
                    return Err(PlanError::Sequence {
                        index,
                        reason: format!("expected network header, found {}", other.kind_name()),
                    });
                }
                None => {
                    return Err(PlanError::Sequence {
                        index: 0,
                        reason: "empty layer list".into(),
                    });
                }
            },
            State::ExpectConv => match records.next() {
                None => State::Done,
                Some((_, LayerRecord::Convolution(conv))) => State::ExpectOptionalPool {
                    conv,
                    depth_wise: false,
                },
                Some((_, LayerRecord::DepthwiseConvolution(conv))) => State::ExpectOptionalPool {
                    conv,
                    depth_wise: true,
                },
                Some((index, other)) => {
                    return Err(PlanError::Sequence {
                        index,
                        reason: format!("expected convolution, found {}", other.kind_name()),
                    });
                }
            },
            State::ExpectOptionalPool { conv, depth_wise } => {
                let pool = match records.peek().map(|&(_, record)| record) {
                    Some(LayerRecord::Pooling(pool)) => Some(pool),
                    _ => None,
                };
                if pool.is_some() {
                    records.next();
                }
                let index = planned.len();
                let layer = plan_layer(
                    index,
                    conv,
                    depth_wise,
                    pool,
                    widths[index],
                    input_range,
                    oracle,
                    samples,
                )?;
                input_range = layer.act.range;
                planned.push(layer);
                State::ExpectConv
            }
            State::Done => break,
        };
    }

    Ok(NetworkPlan { layers: planned })
}
