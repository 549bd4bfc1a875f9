//! Layer records consumed by the planner.
//!
//! A trained network arrives as an ordered list of tagged records. The list
//! is expected to read `NetworkHeader, (conv [pool])*`; anything else is a
//! sequence error raised by the plan builder.

pub mod activations;
pub mod conv;
pub mod pooling;

pub use activations::ActivationKind;
pub use conv::{BatchNormParams, ConvConfig, ConvLayer};
pub use pooling::{PoolKind, PoolLayer};

#[derive(Debug, Clone, PartialEq)]
pub enum LayerRecord {
    /// Network-level marker that opens every layer list.
    NetworkHeader,
    Convolution(ConvLayer),
    DepthwiseConvolution(ConvLayer),
    Pooling(PoolLayer),
}

impl LayerRecord {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LayerRecord::NetworkHeader => "NetworkHeader",
            LayerRecord::Convolution(_) => "Convolution",
            LayerRecord::DepthwiseConvolution(_) => "DepthwiseConvolution",
            LayerRecord::Pooling(_) => "Pooling",
        }
    }

    pub fn is_convolution(&self) -> bool {
        matches!(
            self,
            LayerRecord::Convolution(_) | LayerRecord::DepthwiseConvolution(_)
        )
    }
}
