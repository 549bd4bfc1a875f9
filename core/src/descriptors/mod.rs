//! Hardware descriptors produced for each KPU layer.

pub mod activation;
pub mod batchnorm;
pub mod conv;
pub mod layer;
pub mod pooling;

pub use activation::{build_table, fit_activation, ActivationTable, Breakpoint};
pub use batchnorm::{fold_batch_norm, fold_channel, BnChannel, BnDescriptor};
pub use conv::{quantize_conv, ConvDescriptor};
pub use layer::{aggregate, LayerDescriptor, LayerParts};
pub use pooling::{max_pool_opcode, pool_descriptor, PoolDescriptor};
