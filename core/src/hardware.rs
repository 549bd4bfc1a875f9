//! KPU hardware constants.
//!
//! Field widths and buffer capacities of the convolution accelerator the
//! planner targets. The layer descriptors are only meaningful for a device
//! with exactly this geometry.

/// Width of one image line in the KPU's 64-byte-wide image RAM.
pub const LINE_WIDTH: usize = 64;

/// Rows the line buffer can hold for one convolution pass.
pub const LINE_BUFFER_ROWS: usize = 256;

/// On-chip weight cache, in bytes (`2 * 9 * 4096`).
pub const WEIGHT_CACHE_BYTES: usize = 2 * 9 * 4096;

/// Input channels whose 3x3 kernels fit one weight load.
pub const WEIGHT_LOAD_CHANNELS: usize = 4096;

/// Width of the batch-norm multiplier and conv cross-term fields.
pub const SCALE_FIELD_BITS: u32 = 24;

/// Width of the batch-norm additive field.
pub const NORM_ADD_BITS: u32 = 32;

/// Activation tables hold 16 segments, sentinel included.
pub const ACTIVATION_TABLE_LEN: usize = 16;

/// Largest 8-bit activation code.
pub const ACTIVATION_LEVELS: u32 = 255;

/// Start of the leftmost activation segment: the most negative value of the
/// 36-bit `x` field.
pub const ACTIVATION_SENTINEL_X: i64 = -(1i64 << 35);

/// Gain applied to the batch-norm output so that the folded multiplier and
/// bias land inside the 24-bit and 32-bit fields. Activation `x` breakpoints
/// live in the same scaled domain.
///
/// Empirical, not derived from the hardware documentation. Check it against
/// the target device's accumulator width before relying on it.
pub const FIXED_POINT_GAIN: f64 = 100_000_000.0 / 3.0;

/// DMA burst size code written to every layer.
pub const DMA_BURST_SIZE: u32 = 0xf;

/// Row grouping code for an image of the given width.
pub fn row_group(width: usize) -> u32 {
    if width > 32 {
        1
    } else if width > 16 {
        2
    } else {
        4
    }
}

