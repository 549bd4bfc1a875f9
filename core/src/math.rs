//! Fixed-point factorization for the KPU's multiply-then-shift hardware.
//!
//! Every real scale factor the planner produces ends up in the accelerator as
//! an integer mantissa followed by an arithmetic right shift:
//!
//! ```text
//! value ≈ mantissa / 2^shift
//! ```
//!
//! The mantissa must fit a declared signed field width and the shift a
//! declared shift field. `factorize` grows the mantissa by doubling until one
//! more doubling would leave the field's upper quarter-range, so the result
//! keeps as many significant bits as the field allows.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{PlanError, PlanResult};

/// Default width, in bits, of a shift field (`2^4 - 1` = 15 doublings max).
pub const DEFAULT_MAX_SHIFT_BITS: u32 = 4;

/// Slopes are normalized until their magnitude reaches at least `2^14`.
pub const SLOPE_MANTISSA_FLOOR: f64 = (1u32 << 14) as f64;

/// Shift field of an activation segment is 8 bits wide.
pub const SLOPE_MAX_SHIFT: u32 = u8::MAX as u32;

// =============================================================================
// Raw factorization
// =============================================================================

/// Halve `value` until it lies in `(-1, 1]`.
///
/// Returns `(shift, normalized)` with `value == normalized * 2^shift`.
/// The shift is the number of integer bits the value occupies. Infinite
/// input is returned unchanged with a zero shift.
pub fn normalize_to_unit(value: f64) -> (u32, f64) {
    let mut shift = 0u32;
    let mut v = value;
    if !v.is_finite() {
        return (0, v);
    }
    while v > 1.0 || v <= -1.0 {
        v /= 2.0;
        shift += 1;
    }
    (shift, v)
}

/// Double `value` while it stays in `[-2^(bound_bits-2), 2^(bound_bits-2))`.
///
/// Stops early on zero (no progress possible) and after
/// `2^max_shift_bits - 1` doublings. Returns `(shift, scaled)` with
/// `scaled == value * 2^shift`; the mantissa is not rounded.
pub fn factorize(value: f64, bound_bits: u32, max_shift_bits: u32) -> (u32, f64) {
    let bound = (1u64 << (bound_bits - 2)) as f64;
    let max_shift = (1u32 << max_shift_bits) - 1;
    let mut shift = 0u32;
    let mut v = value;
    while v >= -bound && v < bound && v != 0.0 && shift < max_shift {
        v *= 2.0;
        shift += 1;
    }
    (shift, v)
}

// =============================================================================
// Checked fixed-point scales
// =============================================================================

/// A real value encoded as `mantissa / 2^shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointScale {
    pub mantissa: i64,
    pub shift: u32,
}

impl FixedPointScale {
    /// Factorize `value` into a mantissa fitting a signed `bound_bits` field,
    /// with at most `2^4 - 1` shifts.
    pub fn fit(value: f64, bound_bits: u32) -> PlanResult<Self> {
        Self::fit_with_shift_bits(value, bound_bits, DEFAULT_MAX_SHIFT_BITS)
    }

    pub fn fit_with_shift_bits(value: f64, bound_bits: u32, max_shift_bits: u32) -> PlanResult<Self> {
        if !value.is_finite() {
            return Err(PlanError::Representation {
                value,
                bits: bound_bits,
                reason: "not a finite number",
            });
        }
        let (shift, scaled) = factorize(value, bound_bits, max_shift_bits);
        let limit = 1i64 << (bound_bits - 1);
        let mut mantissa = scaled.round() as i64;

        // A mantissa just under the limit may round onto it.
        if mantissa == limit && scaled < limit as f64 {
            mantissa = limit - 1;
        }
        if mantissa >= limit || mantissa < -limit {
            return Err(PlanError::Representation {
                value,
                bits: bound_bits,
                reason: "mantissa overflows the field",
            });
        }
        if mantissa == 0 && value != 0.0 {
            return Err(PlanError::Representation {
                value,
                bits: bound_bits,
                reason: "shift saturated before the mantissa became representable",
            });
        }
        Ok(Self { mantissa, shift })
    }

    /// Normalize a non-negative activation slope so that its mantissa reaches
    /// at least `2^14`. A zero slope encodes as `(0, 0)`.
    pub fn fit_slope(slope: f64) -> PlanResult<Self> {
        if !slope.is_finite() || slope < 0.0 {
            return Err(PlanError::Representation {
                value: slope,
                bits: 16,
                reason: "activation slope must be finite and non-negative",
            });
        }
        let mut shift = 0u32;
        let mut v = slope;
        while v.abs() < SLOPE_MANTISSA_FLOOR && v != 0.0 {
            if shift == SLOPE_MAX_SHIFT {
                return Err(PlanError::Representation {
                    value: slope,
                    bits: 16,
                    reason: "slope shift exceeds the 8-bit shift field",
                });
            }
            v *= 2.0;
            shift += 1;
        }
        Ok(Self {
            mantissa: v.round() as i64,
            shift,
        })
    }

    /// The real value this pair stands for.
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 2f64.powi(self.shift as i32)
    }
}

// =============================================================================
// Two's complement fields
// =============================================================================

/// A signed integer checked to fit a `width`-bit two's-complement field.
///
/// Serializes as `{value, width, hex}`, where `hex` is the field encoding
/// written to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TwosComplement {
    pub value: i64,
    pub width: u32,
}

impl TwosComplement {
    pub fn new(value: i64, width: u32) -> PlanResult<Self> {
        if width == 0 || width > 64 {
            return Err(PlanError::Representation {
                value: value as f64,
                bits: width,
                reason: "field width must be 1..=64 bits",
            });
        }
        let half = 1i128 << (width - 1);
        let v = value as i128;
        if v < -half || v >= half {
            return Err(PlanError::Representation {
                value: value as f64,
                bits: width,
                reason: "outside the two's-complement range",
            });
        }
        Ok(Self { value, width })
    }

    /// Raw field bits, i.e. `value mod 2^width`.
    pub fn bits(&self) -> u64 {
        let modulus = 1i128 << self.width;
        (((self.value as i128) + modulus) % modulus) as u64
    }

    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.bits())
    }
}

impl Serialize for TwosComplement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut field = serializer.serialize_struct("TwosComplement", 3)?;
        field.serialize_field("value", &self.value)?;
        field.serialize_field("width", &self.width)?;
        field.serialize_field("hex", &self.to_hex())?;
        field.end()
    }
}

/// Encode `value` as a `width`-bit two's-complement hex literal (`0x...`).
pub fn encode_twos_complement(value: i64, width: u32) -> PlanResult<String> {
    Ok(TwosComplement::new(value, width)?.to_hex())
}

/// Inverse of [`encode_twos_complement`]. Returns `None` for malformed input,
/// an unsupported width, or literals wider than `width` bits.
pub fn decode_twos_complement(hex: &str, width: u32) -> Option<i64> {
    if width == 0 || width > 64 {
        return None;
    }
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    let bits = u64::from_str_radix(digits, 16).ok()?;
    if width < 64 && bits >> width != 0 {
        return None;
    }
    let sign = 1u64 << (width - 1);
    if bits & sign != 0 {
        Some((bits as i128 - (1i128 << width)) as i64)
    } else {
        Some(bits as i64)
    }
}
