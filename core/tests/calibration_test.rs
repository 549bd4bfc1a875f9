//! Range calibration, affine quantization and the recorded oracle.

use approx::assert_relative_eq;
use kpu_rust_core::*;
use proptest::prelude::*;

fn tensor(name: &str) -> TensorRef {
    TensorRef::new(name, Shape::nhwc(1, 2, 2, 1))
}

// =============================================================================
// Range
// =============================================================================

#[test]
fn test_range_checked() {
    let r = Range::checked("t", -1.0, 3.0).unwrap();
    assert_eq!(r.span(), 4.0);
    assert!(matches!(
        Range::checked("t", 2.0, 2.0),
        Err(PlanError::Calibration { .. })
    ));
    assert!(Range::checked("t", 3.0, 1.0).is_err());
    assert!(Range::checked("t", f64::NAN, 1.0).is_err());
}

#[test]
fn test_range_rejects_infinite_bounds() {
    assert!(matches!(
        Range::checked("t", 0.0, f64::INFINITY),
        Err(PlanError::Calibration { .. })
    ));
    assert!(Range::checked("t", f64::NEG_INFINITY, 0.0).is_err());
}

#[test]
fn test_range_default_is_unit() {
    assert_eq!(Range::default(), Range { min: 0.0, max: 1.0 });
}

// =============================================================================
// observe
// =============================================================================

#[test]
fn test_observe_uses_true_extrema_across_examples() {
    let mut oracle = RecordedOracle::new();
    oracle.record("act", vec![vec![0.5, -0.25, 0.0], vec![2.0, 1.0]]);
    let r = observe(&oracle, &tensor("act"), &[0, 1]).unwrap();
    assert_eq!(r, Range { min: -0.25, max: 2.0 });
}

#[test]
fn test_observe_respects_sample_set() {
    let mut oracle = RecordedOracle::new();
    oracle.record("act", vec![vec![0.5, -0.25], vec![2.0, 1.0]]);
    let r = observe(&oracle, &tensor("act"), &[1]).unwrap();
    assert_eq!(r, Range { min: 1.0, max: 2.0 });
}

#[test]
fn test_observe_degenerate_range_is_calibration_error() {
    let mut oracle = RecordedOracle::new();
    oracle.record_constant("w", vec![0.0; 9], 2);
    let err = observe(&oracle, &tensor("w"), &[0, 1]).unwrap_err();
    assert!(matches!(err, PlanError::Calibration { ref tensor, .. } if tensor == "w"));
}

#[test]
fn test_observe_infinite_sample_is_calibration_error() {
    let mut oracle = RecordedOracle::new();
    oracle.record("act", vec![vec![0.5, f32::INFINITY]]);
    assert!(matches!(
        observe(&oracle, &tensor("act"), &[0]),
        Err(PlanError::Calibration { .. })
    ));
}

#[test]
fn test_recorded_oracle_counts_examples() {
    let mut oracle = RecordedOracle::new();
    oracle.record_constant("w", vec![0.1, 0.2], 3);
    assert_eq!(oracle.examples("w"), 3);
    assert_eq!(oracle.examples("missing"), 0);
    let values = oracle.evaluate(&tensor("w"), &[0, 2]).unwrap();
    assert_eq!(values, vec![0.1, 0.2, 0.1, 0.2]);
}

#[test]
fn test_observe_oracle_errors_propagate() {
    let mut oracle = RecordedOracle::new();
    oracle.record("act", vec![vec![1.0, 2.0]]);
    assert!(matches!(
        observe(&oracle, &tensor("missing"), &[0]),
        Err(PlanError::Oracle { .. })
    ));
    assert!(matches!(
        observe(&oracle, &tensor("act"), &[3]),
        Err(PlanError::Oracle { .. })
    ));
    assert!(matches!(
        observe(&oracle, &tensor("act"), &[]),
        Err(PlanError::Oracle { .. })
    ));
}

// =============================================================================
// AffineQuant
// =============================================================================

#[test]
fn test_affine_activations() {
    let q = AffineQuant::for_activations(Range { min: -1.0, max: 1.55 });
    assert_eq!(q.bias, -1.0);
    assert_relative_eq!(q.scale, 0.01, max_relative = 1e-12);
    assert_eq!(q.quantize(-1.0), 0);
    assert_eq!(q.quantize(1.55), 255);
    assert_eq!(q.quantize(-5.0), 0);
    assert_eq!(q.quantize(9.0), 255);
    assert_relative_eq!(q.offset_steps(), -100.0, max_relative = 1e-12);
}

#[test]
fn test_affine_weights_clamp_top_code() {
    let q = AffineQuant::for_weights(Range { min: 0.0, max: 5.0 }, 1);
    assert_eq!(q.max_code, 255);
    assert_relative_eq!(q.scale, 5.0 / 256.0);
    assert_eq!(q.quantize(5.0), 255);
    assert_eq!(q.quantize(3.0), 154);

    let wide = AffineQuant::for_weights(Range { min: -0.5, max: 0.5 }, 2);
    assert_eq!(wide.max_code, 65535);
    assert_relative_eq!(wide.offset_steps(), -32768.0);
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    /// Quantize-then-dequantize stays within one step.
    #[test]
    fn prop_affine_round_trip(
        min in -100.0f64..100.0,
        span in 1.0e-3f64..100.0,
        t in 0.0f64..=1.0,
        byte_width in 0u8..=2,
    ) {
        let range = Range::checked("p", min, min + span).unwrap();
        let q = if byte_width == 0 {
            AffineQuant::for_activations(range)
        } else {
            AffineQuant::for_weights(range, byte_width)
        };
        let v = min + t * span;
        let err = (q.dequantize(q.quantize(v)) - v).abs();
        prop_assert!(err <= q.scale * (1.0 + 1e-9), "err {} > scale {}", err, q.scale);
    }
}
