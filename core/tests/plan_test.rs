//! End-to-end planning: layer sequencing, range threading and serialization.

mod common;

use common::*;
use kpu_rust_core::descriptors::fold_batch_norm;
use kpu_rust_core::*;

/// Header followed by one 3x3 linear convolution without batch-norm.
fn single_layer() -> (Vec<LayerRecord>, RecordedOracle) {
    let fixture = ConvFixture::new("conv0", 3, 1, 2);
    let layer = fixture.build(fixture.ramp_weights(), vec![0.01, -0.02]);
    let mut oracle = RecordedOracle::new();
    record_layer(&mut oracle, &layer, [vec![-2.0, 0.5], vec![3.0, 1.0]]);
    (
        vec![LayerRecord::NetworkHeader, LayerRecord::Convolution(layer)],
        oracle,
    )
}

fn plan(layers: &[LayerRecord], oracle: &RecordedOracle) -> PlanResult<NetworkPlan> {
    build_plan(layers, oracle, &ALL_SAMPLES[..], &PlanOptions::default())
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_single_conv_layer() {
    let (layers, oracle) = single_layer();
    let LayerRecord::Convolution(conv) = &layers[1] else {
        unreachable!()
    };
    assert!(!conv.batch_normalize());
    let plan = plan(&layers, &oracle).unwrap();
    assert_eq!(plan.len(), 1);

    let layer = plan.layer(0).unwrap();
    assert_eq!(layer.index, 0);
    assert_eq!(layer.name, "conv0");
    assert_eq!(layer.conv.kernel_type, 1);
    assert_eq!(layer.conv.kernel_size, 3);
    assert_eq!(layer.conv.input_range, Range::unit());
    assert_eq!(layer.conv.weight_byte_width, 2);
    assert_eq!(layer.conv.weights.len(), 18);
    assert!(layer.pool.is_none());

    // Identity fold: bias add only.
    assert_eq!(layer.bn.len(), 2);
    assert_eq!(layer.bn.channels[0].norm_add.value, 333333);
    assert_eq!(layer.bn.channels[1].norm_add.value, -666667);
    assert_eq!(layer.bn.channels[0].norm_mul, layer.bn.channels[1].norm_mul);

    let act = &layer.act;
    assert_eq!(act.kind, ActivationKind::Linear);
    assert_eq!(act.range, Range { min: -2.0, max: 3.0 });
    assert_eq!(act.len(), 16);
    for w in act.breakpoints.windows(2) {
        assert!(w[0].x < w[1].x);
    }
    let unit_slope = (act.breakpoints[1].slope_shift, act.breakpoints[1].slope_mantissa);
    for bp in &act.breakpoints[1..] {
        assert_eq!((bp.slope_shift, bp.slope_mantissa), unit_slope);
    }

    assert_eq!(layer.output_shape, Shape::nhwc(1, 8, 8, 2));
    assert_eq!(layer.dma_total_byte, 128);
    assert_eq!(layer.o_ch_weights_size, 18);
    assert_eq!(layer.o_ch_num_coef, 2);
    assert_eq!(layer.para_size, 36);
    assert_eq!(plan.output_range(), Some(Range { min: -2.0, max: 3.0 }));
}

#[test]
fn test_stacked_layers_thread_activation_range() {
    let first = ConvFixture::new("conv0", 3, 1, 2).activation("leaky");
    let first_layer = first.build(first.ramp_weights(), vec![0.0; 2]);
    let second = ConvFixture::new("conv1", 1, 2, 4);
    let second_layer = second.build(second.ramp_weights(), vec![0.0; 4]);

    let mut oracle = RecordedOracle::new();
    record_layer(&mut oracle, &first_layer, [vec![-0.4, 1.0], vec![2.5]]);
    record_layer(&mut oracle, &second_layer, [vec![-1.0], vec![4.0, 0.5]]);
    // The raw image range must not leak into the second layer.
    oracle.record_constant("conv1/x", vec![0.0, 1.0], EXAMPLES);

    let layers = vec![
        LayerRecord::NetworkHeader,
        LayerRecord::Convolution(first_layer),
        LayerRecord::Convolution(second_layer),
    ];
    let plan = plan(&layers, &oracle).unwrap();
    assert_eq!(plan.len(), 2);

    let l0 = &plan.layers[0];
    let l1 = &plan.layers[1];
    assert_eq!(l0.act.range, Range { min: -0.4, max: 2.5 });
    assert_eq!(l1.conv.input_range, l0.act.range);
    assert_eq!(l1.conv.input_quant, AffineQuant::for_activations(l0.act.range));
    assert_eq!(l1.index, 1);
    assert_eq!(l1.conv.kernel_type, 0);
    assert_eq!(l0.act.len(), 16);
    assert_eq!(plan.output_range(), Some(Range { min: -1.0, max: 4.0 }));
}

#[test]
fn test_conv_followed_by_max_pool() {
    let fixture = ConvFixture::new("conv0", 3, 1, 2);
    let layer = fixture.build(fixture.ramp_weights(), vec![0.0; 2]);
    let pool = pool_after(&layer, 2, 2);
    let mut oracle = RecordedOracle::new();
    record_layer(&mut oracle, &layer, [vec![-2.0, 0.5], vec![3.0]]);

    let layers = vec![
        LayerRecord::NetworkHeader,
        LayerRecord::Convolution(layer),
        LayerRecord::Pooling(pool),
    ];
    let plan = plan(&layers, &oracle).unwrap();
    assert_eq!(plan.len(), 1);

    let layer = &plan.layers[0];
    assert_eq!(layer.pool, Some(PoolDescriptor { opcode: 1 }));
    assert_eq!(layer.output_shape, Shape::nhwc(1, 4, 4, 2));
    assert_eq!((layer.o_row_wid, layer.o_col_high, layer.o_ch_num), (4, 4, 2));
    assert_eq!(layer.dma_total_byte, 32);
    assert_eq!(layer.channel_byte_num, 16);
    assert_eq!(layer.wb_group, 4);
    assert_eq!(layer.wb_row_switch_addr, 1);
    assert_eq!(layer.wb_channel_switch_addr, 4);
    // The convolution itself still runs at full resolution.
    assert_eq!(layer.conv.i_row_wid, 8);
}

#[test]
fn test_depthwise_then_pointwise() {
    let dw = ConvFixture::new("dw", 3, 2, 1);
    let mut dw_layer = dw.build(dw.ramp_weights(), vec![0.0; 2]);
    dw_layer.output.shape = Shape::nhwc(1, 8, 8, 2);
    dw_layer.activation.shape = Shape::nhwc(1, 8, 8, 2);
    let pw = ConvFixture::new("pw", 1, 2, 3);
    let pw_layer = pw.build(pw.ramp_weights(), vec![0.0; 3]);

    let mut oracle = RecordedOracle::new();
    record_layer(&mut oracle, &dw_layer, [vec![-1.0, 1.0], vec![2.0]]);
    record_layer(&mut oracle, &pw_layer, [vec![-3.0, 1.0], vec![2.0]]);

    let layers = vec![
        LayerRecord::NetworkHeader,
        LayerRecord::DepthwiseConvolution(dw_layer),
        LayerRecord::Convolution(pw_layer),
    ];
    let options = PlanOptions::default().with_weight_byte_widths(vec![1, 2]);
    let plan = build_plan(&layers, &oracle, &ALL_SAMPLES[..], &options).unwrap();

    let dw = &plan.layers[0];
    assert!(dw.conv.depth_wise_layer);
    assert_eq!(dw.conv.weight_byte_width, 1);
    assert_eq!(dw.o_ch_weights_size, 9);
    assert!(!plan.layers[1].conv.depth_wise_layer);
    assert_eq!(plan.layers[1].conv.weight_byte_width, 2);
}

#[test]
fn test_batch_norm_layer_folds_statistics() {
    let fixture = ConvFixture::new("bn0", 3, 1, 2);
    let mut layer = fixture.build(fixture.ramp_weights(), vec![0.0; 2]);
    let params = BatchNormParams {
        mean: vec![0.5, -0.5],
        variance: vec![2.0, 1.0],
        gamma: vec![1.5, 0.5],
        beta: vec![0.25, 0.0],
    };
    layer.batch_norm = Some(params.clone());
    assert!(layer.batch_normalize());
    let mut oracle = RecordedOracle::new();
    record_layer(&mut oracle, &layer, [vec![-2.0, 0.5], vec![3.0]]);

    let layers = vec![LayerRecord::NetworkHeader, LayerRecord::Convolution(layer)];
    let plan = plan(&layers, &oracle).unwrap();
    let planned = &plan.layers[0];
    assert_eq!(planned.bn, fold_batch_norm(&params, planned.conv.swsx).unwrap());
    assert_eq!(planned.bn.channels[0].norm_add.value, -4166667);
}

#[test]
fn test_custom_input_range() {
    let (layers, oracle) = single_layer();
    let input = Range { min: -1.0, max: 1.0 };
    let options = PlanOptions::default().with_input_range(input);
    let plan = build_plan(&layers, &oracle, &ALL_SAMPLES[..], &options).unwrap();
    assert_eq!(plan.layers[0].conv.input_range, input);
    assert!(plan.layers[0].conv.pad_value > 0.0);
}

#[test]
fn test_header_only_plan_is_empty() {
    let oracle = RecordedOracle::new();
    let plan = plan(&[LayerRecord::NetworkHeader], &oracle).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.output_range(), None);
}

// =============================================================================
// Sequence errors
// =============================================================================

#[test]
fn test_empty_layer_list_is_sequence_error() {
    let oracle = RecordedOracle::new();
    assert!(matches!(
        plan(&[], &oracle),
        Err(PlanError::Sequence { index: 0, .. })
    ));
}

#[test]
fn test_missing_header_is_sequence_error() {
    let (mut layers, oracle) = single_layer();
    layers.remove(0);
    assert!(matches!(
        plan(&layers, &oracle),
        Err(PlanError::Sequence { index: 0, .. })
    ));
}

#[test]
fn test_leading_pool_is_sequence_error() {
    let (mut layers, oracle) = single_layer();
    let LayerRecord::Convolution(conv) = layers[1].clone() else {
        unreachable!()
    };
    layers.insert(1, LayerRecord::Pooling(pool_after(&conv, 2, 2)));
    assert!(matches!(
        plan(&layers, &oracle),
        Err(PlanError::Sequence { index: 1, .. })
    ));
}

#[test]
fn test_double_pool_is_sequence_error() {
    let (mut layers, oracle) = single_layer();
    let LayerRecord::Convolution(conv) = layers[1].clone() else {
        unreachable!()
    };
    layers.push(LayerRecord::Pooling(pool_after(&conv, 2, 2)));
    layers.push(LayerRecord::Pooling(pool_after(&conv, 2, 2)));
    assert!(matches!(
        plan(&layers, &oracle),
        Err(PlanError::Sequence { index: 3, .. })
    ));
}

#[test]
fn test_second_header_is_sequence_error() {
    let (mut layers, oracle) = single_layer();
    layers.push(LayerRecord::NetworkHeader);
    assert!(matches!(
        plan(&layers, &oracle),
        Err(PlanError::Sequence { index: 2, .. })
    ));
}

// =============================================================================
// Options and failure propagation
// =============================================================================

#[test]
fn test_byte_width_list_must_match_convolutions() {
    let (layers, oracle) = single_layer();
    let options = PlanOptions::default().with_weight_byte_widths(vec![2, 2]);
    assert!(matches!(
        build_plan(&layers, &oracle, &ALL_SAMPLES[..], &options),
        Err(PlanError::Configuration(_))
    ));
}

#[test]
fn test_byte_width_must_be_one_or_two() {
    let (layers, oracle) = single_layer();
    let options = PlanOptions::default().with_weight_byte_widths(vec![3]);
    assert!(matches!(
        build_plan(&layers, &oracle, &ALL_SAMPLES[..], &options),
        Err(PlanError::Configuration(_))
    ));
}

#[test]
fn test_degenerate_input_range_is_rejected() {
    let (layers, oracle) = single_layer();
    let options = PlanOptions::default().with_input_range(Range { min: 1.0, max: 1.0 });
    assert!(matches!(
        build_plan(&layers, &oracle, &ALL_SAMPLES[..], &options),
        Err(PlanError::Calibration { .. })
    ));
}

#[test]
fn test_missing_recording_aborts_plan() {
    let (layers, _) = single_layer();
    let oracle = RecordedOracle::new();
    assert!(matches!(
        plan(&layers, &oracle),
        Err(PlanError::Oracle { .. })
    ));
}

#[test]
fn test_unsupported_pool_aborts_plan() {
    let (mut layers, oracle) = single_layer();
    let LayerRecord::Convolution(conv) = layers[1].clone() else {
        unreachable!()
    };
    layers.push(LayerRecord::Pooling(pool_after(&conv, 3, 1)));
    assert!(matches!(
        plan(&layers, &oracle),
        Err(PlanError::Configuration(_))
    ));
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn test_plan_serializes_to_json() {
    let (layers, oracle) = single_layer();
    let plan = plan(&layers, &oracle).unwrap();
    let json = serde_json::to_value(&plan).unwrap();

    let layer = &json["layers"][0];
    assert_eq!(layer["name"], "conv0");
    assert_eq!(layer["conv"]["kernel_type"], 1);
    assert_eq!(layer["act"]["kind"], "linear");
    assert_eq!(layer["act"]["breakpoints"].as_array().unwrap().len(), 16);
    assert_eq!(layer["bn"]["channels"][0]["norm_add"]["value"], 333333);
    assert_eq!(layer["bn"]["channels"][0]["norm_add"]["hex"], "0x51615");
    assert_eq!(layer["bn"]["channels"][1]["norm_add"]["hex"], "0xfff5d3d5");
    assert_eq!(layer["bn"]["channels"][0]["norm_mul"]["width"], 24);
    assert!(layer["pool"].is_null());
}

#[test]
fn test_plan_options_from_json() {
    let options: PlanOptions =
        serde_json::from_str(r#"{"weight_byte_widths": [1, 2]}"#).unwrap();
    assert_eq!(options.weight_byte_widths, Some(vec![1, 2]));
    assert_eq!(options.input_range, Range::unit());

    let options: PlanOptions =
        serde_json::from_str(r#"{"input_range": {"min": -1.0, "max": 1.0}}"#).unwrap();
    assert_eq!(options.weight_byte_widths, None);
    assert_eq!(options.input_range, Range { min: -1.0, max: 1.0 });
}
