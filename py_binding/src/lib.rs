//! Python bindings for kpu-rust-core via PyO3.
//!
//! The trained graph lives on the Python side, so the evaluation oracle is a
//! Python callable `oracle(tensor_name, samples) -> list[float]`. Layers are
//! named by convention: a convolution `name` reads its kernel from
//! `name/w` and its activation output from `name/act`.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use kpu_rust_core::{
    build_plan, math, BatchNormParams, ConvConfig, ConvLayer, EvaluationOracle, LayerRecord,
    PlanError, PlanOptions, PlanResult, PoolLayer, Range, Shape, TensorRef,
};

fn to_py_err(e: PlanError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Calls back into Python for every calibration request.
struct PyOracle<'a, 'py> {
    callable: &'a Bound<'py, PyAny>,
}

impl<'py> EvaluationOracle for PyOracle<'_, 'py> {
    type SampleSet = Bound<'py, PyAny>;

    fn evaluate(&self, tensor: &TensorRef, samples: &Self::SampleSet) -> PlanResult<Vec<f32>> {
        let oracle_err = |e: PyErr| PlanError::Oracle {
            tensor: tensor.name.clone(),
            message: e.to_string(),
        };
        self.callable
            .call1((tensor.name.as_str(), samples.clone()))
            .map_err(oracle_err)?
            .extract::<Vec<f32>>()
            .map_err(oracle_err)
    }
}

type BatchNormTuple = (Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>);

/// Collects `header, (conv [pool])*` records and plans them.
#[pyclass(name = "NetworkBuilder")]
#[derive(Default)]
pub struct PyNetworkBuilder {
    layers: Vec<LayerRecord>,
}

impl PyNetworkBuilder {
    #[allow(clippy::too_many_arguments)]
    fn conv_record(
        name: &str,
        weights: Vec<f32>,
        bias: Vec<f32>,
        kernel: Shape,
        in_channels: usize,
        out_channels: usize,
        height: usize,
        width: usize,
        stride: usize,
        activation: &str,
        batch_norm: Option<BatchNormTuple>,
    ) -> PyResult<ConvLayer> {
        if stride == 0 {
            return Err(PyValueError::new_err("stride must be positive"));
        }
        let (oh, ow) = (height.div_ceil(stride), width.div_ceil(stride));
        let layer = ConvLayer {
            name: name.to_string(),
            weights,
            bias,
            batch_norm: batch_norm.map(|(mean, variance, gamma, beta)| BatchNormParams {
                mean,
                variance,
                gamma,
                beta,
            }),
            config: ConvConfig {
                stride,
                activation: activation.to_string(),
            },
            input: TensorRef::new(format!("{name}/x"), Shape::nhwc(1, height, width, in_channels)),
            kernel: TensorRef::new(format!("{name}/w"), kernel),
            output: TensorRef::new(format!("{name}/y"), Shape::nhwc(1, oh, ow, out_channels)),
            activation: TensorRef::new(format!("{name}/act"), Shape::nhwc(1, oh, ow, out_channels)),
        };
        Ok(layer)
    }

    /// Output shape of the convolution a pooling record would follow.
    fn last_conv_output(&self) -> PyResult<Shape> {
        match self.layers.last() {
            Some(LayerRecord::Convolution(conv)) | Some(LayerRecord::DepthwiseConvolution(conv)) => {
                Ok(conv.output.shape)
            }
            _ => Err(PyValueError::new_err("max pooling must follow a convolution")),
        }
    }
}

#[pymethods]
impl PyNetworkBuilder {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    fn add_header(&mut self) {
        self.layers.push(LayerRecord::NetworkHeader);
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(signature = (name, weights, bias, kernel_size, in_channels, out_channels, height, width, stride=1, activation="linear", batch_norm=None))]
    fn add_conv(
        &mut self,
        name: &str,
        weights: Vec<f32>,
        bias: Vec<f32>,
        kernel_size: usize,
        in_channels: usize,
        out_channels: usize,
        height: usize,
        width: usize,
        stride: usize,
        activation: &str,
        batch_norm: Option<BatchNormTuple>,
    ) -> PyResult<()> {
        let kernel = Shape::hwio(kernel_size, kernel_size, in_channels, out_channels);
        let layer = Self::conv_record(
            name, weights, bias, kernel, in_channels, out_channels, height, width, stride,
            activation, batch_norm,
        )?;
        self.layers.push(LayerRecord::Convolution(layer));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(signature = (name, weights, bias, kernel_size, channels, height, width, stride=1, activation="linear", batch_norm=None))]
    fn add_depthwise_conv(
        &mut self,
        name: &str,
        weights: Vec<f32>,
        bias: Vec<f32>,
        kernel_size: usize,
        channels: usize,
        height: usize,
        width: usize,
        stride: usize,
        activation: &str,
        batch_norm: Option<BatchNormTuple>,
    ) -> PyResult<()> {
        let kernel = Shape::hwio(kernel_size, kernel_size, channels, 1);
        let layer = Self::conv_record(
            name, weights, bias, kernel, channels, channels, height, width, stride, activation,
            batch_norm,
        )?;
        self.layers.push(LayerRecord::DepthwiseConvolution(layer));
        Ok(())
    }

    fn add_max_pool(&mut self, name: &str, size: usize, stride: usize) -> PyResult<()> {
        if stride == 0 {
            return Err(PyValueError::new_err("stride must be positive"));
        }
        let [n, h, w, c] = self.last_conv_output()?.dims;
        let output = TensorRef::new(
            name,
            Shape::nhwc(n, h.div_ceil(stride), w.div_ceil(stride), c),
        );
        self.layers
            .push(LayerRecord::Pooling(PoolLayer::max(name, size, stride, output)));
        Ok(())
    }

    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn layer_kinds(&self) -> Vec<&'static str> {
        self.layers.iter().map(LayerRecord::kind_name).collect()
    }

    /// Plan the network and return it as a JSON document.
    #[pyo3(signature = (oracle, samples, weight_byte_widths=None, input_range=None))]
    fn build<'py>(
        &self,
        oracle: &Bound<'py, PyAny>,
        samples: &Bound<'py, PyAny>,
        weight_byte_widths: Option<Vec<u8>>,
        input_range: Option<(f64, f64)>,
    ) -> PyResult<String> {
        let mut options = PlanOptions::default();
        if let Some(widths) = weight_byte_widths {
            options = options.with_weight_byte_widths(widths);
        }
        if let Some((min, max)) = input_range {
            options = options.with_input_range(Range { min, max });
        }
        let oracle = PyOracle { callable: oracle };
        let plan = build_plan(&self.layers, &oracle, samples, &options).map_err(to_py_err)?;
        serde_json::to_string(&plan).map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

/// `(shift, scaled)` with `scaled == value * 2^shift`.
#[pyfunction]
#[pyo3(signature = (value, bound_bits, max_shift_bits=math::DEFAULT_MAX_SHIFT_BITS))]
fn factorize(value: f64, bound_bits: u32, max_shift_bits: u32) -> PyResult<(u32, f64)> {
    if !(2..=64).contains(&bound_bits) || max_shift_bits > 31 {
        return Err(PyValueError::new_err("field widths out of range"));
    }
    Ok(math::factorize(value, bound_bits, max_shift_bits))
}

/// Checked `(mantissa, shift)` for a signed `bound_bits` field.
#[pyfunction]
fn fit_fixed_point(value: f64, bound_bits: u32) -> PyResult<(i64, u32)> {
    if !(2..=64).contains(&bound_bits) {
        return Err(PyValueError::new_err("field width out of range"));
    }
    let p = math::FixedPointScale::fit(value, bound_bits).map_err(to_py_err)?;
    Ok((p.mantissa, p.shift))
}

#[pyfunction]
fn encode_twos_complement(value: i64, width: u32) -> PyResult<String> {
    if !(1..=64).contains(&width) {
        return Err(PyValueError::new_err("field width out of range"));
    }
    math::encode_twos_complement(value, width).map_err(to_py_err)
}

#[pyfunction]
fn decode_twos_complement(hex: &str, width: u32) -> PyResult<Option<i64>> {
    if !(1..=64).contains(&width) {
        return Err(PyValueError::new_err("field width out of range"));
    }
    Ok(math::decode_twos_complement(hex, width))
}

#[pymodule]
fn kpu_rust_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyNetworkBuilder>()?;
    m.add_function(wrap_pyfunction!(factorize, m)?)?;
    m.add_function(wrap_pyfunction!(fit_fixed_point, m)?)?;
    m.add_function(wrap_pyfunction!(encode_twos_complement, m)?)?;
    m.add_function(wrap_pyfunction!(decode_twos_complement, m)?)?;
    Ok(())
}
