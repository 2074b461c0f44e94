//! 2D convolution over stacked frames
//!
//! Valid (unpadded) convolution with a learnable bias per output channel and
//! an activation fused into the kernel.

use ndarray::{Array1, Array4, ArrayD, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMut3, Axis, Ix4, Zip};
use rand::Rng;
use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::device::ComputeTarget;
use crate::error::{QNetError, Result};
use crate::layers::initialization::WeightInit;
use crate::layers::traits::{Layer, Param, ParamMut};

/// 2D Convolutional Layer
///
/// Deserialization goes through [`Conv2DLayer::check_geometry`], so a stored
/// layer whose tensors disagree with its declared geometry is rejected on load.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Conv2DLayer {
    /// Convolution kernels [out_channels, in_channels, kernel_height, kernel_width]
    pub kernels: Array4<f32>,

    /// Bias terms for each output channel
    pub biases: Array1<f32>,

    /// Activation applied to every output element
    pub activation: Activation,

    /// Stride for convolution (rows, cols)
    pub stride: (usize, usize),

    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: (usize, usize),
}

impl Conv2DLayer {
    /// Create a new 2D convolutional layer with parameters drawn from `rng`
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        activation: Activation,
        init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        check_positive(in_channels, out_channels, kernel_size, stride)?;

        let fan_in = in_channels * kernel_size.0 * kernel_size.1;
        let fan_out = out_channels * kernel_size.0 * kernel_size.1;

        let kernels = init.initialize_weights(
            (out_channels, in_channels, kernel_size.0, kernel_size.1),
            fan_in,
            fan_out,
            rng,
        )?;
        let biases = init.initialize_biases(out_channels, fan_in, rng)?;

        Ok(Conv2DLayer {
            kernels,
            biases,
            activation,
            stride,
            in_channels,
            out_channels,
            kernel_size,
        })
    }

    /// Replace the kernels, keeping the layer's geometry
    pub fn with_kernels(mut self, kernels: Array4<f32>) -> Result<Self> {
        if kernels.dim() != self.kernels.dim() {
            return Err(QNetError::dimension_mismatch(
                format!("kernels {:?}", self.kernels.dim()),
                format!("kernels {:?}", kernels.dim()),
            ));
        }
        self.kernels = kernels;
        Ok(self)
    }

    /// Replace the biases
    pub fn with_biases(mut self, biases: Array1<f32>) -> Result<Self> {
        if biases.dim() != self.biases.dim() {
            return Err(QNetError::dimension_mismatch(
                format!("{} biases", self.biases.len()),
                format!("{} biases", biases.len()),
            ));
        }
        self.biases = biases;
        Ok(self)
    }

    /// Verify that the kernel and bias tensors match the declared channels and
    /// kernel size. Runs on load and before every forward pass.
    pub fn check_geometry(&self) -> Result<()> {
        check_positive(self.in_channels, self.out_channels, self.kernel_size, self.stride)?;

        let expected = (self.out_channels, self.in_channels, self.kernel_size.0, self.kernel_size.1);
        if self.kernels.dim() != expected {
            return Err(QNetError::dimension_mismatch(
                format!("kernels {:?} for {}", expected, self.describe()),
                format!("kernels {:?}", self.kernels.dim()),
            ));
        }
        if self.biases.len() != self.out_channels {
            return Err(QNetError::dimension_mismatch(
                format!("{} biases for {}", self.out_channels, self.describe()),
                format!("{} biases", self.biases.len()),
            ));
        }
        Ok(())
    }

    /// Spatial output size for a spatial input of `(height, width)`.
    ///
    /// `floor((in - kernel) / stride) + 1` per axis. Inputs smaller than the
    /// kernel have no valid placement and are rejected.
    pub fn output_dims(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let (kh, kw) = self.kernel_size;
        if height < kh || width < kw {
            return Err(QNetError::ReceptiveField {
                layer: self.describe(),
                kernel: self.kernel_size,
                input: (height, width),
            });
        }
        Ok(((height - kh) / self.stride.0 + 1, (width - kw) / self.stride.1 + 1))
    }

    /// Forward pass for a batch of images [batch, channels, height, width]
    pub fn forward_batch(&self, input: ArrayView4<f32>, target: ComputeTarget) -> Result<Array4<f32>> {
        self.check_geometry()?;
        let (batch_size, channels, in_height, in_width) = input.dim();
        if channels != self.in_channels {
            return Err(QNetError::dimension_mismatch(
                format!("{} input channels for {}", self.in_channels, self.describe()),
                format!("{} input channels", channels),
            ));
        }
        let (out_height, out_width) = self.output_dims(in_height, in_width)?;

        let mut output = Array4::zeros((batch_size, self.out_channels, out_height, out_width));

        let zip = Zip::from(output.axis_iter_mut(Axis(0))).and(input.axis_iter(Axis(0)));
        if target.is_parallel() {
            zip.par_for_each(|out_sample, in_sample| self.convolve_sample(in_sample, out_sample));
        } else {
            zip.for_each(|out_sample, in_sample| self.convolve_sample(in_sample, out_sample));
        }

        Ok(output)
    }

    /// Convolve one sample [channels, height, width] into [out_channels, oh, ow]
    fn convolve_sample(&self, input: ArrayView3<f32>, mut output: ArrayViewMut3<f32>) {
        let (_, out_height, out_width) = output.dim();
        let (kh_size, kw_size) = self.kernel_size;

        for oc in 0..self.out_channels {
            let bias = self.biases[oc];
            for oh in 0..out_height {
                for ow in 0..out_width {
                    let h_start = oh * self.stride.0;
                    let w_start = ow * self.stride.1;

                    let mut sum = 0.0;
                    for ic in 0..self.in_channels {
                        for kh in 0..kh_size {
                            for kw in 0..kw_size {
                                sum += input[[ic, h_start + kh, w_start + kw]]
                                    * self.kernels[[oc, ic, kh, kw]];
                            }
                        }
                    }

                    output[[oc, oh, ow]] = self.activation.apply_scalar(sum + bias);
                }
            }
        }
    }
}

fn check_positive(
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> Result<()> {
    for (name, value) in [
        ("in_channels", in_channels),
        ("out_channels", out_channels),
        ("kernel_height", kernel_size.0),
        ("kernel_width", kernel_size.1),
        ("stride_height", stride.0),
        ("stride_width", stride.1),
    ] {
        if value == 0 {
            return Err(QNetError::invalid_parameter(name, "must be positive"));
        }
    }
    Ok(())
}

/// On-disk form of [`Conv2DLayer`], checked before it becomes a layer
#[derive(Deserialize)]
struct StoredConv2DLayer {
    kernels: Array4<f32>,
    biases: Array1<f32>,
    activation: Activation,
    stride: (usize, usize),
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
}

impl<'de> Deserialize<'de> for Conv2DLayer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredConv2DLayer::deserialize(deserializer)?;
        let layer = Conv2DLayer {
            kernels: stored.kernels,
            biases: stored.biases,
            activation: stored.activation,
            stride: stored.stride,
            in_channels: stored.in_channels,
            out_channels: stored.out_channels,
            kernel_size: stored.kernel_size,
        };
        layer.check_geometry().map_err(de::Error::custom)?;
        Ok(layer)
    }
}

impl Layer for Conv2DLayer {
    fn apply(&self, input: ArrayViewD<f32>, target: ComputeTarget) -> Result<ArrayD<f32>> {
        let rank = input.ndim();
        let input = input.into_dimensionality::<Ix4>().map_err(|_| {
            QNetError::dimension_mismatch(
                "rank-4 input [batch, channels, height, width]".to_string(),
                format!("rank-{} input", rank),
            )
        })?;
        Ok(self.forward_batch(input, target)?.into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match *input_shape {
            [batch, channels, height, width] => {
                if channels != self.in_channels {
                    return Err(QNetError::dimension_mismatch(
                        format!("{} input channels", self.in_channels),
                        format!("{} input channels", channels),
                    ));
                }
                let (oh, ow) = self.output_dims(height, width)?;
                Ok(vec![batch, self.out_channels, oh, ow])
            }
            _ => Err(QNetError::dimension_mismatch(
                "rank-4 shape".to_string(),
                format!("{:?}", input_shape),
            )),
        }
    }

    fn params(&self) -> Vec<Param<'_>> {
        vec![
            Param { name: "weight".to_string(), value: self.kernels.view().into_dyn() },
            Param { name: "bias".to_string(), value: self.biases.view().into_dyn() },
        ]
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        vec![
            ParamMut { name: "weight".to_string(), value: self.kernels.view_mut().into_dyn() },
            ParamMut { name: "bias".to_string(), value: self.biases.view_mut().into_dyn() },
        ]
    }

    fn describe(&self) -> String {
        format!(
            "conv2d({}->{}, {}x{}, stride {})",
            self.in_channels, self.out_channels, self.kernel_size.0, self.kernel_size.1, self.stride.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::initialization::init_rng;

    fn layer(in_c: usize, out_c: usize, k: usize, s: usize, activation: Activation) -> Conv2DLayer {
        Conv2DLayer::new(in_c, out_c, (k, k), (s, s), activation, WeightInit::FanInUniform, &mut init_rng(Some(3)))
            .unwrap()
    }

    #[test]
    fn test_conv2d_forward_shape() {
        let conv = layer(4, 32, 8, 4, Activation::Relu);
        let input = Array4::zeros((2, 4, 84, 84));
        let output = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap();
        assert_eq!(output.dim(), (2, 32, 20, 20));
    }

    #[test]
    fn test_conv2d_hand_computed() {
        // 1 -> 1 channel, 2x2 kernel of ones, stride 1, bias 0.5
        let conv = layer(1, 1, 2, 1, Activation::Linear)
            .with_kernels(Array4::ones((1, 1, 2, 2)))
            .unwrap()
            .with_biases(Array1::from_elem(1, 0.5))
            .unwrap();

        let input = Array4::from_shape_vec(
            (1, 1, 3, 3),
            vec![
                1.0, 2.0, 3.0,
                4.0, 5.0, 6.0,
                7.0, 8.0, 9.0,
            ],
        )
        .unwrap();

        let output = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap();
        assert_eq!(output.dim(), (1, 1, 2, 2));
        assert_eq!(output[[0, 0, 0, 0]], 12.5);
        assert_eq!(output[[0, 0, 0, 1]], 16.5);
        assert_eq!(output[[0, 0, 1, 0]], 24.5);
        assert_eq!(output[[0, 0, 1, 1]], 28.5);
    }

    #[test]
    fn test_conv2d_stride_skips_positions() {
        let conv = layer(1, 1, 1, 2, Activation::Linear)
            .with_kernels(Array4::ones((1, 1, 1, 1)))
            .unwrap()
            .with_biases(Array1::zeros(1))
            .unwrap();
        let input = Array4::from_shape_fn((1, 1, 5, 5), |(_, _, h, w)| (h * 5 + w) as f32);
        let output = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap();
        assert_eq!(output.dim(), (1, 1, 3, 3));
        assert_eq!(output[[0, 0, 1, 1]], 12.0);
        assert_eq!(output[[0, 0, 2, 2]], 24.0);
    }

    #[test]
    fn test_relu_fused() {
        let conv = layer(1, 1, 1, 1, Activation::Relu)
            .with_kernels(Array4::from_elem((1, 1, 1, 1), -1.0))
            .unwrap()
            .with_biases(Array1::zeros(1))
            .unwrap();
        let input = Array4::from_elem((1, 1, 2, 2), 3.0);
        let output = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap();
        assert!(output.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let conv = layer(3, 8, 4, 2, Activation::Relu);
        let input = Array4::from_shape_fn((5, 3, 16, 16), |(b, c, h, w)| {
            ((b * 7 + c * 13 + h * 3 + w) % 11) as f32 / 11.0 - 0.5
        });
        let cpu = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap();
        let accel = conv.forward_batch(input.view(), ComputeTarget::Accelerator).unwrap();
        assert_eq!(cpu, accel);
    }

    #[test]
    fn test_wrong_channel_count() {
        let conv = layer(4, 8, 3, 1, Activation::Relu);
        let input = Array4::zeros((1, 3, 10, 10));
        let err = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap_err();
        assert!(matches!(err, QNetError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_input_smaller_than_kernel() {
        let conv = layer(1, 1, 4, 2, Activation::Relu);
        let input = Array4::zeros((1, 1, 3, 8));
        let err = conv.forward_batch(input.view(), ComputeTarget::Cpu).unwrap_err();
        assert_eq!(
            err,
            QNetError::ReceptiveField {
                layer: conv.describe(),
                kernel: (4, 4),
                input: (3, 8),
            }
        );
    }

    #[test]
    fn test_apply_rejects_wrong_rank() {
        let conv = layer(1, 1, 1, 1, Activation::Relu);
        let input = ndarray::Array3::<f32>::zeros((1, 4, 4)).into_dyn();
        assert!(conv.apply(input.view(), ComputeTarget::Cpu).is_err());
    }

    #[test]
    fn test_inconsistent_geometry_rejected_on_load() {
        let conv = layer(2, 4, 3, 1, Activation::Relu);
        let mut stored = serde_json::to_value(&conv).unwrap();
        let restored: Conv2DLayer = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(restored, conv);

        stored["kernel_size"] = serde_json::json!([5, 5]);
        let err = serde_json::from_value::<Conv2DLayer>(stored).unwrap_err();
        assert!(err.to_string().contains("kernels"));
    }

    #[test]
    fn test_mutated_geometry_is_an_error_not_a_panic() {
        let mut conv = layer(1, 2, 3, 1, Activation::Relu);
        conv.kernel_size = (4, 4);
        let err = conv.forward_batch(Array4::zeros((1, 1, 8, 8)).view(), ComputeTarget::Cpu).unwrap_err();
        assert!(matches!(err, QNetError::DimensionMismatch { .. }));

        let mut conv = layer(1, 2, 3, 1, Activation::Relu);
        conv.biases = Array1::zeros(1);
        assert!(conv.forward_batch(Array4::zeros((1, 1, 8, 8)).view(), ComputeTarget::Cpu).is_err());
    }

    #[test]
    fn test_zero_stride_rejected() {
        let result = Conv2DLayer::new(
            1, 1, (2, 2), (0, 1), Activation::Relu, WeightInit::Zeros, &mut init_rng(None),
        );
        assert!(result.is_err());
    }
}
