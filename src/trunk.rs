//! Convolutional trunk shared by both Q-network architectures
//!
//! Three valid convolutions, each followed by ReLU:
//!
//! | stage | out channels | kernel | stride |
//! |-------|--------------|--------|--------|
//! | 1     | 32           | 8x8    | 4      |
//! | 2     | 64           | 4x4    | 2      |
//! | 3     | 64           | 3x3    | 1      |
//!
//! The smallest square input that survives all three stages is 36x36.

use ndarray::{Array2, Array4, ArrayView4};
use rand::Rng;
use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::config::InputDim;
use crate::device::ComputeTarget;
use crate::error::{QNetError, Result};
use crate::layers::traits::{prefixed, prefixed_mut, Layer, Param, ParamMut};
use crate::layers::{Conv2DLayer, WeightInit};

/// `(out_channels, kernel, stride)` for each trunk stage
pub const TRUNK_STAGES: [(usize, usize, usize); 3] = [(32, 8, 4), (64, 4, 2), (64, 3, 1)];

/// The shared convolutional feature extractor
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ConvTrunk {
    layers: Vec<Conv2DLayer>,
}

/// A trunk needs at least one stage and each stage must consume the channels
/// the previous one produces
fn check_stages(layers: &[Conv2DLayer]) -> Result<()> {
    if layers.is_empty() {
        return Err(QNetError::invalid_parameter("trunk", "has no convolution stages"));
    }
    for (i, pair) in layers.windows(2).enumerate() {
        if pair[0].out_channels != pair[1].in_channels {
            return Err(QNetError::dimension_mismatch(
                format!("{} input channels at trunk stage {}", pair[0].out_channels, i + 1),
                format!("{} input channels", pair[1].in_channels),
            ));
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct StoredConvTrunk {
    layers: Vec<Conv2DLayer>,
}

impl<'de> Deserialize<'de> for ConvTrunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredConvTrunk::deserialize(deserializer)?;
        check_stages(&stored.layers).map_err(de::Error::custom)?;
        Ok(ConvTrunk { layers: stored.layers })
    }
}

impl ConvTrunk {
    /// Build the three trunk stages for inputs with `in_channels` channels
    pub fn new<R: Rng + ?Sized>(in_channels: usize, init: WeightInit, rng: &mut R) -> Result<Self> {
        let mut layers = Vec::with_capacity(TRUNK_STAGES.len());
        let mut channels = in_channels;
        for &(out_channels, kernel, stride) in TRUNK_STAGES.iter() {
            layers.push(Conv2DLayer::new(
                channels,
                out_channels,
                (kernel, kernel),
                (stride, stride),
                Activation::Relu,
                init,
                &mut *rng,
            )?);
            channels = out_channels;
        }
        Ok(ConvTrunk { layers })
    }

    pub fn layers(&self) -> &[Conv2DLayer] {
        &self.layers
    }

    fn first_stage(&self) -> Result<&Conv2DLayer> {
        self.layers
            .first()
            .ok_or_else(|| QNetError::invalid_parameter("trunk", "has no convolution stages"))
    }

    pub fn in_channels(&self) -> Result<usize> {
        Ok(self.first_stage()?.in_channels)
    }

    pub fn out_channels(&self) -> Result<usize> {
        self.layers
            .last()
            .map(|layer| layer.out_channels)
            .ok_or_else(|| QNetError::invalid_parameter("trunk", "has no convolution stages"))
    }

    /// Run a batch through every stage. Stage errors propagate unchanged.
    pub fn forward(&self, input: ArrayView4<f32>, target: ComputeTarget) -> Result<Array4<f32>> {
        let first = self.first_stage()?.forward_batch(input, target)?;
        self.layers[1..]
            .iter()
            .try_fold(first, |features, layer| layer.forward_batch(features.view(), target))
    }

    /// Per-sample output shape `(channels, height, width)` computed from the
    /// stage geometry alone
    pub fn output_shape(&self, input_dim: InputDim) -> Result<(usize, usize, usize)> {
        let mut shape = vec![1, input_dim.channels, input_dim.height, input_dim.width];
        for layer in &self.layers {
            shape = layer.output_shape(&shape)?;
        }
        Ok((shape[1], shape[2], shape[3]))
    }

    pub fn params(&self) -> Vec<Param<'_>> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| prefixed(&format!("conv.{}", i), layer))
            .collect()
    }

    pub fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(i, layer)| prefixed_mut(&format!("conv.{}", i), layer))
            .collect()
    }
}

/// Flatten `[batch, c, h, w]` feature maps into `[batch, c*h*w]` rows
pub fn flatten(features: Array4<f32>) -> Result<Array2<f32>> {
    let (batch, channels, height, width) = features.dim();
    let features = features.as_standard_layout().into_owned();
    features
        .into_shape((batch, channels * height * width))
        .map_err(|e| QNetError::dimension_mismatch("contiguous feature maps".to_string(), e.to_string()))
}

/// Number of features the trunk produces for one input of `input_dim`.
///
/// Measured by pushing a single zero state through the already-built trunk.
/// The trunk forward pass borrows the trunk immutably and records nothing, so
/// this never touches parameters or leaves state behind.
pub fn feature_size(trunk: &ConvTrunk, input_dim: InputDim, target: ComputeTarget) -> Result<usize> {
    let zeros = Array4::<f32>::zeros(input_dim.batch_shape(1));
    let features = flatten(trunk.forward(zeros.view(), target)?)?;
    let width = features.ncols();
    log::debug!("trunk feature width for input {} is {}", input_dim, width);
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::init_rng;

    fn trunk(channels: usize) -> ConvTrunk {
        ConvTrunk::new(channels, WeightInit::FanInUniform, &mut init_rng(Some(11))).unwrap()
    }

    #[test]
    fn test_atari_feature_size() {
        let trunk = trunk(4);
        let input_dim = InputDim::new(4, 84, 84).unwrap();
        assert_eq!(trunk.output_shape(input_dim).unwrap(), (64, 7, 7));
        assert_eq!(feature_size(&trunk, input_dim, ComputeTarget::Cpu).unwrap(), 3136);
    }

    #[test]
    fn test_measured_matches_analytic() {
        let trunk = trunk(2);
        for &(h, w) in &[(36, 36), (40, 52), (64, 48), (100, 37)] {
            let input_dim = InputDim::new(2, h, w).unwrap();
            let (c, oh, ow) = trunk.output_shape(input_dim).unwrap();
            let measured = feature_size(&trunk, input_dim, ComputeTarget::Cpu).unwrap();
            assert_eq!(measured, c * oh * ow, "input {}x{}", h, w);
        }
    }

    #[test]
    fn test_minimum_receptive_field() {
        let trunk = trunk(1);
        assert!(feature_size(&trunk, InputDim::new(1, 36, 36).unwrap(), ComputeTarget::Cpu).is_ok());

        let err = feature_size(&trunk, InputDim::new(1, 35, 36).unwrap(), ComputeTarget::Cpu).unwrap_err();
        assert!(matches!(err, QNetError::ReceptiveField { .. }));
    }

    #[test]
    fn test_small_input_fails_at_second_stage() {
        let trunk = trunk(4);
        let err = trunk.output_shape(InputDim::new(4, 10, 10).unwrap()).unwrap_err();
        match err {
            QNetError::ReceptiveField { layer, kernel, input } => {
                assert_eq!(layer, trunk.layers()[1].describe());
                assert_eq!(kernel, (4, 4));
                assert_eq!(input, (1, 1));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_param_names() {
        let trunk = trunk(4);
        let names: Vec<String> = trunk.params().into_iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec!["conv.0.weight", "conv.0.bias", "conv.1.weight", "conv.1.bias", "conv.2.weight", "conv.2.bias"]
        );
        assert_eq!(trunk.in_channels().unwrap(), 4);
        assert_eq!(trunk.out_channels().unwrap(), 64);
    }

    #[test]
    fn test_load_rejects_broken_stage_chain() {
        let trunk = trunk(2);
        let stored = serde_json::to_value(&trunk).unwrap();
        assert_eq!(serde_json::from_value::<ConvTrunk>(stored.clone()).unwrap(), trunk);

        let mut empty = stored.clone();
        empty["layers"] = serde_json::json!([]);
        assert!(serde_json::from_value::<ConvTrunk>(empty).is_err());

        let mut unchained = stored;
        let first = unchained["layers"][0].clone();
        unchained["layers"][1] = first;
        let err = serde_json::from_value::<ConvTrunk>(unchained).unwrap_err();
        assert!(err.to_string().contains("trunk stage 1"));
    }

    #[test]
    fn test_flatten_row_major() {
        let maps = Array4::from_shape_fn((2, 2, 2, 2), |(b, c, h, w)| (b * 8 + c * 4 + h * 2 + w) as f32);
        let flat = flatten(maps).unwrap();
        assert_eq!(flat.dim(), (2, 8));
        assert_eq!(flat.row(1).to_vec(), (8..16).map(|v| v as f32).collect::<Vec<_>>());
    }
}
