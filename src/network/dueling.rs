use ndarray::{Array2, ArrayView2, ArrayView4};
use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::config::{validate_output_dim, Architecture, InputDim, NetworkConfig};
use crate::device::ComputeTarget;
use crate::error::{QNetError, Result};
use crate::layers::{init_rng, Param, ParamMut};
use crate::trunk::{feature_size, flatten, ConvTrunk};
use super::head::DenseStack;
use super::{check_architecture, check_state, check_stream, check_trunk, QNetwork};

/// Width of the hidden layer in each stream
pub const STREAM_HIDDEN_UNITS: usize = 128;

/// Dueling deep convolutional Q-network
///
/// Trunk features feed a value stream (128 -> 1) and an advantage stream
/// (128 -> actions), recombined by [`dueling_combine`].
///
/// Unlike [`super::DeepConvQNetwork`], `forward` does not move its input onto
/// the compute target first; the batch is read where the caller left it.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DuelingDeepConvQNetwork {
    input_dim: InputDim,
    output_dim: usize,
    feature_width: usize,
    target: ComputeTarget,
    trunk: ConvTrunk,
    value_stream: DenseStack,
    advantage_stream: DenseStack,
}

impl DuelingDeepConvQNetwork {
    pub fn new(input_dim: InputDim, output_dim: usize) -> Result<Self> {
        Self::from_config(&NetworkConfig::new(Architecture::Dueling, input_dim, output_dim))
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        check_architecture(config, Architecture::Dueling)?;
        let input_dim = config.input_dim()?;
        let output_dim = config.output_dim;
        validate_output_dim(output_dim)?;

        let target = config.compute_target.resolve();
        let mut rng = init_rng(config.seed);

        let trunk = ConvTrunk::new(input_dim.channels, config.weight_init, &mut rng)?;
        let feature_width = feature_size(&trunk, input_dim, target)?;
        let value_stream = DenseStack::new(&[feature_width, STREAM_HIDDEN_UNITS, 1], config.weight_init, &mut rng)?;
        let advantage_stream =
            DenseStack::new(&[feature_width, STREAM_HIDDEN_UNITS, output_dim], config.weight_init, &mut rng)?;

        log::debug!(
            "built dueling Q-network: input {}, {} actions, feature width {}, target {}",
            input_dim, output_dim, feature_width, target
        );

        Ok(DuelingDeepConvQNetwork {
            input_dim,
            output_dim,
            feature_width,
            target,
            trunk,
            value_stream,
            advantage_stream,
        })
    }

    /// Q-values `[batch, output_dim]`
    pub fn forward(&self, state: ArrayView4<f32>) -> Result<Array2<f32>> {
        let (values, advantages) = self.streams(state)?;
        dueling_combine(values.view(), advantages.view())
    }

    /// Raw stream outputs: values `[batch, 1]` and advantages `[batch, actions]`
    pub fn streams(&self, state: ArrayView4<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        check_state(&state, self.input_dim)?;
        log::trace!("dueling forward: batch {:?} on {}", state.dim(), self.target);

        let features = flatten(self.trunk.forward(state, self.target)?)?;
        let values = self.value_stream.forward(features.view())?;
        let advantages = self.advantage_stream.forward(features.view())?;
        Ok((values, advantages))
    }

    /// Verify that trunk, feature width and both streams agree with each other
    pub fn check_consistency(&self) -> Result<()> {
        validate_output_dim(self.output_dim)?;
        check_trunk(&self.trunk, self.input_dim, self.feature_width)?;
        check_stream("value", &self.value_stream, self.feature_width, 1)?;
        check_stream("advantage", &self.advantage_stream, self.feature_width, self.output_dim)
    }

    pub fn trunk(&self) -> &ConvTrunk {
        &self.trunk
    }

    pub fn value_stream(&self) -> &DenseStack {
        &self.value_stream
    }

    pub fn advantage_stream(&self) -> &DenseStack {
        &self.advantage_stream
    }
}

/// Combine state values and advantages into Q-values:
/// `Q = V + (A - mean(A))`.
///
/// `mean(A)` is one scalar taken over every element of the advantage tensor,
/// all batch rows and all actions together, not a per-row mean. Rows of a
/// batch therefore influence each other's Q-values.
pub fn dueling_combine(values: ArrayView2<f32>, advantages: ArrayView2<f32>) -> Result<Array2<f32>> {
    if values.ncols() != 1 || values.nrows() != advantages.nrows() {
        return Err(QNetError::dimension_mismatch(
            format!("values of shape [{}, 1]", advantages.nrows()),
            format!("values of shape {:?}", values.shape()),
        ));
    }
    let mean = advantages.mean().ok_or_else(|| {
        QNetError::dimension_mismatch("non-empty advantages".to_string(), "empty advantages".to_string())
    })?;

    let centered = advantages.mapv(|a| a - mean);
    Ok(centered + &values)
}

#[derive(Deserialize)]
struct StoredDuelingDeepConvQNetwork {
    input_dim: InputDim,
    output_dim: usize,
    feature_width: usize,
    target: ComputeTarget,
    trunk: ConvTrunk,
    value_stream: DenseStack,
    advantage_stream: DenseStack,
}

impl<'de> Deserialize<'de> for DuelingDeepConvQNetwork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredDuelingDeepConvQNetwork::deserialize(deserializer)?;
        let network = DuelingDeepConvQNetwork {
            input_dim: stored.input_dim,
            output_dim: stored.output_dim,
            feature_width: stored.feature_width,
            target: stored.target.resolve(),
            trunk: stored.trunk,
            value_stream: stored.value_stream,
            advantage_stream: stored.advantage_stream,
        };
        network.check_consistency().map_err(de::Error::custom)?;
        Ok(network)
    }
}

impl QNetwork for DuelingDeepConvQNetwork {
    fn forward(&self, state: ArrayView4<f32>) -> Result<Array2<f32>> {
        DuelingDeepConvQNetwork::forward(self, state)
    }

    fn architecture(&self) -> Architecture {
        Architecture::Dueling
    }

    fn input_dim(&self) -> InputDim {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn feature_width(&self) -> usize {
        self.feature_width
    }

    fn compute_target(&self) -> ComputeTarget {
        self.target
    }

    fn parameters(&self) -> Vec<Param<'_>> {
        let mut params = self.trunk.params();
        params.extend(self.value_stream.params("value"));
        params.extend(self.advantage_stream.params("advantage"));
        params
    }

    fn parameters_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = self.trunk.params_mut();
        params.extend(self.value_stream.params_mut("value"));
        params.extend(self.advantage_stream.params_mut("advantage"));
        params
    }
}
