use ndarray::{Array2, ArrayView4};
use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::config::{validate_output_dim, Architecture, InputDim, NetworkConfig};
use crate::device::ComputeTarget;
use crate::error::Result;
use crate::layers::{init_rng, Param, ParamMut};
use crate::trunk::{feature_size, flatten, ConvTrunk};
use super::head::DenseStack;
use super::{check_architecture, check_state, check_stream, check_trunk, QNetwork};

/// Width of the hidden fully connected layer
pub const HIDDEN_UNITS: usize = 512;

/// Deep convolutional Q-network: trunk -> flatten -> 512 (ReLU) -> Q-values
///
/// The network binds to a compute target when it is built and moves every
/// input batch onto that target before running it.
///
/// A deserialized network is checked the same way a freshly built one is
/// shaped: trunk against input, feature width against head.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DeepConvQNetwork {
    input_dim: InputDim,
    output_dim: usize,
    feature_width: usize,
    target: ComputeTarget,
    trunk: ConvTrunk,
    head: DenseStack,
}

impl DeepConvQNetwork {
    /// Build with default options: automatic compute target, fan-in uniform
    /// initialization, unseeded.
    pub fn new(input_dim: InputDim, output_dim: usize) -> Result<Self> {
        Self::from_config(&NetworkConfig::new(Architecture::Standard, input_dim, output_dim))
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        check_architecture(config, Architecture::Standard)?;
        let input_dim = config.input_dim()?;
        let output_dim = config.output_dim;
        validate_output_dim(output_dim)?;

        let target = config.compute_target.resolve();
        let mut rng = init_rng(config.seed);

        let trunk = ConvTrunk::new(input_dim.channels, config.weight_init, &mut rng)?;
        let feature_width = feature_size(&trunk, input_dim, target)?;
        let head = DenseStack::new(&[feature_width, HIDDEN_UNITS, output_dim], config.weight_init, &mut rng)?;

        log::debug!(
            "built standard Q-network: input {}, {} actions, feature width {}, target {}",
            input_dim, output_dim, feature_width, target
        );

        Ok(DeepConvQNetwork {
            input_dim,
            output_dim,
            feature_width,
            target,
            trunk,
            head,
        })
    }

    /// Q-values `[batch, output_dim]`. Raw head output, no clipping.
    pub fn forward(&self, state: ArrayView4<f32>) -> Result<Array2<f32>> {
        check_state(&state, self.input_dim)?;
        let placed = self.target.place(state);
        log::trace!("standard forward: batch {:?} on {}", placed.dim(), self.target);

        let features = flatten(self.trunk.forward(placed.view(), self.target)?)?;
        self.head.forward(features.view())
    }

    /// Verify that trunk, feature width and head agree with each other
    pub fn check_consistency(&self) -> Result<()> {
        validate_output_dim(self.output_dim)?;
        check_trunk(&self.trunk, self.input_dim, self.feature_width)?;
        check_stream("fc", &self.head, self.feature_width, self.output_dim)
    }

    pub fn trunk(&self) -> &ConvTrunk {
        &self.trunk
    }

    pub fn head(&self) -> &DenseStack {
        &self.head
    }

    /// Mutable head access, e.g. for loading trained weights
    pub fn head_mut(&mut self) -> &mut DenseStack {
        &mut self.head
    }
}

#[derive(Deserialize)]
struct StoredDeepConvQNetwork {
    input_dim: InputDim,
    output_dim: usize,
    feature_width: usize,
    target: ComputeTarget,
    trunk: ConvTrunk,
    head: DenseStack,
}

impl<'de> Deserialize<'de> for DeepConvQNetwork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredDeepConvQNetwork::deserialize(deserializer)?;
        let network = DeepConvQNetwork {
            input_dim: stored.input_dim,
            output_dim: stored.output_dim,
            feature_width: stored.feature_width,
            target: stored.target.resolve(),
            trunk: stored.trunk,
            head: stored.head,
        };
        network.check_consistency().map_err(de::Error::custom)?;
        Ok(network)
    }
}

impl QNetwork for DeepConvQNetwork {
    fn forward(&self, state: ArrayView4<f32>) -> Result<Array2<f32>> {
        DeepConvQNetwork::forward(self, state)
    }

    fn architecture(&self) -> Architecture {
        Architecture::Standard
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
        params.extend(self.head.params("fc"));
        params
    }

    fn parameters_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = self.trunk.params_mut();
        params.extend(self.head.params_mut("fc"));
        params
    }
}
