//! Q-network architectures
//!
//! Both networks share the convolutional trunk from [`crate::trunk`] and
//! differ only in the head that turns trunk features into Q-values. An agent
//! picks one at construction time, either by naming the concrete type or
//! through [`build_q_network`].

pub mod deep_conv;
pub mod dueling;
pub mod head;

use ndarray::{Array2, ArrayView2, ArrayView4};

use crate::config::{Architecture, InputDim, NetworkConfig};
use crate::device::ComputeTarget;
use crate::error::{QNetError, Result};
use crate::layers::{Param, ParamMut};
use crate::trunk::ConvTrunk;

pub use deep_conv::DeepConvQNetwork;
pub use dueling::{dueling_combine, DuelingDeepConvQNetwork};
pub use head::DenseStack;

/// Common interface of the Q-networks, consumed by an external acting or
/// training loop
pub trait QNetwork: Send + Sync {
    /// Q-values `[batch, output_dim]` for a batch of stacked-frame states
    fn forward(&self, state: ArrayView4<f32>) -> Result<Array2<f32>>;

    fn architecture(&self) -> Architecture;

    fn input_dim(&self) -> InputDim;

    fn output_dim(&self) -> usize;

    /// Flattened trunk width measured at construction
    fn feature_width(&self) -> usize;

    fn compute_target(&self) -> ComputeTarget;

    /// Every parameter tensor, named `<stack>.<index>.<weight|bias>`
    fn parameters(&self) -> Vec<Param<'_>>;

    fn parameters_mut(&mut self) -> Vec<ParamMut<'_>>;

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }

    /// Index of the highest Q-value for every state in the batch
    fn greedy_actions(&self, state: ArrayView4<f32>) -> Result<Vec<usize>> {
        Ok(greedy_actions(self.forward(state)?.view()))
    }
}

/// Build whichever architecture `config` names
pub fn build_q_network(config: &NetworkConfig) -> Result<Box<dyn QNetwork>> {
    match config.architecture {
        Architecture::Standard => Ok(Box::new(DeepConvQNetwork::from_config(config)?)),
        Architecture::Dueling => Ok(Box::new(DuelingDeepConvQNetwork::from_config(config)?)),
    }
}

/// Per-row argmax of a `[batch, actions]` Q-value tensor. Ties go to the
/// lowest action index. NaN entries are never chosen; a row that is all NaN
/// maps to action 0.
pub fn greedy_actions(q_values: ArrayView2<f32>) -> Vec<usize> {
    q_values
        .rows()
        .into_iter()
        .map(|row| {
            let mut best: Option<(usize, f32)> = None;
            for (action, &q) in row.iter().enumerate() {
                if q.is_nan() {
                    continue;
                }
                match best {
                    Some((_, top)) if q <= top => {}
                    _ => best = Some((action, q)),
                }
            }
            best.map_or(0, |(action, _)| action)
        })
        .collect()
}

/// Reject state batches the trunk was not built for
pub(crate) fn check_state(state: &ArrayView4<f32>, input_dim: InputDim) -> Result<()> {
    let (batch, channels, height, width) = state.dim();
    if batch == 0 {
        return Err(QNetError::dimension_mismatch(
            "at least one state in the batch".to_string(),
            "empty batch".to_string(),
        ));
    }
    if (channels, height, width) != (input_dim.channels, input_dim.height, input_dim.width) {
        return Err(QNetError::dimension_mismatch(
            format!("states of shape {}", input_dim),
            format!("states of shape ({}, {}, {})", channels, height, width),
        ));
    }
    Ok(())
}

/// Check that a trunk fits the input descriptor and yields `feature_width`
/// features per state
pub(crate) fn check_trunk(trunk: &ConvTrunk, input_dim: InputDim, feature_width: usize) -> Result<()> {
    let channels = trunk.in_channels()?;
    if channels != input_dim.channels {
        return Err(QNetError::dimension_mismatch(
            format!("trunk reading {} channels", input_dim.channels),
            format!("trunk reading {} channels", channels),
        ));
    }
    let (c, h, w) = trunk.output_shape(input_dim)?;
    if c * h * w != feature_width {
        return Err(QNetError::dimension_mismatch(
            format!("feature width {}", feature_width),
            format!("trunk output {}x{}x{} = {}", c, h, w, c * h * w),
        ));
    }
    Ok(())
}

/// Check that a dense stack maps `feature_width` features to `outputs` values
pub(crate) fn check_stream(name: &str, stream: &DenseStack, feature_width: usize, outputs: usize) -> Result<()> {
    let (inputs, produced) = (stream.input_size()?, stream.output_size()?);
    if inputs != feature_width || produced != outputs {
        return Err(QNetError::dimension_mismatch(
            format!("{} stack {} -> {}", name, feature_width, outputs),
            format!("{} stack {} -> {}", name, inputs, produced),
        ));
    }
    Ok(())
}

/// Reject a config whose architecture does not match the network being built
pub(crate) fn check_architecture(config: &NetworkConfig, expected: Architecture) -> Result<()> {
    if config.architecture != expected {
        return Err(QNetError::invalid_parameter(
            "architecture".to_string(),
            format!("config names {:?}, building {:?}", config.architecture, expected),
        ));
    }
    Ok(())
}
