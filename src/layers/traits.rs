use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};

use crate::device::ComputeTarget;
use crate::error::Result;

/// A named, read-only view of one parameter tensor
pub struct Param<'a> {
    pub name: String,
    pub value: ArrayViewD<'a, f32>,
}

/// A named, mutable view of one parameter tensor, handed to external optimizers
pub struct ParamMut<'a> {
    pub name: String,
    pub value: ArrayViewMutD<'a, f32>,
}

/// Trait defining the interface for network layers
///
/// Layers own their parameters. `apply` is a pure function of the input and
/// the parameters; nothing is cached between calls.
pub trait Layer: Send + Sync {
    /// Apply the layer to a batch tensor of any rank the layer accepts
    fn apply(&self, input: ArrayViewD<f32>, target: ComputeTarget) -> Result<ArrayD<f32>>;

    /// Shape produced for a batch input of `input_shape`, without computing it
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>>;

    /// Parameter tensors in a stable order, named relative to the layer
    fn params(&self) -> Vec<Param<'_>>;

    /// Mutable parameter tensors, same order and names as [`Layer::params`]
    fn params_mut(&mut self) -> Vec<ParamMut<'_>>;

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.params().iter().map(|p| p.value.len()).sum()
    }

    /// Short human-readable description used in errors and logs
    fn describe(&self) -> String;
}

/// Prefix every parameter name of `layer` with `prefix.`
pub(crate) fn prefixed<'a>(prefix: &str, layer: &'a dyn Layer) -> Vec<Param<'a>> {
    layer
        .params()
        .into_iter()
        .map(|p| Param { name: format!("{}.{}", prefix, p.name), value: p.value })
        .collect()
}

/// Mutable counterpart of [`prefixed`]
pub(crate) fn prefixed_mut<'a>(prefix: &str, layer: &'a mut dyn Layer) -> Vec<ParamMut<'a>> {
    layer
        .params_mut()
        .into_iter()
        .map(|p| ParamMut { name: format!("{}.{}", prefix, p.name), value: p.value })
        .collect()
}
