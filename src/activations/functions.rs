use ndarray::{Array, Dimension};
use serde::{Serialize, Deserialize};

/// An enumeration of the activation functions a layer can apply to its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Activation {
    #[default]
    Relu,
    Linear,
}

impl Activation {
    /// Apply the activation function in-place to an array of any rank.
    pub fn apply<D: Dimension>(&self, input: &mut Array<f32, D>) {
        match self {
            Activation::Relu => {
                input.mapv_inplace(|v| v.max(0.0));
            }
            Activation::Linear => {}
        }
    }

    /// Apply the activation function to a single scalar.
    #[inline]
    pub fn apply_scalar(&self, v: f32) -> f32 {
        match self {
            Activation::Relu => v.max(0.0),
            Activation::Linear => v,
        }
    }
}
