use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, Axis, Ix2};
use rand::Rng;
use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::device::ComputeTarget;
use crate::error::{QNetError, Result};
use crate::layers::initialization::WeightInit;
use super::traits::{Layer, Param, ParamMut};

/// A fully connected (dense) layer in a neural network
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DenseLayer {
    /// Weights laid out [input_size, output_size]
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Create a new dense layer with parameters drawn from `rng`.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(QNetError::invalid_parameter(
                "dense layer size".to_string(),
                format!("{}x{} has a zero dimension", input_size, output_size),
            ));
        }
        let weights = init.initialize_weights((input_size, output_size), input_size, output_size, rng)?;
        let biases = init.initialize_biases(output_size, input_size, rng)?;
        Ok(DenseLayer { weights, biases, activation })
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Result<Self> {
        if weights.dim() != self.weights.dim() {
            return Err(QNetError::dimension_mismatch(
                format!("weights {:?}", self.weights.dim()),
                format!("weights {:?}", weights.dim()),
            ));
        }
        self.weights = weights;
        Ok(self)
    }

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

    /// Weights must be non-empty and carry one bias per output
    pub fn check_geometry(&self) -> Result<()> {
        let (input_size, output_size) = self.weights.dim();
        if input_size == 0 || output_size == 0 {
            return Err(QNetError::invalid_parameter(
                "dense layer size".to_string(),
                format!("{}x{} has a zero dimension", input_size, output_size),
            ));
        }
        if self.biases.len() != output_size {
            return Err(QNetError::dimension_mismatch(
                format!("{} biases for {}", output_size, self.describe()),
                format!("{} biases", self.biases.len()),
            ));
        }
        Ok(())
    }

    pub fn input_size(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn output_size(&self) -> usize {
        self.weights.shape()[1]
    }

    /// Forward pass for a batch of feature rows [batch, input_size]
    pub fn forward_batch(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_geometry()?;
        if inputs.ncols() != self.input_size() {
            return Err(QNetError::dimension_mismatch(
                format!("{} input features for {}", self.input_size(), self.describe()),
                format!("{} input features", inputs.ncols()),
            ));
        }
        let mut outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        self.activation.apply(&mut outputs);
        Ok(outputs)
    }
}

#[derive(Deserialize)]
struct StoredDenseLayer {
    weights: Array2<f32>,
    biases: Array1<f32>,
    activation: Activation,
}

impl<'de> Deserialize<'de> for DenseLayer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredDenseLayer::deserialize(deserializer)?;
        let layer = DenseLayer { weights: stored.weights, biases: stored.biases, activation: stored.activation };
        layer.check_geometry().map_err(de::Error::custom)?;
        Ok(layer)
    }
}

impl Layer for DenseLayer {
    fn apply(&self, input: ArrayViewD<f32>, _target: ComputeTarget) -> Result<ArrayD<f32>> {
        let rank = input.ndim();
        let input = input.into_dimensionality::<Ix2>().map_err(|_| {
            QNetError::dimension_mismatch(
                "rank-2 input [batch, features]".to_string(),
                format!("rank-{} input", rank),
            )
        })?;
        Ok(self.forward_batch(input)?.into_dyn())
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match *input_shape {
            [batch, features] if features == self.input_size() => Ok(vec![batch, self.output_size()]),
            _ => Err(QNetError::dimension_mismatch(
                format!("[batch, {}]", self.input_size()),
                format!("{:?}", input_shape),
            )),
        }
    }

    fn params(&self) -> Vec<Param<'_>> {
        vec![
            Param { name: "weight".to_string(), value: self.weights.view().into_dyn() },
            Param { name: "bias".to_string(), value: self.biases.view().into_dyn() },
        ]
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        vec![
            ParamMut { name: "weight".to_string(), value: self.weights.view_mut().into_dyn() },
            ParamMut { name: "bias".to_string(), value: self.biases.view_mut().into_dyn() },
        ]
    }

    fn describe(&self) -> String {
        format!("dense({}->{})", self.input_size(), self.output_size())
    }
}
