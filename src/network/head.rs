use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{QNetError, Result};
use crate::layers::traits::{prefixed, prefixed_mut, Param, ParamMut};
use crate::layers::{DenseLayer, WeightInit};

/// A stack of fully connected layers: ReLU between layers, linear output
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DenseStack {
    layers: Vec<DenseLayer>,
}

fn check_chain(layers: &[DenseLayer]) -> Result<()> {
    if layers.is_empty() {
        return Err(QNetError::invalid_parameter("dense stack", "has no layers"));
    }
    for (i, pair) in layers.windows(2).enumerate() {
        if pair[0].output_size() != pair[1].input_size() {
            return Err(QNetError::dimension_mismatch(
                format!("{} inputs at dense layer {}", pair[0].output_size(), i + 1),
                format!("{} inputs", pair[1].input_size()),
            ));
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct StoredDenseStack {
    layers: Vec<DenseLayer>,
}

impl<'de> Deserialize<'de> for DenseStack {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredDenseStack::deserialize(deserializer)?;
        check_chain(&stored.layers).map_err(de::Error::custom)?;
        Ok(DenseStack { layers: stored.layers })
    }
}

impl DenseStack {
    /// Build layers for consecutive `sizes`, e.g. `[3136, 512, 6]`
    pub fn new<R: Rng + ?Sized>(sizes: &[usize], init: WeightInit, rng: &mut R) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(QNetError::invalid_parameter(
                "layer_sizes".to_string(),
                format!("need at least 2 sizes, got {}", sizes.len()),
            ));
        }

        let last = sizes.len() - 2;
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, window)| {
                let activation = if i == last { Activation::Linear } else { Activation::Relu };
                DenseLayer::new(window[0], window[1], activation, init, &mut *rng)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DenseStack { layers })
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    fn first_layer(&self) -> Result<&DenseLayer> {
        self.layers
            .first()
            .ok_or_else(|| QNetError::invalid_parameter("dense stack", "has no layers"))
    }

    pub fn input_size(&self) -> Result<usize> {
        Ok(self.first_layer()?.input_size())
    }

    pub fn output_size(&self) -> Result<usize> {
        self.layers
            .last()
            .map(DenseLayer::output_size)
            .ok_or_else(|| QNetError::invalid_parameter("dense stack", "has no layers"))
    }

    pub fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut current = self.first_layer()?.forward_batch(inputs)?;
        for layer in &self.layers[1..] {
            current = layer.forward_batch(current.view())?;
        }
        Ok(current)
    }

    pub fn params(&self, prefix: &str) -> Vec<Param<'_>> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| prefixed(&format!("{}.{}", prefix, i), layer))
            .collect()
    }

    pub fn params_mut(&mut self, prefix: &str) -> Vec<ParamMut<'_>> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(i, layer)| prefixed_mut(&format!("{}.{}", prefix, i), layer))
            .collect()
    }
}
