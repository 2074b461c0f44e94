use ndarray::{Array, Dimension, ShapeBuilder};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, Uniform};
use serde::{Serialize, Deserialize};

use crate::error::{QNetError, Result};

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeightInit {
    /// Weights and biases from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`
    #[default]
    FanInUniform,

    /// Xavier/Glorot uniform initialization, zero biases
    XavierUniform,

    /// He/Kaiming normal initialization (for ReLU), zero biases
    HeNormal,

    /// All zeros
    Zeros,
}

/// Random source for parameter initialization.
///
/// A seeded generator makes construction reproducible; without a seed the
/// generator is drawn from OS entropy.
pub fn init_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl WeightInit {
    /// Initialize a weight tensor of any rank.
    ///
    /// `fan_in` is the number of inputs feeding one output unit, `fan_out`
    /// the number of outputs one input unit feeds.
    pub fn initialize_weights<Sh, D, R>(
        &self,
        shape: Sh,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<Array<f32, D>>
    where
        Sh: ShapeBuilder<Dim = D>,
        D: Dimension,
        R: Rng + ?Sized,
    {
        check_fan("fan_in", fan_in)?;
        check_fan("fan_out", fan_out)?;

        let weights = match self {
            WeightInit::FanInUniform => {
                let limit = 1.0 / (fan_in as f32).sqrt();
                Array::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::XavierUniform => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                Array::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::HeNormal => {
                let std = (2.0 / fan_in as f32).sqrt();
                let dist = Normal::new(0.0, std)
                    .map_err(|e| QNetError::invalid_parameter("weight_init".to_string(), e.to_string()))?;
                Array::random_using(shape, dist, rng)
            }

            WeightInit::Zeros => Array::zeros(shape),
        };

        Ok(weights)
    }

    /// Initialize the bias vector of a layer with `size` output units.
    pub fn initialize_biases<R>(&self, size: usize, fan_in: usize, rng: &mut R) -> Result<Array<f32, ndarray::Ix1>>
    where
        R: Rng + ?Sized,
    {
        check_fan("fan_in", fan_in)?;

        match self {
            WeightInit::FanInUniform => {
                let limit = 1.0 / (fan_in as f32).sqrt();
                Ok(Array::random_using(size, Uniform::new_inclusive(-limit, limit), rng))
            }
            WeightInit::XavierUniform | WeightInit::HeNormal | WeightInit::Zeros => {
                Ok(Array::zeros(size))
            }
        }
    }
}

fn check_fan(name: &str, fan: usize) -> Result<()> {
    if fan == 0 {
        return Err(QNetError::invalid_parameter(name, "must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};

    #[test]
    fn test_fan_in_uniform_bounds() {
        let mut rng = init_rng(Some(7));
        let w: Array4<f32> = WeightInit::FanInUniform
            .initialize_weights((8, 4, 3, 3), 36, 72, &mut rng)
            .unwrap();
        let limit = 1.0 / 6.0;
        assert!(w.iter().all(|&v| v >= -limit && v <= limit));

        let b = WeightInit::FanInUniform.initialize_biases(8, 36, &mut rng).unwrap();
        assert!(b.iter().all(|&v| v >= -limit && v <= limit));
        assert!(b.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a: Array2<f32> = WeightInit::HeNormal
            .initialize_weights((10, 5), 10, 5, &mut init_rng(Some(42)))
            .unwrap();
        let b: Array2<f32> = WeightInit::HeNormal
            .initialize_weights((10, 5), 10, 5, &mut init_rng(Some(42)))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_fan_in_rejected() {
        let result: Result<Array2<f32>> =
            WeightInit::XavierUniform.initialize_weights((0, 3), 0, 3, &mut init_rng(None));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_biases_for_scaled_inits() {
        let mut rng = init_rng(Some(1));
        for init in [WeightInit::XavierUniform, WeightInit::HeNormal, WeightInit::Zeros] {
            let b = init.initialize_biases(4, 16, &mut rng).unwrap();
            assert!(b.iter().all(|&v| v == 0.0));
        }
    }
}
