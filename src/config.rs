//! Network configuration
//!
//! A [`NetworkConfig`] fully determines how a Q-network is built: which
//! architecture, the input frame-stack geometry, the action count, the compute
//! target and how parameters are initialized. It round-trips through JSON.

use std::fs;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::{Serialize, Deserialize};

use crate::device::ComputeTarget;
use crate::error::{QNetError, Result};
use crate::layers::WeightInit;

/// Shape of one input state: `(channels, height, width)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InputDim {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputDim {
    /// Create an input descriptor. Every component must be positive.
    pub fn new(channels: usize, height: usize, width: usize) -> Result<Self> {
        for (name, value) in [("channels", channels), ("height", height), ("width", width)] {
            if value == 0 {
                return Err(QNetError::invalid_parameter(
                    format!("input_dim.{}", name),
                    "must be positive".to_string(),
                ));
            }
        }
        Ok(InputDim { channels, height, width })
    }

    /// Full batch shape `(batch, channels, height, width)`
    pub fn batch_shape(&self, batch: usize) -> (usize, usize, usize, usize) {
        (batch, self.channels, self.height, self.width)
    }

}

#[derive(Deserialize)]
struct StoredInputDim {
    channels: usize,
    height: usize,
    width: usize,
}

impl<'de> Deserialize<'de> for InputDim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = StoredInputDim::deserialize(deserializer)?;
        InputDim::new(stored.channels, stored.height, stored.width).map_err(de::Error::custom)
    }
}

impl TryFrom<&[usize]> for InputDim {
    type Error = QNetError;

    fn try_from(dims: &[usize]) -> Result<Self> {
        match *dims {
            [channels, height, width] => InputDim::new(channels, height, width),
            _ => Err(QNetError::invalid_parameter(
                "input_dim".to_string(),
                format!("expected exactly 3 components (channels, height, width), got {}", dims.len()),
            )),
        }
    }
}

impl TryFrom<(usize, usize, usize)> for InputDim {
    type Error = QNetError;

    fn try_from((channels, height, width): (usize, usize, usize)) -> Result<Self> {
        InputDim::new(channels, height, width)
    }
}

impl std::fmt::Display for InputDim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.channels, self.height, self.width)
    }
}

/// Which Q-network head sits on top of the convolutional trunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// Trunk -> 512 -> one Q-value per action
    #[default]
    Standard,
    /// Trunk -> separate value and advantage streams
    Dueling,
}

/// Everything needed to construct a Q-network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub architecture: Architecture,
    pub input_dim: Vec<usize>,
    pub output_dim: usize,
    #[serde(default)]
    pub compute_target: ComputeTarget,
    #[serde(default)]
    pub weight_init: WeightInit,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl NetworkConfig {
    pub fn new(architecture: Architecture, input_dim: InputDim, output_dim: usize) -> Self {
        NetworkConfig {
            architecture,
            input_dim: vec![input_dim.channels, input_dim.height, input_dim.width],
            output_dim,
            compute_target: ComputeTarget::default(),
            weight_init: WeightInit::default(),
            seed: None,
        }
    }

    /// Validated input descriptor
    pub fn input_dim(&self) -> Result<InputDim> {
        InputDim::try_from(self.input_dim.as_slice())
    }

    /// Check every value that can be checked without building the network
    pub fn validate(&self) -> Result<()> {
        self.input_dim()?;
        validate_output_dim(self.output_dim)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NetworkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub(crate) fn validate_output_dim(output_dim: usize) -> Result<()> {
    if output_dim == 0 {
        return Err(QNetError::invalid_parameter("output_dim", "must be positive"));
    }
    Ok(())
}

/// Builder for [`NetworkConfig`]
pub struct NetworkConfigBuilder {
    architecture: Architecture,
    input_dim: Option<Vec<usize>>,
    output_dim: Option<usize>,
    compute_target: ComputeTarget,
    weight_init: WeightInit,
    seed: Option<u64>,
}

impl NetworkConfigBuilder {
    pub fn new() -> Self {
        NetworkConfigBuilder {
            architecture: Architecture::default(),
            input_dim: None,
            output_dim: None,
            compute_target: ComputeTarget::default(),
            weight_init: WeightInit::default(),
            seed: None,
        }
    }

    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn input_dim(mut self, dims: &[usize]) -> Self {
        self.input_dim = Some(dims.to_vec());
        self
    }

    pub fn output_dim(mut self, output_dim: usize) -> Self {
        self.output_dim = Some(output_dim);
        self
    }

    pub fn compute_target(mut self, target: ComputeTarget) -> Self {
        self.compute_target = target;
        self
    }

    pub fn weight_init(mut self, init: WeightInit) -> Self {
        self.weight_init = init;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<NetworkConfig> {
        let input_dim = self.input_dim.ok_or_else(|| {
            QNetError::invalid_parameter("input_dim", "input_dim is required")
        })?;
        let output_dim = self.output_dim.ok_or_else(|| {
            QNetError::invalid_parameter("output_dim", "output_dim is required")
        })?;

        let config = NetworkConfig {
            architecture: self.architecture,
            input_dim,
            output_dim,
            compute_target: self.compute_target,
            weight_init: self.weight_init,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for NetworkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
