//! # conv-qnet - Deep Convolutional Q-Networks
//!
//! Value-function approximators for deep Q-learning on pixel observations.
//! A state is a stack of recent game frames shaped
//! `(batch, channels, height, width)`; a network maps it to one Q-value per
//! discrete action.
//!
//! Two architectures share the same convolutional trunk:
//!
//! - [`DeepConvQNetwork`]: trunk -> 512 -> Q-values
//! - [`DuelingDeepConvQNetwork`]: trunk -> value stream + advantage stream,
//!   recombined as `V + (A - mean(A))`
//!
//! Training, replay and exploration live outside this crate. Networks expose
//! their parameters through [`QNetwork::parameters_mut`] for an external
//! optimizer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conv_qnet::{DeepConvQNetwork, InputDim};
//! use ndarray::Array4;
//!
//! let network = DeepConvQNetwork::new(InputDim::new(4, 84, 84)?, 6)?;
//! let states = Array4::<f32>::zeros((32, 4, 84, 84));
//! let q_values = network.forward(states.view())?;
//! assert_eq!(q_values.dim(), (32, 6));
//! # Ok::<(), conv_qnet::QNetError>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - ReLU and identity
//! - [`config`] - Network configuration, JSON loading
//! - [`device`] - Compute target selection and input placement
//! - [`error`] - Error types and result handling
//! - [`layers`] - Convolution and dense layers, initialization
//! - [`network`] - The Q-network architectures
//! - [`trunk`] - Shared convolutional trunk and shape inference

pub mod activations;
pub mod config;
pub mod device;
pub mod error;
pub mod layers;
pub mod network;
pub mod trunk;

pub use config::{Architecture, InputDim, NetworkConfig, NetworkConfigBuilder};
pub use device::ComputeTarget;
pub use error::{QNetError, Result};
pub use network::{
    build_q_network, dueling_combine, greedy_actions, DeepConvQNetwork, DuelingDeepConvQNetwork, QNetwork,
};
