//! # Activation Functions
//!
//! The Q-networks only need two activations: ReLU after every hidden
//! convolution and dense layer, and the identity on layers that emit raw
//! Q-values, state values or advantages.
//!
//! ```rust
//! use conv_qnet::activations::Activation;
//! use ndarray::array;
//!
//! let mut data = array![1.0, -0.5, 0.0, 2.0];
//! Activation::Relu.apply(&mut data);
//! assert_eq!(data, array![1.0, 0.0, 0.0, 2.0]);
//! ```

pub mod functions;

pub use functions::Activation;
