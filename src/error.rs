use std::fmt;

/// Result type for Q-network operations
pub type Result<T> = std::result::Result<T, QNetError>;

/// Main error type for the crate
#[derive(Debug, Clone, PartialEq)]
pub enum QNetError {
    /// Tensor rank or extent does not match what a layer expects
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid construction or configuration value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// Spatial input is smaller than a convolution kernel
    ReceptiveField {
        layer: String,
        kernel: (usize, usize),
        input: (usize, usize),
    },

    /// IO errors (config files)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),
}

impl fmt::Display for QNetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QNetError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            QNetError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            QNetError::ReceptiveField { layer, kernel, input } => write!(
                f,
                "Input too small for {}: kernel {}x{} does not fit spatial input {}x{}",
                layer, kernel.0, kernel.1, input.0, input.1
            ),
            QNetError::IoError(msg) => write!(f, "IO error: {}", msg),
            QNetError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for QNetError {}

impl From<std::io::Error> for QNetError {
    fn from(err: std::io::Error) -> Self {
        QNetError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for QNetError {
    fn from(err: serde_json::Error) -> Self {
        QNetError::SerializationError(err.to_string())
    }
}

// Helper functions for common error patterns
impl QNetError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        QNetError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        QNetError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by tensor shapes rather than bad values
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            QNetError::DimensionMismatch { .. } | QNetError::ReceptiveField { .. }
        )
    }
}
