//! Error types for background removal operations

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgCutError>;

/// Error types for every stage of the background removal pipeline
#[derive(Error, Debug)]
pub enum BgCutError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors raised by the `image` crate
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The raster surface could not be created
    #[error("Environment error: {0}")]
    Environment(String),

    /// The segmentation oracle failed to load or to answer
    #[error("Oracle error during {operation}: {message}")]
    Oracle { operation: String, message: String },

    /// The oracle answered, but the reply cannot be used
    #[error("Invalid segmentation result: {0}")]
    InvalidSegmentationResult(String),

    /// Serializing the composited image produced no data
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Undecodable or degenerate input image
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal invariant violated while processing
    #[error("Processing error: {0}")]
    Processing(String),

    /// The caller abandoned the invocation
    #[error("Processing cancelled during {0}")]
    Cancelled(String),
}

impl BgCutError {
    /// Create a new environment error
    pub fn environment<S: Into<String>>(msg: S) -> Self {
        Self::Environment(msg.into())
    }

    /// Create a new oracle error for the given operation
    pub fn oracle<O: Into<String>, S: Into<String>>(operation: O, msg: S) -> Self {
        Self::Oracle {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a new invalid segmentation result error
    pub fn invalid_segmentation<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSegmentationResult(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding_failed<S: Into<String>>(msg: S) -> Self {
        Self::EncodingFailed(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new cancellation error naming the interrupted stage
    pub fn cancelled<S: Into<String>>(stage: S) -> Self {
        Self::Cancelled(stage.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Whether the error originates from the oracle side of the pipeline
    #[must_use]
    pub fn is_oracle_failure(&self) -> bool {
        matches!(
            self,
            Self::Oracle { .. } | Self::InvalidSegmentationResult(_)
        )
    }
}
