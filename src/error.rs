//! Error types for tracking and training

use thiserror::Error;

/// Result type alias for tracking operations
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API request to {endpoint} failed with status {status}: {error_code}: {message}")]
    ApiError {
        endpoint: String,
        status: u16,
        error_code: String,
        message: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl TrackingError {
    /// MLflow error code carried by this error, if any
    pub fn error_code(&self) -> Option<&str> {
        match self {
            TrackingError::ApiError { error_code, .. } => Some(error_code),
            TrackingError::NotFound(_) => Some("RESOURCE_DOES_NOT_EXIST"),
            TrackingError::AlreadyExists(_) => Some("RESOURCE_ALREADY_EXISTS"),
            TrackingError::InvalidParameterValue(_) => Some("INVALID_PARAMETER_VALUE"),
            TrackingError::InvalidState(_) => Some("INVALID_STATE"),
            _ => None,
        }
    }

    /// Whether the error means the requested resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.error_code() == Some("RESOURCE_DOES_NOT_EXIST")
    }

    /// Whether the error means the resource being created already exists
    pub fn is_already_exists(&self) -> bool {
        self.error_code() == Some("RESOURCE_ALREADY_EXISTS")
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        TrackingError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for TrackingError {
    fn from(err: serde_yaml::Error) -> Self {
        TrackingError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TrackingError {
    fn from(err: ndarray::ShapeError) -> Self {
        TrackingError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<url::ParseError> for TrackingError {
    fn from(err: url::ParseError) -> Self {
        TrackingError::ConfigError(format!("invalid tracking URI: {}", err))
    }
}
