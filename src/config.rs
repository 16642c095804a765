//! Configuration for the tracking client and the training job

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{Result, TrackingError};

pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";
pub const TRACKING_TOKEN_ENV: &str = "MLFLOW_TRACKING_TOKEN";
pub const TRACKING_USERNAME_ENV: &str = "MLFLOW_TRACKING_USERNAME";
pub const TRACKING_PASSWORD_ENV: &str = "MLFLOW_TRACKING_PASSWORD";
pub const REQUEST_TIMEOUT_ENV: &str = "MLFLOW_HTTP_REQUEST_TIMEOUT";

/// Local store used when no tracking URI is configured
pub const DEFAULT_LOCAL_STORE: &str = "mlruns";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Resolved tracking target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingUri {
    /// MLflow tracking server reached over its REST API
    Rest(Url),
    /// Local directory in the MLflow file store layout
    File(PathBuf),
}

impl TrackingUri {
    /// Parse a tracking URI the way the MLflow client interprets it
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TrackingError::ConfigError("tracking URI is empty".to_string()));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(TrackingUri::Rest(Url::parse(raw)?));
        }

        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(TrackingUri::File(PathBuf::from(path)));
        }
        if let Some(path) = raw.strip_prefix("file:") {
            return Ok(TrackingUri::File(PathBuf::from(path)));
        }

        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(TrackingError::ConfigError(format!(
                "unsupported tracking URI scheme '{}'", scheme
            )));
        }

        Ok(TrackingUri::File(PathBuf::from(raw)))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, TrackingUri::File(_))
    }
}

impl std::fmt::Display for TrackingUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingUri::Rest(url) => write!(f, "{}", url),
            TrackingUri::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// Credentials sent with every REST request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingAuth {
    None,
    Bearer(String),
    Basic { username: String, password: Option<String> },
}

/// Connection settings for the tracking client
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Raw tracking URI; `None` selects the local store
    pub tracking_uri: Option<String>,
    pub auth: TrackingAuth,
    pub request_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_uri: None,
            auth: TrackingAuth::None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl TrackingConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let auth = if let Some(token) = non_empty(TRACKING_TOKEN_ENV) {
            TrackingAuth::Bearer(token)
        } else if let Some(username) = non_empty(TRACKING_USERNAME_ENV) {
            TrackingAuth::Basic {
                username,
                password: non_empty(TRACKING_PASSWORD_ENV),
            }
        } else {
            TrackingAuth::None
        };

        let request_timeout = match non_empty(REQUEST_TIMEOUT_ENV) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    TrackingError::ConfigError(format!(
                        "{} must be a whole number of seconds, got '{}'",
                        REQUEST_TIMEOUT_ENV, raw
                    ))
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        Ok(Self {
            tracking_uri: non_empty(TRACKING_URI_ENV),
            auth,
            request_timeout,
        })
    }

    /// Override the tracking URI
    pub fn with_tracking_uri(mut self, uri: impl Into<String>) -> Self {
        self.tracking_uri = Some(uri.into());
        self
    }

    /// Set request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve the tracking target, falling back to the local store
    pub fn resolve(&self) -> Result<TrackingUri> {
        match self.tracking_uri.as_deref() {
            Some(raw) => TrackingUri::parse(raw),
            None => Ok(TrackingUri::File(PathBuf::from(DEFAULT_LOCAL_STORE))),
        }
    }
}

/// Random forest hyperparameters logged with every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            random_state: 42,
        }
    }
}

impl ForestParams {
    /// Parameters as tracking key/value pairs
    pub fn as_params(&self) -> Vec<(String, String)> {
        vec![
            ("n_estimators".to_string(), self.n_estimators.to_string()),
            ("max_depth".to_string(), self.max_depth.to_string()),
            ("random_state".to_string(), self.random_state.to_string()),
        ]
    }
}

impl std::fmt::Display for ForestParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{n_estimators: {}, max_depth: {}, random_state: {}}}",
            self.n_estimators, self.max_depth, self.random_state
        )
    }
}

/// Settings of the training job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainJobConfig {
    pub experiment_name: String,
    pub model_name: String,
    pub artifact_path: String,
    pub test_size: f64,
    pub split_seed: u64,
    pub forest: ForestParams,
    pub tag: (String, String),
}

impl Default for TrainJobConfig {
    fn default() -> Self {
        Self {
            experiment_name: "Iris-Classification-Experiment".to_string(),
            model_name: "IrisClassifier".to_string(),
            artifact_path: "iris-random-forest-model".to_string(),
            test_size: 0.2,
            split_seed: 42,
            forest: ForestParams::default(),
            tag: ("run_context".to_string(), "jenkins_pipeline".to_string()),
        }
    }
}

impl TrainJobConfig {
    /// Set experiment name
    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    /// Set registered model name
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Set forest hyperparameters
    pub fn with_forest(mut self, forest: ForestParams) -> Self {
        self.forest = forest;
        self
    }

    /// Check the settings before any tracking call is made
    pub fn validate(&self) -> Result<()> {
        if self.experiment_name.trim().is_empty() {
            return Err(TrackingError::ConfigError("experiment name is empty".to_string()));
        }
        if self.model_name.trim().is_empty() {
            return Err(TrackingError::ConfigError("model name is empty".to_string()));
        }
        if self.artifact_path.trim().is_empty() || self.artifact_path.contains("..") {
            return Err(TrackingError::ConfigError(format!(
                "invalid artifact path '{}'", self.artifact_path
            )));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(TrackingError::ConfigError(format!(
                "test size must be in (0, 1), got {}", self.test_size
            )));
        }
        if self.forest.n_estimators == 0 {
            return Err(TrackingError::ConfigError("n_estimators must be positive".to_string()));
        }
        Ok(())
    }
}
