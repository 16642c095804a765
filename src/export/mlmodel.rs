//! MLflow model directory for a fitted forest
//!
//! A logged model is a directory holding an `MLmodel` descriptor (YAML) next
//! to the serialized model data (`model.json`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, TrackingError};
use crate::training::RandomForest;

/// Descriptor file name inside a model directory
pub const MLMODEL_FILE: &str = "MLmodel";
/// Serialized model file name inside a model directory
pub const MODEL_DATA_FILE: &str = "model.json";
/// Flavor key written to the descriptor
pub const FLAVOR_NAME: &str = "rust_forest";

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// Model type
    pub model_type: String,
    /// Training timestamp (RFC 3339)
    pub trained_at: String,
    /// Feature names
    pub feature_names: Vec<String>,
    /// Class labels in index order
    pub target_names: Vec<String>,
    /// Hyperparameters
    pub hyperparameters: BTreeMap<String, String>,
    /// Evaluation metrics
    pub metrics: BTreeMap<String, f64>,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self {
            model_type: "random_forest".to_string(),
            trained_at: chrono::Utc::now().to_rfc3339(),
            feature_names: Vec::new(),
            target_names: Vec::new(),
            hyperparameters: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }
}

impl ModelMetadata {
    /// Set feature names
    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.feature_names = features;
        self
    }

    /// Set class labels
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target_names = targets;
        self
    }

    /// Add hyperparameters
    pub fn with_hyperparameters(mut self, params: &[(String, String)]) -> Self {
        self.hyperparameters
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Add metric
    pub fn add_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// Flavor entry in the descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flavor {
    pub model_data: String,
    pub model_type: String,
    pub crate_version: String,
}

/// Contents of the `MLmodel` descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlModelDescriptor {
    pub artifact_path: String,
    pub flavors: BTreeMap<String, Flavor>,
    pub model_uuid: String,
    pub run_id: String,
    pub utc_time_created: String,
}

/// A fitted forest packaged for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlModel {
    pub metadata: ModelMetadata,
    pub forest: RandomForest,
}

impl MlModel {
    /// Package a fitted forest; unfitted forests are rejected
    pub fn new(forest: RandomForest, metadata: ModelMetadata) -> Result<Self> {
        if forest.n_trees() == 0 {
            return Err(TrackingError::ModelNotFitted);
        }
        Ok(Self { metadata, forest })
    }

    /// Descriptor for this model logged under `artifact_path` of `run_id`
    pub fn descriptor(&self, artifact_path: &str, run_id: &str) -> MlModelDescriptor {
        let mut flavors = BTreeMap::new();
        flavors.insert(
            FLAVOR_NAME.to_string(),
            Flavor {
                model_data: MODEL_DATA_FILE.to_string(),
                model_type: self.metadata.model_type.clone(),
                crate_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        MlModelDescriptor {
            artifact_path: artifact_path.to_string(),
            flavors,
            model_uuid: uuid::Uuid::new_v4().simple().to_string(),
            run_id: run_id.to_string(),
            utc_time_created: chrono::Utc::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
        }
    }

    /// Files making up the model directory, as `(file name, bytes)` pairs
    pub fn files(&self, artifact_path: &str, run_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let descriptor = serde_yaml::to_string(&self.descriptor(artifact_path, run_id))?;
        let data = serde_json::to_vec_pretty(self)?;
        Ok(vec![
            (MLMODEL_FILE.to_string(), descriptor.into_bytes()),
            (MODEL_DATA_FILE.to_string(), data),
        ])
    }

    /// Load a model back from a local model directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let descriptor: MlModelDescriptor =
            serde_yaml::from_str(&fs::read_to_string(dir.join(MLMODEL_FILE))?)?;
        let flavor = descriptor.flavors.get(FLAVOR_NAME).ok_or_else(|| {
            TrackingError::SerializationError(format!(
                "model at '{}' has no '{}' flavor", dir.display(), FLAVOR_NAME
            ))
        })?;
        let bytes = fs::read(dir.join(&flavor.model_data))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
