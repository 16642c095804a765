//! Storage backend trait for experiment tracking

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::entities::{Experiment, Metric, ModelVersion, RegisteredModel, Run, RunInfo, RunStatus, ViewType};
use crate::error::{Result, TrackingError};

/// Tracking backend: a remote MLflow server or a local directory
pub trait TrackingStore: Send + Sync {
    /// Short description of where the store points, for logs
    fn describe(&self) -> String;

    /// List experiments matching the view type
    fn search_experiments(&self, view_type: ViewType) -> Result<Vec<Experiment>>;

    /// Look an experiment up by name, `None` when absent
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>>;

    /// Create an experiment and return its ID
    fn create_experiment(&self, name: &str) -> Result<String>;

    /// Create a run in `RUNNING` state
    fn create_run(&self, experiment_id: &str, start_time: i64) -> Result<RunInfo>;

    /// Set the run status and end time
    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo>;

    fn get_run(&self, run_id: &str) -> Result<Run>;

    /// Log a param; params are write-once per key
    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()>;

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()>;

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()>;

    /// Store one artifact file at `path`, relative to the run's artifact root
    fn log_artifact(&self, run: &RunInfo, path: &str, contents: &[u8]) -> Result<()>;

    fn search_registered_models(&self) -> Result<Vec<RegisteredModel>>;

    fn create_registered_model(&self, name: &str) -> Result<RegisteredModel>;

    /// Create the next version of a registered model
    fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> Result<ModelVersion>;
}

/// Check a param, metric or tag key.
///
/// Keys become file names in the local store, so they must stay relative
/// and free of parent references.
pub fn validate_key(kind: &str, key: &str) -> Result<()> {
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ' | '/');
    if key.is_empty() || key.len() > 250 || !key.chars().all(allowed) {
        return Err(TrackingError::InvalidParameterValue(format!(
            "invalid {} name '{}'", kind, key
        )));
    }
    relative_path(key).map(|_| ()).map_err(|_| {
        TrackingError::InvalidParameterValue(format!("invalid {} name '{}'", kind, key))
    })
}

/// Validate a relative artifact path and turn it into a `PathBuf`
pub fn relative_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(TrackingError::InvalidParameterValue(format!(
                    "path '{}' must be relative and must not leave the artifact root", path
                )))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(TrackingError::InvalidParameterValue("empty artifact path".to_string()));
    }
    Ok(clean)
}

/// Local directory behind a `file:` or plain-path artifact URI
pub fn local_artifact_root(artifact_uri: &str) -> Option<PathBuf> {
    if let Some(path) = artifact_uri.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = artifact_uri.strip_prefix("file:") {
        return Some(PathBuf::from(path));
    }
    if artifact_uri.contains("://") || artifact_uri.contains(":/") {
        return None;
    }
    Some(PathBuf::from(artifact_uri))
}

/// Write an artifact file below a local artifact root
pub fn write_local_artifact(root: &Path, path: &str, contents: &[u8]) -> Result<PathBuf> {
    let target = root.join(relative_path(path)?);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, contents)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("param", "n_estimators").is_ok());
        assert!(validate_key("tag", "mlflow.source/name").is_ok());
        assert!(validate_key("param", "").is_err());
        assert!(validate_key("param", "../escape").is_err());
        assert!(validate_key("param", "/abs").is_err());
        assert!(validate_key("metric", "bad:key").is_err());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path("./model/MLmodel").unwrap(),
            PathBuf::from("model/MLmodel")
        );
        assert!(relative_path("a/../../b").is_err());
        assert!(relative_path(".").is_err());
    }

    #[test]
    fn test_local_artifact_root() {
        assert_eq!(
            local_artifact_root("file:///tmp/mlruns/0/abc/artifacts"),
            Some(PathBuf::from("/tmp/mlruns/0/abc/artifacts"))
        );
        assert_eq!(
            local_artifact_root("/srv/artifacts"),
            Some(PathBuf::from("/srv/artifacts"))
        );
        assert_eq!(local_artifact_root("mlflow-artifacts:/1/abc/artifacts"), None);
        assert_eq!(local_artifact_root("s3://bucket/path"), None);
    }

    #[test]
    fn test_write_local_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_local_artifact(dir.path(), "model/model.json", b"{}").unwrap();
        assert_eq!(std::fs::read(&written).unwrap(), b"{}");
        assert!(write_local_artifact(dir.path(), "../x", b"").is_err());
    }
}
