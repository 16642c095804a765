//! High-level tracking client

use tracing::{debug, info, warn};

use super::entities::{Experiment, LifecycleStage, ModelVersion, RegisteredModel, Run, RunStatus, ViewType};
use super::file_store::FileStore;
use super::rest_store::RestStore;
use super::run::{parse_runs_uri, ActiveRun};
use super::store::TrackingStore;
use crate::config::{TrackingConfig, TrackingUri};
use crate::error::{Result, TrackingError};

/// Tracking client bound to one tracking target
pub struct TrackingClient {
    store: Box<dyn TrackingStore>,
    tracking_uri: TrackingUri,
}

impl TrackingClient {
    /// Connect to the target named by the configuration.
    ///
    /// A missing tracking URI selects the local `mlruns` directory.
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let tracking_uri = config.resolve()?;
        let store: Box<dyn TrackingStore> = match &tracking_uri {
            TrackingUri::Rest(url) => Box::new(RestStore::new(url.clone(), config)?),
            TrackingUri::File(path) => Box::new(FileStore::new(path)?),
        };
        debug!(store = %store.describe(), local = tracking_uri.is_local(), "Tracking client ready");
        Ok(Self { store, tracking_uri })
    }

    /// Wrap an already-built store
    pub fn from_store(store: Box<dyn TrackingStore>, tracking_uri: TrackingUri) -> Self {
        Self { store, tracking_uri }
    }

    pub fn tracking_uri(&self) -> &TrackingUri {
        &self.tracking_uri
    }

    pub fn store(&self) -> &dyn TrackingStore {
        self.store.as_ref()
    }

    /// All experiments, active and deleted
    pub fn search_experiments(&self) -> Result<Vec<Experiment>> {
        self.store.search_experiments(ViewType::All)
    }

    pub fn search_registered_models(&self) -> Result<Vec<RegisteredModel>> {
        self.store.search_registered_models()
    }

    /// Return the named experiment, creating it when it does not exist
    pub fn set_experiment(&self, name: &str) -> Result<Experiment> {
        if let Some(experiment) = self.store.get_experiment_by_name(name)? {
            if experiment.lifecycle_stage == LifecycleStage::Deleted {
                return Err(TrackingError::InvalidState(format!(
                    "Cannot set a deleted experiment '{}' as the active experiment. \
                     Restore it or permanently delete it first.",
                    name
                )));
            }
            return Ok(experiment);
        }

        let experiment_id = self.store.create_experiment(name)?;
        info!(experiment_id = %experiment_id, name, "Created experiment");
        self.store
            .get_experiment_by_name(name)?
            .ok_or_else(|| TrackingError::NotFound(format!("Experiment '{}' vanished after creation", name)))
    }

    /// Open a run in the experiment; the returned guard closes it
    pub fn start_run(&self, experiment_id: &str) -> Result<ActiveRun<'_>> {
        let start_time = chrono::Utc::now().timestamp_millis();
        let info = self.store.create_run(experiment_id, start_time)?;
        Ok(ActiveRun::new(self, info))
    }

    /// Run `f` inside a run that ends `FINISHED` on success and `FAILED` on error
    pub fn with_run<T, F>(&self, experiment_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&ActiveRun<'_>) -> Result<T>,
    {
        let run = self.start_run(experiment_id)?;
        match f(&run) {
            Ok(value) => {
                run.end(RunStatus::Finished)?;
                Ok(value)
            }
            Err(err) => {
                let run_id = run.run_id().to_string();
                if let Err(end_err) = run.end(RunStatus::Failed) {
                    warn!(run_id = %run_id, error = %end_err, "Failed to mark run as FAILED");
                }
                Err(err)
            }
        }
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.store.get_run(run_id)
    }

    /// Register a model artifact under `name`, adding a new version.
    ///
    /// `runs:/<run_id>/<path>` URIs are resolved against the run's artifact root.
    pub fn register_model(&self, model_uri: &str, name: &str) -> Result<ModelVersion> {
        let (source, run_id) = match parse_runs_uri(model_uri) {
            Some((run_id, path)) => {
                let run = self.store.get_run(run_id)?;
                let root = run.info.artifact_uri.trim_end_matches('/');
                (format!("{}/{}", root, path), run_id.to_string())
            }
            None => (model_uri.to_string(), String::new()),
        };

        match self.store.create_registered_model(name) {
            Ok(_) => info!(name, "Successfully registered model"),
            Err(e) if e.is_already_exists() => {
                info!(name, "Registered model already exists, creating a new version")
            }
            Err(e) => return Err(e),
        }

        let version = self.store.create_model_version(name, &source, &run_id)?;
        info!(name, version = %version.version, "Created model version");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn client() -> (tempfile::TempDir, TrackingClient) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mlruns");
        let config = TrackingConfig::default().with_tracking_uri(root.display().to_string());
        let client = TrackingClient::new(&config).unwrap();
        assert_eq!(client.tracking_uri(), &TrackingUri::File(root));
        (dir, client)
    }

    #[test]
    fn test_set_experiment_creates_once() {
        let (_dir, client) = client();
        let first = client.set_experiment("Iris").unwrap();
        let second = client.set_experiment("Iris").unwrap();
        assert_eq!(first.experiment_id, second.experiment_id);
        assert_eq!(client.search_experiments().unwrap().len(), 2);
    }

    #[test]
    fn test_set_deleted_experiment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let id = store.create_experiment("Gone").unwrap();
        store.delete_experiment(&id).unwrap();

        let client = TrackingClient::from_store(
            Box::new(store),
            TrackingUri::File(PathBuf::from(dir.path())),
        );
        let err = client.set_experiment("Gone").unwrap_err();
        assert!(matches!(err, TrackingError::InvalidState(_)));
    }

    #[test]
    fn test_with_run_finishes_on_success() {
        let (_dir, client) = client();
        let exp = client.set_experiment("Iris").unwrap();

        let run_id = client
            .with_run(&exp.experiment_id, |run| {
                run.log_param("k", "v")?;
                Ok(run.run_id().to_string())
            })
            .unwrap();

        let run = client.get_run(&run_id).unwrap();
        assert_eq!(run.info.status, RunStatus::Finished);
        assert!(run.info.end_time.is_some());
    }

    #[test]
    fn test_with_run_fails_on_error() {
        let (_dir, client) = client();
        let exp = client.set_experiment("Iris").unwrap();
        let mut seen = String::new();

        let result: Result<()> = client.with_run(&exp.experiment_id, |run| {
            seen = run.run_id().to_string();
            Err(TrackingError::TrainingError("boom".to_string()))
        });

        assert!(matches!(result, Err(TrackingError::TrainingError(_))));
        assert_eq!(client.get_run(&seen).unwrap().info.status, RunStatus::Failed);
    }

    #[test]
    fn test_dropped_guard_marks_failed() {
        let (_dir, client) = client();
        let exp = client.set_experiment("Iris").unwrap();

        let run_id = {
            let run = client.start_run(&exp.experiment_id).unwrap();
            run.run_id().to_string()
        };

        assert_eq!(client.get_run(&run_id).unwrap().info.status, RunStatus::Failed);
    }

    #[test]
    fn test_guard_closes_run_on_panic() {
        let (_dir, client) = client();
        let exp = client.set_experiment("Iris").unwrap();
        let mut run_id = String::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let run = client.start_run(&exp.experiment_id).unwrap();
            run_id = run.run_id().to_string();
            panic!("training blew up");
        }));

        assert!(outcome.is_err());
        assert_eq!(client.get_run(&run_id).unwrap().info.status, RunStatus::Failed);
    }

    #[test]
    fn test_register_model_resolves_runs_uri() {
        let (_dir, client) = client();
        let exp = client.set_experiment("Iris").unwrap();
        let run = client.start_run(&exp.experiment_id).unwrap();
        let run_id = run.run_id().to_string();
        let artifact_uri = run.info().artifact_uri.clone();
        run.end(RunStatus::Finished).unwrap();

        let v1 = client
            .register_model(&format!("runs:/{}/model", run_id), "IrisClassifier")
            .unwrap();
        let v2 = client
            .register_model(&format!("runs:/{}/model", run_id), "IrisClassifier")
            .unwrap();

        assert_eq!(v1.version, "1");
        assert_eq!(v2.version, "2");
        assert_eq!(v1.run_id, run_id);
        assert_eq!(v1.source, format!("{}/model", artifact_uri));
    }

    #[test]
    fn test_register_model_unknown_run() {
        let (_dir, client) = client();
        let err = client.register_model("runs:/nosuchrun/model", "M").unwrap_err();
        assert!(err.is_not_found());
    }
}
