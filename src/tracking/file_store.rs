//! Local directory tracking store
//!
//! Layout follows the MLflow file store:
//!
//! ```text
//! mlruns/
//!   <experiment_id>/meta.yaml
//!   <experiment_id>/<run_id>/meta.yaml
//!   <experiment_id>/<run_id>/{params,metrics,tags}/<key>
//!   <experiment_id>/<run_id>/artifacts/...
//!   .trash/<experiment_id>/...
//!   models/<name>/meta.yaml
//!   models/<name>/version-<n>/meta.yaml
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::entities::{
    latest_per_stage, Experiment, LifecycleStage, Metric, ModelVersion, Param, RegisteredModel,
    Run, RunData, RunInfo, RunStatus, RunTag, ViewType,
};
use super::store::{local_artifact_root, relative_path, validate_key, write_local_artifact, TrackingStore};
use crate::error::{Result, TrackingError};

const META_FILE: &str = "meta.yaml";
const TRASH_DIR: &str = ".trash";
const MODELS_DIR: &str = "models";
const DEFAULT_EXPERIMENT_ID: &str = "0";
const DEFAULT_EXPERIMENT_NAME: &str = "Default";

/// Tracking store backed by a local directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the root and the default experiment if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let store = Self {
            root: fs::canonicalize(root.as_ref())?,
        };

        if store.experiment_dir(DEFAULT_EXPERIMENT_ID).is_none() {
            store.write_experiment(DEFAULT_EXPERIMENT_ID, DEFAULT_EXPERIMENT_NAME)?;
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mark an experiment deleted by moving it to the trash folder
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        let active = self.root.join(experiment_id);
        if !active.join(META_FILE).is_file() {
            return Err(TrackingError::NotFound(format!(
                "No active experiment with id '{}'", experiment_id
            )));
        }

        let mut experiment: Experiment = read_yaml(&active.join(META_FILE))?;
        experiment.lifecycle_stage = LifecycleStage::Deleted;
        experiment.last_update_time = Some(now_millis());
        write_yaml(&active.join(META_FILE), &experiment)?;

        let trash = self.root.join(TRASH_DIR);
        fs::create_dir_all(&trash)?;
        fs::rename(&active, trash.join(experiment_id))?;
        info!(experiment_id, "Moved experiment to trash");
        Ok(())
    }

    fn experiment_dir(&self, experiment_id: &str) -> Option<PathBuf> {
        [self.root.join(experiment_id), self.root.join(TRASH_DIR).join(experiment_id)]
            .into_iter()
            .find(|dir| dir.join(META_FILE).is_file())
    }

    fn experiment_dirs(&self, view_type: ViewType) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        if view_type.includes(LifecycleStage::Active) {
            dirs.extend(child_dirs(&self.root)?.into_iter().filter(|d| {
                let name = dir_name(d);
                name != TRASH_DIR && name != MODELS_DIR && d.join(META_FILE).is_file()
            }));
        }
        if view_type.includes(LifecycleStage::Deleted) {
            dirs.extend(
                child_dirs(&self.root.join(TRASH_DIR))?
                    .into_iter()
                    .filter(|d| d.join(META_FILE).is_file()),
            );
        }
        Ok(dirs)
    }

    fn all_experiments(&self) -> Result<Vec<Experiment>> {
        self.search_experiments(ViewType::All)
    }

    fn write_experiment(&self, experiment_id: &str, name: &str) -> Result<Experiment> {
        let dir = self.root.join(experiment_id);
        fs::create_dir_all(&dir)?;
        let now = now_millis();
        let experiment = Experiment {
            experiment_id: experiment_id.to_string(),
            name: name.to_string(),
            artifact_location: file_uri(&dir),
            lifecycle_stage: LifecycleStage::Active,
            creation_time: Some(now),
            last_update_time: Some(now),
            tags: Vec::new(),
        };
        write_yaml(&dir.join(META_FILE), &experiment)?;
        Ok(experiment)
    }

    fn next_experiment_id(&self) -> Result<String> {
        let max_id = self
            .all_experiments()?
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok((max_id + 1).to_string())
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        validate_id("run", run_id)?;
        for exp_dir in self.experiment_dirs(ViewType::All)? {
            let candidate = exp_dir.join(run_id);
            if candidate.join(META_FILE).is_file() {
                return Ok(candidate);
            }
        }
        Err(TrackingError::NotFound(format!("Run '{}' not found", run_id)))
    }

    fn active_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        let run_info: RunInfo = read_yaml(&dir.join(META_FILE))?;
        if run_info.status.is_terminated() {
            return Err(TrackingError::InvalidState(format!(
                "Run '{}' is already {} and cannot be modified", run_id, run_info.status
            )));
        }
        Ok(dir)
    }

    fn model_dir(&self, name: &str) -> Result<PathBuf> {
        validate_model_name(name)?;
        Ok(self.root.join(MODELS_DIR).join(name))
    }

    fn model_versions(&self, model_dir: &Path) -> Result<Vec<ModelVersion>> {
        let mut versions: Vec<ModelVersion> = child_dirs(model_dir)?
            .into_iter()
            .filter(|d| dir_name(d).starts_with("version-") && d.join(META_FILE).is_file())
            .map(|d| read_yaml(&d.join(META_FILE)))
            .collect::<Result<_>>()?;
        versions.sort_by_key(|v| v.version_number());
        Ok(versions)
    }
}

impl TrackingStore for FileStore {
    fn describe(&self) -> String {
        file_uri(&self.root)
    }

    fn search_experiments(&self, view_type: ViewType) -> Result<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> = self
            .experiment_dirs(view_type)?
            .iter()
            .map(|dir| read_yaml(&dir.join(META_FILE)))
            .collect::<Result<_>>()?;
        experiments.sort_by(|a, b| {
            let key = |e: &Experiment| e.experiment_id.parse::<u64>().unwrap_or(u64::MAX);
            key(a).cmp(&key(b)).then_with(|| a.experiment_id.cmp(&b.experiment_id))
        });
        Ok(experiments)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        Ok(self.all_experiments()?.into_iter().find(|e| e.name == name))
    }

    fn create_experiment(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(TrackingError::InvalidParameterValue(
                "experiment name must not be empty".to_string(),
            ));
        }
        if let Some(existing) = self.get_experiment_by_name(name)? {
            return Err(TrackingError::AlreadyExists(format!(
                "Experiment '{}' already exists with id {}", name, existing.experiment_id
            )));
        }

        let experiment_id = self.next_experiment_id()?;
        self.write_experiment(&experiment_id, name)?;
        Ok(experiment_id)
    }

    fn create_run(&self, experiment_id: &str, start_time: i64) -> Result<RunInfo> {
        let exp_dir = self.root.join(experiment_id);
        if !exp_dir.join(META_FILE).is_file() {
            return Err(TrackingError::NotFound(format!(
                "No active experiment with id '{}'", experiment_id
            )));
        }

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let run_dir = exp_dir.join(&run_id);
        for sub in ["params", "metrics", "tags", "artifacts"] {
            fs::create_dir_all(run_dir.join(sub))?;
        }

        let run_info = RunInfo {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            run_name: None,
            user_id: std::env::var("USER").ok(),
            status: RunStatus::Running,
            start_time: Some(start_time),
            end_time: None,
            artifact_uri: file_uri(&run_dir.join("artifacts")),
            lifecycle_stage: LifecycleStage::Active,
        };
        write_yaml(&run_dir.join(META_FILE), &run_info)?;
        debug!(run_id = %run_id, experiment_id, "Created run directory");
        Ok(run_info)
    }

    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo> {
        let meta = self.run_dir(run_id)?.join(META_FILE);
        let mut run_info: RunInfo = read_yaml(&meta)?;
        run_info.status = status;
        if status.is_terminated() {
            run_info.end_time = Some(end_time);
        }
        write_yaml(&meta, &run_info)?;
        Ok(run_info)
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        let dir = self.run_dir(run_id)?;
        let info: RunInfo = read_yaml(&dir.join(META_FILE))?;

        let params = read_key_files(&dir.join("params"))?
            .into_iter()
            .map(|(key, value)| Param { key, value })
            .collect();
        let tags = read_key_files(&dir.join("tags"))?
            .into_iter()
            .map(|(key, value)| RunTag { key, value })
            .collect();

        let mut metrics = Vec::new();
        for (key, history) in read_key_files(&dir.join("metrics"))? {
            for line in history.lines().filter(|l| !l.trim().is_empty()) {
                metrics.push(parse_metric_line(&key, line)?);
            }
        }

        Ok(Run {
            info,
            data: RunData { metrics, params, tags },
        })
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("param", key)?;
        let path = self.active_run_dir(run_id)?.join("params").join(relative_path(key)?);

        if path.is_file() {
            let existing = fs::read_to_string(&path)?;
            if existing == value {
                return Ok(());
            }
            return Err(TrackingError::InvalidParameterValue(format!(
                "Changing param values is not allowed. Param with key='{}' was already logged \
                 with value='{}' for run ID='{}'. Attempted logging new value '{}'.",
                key, existing, run_id, value
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, value)?;
        Ok(())
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        validate_key("metric", &metric.key)?;
        if !metric.value.is_finite() {
            return Err(TrackingError::InvalidParameterValue(format!(
                "metric '{}' must be finite, got {}", metric.key, metric.value
            )));
        }
        let path = self
            .active_run_dir(run_id)?
            .join("metrics")
            .join(relative_path(&metric.key)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{} {} {}", metric.timestamp, metric.value, metric.step)?;
        Ok(())
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("tag", key)?;
        let path = self.active_run_dir(run_id)?.join("tags").join(relative_path(key)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, value)?;
        Ok(())
    }

    fn log_artifact(&self, run: &RunInfo, path: &str, contents: &[u8]) -> Result<()> {
        self.active_run_dir(&run.run_id)?;
        let root = local_artifact_root(&run.artifact_uri).ok_or_else(|| {
            TrackingError::ConfigError(format!(
                "artifact URI '{}' is not a local path", run.artifact_uri
            ))
        })?;
        let written = write_local_artifact(&root, path, contents)?;
        debug!(path = %written.display(), bytes = contents.len(), "Wrote artifact");
        Ok(())
    }

    fn search_registered_models(&self) -> Result<Vec<RegisteredModel>> {
        let mut models = Vec::new();
        for dir in child_dirs(&self.root.join(MODELS_DIR))? {
            if !dir.join(META_FILE).is_file() {
                continue;
            }
            let mut model: RegisteredModel = read_yaml(&dir.join(META_FILE))?;
            model.latest_versions = latest_per_stage(&self.model_versions(&dir)?);
            models.push(model);
        }
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    fn create_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        let dir = self.model_dir(name)?;
        if dir.join(META_FILE).is_file() {
            return Err(TrackingError::AlreadyExists(format!(
                "Registered Model (name={}) already exists.", name
            )));
        }

        fs::create_dir_all(&dir)?;
        let now = now_millis();
        let model = RegisteredModel {
            name: name.to_string(),
            creation_timestamp: Some(now),
            last_updated_timestamp: Some(now),
            description: None,
            latest_versions: Vec::new(),
        };
        write_yaml(&dir.join(META_FILE), &model)?;
        Ok(model)
    }

    fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> Result<ModelVersion> {
        let dir = self.model_dir(name)?;
        if !dir.join(META_FILE).is_file() {
            return Err(TrackingError::NotFound(format!(
                "Registered Model with name={} not found", name
            )));
        }

        let next = self
            .model_versions(&dir)?
            .iter()
            .filter_map(|v| v.version_number())
            .max()
            .unwrap_or(0)
            + 1;

        let now = now_millis();
        let version = ModelVersion {
            name: name.to_string(),
            version: next.to_string(),
            creation_timestamp: Some(now),
            last_updated_timestamp: Some(now),
            current_stage: "None".to_string(),
            description: None,
            source: source.to_string(),
            run_id: run_id.to_string(),
            status: Some("READY".to_string()),
        };
        let version_dir = dir.join(format!("version-{}", next));
        fs::create_dir_all(&version_dir)?;
        write_yaml(&version_dir.join(META_FILE), &version)?;

        let mut model: RegisteredModel = read_yaml(&dir.join(META_FILE))?;
        model.last_updated_timestamp = Some(now);
        write_yaml(&dir.join(META_FILE), &model)?;

        Ok(version)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read `<dir>/<key>` files; nested directories become `/`-separated keys
fn read_key_files(dir: &Path) -> Result<Vec<(String, String)>> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<(String, String)>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(base, &path, out)?;
            } else {
                let key = path
                    .strip_prefix(base)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.push((key, fs::read_to_string(&path)?));
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    if dir.is_dir() {
        walk(dir, dir, &mut entries)?;
    }
    entries.sort();
    Ok(entries)
}

fn parse_metric_line(key: &str, line: &str) -> Result<Metric> {
    let malformed = || {
        TrackingError::SerializationError(format!("malformed metric line for '{}': {}", key, line))
    };
    let mut parts = line.split_whitespace();
    let timestamp = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
    let value = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
    let step = match parts.next() {
        Some(p) => p.parse().map_err(|_| malformed())?,
        None => 0,
    };
    Ok(Metric {
        key: key.to_string(),
        value,
        timestamp,
        step,
    })
}

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(TrackingError::InvalidParameterValue(format!("invalid {} id '{}'", kind, id)));
    }
    Ok(())
}

fn validate_model_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(TrackingError::InvalidParameterValue(format!(
            "invalid registered model name '{}'", name
        )));
    }
    Ok(())
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_yaml::to_string(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("mlruns")).unwrap();
        (dir, store)
    }

    fn metric(key: &str, value: f64) -> Metric {
        Metric { key: key.to_string(), value, timestamp: 1000, step: 0 }
    }

    #[test]
    fn test_default_experiment_created() {
        let (_dir, store) = store();
        let experiments = store.search_experiments(ViewType::All).unwrap();
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments[0].experiment_id, "0");
        assert_eq!(experiments[0].name, "Default");
        assert!(experiments[0].artifact_location.starts_with("file://"));
        assert!(store.root().is_absolute());
        assert!(store.root().join("0").join(META_FILE).is_file());
    }

    #[test]
    fn test_create_and_lookup_experiment() {
        let (_dir, store) = store();
        let id = store.create_experiment("Iris").unwrap();
        assert_eq!(id, "1");

        let found = store.get_experiment_by_name("Iris").unwrap().unwrap();
        assert_eq!(found.experiment_id, "1");
        assert!(store.get_experiment_by_name("Other").unwrap().is_none());

        let err = store.create_experiment("Iris").unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_deleted_experiments_and_view_types() {
        let (_dir, store) = store();
        let id = store.create_experiment("Old").unwrap();
        store.delete_experiment(&id).unwrap();

        let active = store.search_experiments(ViewType::ActiveOnly).unwrap();
        assert!(active.iter().all(|e| e.name != "Old"));

        let deleted = store.search_experiments(ViewType::DeletedOnly).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].lifecycle_stage, LifecycleStage::Deleted);

        assert_eq!(store.search_experiments(ViewType::All).unwrap().len(), 2);
        // IDs are never reused, even for trashed experiments
        assert_eq!(store.create_experiment("New").unwrap(), "2");
    }

    #[test]
    fn test_run_lifecycle() {
        let (_dir, store) = store();
        let run = store.create_run("0", 10).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.run_id.len(), 32);

        store.log_param(&run.run_id, "max_depth", "6").unwrap();
        store.log_metric(&run.run_id, &metric("accuracy", 0.9)).unwrap();
        store.set_tag(&run.run_id, "run_context", "ci").unwrap();

        let ended = store.update_run(&run.run_id, RunStatus::Finished, 20).unwrap();
        assert_eq!(ended.end_time, Some(20));

        let fetched = store.get_run(&run.run_id).unwrap();
        assert_eq!(fetched.info.status, RunStatus::Finished);
        assert_eq!(fetched.param("max_depth"), Some("6"));
        assert_eq!(fetched.metric("accuracy"), Some(0.9));
        assert_eq!(fetched.tag("run_context"), Some("ci"));
    }

    #[test]
    fn test_params_are_write_once() {
        let (_dir, store) = store();
        let run = store.create_run("0", 0).unwrap();

        store.log_param(&run.run_id, "seed", "42").unwrap();
        store.log_param(&run.run_id, "seed", "42").unwrap();
        let err = store.log_param(&run.run_id, "seed", "7").unwrap_err();
        assert!(matches!(err, TrackingError::InvalidParameterValue(_)));

        assert_eq!(store.get_run(&run.run_id).unwrap().data.params.len(), 1);
    }

    #[test]
    fn test_metric_history_appends() {
        let (_dir, store) = store();
        let run = store.create_run("0", 0).unwrap();
        store.log_metric(&run.run_id, &metric("loss", 1.0)).unwrap();
        store
            .log_metric(&run.run_id, &Metric { step: 1, ..metric("loss", 0.5) })
            .unwrap();

        let fetched = store.get_run(&run.run_id).unwrap();
        assert_eq!(fetched.data.metrics.len(), 2);
        assert_eq!(fetched.metric("loss"), Some(0.5));
        assert!(store.log_metric(&run.run_id, &metric("nan", f64::NAN)).is_err());
    }

    #[test]
    fn test_closed_run_rejects_writes() {
        let (_dir, store) = store();
        let run = store.create_run("0", 0).unwrap();
        store.update_run(&run.run_id, RunStatus::Failed, 1).unwrap();

        let err = store.set_tag(&run.run_id, "k", "v").unwrap_err();
        assert!(matches!(err, TrackingError::InvalidState(_)));
        assert!(store.log_param(&run.run_id, "k", "v").is_err());
    }

    #[test]
    fn test_artifacts_land_under_run() {
        let (_dir, store) = store();
        let run = store.create_run("0", 0).unwrap();
        store.log_artifact(&run, "model/model.json", b"{\"a\":1}").unwrap();

        let root = local_artifact_root(&run.artifact_uri).unwrap();
        assert_eq!(fs::read(root.join("model/model.json")).unwrap(), b"{\"a\":1}");
        assert!(store.log_artifact(&run, "../escape", b"").is_err());
    }

    #[test]
    fn test_unknown_run_and_experiment() {
        let (_dir, store) = store();
        assert!(store.get_run("deadbeef").unwrap_err().is_not_found());
        assert!(store.create_run("99", 0).unwrap_err().is_not_found());
        assert!(store.get_run("../0").is_err());
    }

    #[test]
    fn test_model_versions_increase() {
        let (_dir, store) = store();
        store.create_registered_model("IrisClassifier").unwrap();
        assert!(store
            .create_registered_model("IrisClassifier")
            .unwrap_err()
            .is_already_exists());

        let v1 = store.create_model_version("IrisClassifier", "file:///a", "r1").unwrap();
        let v2 = store.create_model_version("IrisClassifier", "file:///b", "r2").unwrap();
        assert_eq!(v1.version, "1");
        assert_eq!(v2.version, "2");

        let models = store.search_registered_models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].latest_versions.len(), 1);
        assert_eq!(models[0].latest_versions[0].version, "2");
        assert_eq!(models[0].latest_versions[0].run_id, "r2");
    }

    #[test]
    fn test_model_version_requires_model() {
        let (_dir, store) = store();
        let err = store.create_model_version("Missing", "file:///a", "r").unwrap_err();
        assert!(err.is_not_found());
        assert!(store.create_registered_model("../evil").is_err());
    }

    #[test]
    fn test_parse_metric_line() {
        let m = parse_metric_line("acc", "1700 0.93 2").unwrap();
        assert_eq!((m.timestamp, m.value, m.step), (1700, 0.93, 2));
        assert_eq!(parse_metric_line("acc", "5 1").unwrap().step, 0);
        assert!(parse_metric_line("acc", "oops").is_err());
    }
}
