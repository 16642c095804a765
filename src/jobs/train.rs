//! Training job: fit the Iris forest and record it as a tracked run

use std::io::Write;

use tracing::info;

use crate::config::{TrackingConfig, TrainJobConfig};
use crate::datasets::load_iris;
use crate::error::Result;
use crate::export::{MlModel, ModelMetadata};
use crate::tracking::{ModelVersion, TrackingClient};
use crate::training::{accuracy_score, train_test_split, RandomForest};

/// What a successful training job produced
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub experiment_id: String,
    pub run_id: String,
    pub accuracy: f64,
    /// `runs:/` URI of the logged model
    pub model_uri: String,
    pub model_version: ModelVersion,
}

/// Run the training job against the configured tracking target.
///
/// Progress lines go to `out`. Every step is fail-fast: the first error
/// ends the run as `FAILED` and is returned to the caller.
pub fn run_training<W: Write>(
    tracking: &TrackingConfig,
    job: &TrainJobConfig,
    out: &mut W,
) -> Result<TrainOutcome> {
    job.validate()?;
    writeln!(out, "--- Starting the model training script ---")?;

    match tracking.tracking_uri.as_deref() {
        Some(uri) => writeln!(out, "MLflow tracking URI is set to: {}", uri)?,
        None => writeln!(
            out,
            "MLflow tracking URI not found. Logging to local 'mlruns' directory."
        )?,
    }

    let client = TrackingClient::new(tracking)?;
    let outcome = train_with_client(&client, job, out)?;

    writeln!(out, "--- Training script finished successfully ---")?;
    Ok(outcome)
}

/// Training steps against an already connected client
pub fn train_with_client<W: Write>(
    client: &TrackingClient,
    job: &TrainJobConfig,
    out: &mut W,
) -> Result<TrainOutcome> {
    let experiment = client.set_experiment(&job.experiment_name)?;
    writeln!(out, "MLflow experiment has been set to: '{}'", experiment.name)?;

    writeln!(out, "Loading Iris dataset...")?;
    let iris = load_iris()?;
    let split = train_test_split(&iris.data, &iris.target, job.test_size, job.split_seed)?;
    writeln!(out, "Dataset loaded and split.")?;

    let outcome = client.with_run(&experiment.experiment_id, |run| {
        writeln!(out, "MLflow Run ID: {}", run.run_id())?;

        let params = job.forest.as_params();
        writeln!(out, "Logging parameters: {}", job.forest)?;
        run.log_params(&params)?;

        writeln!(out, "Training RandomForestClassifier model...")?;
        let mut forest = RandomForest::from_params(&job.forest);
        forest.fit(&split.x_train, &split.y_train)?;
        writeln!(out, "Model training complete.")?;

        let predictions = forest.predict(&split.x_test)?;
        let accuracy = accuracy_score(&split.y_test, &predictions)?;
        writeln!(out, "Model accuracy: {:.4}", accuracy)?;
        run.log_metric("accuracy", accuracy)?;

        writeln!(out, "Logging the model to artifact path: '{}'...", job.artifact_path)?;
        let metadata = ModelMetadata::default()
            .with_features(iris.feature_names.clone())
            .with_targets(iris.target_names.clone())
            .with_hyperparameters(&params)
            .add_metric("accuracy", accuracy);
        let model = MlModel::new(forest, metadata)?;
        let model_uri = run.log_model(&job.artifact_path, &model)?;
        writeln!(out, "Model successfully logged.")?;

        writeln!(out, "Registering model '{}' from URI: {}", job.model_name, model_uri)?;
        let model_version = client.register_model(&model_uri, &job.model_name)?;
        writeln!(out, "Model successfully registered.")?;

        let (tag_key, tag_value) = &job.tag;
        run.set_tag(tag_key, tag_value)?;
        writeln!(out, "Run tagged.")?;

        Ok(TrainOutcome {
            experiment_id: experiment.experiment_id.clone(),
            run_id: run.run_id().to_string(),
            accuracy,
            model_uri,
            model_version,
        })
    })?;

    info!(
        run_id = %outcome.run_id,
        accuracy = outcome.accuracy,
        version = %outcome.model_version.version,
        "Training run finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RunStatus;

    fn local_config(dir: &tempfile::TempDir) -> TrackingConfig {
        TrackingConfig::default().with_tracking_uri(dir.path().join("mlruns").display().to_string())
    }

    #[test]
    fn test_progress_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        let outcome = run_training(&local_config(&dir), &TrainJobConfig::default(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "--- Starting the model training script ---");
        assert!(lines[1].starts_with("MLflow tracking URI is set to: "));
        assert_eq!(
            lines[2],
            "MLflow experiment has been set to: 'Iris-Classification-Experiment'"
        );
        assert!(text.contains(&format!("MLflow Run ID: {}", outcome.run_id)));
        assert!(text.contains("Logging parameters: {n_estimators: 100, max_depth: 6, random_state: 42}"));
        assert!(text.contains(&format!("Model accuracy: {:.4}", outcome.accuracy)));
        assert!(text.contains(&format!(
            "Registering model 'IrisClassifier' from URI: runs:/{}/iris-random-forest-model",
            outcome.run_id
        )));
        assert_eq!(lines.last().copied(), Some("--- Training script finished successfully ---"));
    }

    #[test]
    fn test_invalid_job_config_rejected_before_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let job = TrainJobConfig::default().with_experiment_name("  ");
        let mut out = Vec::new();
        assert!(run_training(&local_config(&dir), &job, &mut out).is_err());
        assert!(out.is_empty());
        assert!(!dir.path().join("mlruns").exists());
    }

    #[test]
    fn test_run_closed_as_finished() {
        let dir = tempfile::tempdir().unwrap();
        let client = TrackingClient::new(&local_config(&dir)).unwrap();
        let outcome = train_with_client(&client, &TrainJobConfig::default(), &mut std::io::sink()).unwrap();

        let run = client.get_run(&outcome.run_id).unwrap();
        assert_eq!(run.info.status, RunStatus::Finished);
        assert_eq!(run.metric("accuracy"), Some(outcome.accuracy));
        assert_eq!(outcome.model_version.version, "1");
    }
}
