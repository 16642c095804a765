//! Scoped tracking run

use tracing::{info, warn};

use super::client::TrackingClient;
use super::entities::{Metric, RunInfo, RunStatus};
use crate::error::Result;
use crate::export::MlModel;

/// A run that is closed when it goes out of scope.
///
/// Call [`ActiveRun::end`] to close it with an explicit status. If the guard
/// is dropped first (early return or panic), the run is marked `FAILED`.
pub struct ActiveRun<'a> {
    client: &'a TrackingClient,
    info: RunInfo,
    ended: bool,
}

impl<'a> ActiveRun<'a> {
    pub(crate) fn new(client: &'a TrackingClient, info: RunInfo) -> Self {
        info!(run_id = %info.run_id, experiment_id = %info.experiment_id, "Started run");
        Self {
            client,
            info,
            ended: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Log a single param
    pub fn log_param(&self, key: &str, value: &str) -> Result<()> {
        self.client.store().log_param(&self.info.run_id, key, value)
    }

    /// Log a batch of params in order
    pub fn log_params(&self, params: &[(String, String)]) -> Result<()> {
        for (key, value) in params {
            self.log_param(key, value)?;
        }
        Ok(())
    }

    /// Log a metric value at step 0
    pub fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        self.log_metric_at_step(key, value, 0)
    }

    pub fn log_metric_at_step(&self, key: &str, value: f64, step: i64) -> Result<()> {
        let metric = Metric {
            key: key.to_string(),
            value,
            timestamp: chrono::Utc::now().timestamp_millis(),
            step,
        };
        self.client.store().log_metric(&self.info.run_id, &metric)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.client.store().set_tag(&self.info.run_id, key, value)
    }

    /// Store one file under the run's artifact root
    pub fn log_artifact(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.client.store().log_artifact(&self.info, path, contents)
    }

    /// Store a model directory under `artifact_path` and return its `runs:/` URI
    pub fn log_model(&self, artifact_path: &str, model: &MlModel) -> Result<String> {
        let artifact_path = artifact_path.trim_matches('/');
        for (file_name, contents) in model.files(artifact_path, &self.info.run_id)? {
            self.log_artifact(&format!("{}/{}", artifact_path, file_name), &contents)?;
        }
        Ok(runs_uri(&self.info.run_id, artifact_path))
    }

    /// Close the run with the given status
    pub fn end(mut self, status: RunStatus) -> Result<RunInfo> {
        self.ended = true;
        let end_time = chrono::Utc::now().timestamp_millis();
        let info = self.client.store().update_run(&self.info.run_id, status, end_time)?;
        info!(run_id = %info.run_id, status = %status, "Ended run");
        Ok(info)
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        warn!(run_id = %self.info.run_id, "Run left open, marking it FAILED");
        let end_time = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self
            .client
            .store()
            .update_run(&self.info.run_id, RunStatus::Failed, end_time)
        {
            warn!(run_id = %self.info.run_id, error = %e, "Failed to close run");
        }
    }
}

/// `runs:/<run_id>/<path>` URI of a logged artifact
pub fn runs_uri(run_id: &str, artifact_path: &str) -> String {
    format!("runs:/{}/{}", run_id, artifact_path.trim_matches('/'))
}

/// Split a `runs:/` URI into run ID and artifact path
pub fn parse_runs_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("runs:/")?.trim_start_matches('/');
    let (run_id, path) = rest.split_once('/')?;
    if run_id.is_empty() || path.is_empty() {
        return None;
    }
    Some((run_id, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_uri_roundtrip() {
        let uri = runs_uri("abc123", "/iris-model/");
        assert_eq!(uri, "runs:/abc123/iris-model");
        assert_eq!(parse_runs_uri(&uri), Some(("abc123", "iris-model")));
    }

    #[test]
    fn test_parse_runs_uri_rejects_malformed() {
        assert_eq!(parse_runs_uri("models:/Iris/1"), None);
        assert_eq!(parse_runs_uri("runs:/only-run-id"), None);
        assert_eq!(parse_runs_uri("runs://path"), None);
        assert_eq!(parse_runs_uri("runs:/abc/nested/path"), Some(("abc", "nested/path")));
    }
}
