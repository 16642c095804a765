//! MLflow REST API 2.0 store

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::entities::{
    Experiment, Metric, ModelVersion, RegisteredModel, Run, RunInfo, RunStatus, ViewType,
};
use super::store::{local_artifact_root, relative_path, validate_key, write_local_artifact, TrackingStore};
use crate::config::{TrackingAuth, TrackingConfig};
use crate::error::{Result, TrackingError};

const API_PREFIX: &str = "api/2.0/mlflow/";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts/";
const SEARCH_PAGE_SIZE: u32 = 1000;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct SearchExperimentsResponse {
    #[serde(default)]
    experiments: Vec<Experiment>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct UpdateRunResponse {
    run_info: RunInfo,
}

#[derive(Deserialize)]
struct SearchRegisteredModelsResponse {
    #[serde(default)]
    registered_models: Vec<RegisteredModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RegisteredModelResponse {
    registered_model: RegisteredModel,
}

#[derive(Deserialize)]
struct ModelVersionResponse {
    model_version: ModelVersion,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Serialize)]
struct LogMetricRequest<'a> {
    run_id: &'a str,
    key: &'a str,
    value: f64,
    timestamp: i64,
    step: i64,
}

/// Store that talks to an MLflow tracking server
pub struct RestStore {
    base: Url,
    client: Client,
    auth: TrackingAuth,
}

impl RestStore {
    /// Build a client for the server at `base`
    pub fn new(base: Url, config: &TrackingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("mlflow-iris/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // Url::join drops the last segment unless the base ends in '/'
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            client,
            auth: config.auth.clone(),
        })
    }

    fn url(&self, prefix: &str, path: &str) -> Result<Url> {
        Ok(self.base.join(&format!("{}{}", prefix, path))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            TrackingAuth::None => request,
            TrackingAuth::Bearer(token) => request.bearer_auth(token),
            TrackingAuth::Basic { username, password } => {
                request.basic_auth(username, password.as_ref())
            }
        }
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(API_PREFIX, endpoint)?;
        self.send(endpoint, self.client.get(url).query(query))
    }

    fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<T> {
        let url = self.url(API_PREFIX, endpoint)?;
        self.send(endpoint, self.client.post(url).json(body))
    }

    fn send<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T> {
        let response = self.authorize(request).send()?;
        let status = response.status();
        debug!(endpoint, status = status.as_u16(), "MLflow API call");

        let body = response.text()?;
        if !status.is_success() {
            return Err(api_error(endpoint, status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn upload_artifact(&self, artifact_uri: &str, path: &str, contents: &[u8]) -> Result<()> {
        let Some(proxied) = artifact_uri.strip_prefix("mlflow-artifacts:") else {
            return Err(TrackingError::ConfigError(format!(
                "unsupported artifact URI '{}'", artifact_uri
            )));
        };

        // mlflow-artifacts://host:port/path carries an authority; only the path matters here
        let root = match proxied.strip_prefix("//") {
            Some(rest) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => proxied,
        };
        let relative = relative_path(path)?;
        let full = format!(
            "{}/{}",
            root.trim_matches('/'),
            relative.to_string_lossy().replace('\\', "/")
        );

        let url = self.url(ARTIFACTS_PREFIX, full.trim_start_matches('/'))?;
        let endpoint = "mlflow-artifacts/artifacts";
        let response = self
            .authorize(self.client.put(url).body(contents.to_vec()))
            .send()?;
        let status = response.status();
        debug!(endpoint, path = %full, status = status.as_u16(), "Artifact upload");
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(api_error(endpoint, status.as_u16(), &body));
        }
        Ok(())
    }
}

fn api_error(endpoint: &str, status: u16, body: &str) -> TrackingError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (error_code, message) = match parsed {
        Some(ErrorBody { error_code, message }) => (
            error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
            message.unwrap_or_default(),
        ),
        None => ("UNKNOWN".to_string(), body.trim().chars().take(500).collect()),
    };
    TrackingError::ApiError {
        endpoint: endpoint.to_string(),
        status,
        error_code,
        message,
    }
}

impl TrackingStore for RestStore {
    fn describe(&self) -> String {
        self.base.to_string()
    }

    fn search_experiments(&self, view_type: ViewType) -> Result<Vec<Experiment>> {
        let mut experiments = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut body = json!({
                "max_results": SEARCH_PAGE_SIZE,
                "view_type": view_type,
            });
            if let Some(token) = &page_token {
                body["page_token"] = json!(token);
            }
            let page: SearchExperimentsResponse = self.post("experiments/search", &body)?;
            experiments.extend(page.experiments);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(experiments)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let query = [("experiment_name", name.to_string())];
        match self.get::<GetExperimentResponse>("experiments/get-by-name", &query) {
            Ok(response) => Ok(Some(response.experiment)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_experiment(&self, name: &str) -> Result<String> {
        let response: CreateExperimentResponse =
            self.post("experiments/create", &json!({ "name": name }))?;
        Ok(response.experiment_id)
    }

    fn create_run(&self, experiment_id: &str, start_time: i64) -> Result<RunInfo> {
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": start_time,
        });
        if let Ok(user) = std::env::var("USER") {
            body["user_id"] = json!(user);
        }
        let response: RunResponse = self.post("runs/create", &body)?;
        Ok(response.run.info)
    }

    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo> {
        let response: UpdateRunResponse = self.post(
            "runs/update",
            &json!({
                "run_id": run_id,
                "run_uuid": run_id,
                "status": status,
                "end_time": end_time,
            }),
        )?;
        Ok(response.run_info)
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        let response: RunResponse = self.get("runs/get", &[("run_id", run_id.to_string())])?;
        Ok(response.run)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("param", key)?;
        let _: Empty = self.post(
            "runs/log-parameter",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        validate_key("metric", &metric.key)?;
        let _: Empty = self.post(
            "runs/log-metric",
            &LogMetricRequest {
                run_id,
                key: &metric.key,
                value: metric.value,
                timestamp: metric.timestamp,
                step: metric.step,
            },
        )?;
        Ok(())
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("tag", key)?;
        let _: Empty = self.post(
            "runs/set-tag",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_artifact(&self, run: &RunInfo, path: &str, contents: &[u8]) -> Result<()> {
        match local_artifact_root(&run.artifact_uri) {
            Some(root) => {
                let written = write_local_artifact(&root, path, contents)?;
                debug!(path = %written.display(), "Wrote artifact to shared filesystem");
                Ok(())
            }
            None => self.upload_artifact(&run.artifact_uri, path, contents),
        }
    }

    fn search_registered_models(&self) -> Result<Vec<RegisteredModel>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("max_results", SEARCH_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }
            let page: SearchRegisteredModelsResponse =
                self.get("registered-models/search", &query)?;
            models.extend(page.registered_models);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(models)
    }

    fn create_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        let response: RegisteredModelResponse =
            self.post("registered-models/create", &json!({ "name": name }))?;
        Ok(response.registered_model)
    }

    fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> Result<ModelVersion> {
        let response: ModelVersionResponse = self.post(
            "model-versions/create",
            &json!({ "name": name, "source": source, "run_id": run_id }),
        )?;
        Ok(response.model_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> RestStore {
        RestStore::new(Url::parse(base).unwrap(), &TrackingConfig::default()).unwrap()
    }

    #[test]
    fn test_endpoint_urls_keep_base_path() {
        let s = store("http://localhost:5000/mlflow");
        assert_eq!(
            s.url(API_PREFIX, "experiments/search").unwrap().as_str(),
            "http://localhost:5000/mlflow/api/2.0/mlflow/experiments/search"
        );

        let s = store("http://localhost:5000");
        assert_eq!(
            s.url(ARTIFACTS_PREFIX, "1/abc/artifacts/m/MLmodel").unwrap().as_str(),
            "http://localhost:5000/api/2.0/mlflow-artifacts/artifacts/1/abc/artifacts/m/MLmodel"
        );
    }

    #[test]
    fn test_api_error_decoding() {
        let err = api_error(
            "experiments/get-by-name",
            404,
            r#"{"error_code": "RESOURCE_DOES_NOT_EXIST", "message": "Could not find experiment"}"#,
        );
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Could not find experiment"));

        let err = api_error("runs/create", 502, "<html>Bad Gateway</html>");
        match err {
            TrackingError::ApiError { status, error_code, message, .. } => {
                assert_eq!(status, 502);
                assert_eq!(error_code, "UNKNOWN");
                assert!(message.contains("Bad Gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_artifact_scheme() {
        let s = store("http://localhost:5000");
        let err = s.upload_artifact("s3://bucket/0/abc/artifacts", "m/MLmodel", b"").unwrap_err();
        assert!(matches!(err, TrackingError::ConfigError(_)));
    }
}
