//! Info job: list experiments and registered models of a tracking server

use std::io::Write;

use crate::config::{TrackingConfig, TRACKING_URI_ENV};
use crate::error::{Result, TrackingError};
use crate::tracking::{Experiment, RegisteredModel, TrackingClient};

const SEPARATOR_WIDTH: usize = 20;

/// Hint printed after a failed query
pub const URI_HINT: &str =
    "Please ensure the MLFLOW_TRACKING_URI is correctly set and the server is accessible.";

/// Print every experiment and registered model known to the tracking target.
///
/// Requires an explicit tracking URI. Nothing is written to the service.
pub fn report<W: Write>(tracking: &TrackingConfig, out: &mut W) -> Result<()> {
    writeln!(out, "### Fetching MLflow Experiments and Registered Models ###\n")?;

    let Some(uri) = tracking.tracking_uri.as_deref() else {
        writeln!(out, "Error: {} environment variable is not set.", TRACKING_URI_ENV)?;
        return Err(TrackingError::ConfigError(format!(
            "{} environment variable is not set", TRACKING_URI_ENV
        )));
    };
    writeln!(out, "Using MLflow Tracking URI: {}\n", uri)?;

    let client = show_experiments(tracking, out)?;
    show_registered_models(&client, out)?;

    writeln!(out, "\n### Script finished ###")?;
    Ok(())
}

/// Connects and lists experiments; a connection failure is reported like a failed query
fn show_experiments<W: Write>(tracking: &TrackingConfig, out: &mut W) -> Result<TrackingClient> {
    writeln!(out, "--- MLflow Experiments ---")?;
    let fetched = TrackingClient::new(tracking)
        .and_then(|client| client.search_experiments().map(|experiments| (client, experiments)));
    match fetched {
        Ok((client, experiments)) => {
            write_experiments(out, &experiments)?;
            Ok(client)
        }
        Err(e) => {
            writeln!(out, "An error occurred while fetching experiments: {}", e)?;
            writeln!(out, "{}", URI_HINT)?;
            Err(e)
        }
    }
}

fn show_registered_models<W: Write>(client: &TrackingClient, out: &mut W) -> Result<()> {
    writeln!(out, "\n--- MLflow Registered Models ---")?;
    match client.search_registered_models() {
        Ok(models) => write_registered_models(out, &models),
        Err(e) => {
            writeln!(out, "An error occurred while fetching registered models: {}", e)?;
            writeln!(out, "{}", URI_HINT)?;
            Err(e)
        }
    }
}

/// Render the experiment listing
pub fn write_experiments<W: Write>(out: &mut W, experiments: &[Experiment]) -> Result<()> {
    if experiments.is_empty() {
        writeln!(out, "No experiments found.")?;
        return Ok(());
    }

    for exp in experiments {
        writeln!(out, "  - Experiment ID: {}", exp.experiment_id)?;
        writeln!(out, "    Name: {}", exp.name)?;
        writeln!(out, "    Artifact Location: {}", exp.artifact_location)?;
        writeln!(out, "    Lifecycle Stage: {}", exp.lifecycle_stage)?;
        writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH))?;
    }
    Ok(())
}

/// Render the registered model listing
pub fn write_registered_models<W: Write>(out: &mut W, models: &[RegisteredModel]) -> Result<()> {
    if models.is_empty() {
        writeln!(out, "No registered models found.")?;
        return Ok(());
    }

    for model in models {
        writeln!(out, "  - Model Name: {}", model.name)?;
        if let Some(description) = model.description.as_deref().filter(|d| !d.is_empty()) {
            writeln!(out, "    Description: {}", description)?;
        }
        if !model.latest_versions.is_empty() {
            writeln!(out, "    Latest Versions:")?;
            for v in &model.latest_versions {
                writeln!(out, "      - Version: {}", v.version)?;
                writeln!(out, "        Stage: {}", v.current_stage)?;
                writeln!(out, "        Run ID: {}", v.run_id)?;
            }
        }
        writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{LifecycleStage, ModelVersion};

    fn render<F: FnOnce(&mut Vec<u8>) -> Result<()>>(f: F) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_missing_uri_fails_before_client() {
        let mut out = Vec::new();
        let err = report(&TrackingConfig::default(), &mut out).unwrap_err();
        assert!(matches!(err, TrackingError::ConfigError(_)));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Error: MLFLOW_TRACKING_URI environment variable is not set."));
        assert!(!text.contains("Using MLflow Tracking URI"));
        assert!(!text.contains("--- MLflow Experiments ---"));
    }

    #[test]
    fn test_unsupported_scheme_reported_with_hint() {
        let config = TrackingConfig::default().with_tracking_uri("ftp://host/mlruns");
        let mut out = Vec::new();
        let err = report(&config, &mut out).unwrap_err();
        assert!(matches!(err, TrackingError::ConfigError(_)));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Using MLflow Tracking URI: ftp://host/mlruns\n"));
        assert!(text.contains("--- MLflow Experiments ---\n"));
        assert!(text.contains(
            "An error occurred while fetching experiments: Configuration error: \
             unsupported tracking URI scheme 'ftp'\n"
        ));
        assert!(text.contains(URI_HINT));
        assert!(!text.contains("--- MLflow Registered Models ---"));
        assert!(!text.contains("### Script finished ###"));
    }

    #[test]
    fn test_malformed_rest_uri_reported_with_hint() {
        let config = TrackingConfig::default().with_tracking_uri("http://[");
        let mut out = Vec::new();
        assert!(report(&config, &mut out).is_err());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("An error occurred while fetching experiments: "));
        assert!(text.contains(URI_HINT));
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(render(|o| write_experiments(o, &[])), "No experiments found.\n");
        assert_eq!(
            render(|o| write_registered_models(o, &[])),
            "No registered models found.\n"
        );
    }

    #[test]
    fn test_experiment_block() {
        let exp = Experiment {
            experiment_id: "1".to_string(),
            name: "Iris".to_string(),
            artifact_location: "mlflow-artifacts:/1".to_string(),
            lifecycle_stage: LifecycleStage::Deleted,
            creation_time: None,
            last_update_time: None,
            tags: Vec::new(),
        };
        let text = render(|o| write_experiments(o, &[exp]));
        assert_eq!(
            text,
            "  - Experiment ID: 1\n    Name: Iris\n    Artifact Location: mlflow-artifacts:/1\n    \
             Lifecycle Stage: deleted\n--------------------\n"
        );
    }

    #[test]
    fn test_model_block_description_only_when_set() {
        let version = ModelVersion {
            name: "IrisClassifier".to_string(),
            version: "2".to_string(),
            creation_timestamp: None,
            last_updated_timestamp: None,
            current_stage: "None".to_string(),
            description: None,
            source: String::new(),
            run_id: "abc".to_string(),
            status: None,
        };
        let model = RegisteredModel {
            name: "IrisClassifier".to_string(),
            creation_timestamp: None,
            last_updated_timestamp: None,
            description: Some(String::new()),
            latest_versions: vec![version],
        };

        let text = render(|o| write_registered_models(o, &[model.clone()]));
        assert!(!text.contains("Description"));
        assert!(text.contains("    Latest Versions:\n      - Version: 2\n        Stage: None\n        Run ID: abc\n"));

        let described = RegisteredModel {
            description: Some("Random forest on Iris".to_string()),
            ..model
        };
        let text = render(|o| write_registered_models(o, &[described]));
        assert!(text.starts_with(
            "  - Model Name: IrisClassifier\n    Description: Random forest on Iris\n    Latest Versions:\n"
        ));
    }

    #[test]
    fn test_report_against_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackingConfig::default().with_tracking_uri(dir.path().display().to_string());
        let text = render(|o| report(&config, o));

        assert!(text.contains("  - Experiment ID: 0\n    Name: Default\n"));
        assert!(text.contains("No registered models found."));
        assert!(text.ends_with("\n### Script finished ###\n"));
    }
}
