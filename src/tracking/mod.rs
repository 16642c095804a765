//! Experiment tracking
//!
//! Client for an MLflow-compatible tracking service. Two backends sit behind
//! the [`TrackingStore`] trait:
//! - [`RestStore`] talks to a tracking server over the MLflow REST API
//! - [`FileStore`] writes the MLflow `mlruns` directory layout locally
//!
//! [`TrackingClient`] picks the backend from the tracking URI and hands out
//! [`ActiveRun`] guards that always close their run.

mod client;
mod entities;
mod file_store;
mod rest_store;
mod run;
mod store;

pub use client::TrackingClient;
pub use entities::{
    latest_per_stage, Experiment, ExperimentTag, LifecycleStage, Metric, ModelVersion, Param,
    RegisteredModel, Run, RunData, RunInfo, RunStatus, RunTag, ViewType,
};
pub use file_store::FileStore;
pub use rest_store::RestStore;
pub use run::{parse_runs_uri, runs_uri, ActiveRun};
pub use store::TrackingStore;
