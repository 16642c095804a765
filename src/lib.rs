//! mlflow-iris - Iris training job with MLflow experiment tracking
//!
//! This crate provides:
//! - A tracking client for MLflow-compatible servers and local `mlruns` stores
//! - A seeded random forest classifier and the embedded Iris dataset
//! - The training and info jobs behind the `mlflow-iris` binary
//!
//! # Modules
//!
//! ## Tracking
//! - [`tracking`] - Tracking client, REST and file stores, scoped runs
//! - [`export`] - MLflow model directories for fitted forests
//!
//! ## Machine learning
//! - [`datasets`] - Built-in datasets
//! - [`training`] - Decision trees, random forest, splitting and metrics
//!
//! ## Jobs
//! - [`jobs`] - Training runner and info reporter
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;
pub mod config;

// Machine learning
pub mod datasets;
pub mod training;

// Tracking
pub mod export;
pub mod tracking;

// Jobs
pub mod jobs;
pub mod cli;

pub use config::{ForestParams, TrackingConfig, TrackingUri, TrainJobConfig};
pub use error::{Result, TrackingError};
pub use tracking::{ActiveRun, TrackingClient};
