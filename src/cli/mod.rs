//! mlflow-iris CLI Module
//!
//! Command-line interface for the training and info jobs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Write;
use std::time::Instant;

use crate::config::{ForestParams, TrackingConfig, TrainJobConfig};
use crate::jobs::{report, run_training};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<16} {}", muted(key), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mlflow-iris")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train an Iris classifier and inspect an MLflow tracking server")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train, log and register the Iris random forest
    Train {
        /// Tracking server URI or local store path (defaults to ./mlruns)
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        tracking_uri: Option<String>,

        /// Experiment to log the run under
        #[arg(long, default_value = "Iris-Classification-Experiment")]
        experiment: String,

        /// Registered model name
        #[arg(long, default_value = "IrisClassifier")]
        model_name: String,

        /// Number of trees
        #[arg(long, default_value = "100")]
        n_estimators: usize,

        /// Maximum tree depth
        #[arg(long, default_value = "6")]
        max_depth: usize,

        /// Seed for the forest
        #[arg(long, default_value = "42")]
        random_state: u64,
    },

    /// List experiments and registered models
    Info {
        /// Tracking server URI
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        tracking_uri: Option<String>,
    },
}

fn tracking_config(tracking_uri: Option<&str>) -> anyhow::Result<TrackingConfig> {
    let config = TrackingConfig::from_env().context("Invalid tracking configuration")?;
    Ok(match tracking_uri.filter(|u| !u.trim().is_empty()) {
        Some(uri) => config.with_tracking_uri(uri),
        None => config,
    })
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(
    tracking_uri: Option<&str>,
    experiment: &str,
    model_name: &str,
    forest: ForestParams,
) -> anyhow::Result<()> {
    let tracking = tracking_config(tracking_uri)?;
    let job = TrainJobConfig::default()
        .with_experiment_name(experiment)
        .with_model_name(model_name)
        .with_forest(forest);

    let start = Instant::now();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let outcome = run_training(&tracking, &job, &mut out).context("Training job failed")?;
    out.flush()?;
    drop(out);

    section("Summary");
    kv("Experiment", &outcome.experiment_id);
    kv("Run", &outcome.run_id);
    kv("Accuracy", &format!("{:.4}", outcome.accuracy));
    kv("Model", &outcome.model_uri);
    kv("Version", &format!("{} v{}", job.model_name, outcome.model_version.version));
    kv("Time", &format!("{:.3}s", start.elapsed().as_secs_f64()));
    println!();
    step_ok("Run closed as FINISHED");
    println!();

    Ok(())
}

pub fn cmd_info(tracking_uri: Option<&str>) -> anyhow::Result<()> {
    let tracking = tracking_config(tracking_uri)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    report(&tracking, &mut out).context("Info report failed")?;
    out.flush()?;
    Ok(())
}
