//! mlflow-iris - Main Entry Point
//!
//! Trains the Iris classifier against an MLflow tracking target, or lists
//! what the target holds.

use clap::Parser;
use colored::*;
use mlflow_iris::cli::{cmd_info, cmd_train, Cli, Commands};
use mlflow_iris::config::ForestParams;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the job report
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mlflow_iris=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train { tracking_uri, experiment, model_name, n_estimators, max_depth, random_state } => {
            let forest = ForestParams { n_estimators, max_depth, random_state };
            cmd_train(tracking_uri.as_deref(), &experiment, &model_name, forest)
        }
        Commands::Info { tracking_uri } => cmd_info(tracking_uri.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}
