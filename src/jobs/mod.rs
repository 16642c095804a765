//! The two operational jobs
//!
//! - [`train`]: fit the Iris forest, log it and register it
//! - [`info`]: read-only listing of experiments and registered models

pub mod info;
pub mod train;

pub use info::{report, write_experiments, write_registered_models, URI_HINT};
pub use train::{run_training, train_with_client, TrainOutcome};
