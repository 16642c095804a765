//! Model export for the tracking service
//!
//! Packages a fitted forest as an MLflow model directory:
//! - `MLmodel` descriptor (YAML)
//! - `model.json` with the forest and its metadata

mod mlmodel;

pub use mlmodel::{
    Flavor, MlModel, MlModelDescriptor, ModelMetadata, FLAVOR_NAME, MLMODEL_FILE, MODEL_DATA_FILE,
};
