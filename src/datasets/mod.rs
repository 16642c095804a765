//! Built-in datasets

mod iris;

pub use iris::load_iris;

use ndarray::{Array1, Array2};

/// In-memory labelled dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Feature matrix, one row per sample
    pub data: Array2<f64>,
    /// Class index per sample
    pub target: Array1<usize>,
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
}

impl Dataset {
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    pub fn n_classes(&self) -> usize {
        self.target_names.len()
    }
}
