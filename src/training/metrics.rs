//! Classification metrics

use crate::error::{Result, TrackingError};
use ndarray::Array1;

/// Fraction of predictions equal to the true label, in [0, 1]
pub fn accuracy_score(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Result<f64> {
    if y_true.len() != y_pred.len() {
        return Err(TrackingError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Err(TrackingError::ValidationError(
            "accuracy is undefined for zero samples".to_string(),
        ));
    }

    let correct = y_true.iter().zip(y_pred.iter()).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}
