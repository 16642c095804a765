//! Model training module
//!
//! Provides the pieces the training job runs in sequence:
//! - Seeded train/test splitting
//! - Decision trees and Random Forests
//! - Accuracy scoring

pub mod decision_tree;
pub mod metrics;
pub mod random_forest;
pub mod split;

pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use metrics::accuracy_score;
pub use random_forest::{MaxFeatures, RandomForest};
pub use split::{split_sizes, train_test_split, TrainTestSplit};
