//! Confusion-matrix evaluation of semantic segmentation predictions.
//!
//! Ground-truth and predicted label maps are folded into a per-run confusion
//! matrix; the final report carries pixel accuracy, per-class accuracy, IoU,
//! frequency-weighted IoU and Dice.

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod inference;
pub mod label_map;
pub mod metrics;
pub mod report;

pub use dataset::{read_samples, write_samples, Sample};
pub use error::{EvalError, Result};
pub use eval::{evaluate, Evaluation, Evaluator, SampleScore};
pub use inference::{BackendRegistry, ModelFormat, Predictor, StoredPredictions};
pub use label_map::{LabelMap, Layout};
pub use metrics::{accumulate, ConfusionMatrix, Contribution};
pub use report::{finalize, MetricReport};
