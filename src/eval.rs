//! Evaluation driver: one prediction and one accumulation per sample.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::Sample;
use crate::error::{EvalError, Result};
use crate::inference::Predictor;
use crate::label_map::LabelMap;
use crate::metrics::{accumulate, ConfusionMatrix};
use crate::report::{check_class_names, MetricReport};

/// Mean IoU of a single sample, for per-image result listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleScore {
    pub image_id: Box<str>,
    pub mean_iou: f64,
}

/// Accumulates samples into a running confusion matrix.
///
/// [`Evaluator::finish`] consumes the evaluator, so a finalized run cannot
/// take further samples.
#[derive(Debug)]
pub struct Evaluator {
    class_names: Box<[Box<str>]>,
    matrix: ConfusionMatrix,
    input_shape: Option<(usize, usize)>,
    samples: usize,
    dropped: u64,
}

impl Evaluator {
    pub fn new<S: AsRef<str>>(class_names: &[S]) -> Result<Self> {
        check_class_names(class_names, class_names.len())?;
        Ok(Self {
            class_names: class_names.iter().map(|n| n.as_ref().into()).collect(),
            matrix: ConfusionMatrix::new(class_names.len())?,
            input_shape: None,
            samples: 0,
            dropped: 0,
        })
    }

    /// Requires every ground-truth map to have this `(height, width)`.
    pub fn with_input_shape(mut self, shape: (usize, usize)) -> Self {
        self.input_shape = Some(shape);
        self
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Folds one sample into the matrix and returns the sample's own mean IoU.
    pub fn update(&mut self, ground_truth: &LabelMap, predicted: &LabelMap) -> Result<f64> {
        if let Some(shape) = self.input_shape {
            if ground_truth.shape() != shape {
                return Err(EvalError::InputShapeMismatch {
                    expected: shape,
                    found: ground_truth.shape(),
                });
            }
        }

        let contribution = accumulate(ground_truth, predicted, self.num_classes())?;
        if contribution.dropped > 0 {
            warn!(
                dropped = contribution.dropped,
                "predicted labels fell outside the confusion matrix"
            );
        }
        self.matrix.merge(&contribution.matrix)?;
        self.samples += 1;
        self.dropped += contribution.dropped;
        Ok(contribution.matrix.mean_iou())
    }

    #[inline]
    pub fn matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Zeroes the matrix to start a new run.
    pub fn reset(&mut self) {
        self.matrix.reset();
        self.samples = 0;
        self.dropped = 0;
    }

    pub fn finish(self) -> Result<(MetricReport, ConfusionMatrix)> {
        let report = MetricReport::from_confusion_matrix(&self.matrix, &self.class_names)?;
        Ok((report, self.matrix))
    }
}

/// Result of a full pass over a dataset.
#[derive(Debug)]
pub struct Evaluation {
    pub report: MetricReport,
    pub matrix: ConfusionMatrix,
    pub per_sample: Vec<SampleScore>,
}

/// Runs the predictor over every sample and derives the final metrics.
pub fn evaluate<P, I, S>(
    predictor: &mut P,
    samples: I,
    class_names: &[S],
    input_shape: Option<(usize, usize)>,
) -> Result<Evaluation>
where
    P: Predictor + ?Sized,
    I: IntoIterator<Item = Sample>,
    S: AsRef<str>,
{
    let mut evaluator = Evaluator::new(class_names)?;
    if let Some(shape) = input_shape {
        evaluator = evaluator.with_input_shape(shape);
    }

    info!(classes = evaluator.num_classes(), "evaluating model");
    let start = Instant::now();
    let mut per_sample = Vec::new();

    for sample in samples {
        let predicted = predictor.predict(&sample)?;
        let mean_iou = evaluator.update(&sample.ground_truth, &predicted)?;
        debug!(image_id = %sample.image_id, mean_iou, "evaluated sample");
        per_sample.push(SampleScore {
            image_id: sample.image_id,
            mean_iou,
        });
    }

    info!(
        samples = evaluator.samples(),
        dropped = evaluator.dropped(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "evaluation complete"
    );

    let (report, matrix) = evaluator.finish()?;
    Ok(Evaluation {
        report,
        matrix,
        per_sample,
    })
}
