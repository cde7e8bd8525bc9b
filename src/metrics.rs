use std::io::Read;

use serde::{de::Error as _, Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::label_map::LabelMap;

/// Pixel counts indexed by `[true class][predicted class]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix(Box<[Box<[u64]>]>);

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(EvalError::NoClasses);
        }
        Ok(Self(
            vec![vec![0u64; num_classes].into_boxed_slice(); num_classes].into_boxed_slice(),
        ))
    }

    /// Builds a matrix from explicit rows.
    pub fn from_rows(rows: Vec<Vec<u64>>) -> Result<Self> {
        let matrix = Self(rows.into_iter().map(Vec::into_boxed_slice).collect());
        matrix.check_square()?;
        Ok(matrix)
    }

    /// Loads a matrix saved with [`ConfusionMatrix::save_to_file`].
    pub fn load_from_file(file: &mut dyn Read) -> Result<Self> {
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)
            .map_err(serde_json::Error::custom)?;
        let matrix: Self = serde_json::from_str(&buffer)?;
        matrix.check_square()?;
        Ok(matrix)
    }

    pub fn save_to_file(&self, file: &mut dyn std::io::Write) -> Result<()> {
        let serialized = serde_json::to_string(self)?;
        file.write_all(serialized.as_bytes())
            .map_err(serde_json::Error::custom)?;
        Ok(())
    }

    fn check_square(&self) -> Result<()> {
        let rows = self.0.len();
        if rows == 0 {
            return Err(EvalError::NoClasses);
        }
        match self.0.iter().position(|row| row.len() != rows) {
            Some(row) => Err(EvalError::NotSquare {
                rows,
                row,
                len: self.0[row].len(),
            }),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn get(&self, truth: usize, predicted: usize) -> u64 {
        self.0[truth][predicted]
    }

    /// Total number of accumulated pixels.
    pub fn total(&self) -> u64 {
        self.0.iter().flat_map(|row| row.iter()).sum()
    }

    /// Correctly classified pixels per class.
    pub fn diagonal(&self) -> Vec<u64> {
        self.0.iter().enumerate().map(|(i, row)| row[i]).collect()
    }

    /// Ground-truth pixel count per class.
    pub fn row_sums(&self) -> Vec<u64> {
        self.0.iter().map(|row| row.iter().sum()).collect()
    }

    /// Predicted pixel count per class.
    pub fn column_sums(&self) -> Vec<u64> {
        (0..self.num_classes())
            .map(|col| self.0.iter().map(|row| row[col]).sum())
            .collect()
    }

    /// Adds another matrix of the same size into this one.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if other.num_classes() != self.num_classes() {
            return Err(EvalError::MatrixSize {
                expected: self.num_classes(),
                found: other.num_classes(),
            });
        }
        for (row, other_row) in self.0.iter_mut().zip(other.0.iter()) {
            for (cell, &count) in row.iter_mut().zip(other_row.iter()) {
                *cell += count;
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.0.iter_mut().for_each(|row| row.fill(0));
    }

    pub fn pixel_accuracy(&self) -> f64 {
        ratio(self.diagonal().iter().sum::<u64>() as f64, self.total() as f64)
    }

    /// Per-class recall: correct pixels over ground-truth pixels.
    pub fn class_accuracy(&self) -> Vec<f64> {
        self.diagonal()
            .iter()
            .zip(self.row_sums())
            .map(|(&tp, actual)| ratio(tp as f64, actual as f64))
            .collect()
    }

    /// Per-class IoU union: predicted plus actual minus their overlap.
    pub fn union(&self) -> Vec<u64> {
        let diagonal = self.diagonal();
        self.column_sums()
            .into_iter()
            .zip(self.row_sums())
            .zip(diagonal)
            .map(|((predicted, actual), tp)| predicted + actual - tp)
            .collect()
    }

    pub fn iou(&self) -> Vec<f64> {
        self.diagonal()
            .iter()
            .zip(self.union())
            .map(|(&tp, union)| ratio(tp as f64, union as f64))
            .collect()
    }

    pub fn dice(&self) -> Vec<f64> {
        self.diagonal()
            .iter()
            .zip(self.union())
            .map(|(&tp, union)| ratio(2.0 * tp as f64, (union + tp) as f64))
            .collect()
    }

    /// Share of ground-truth pixels belonging to each class.
    pub fn frequency(&self) -> Vec<f64> {
        let total = self.total() as f64;
        self.row_sums()
            .into_iter()
            .map(|actual| ratio(actual as f64, total))
            .collect()
    }

    /// IoU weighted by ground-truth frequency, over classes that occur.
    pub fn frequency_weighted_iou(&self) -> f64 {
        self.frequency()
            .into_iter()
            .zip(self.iou())
            .filter(|(freq, _)| *freq > 0.0)
            .map(|(freq, iou)| freq * iou)
            .sum()
    }

    /// Mean IoU over every class, absent classes counting as zero.
    pub fn mean_iou(&self) -> f64 {
        mean(&self.iou())
    }

    /// Each row divided by its ground-truth total.
    pub fn normalized(&self) -> Vec<Vec<f64>> {
        self.0
            .iter()
            .map(|row| {
                let actual = row.iter().sum::<u64>() as f64;
                row.iter().map(|&count| ratio(count as f64, actual)).collect()
            })
            .collect()
    }
}

/// Per-sample contribution of one ground-truth/prediction pair.
#[derive(Debug)]
pub struct Contribution {
    pub matrix: ConfusionMatrix,
    /// Valid pixels whose encoded index fell outside the matrix.
    pub dropped: u64,
}

/// Computes the confusion matrix contribution of one sample.
///
/// Ground-truth pixels outside `[0, num_classes)` are skipped. Predictions
/// are not range-checked: each valid pixel is encoded as
/// `truth * num_classes + predicted` and that index is decoded back into a
/// cell, so an over-range prediction lands in the next row. Indices outside
/// the matrix are dropped and counted.
pub fn accumulate(
    ground_truth: &LabelMap,
    predicted: &LabelMap,
    num_classes: usize,
) -> Result<Contribution> {
    if num_classes == 0 {
        return Err(EvalError::NoClasses);
    }
    if ground_truth.shape() != predicted.shape() {
        return Err(EvalError::ShapeMismatch {
            truth: ground_truth.shape(),
            predicted: predicted.shape(),
        });
    }

    let mut matrix = ConfusionMatrix::new(num_classes)?;
    let classes = num_classes as i64;
    let cells = classes * classes;
    let mut dropped = 0u64;

    for (&truth, &pred) in ground_truth.labels().iter().zip(predicted.labels()) {
        let truth = i64::from(truth);
        if !(0..classes).contains(&truth) {
            continue;
        }
        let index = truth * classes + i64::from(pred);
        if (0..cells).contains(&index) {
            matrix.0[(index / classes) as usize][(index % classes) as usize] += 1;
        } else {
            dropped += 1;
        }
    }

    Ok(Contribution { matrix, dropped })
}

/// Division where 0/0 (or any non-finite result) resolves to 0.
#[inline]
pub(crate) fn ratio(numerator: f64, denominator: f64) -> f64 {
    let value = numerator / denominator;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[inline]
pub(crate) fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn map(height: usize, width: usize, labels: &[i32]) -> LabelMap {
        LabelMap::new(height, width, labels.to_vec()).unwrap()
    }

    #[test]
    fn counts_truth_rows_and_predicted_columns() {
        let truth = map(2, 2, &[0, 0, 1, 2]);
        let pred = map(2, 2, &[0, 1, 1, 0]);
        let cm = accumulate(&truth, &pred, 3).unwrap().matrix;
        assert_eq!(cm.get(0, 0), 1);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 0), 1);
        assert_eq!(cm.total(), 4);
    }

    #[test]
    fn ignore_label_is_excluded_from_both_axes() {
        let truth = map(1, 4, &[0, 255, 1, -1]);
        let pred = map(1, 4, &[0, 1, 1, 0]);
        let cm = accumulate(&truth, &pred, 2).unwrap().matrix;
        assert_eq!(cm.total(), 2);
        assert_eq!(cm.row_sums(), vec![1, 1]);
        assert_eq!(cm.column_sums(), vec![1, 1]);
    }

    #[test]
    fn over_range_prediction_lands_in_next_row() {
        // truth 0, predicted 3 with 3 classes -> index 3 -> cell (1, 0)
        let truth = map(1, 1, &[0]);
        let pred = map(1, 1, &[3]);
        let contribution = accumulate(&truth, &pred, 3).unwrap();
        assert_eq!(contribution.matrix.get(1, 0), 1);
        assert_eq!(contribution.dropped, 0);
    }

    #[test]
    fn index_past_matrix_is_dropped() {
        let truth = map(1, 2, &[2, 0]);
        let pred = map(1, 2, &[5, -1]);
        let contribution = accumulate(&truth, &pred, 3).unwrap();
        assert_eq!(contribution.matrix.total(), 0);
        assert_eq!(contribution.dropped, 2);
    }

    #[test]
    fn rejects_shape_mismatch_and_zero_classes() {
        let truth = map(1, 2, &[0, 1]);
        let pred = map(2, 1, &[0, 1]);
        assert!(matches!(
            accumulate(&truth, &pred, 2),
            Err(EvalError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            accumulate(&truth, &truth, 0),
            Err(EvalError::NoClasses)
        ));
    }

    #[test]
    fn fully_wrong_two_classes() {
        let cm = ConfusionMatrix::from_rows(vec![vec![0, 7], vec![5, 0]]).unwrap();
        assert_eq!(cm.pixel_accuracy(), 0.0);
        assert_eq!(cm.iou(), vec![0.0, 0.0]);
        assert_eq!(cm.dice(), vec![0.0, 0.0]);
    }

    #[test]
    fn derived_ratios() {
        // truth 0: 3 correct, 1 as class 1; truth 1: 2 as class 0, 4 correct
        let cm = ConfusionMatrix::from_rows(vec![vec![3, 1], vec![2, 4]]).unwrap();
        assert_abs_diff_eq!(cm.pixel_accuracy(), 0.7, epsilon = 1e-12);
        assert_eq!(cm.union(), vec![6, 7]);
        let iou = cm.iou();
        assert_abs_diff_eq!(iou[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(iou[1], 4.0 / 7.0, epsilon = 1e-12);
        let dice = cm.dice();
        assert_abs_diff_eq!(dice[0], 6.0 / 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dice[1], 8.0 / 11.0, epsilon = 1e-12);
        let acc = cm.class_accuracy();
        assert_abs_diff_eq!(acc[0], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(acc[1], 4.0 / 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            cm.frequency_weighted_iou(),
            0.4 * 0.5 + 0.6 * 4.0 / 7.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn empty_matrix_resolves_to_zero() {
        let cm = ConfusionMatrix::new(3).unwrap();
        assert_eq!(cm.pixel_accuracy(), 0.0);
        assert_eq!(cm.class_accuracy(), vec![0.0; 3]);
        assert_eq!(cm.iou(), vec![0.0; 3]);
        assert_eq!(cm.frequency(), vec![0.0; 3]);
        assert_eq!(cm.frequency_weighted_iou(), 0.0);
        assert_eq!(cm.mean_iou(), 0.0);
    }

    #[test]
    fn normalized_rows_sum_to_one_or_zero() {
        let cm = ConfusionMatrix::from_rows(vec![vec![1, 3], vec![0, 0]]).unwrap();
        assert_eq!(cm.normalized(), vec![vec![0.25, 0.75], vec![0.0, 0.0]]);
    }

    #[test]
    fn merge_adds_and_reset_zeroes() {
        let mut a = ConfusionMatrix::from_rows(vec![vec![1, 0], vec![0, 1]]).unwrap();
        let b = ConfusionMatrix::from_rows(vec![vec![0, 2], vec![3, 0]]).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a, ConfusionMatrix::from_rows(vec![vec![1, 2], vec![3, 1]]).unwrap());
        a.reset();
        assert_eq!(a.total(), 0);
        assert!(a.merge(&ConfusionMatrix::new(3).unwrap()).is_err());
    }

    #[test]
    fn rejects_ragged_rows() {
        assert!(matches!(
            ConfusionMatrix::from_rows(vec![vec![1, 0], vec![0]]),
            Err(EvalError::NotSquare { rows: 2, row: 1, len: 1 })
        ));
    }

    #[test]
    fn saves_and_loads_json() {
        let cm = ConfusionMatrix::from_rows(vec![vec![4, 1], vec![0, 2]]).unwrap();
        let mut buffer = Vec::new();
        cm.save_to_file(&mut buffer).unwrap();
        let loaded = ConfusionMatrix::load_from_file(&mut buffer.as_slice()).unwrap();
        assert_eq!(loaded, cm);

        let mut ragged = "[[1,2],[3]]".as_bytes();
        assert!(ConfusionMatrix::load_from_file(&mut ragged).is_err());
    }
}
