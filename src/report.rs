//! Final segmentation metrics derived from an accumulated confusion matrix.

use std::collections::HashSet;
use std::fmt;
use std::io::Read;

use indexmap::IndexMap;
use serde::{de::Error as _, Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::metrics::{mean, ConfusionMatrix};

/// Segmentation metrics for one evaluation run.
///
/// Every per-class map is ordered by descending IoU, ties keeping the class
/// file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub mean_iou: f64,
    pub frequency_weighted_iou: f64,
    pub pixel_accuracy: f64,
    pub mean_class_accuracy: f64,
    pub iou: IndexMap<Box<str>, f64>,
    pub class_accuracy: IndexMap<Box<str>, f64>,
    pub dice: IndexMap<Box<str>, f64>,
    pub frequency: IndexMap<Box<str>, f64>,
}

impl MetricReport {
    /// Derives the report from a fully accumulated matrix.
    pub fn from_confusion_matrix<S: AsRef<str>>(
        cm: &ConfusionMatrix,
        class_names: &[S],
    ) -> Result<Self> {
        check_class_names(class_names, cm.num_classes())?;

        let iou = cm.iou();
        let class_accuracy = cm.class_accuracy();
        let dice = cm.dice();
        let frequency = cm.frequency();

        let mut order: Vec<usize> = (0..cm.num_classes()).collect();
        // sort_by is stable, so equal IoUs keep class order
        order.sort_by(|&a, &b| iou[b].total_cmp(&iou[a]));

        let ordered = |values: &[f64]| -> IndexMap<Box<str>, f64> {
            order
                .iter()
                .map(|&class| (class_names[class].as_ref().into(), values[class]))
                .collect()
        };

        let iou = ordered(&iou);
        let mean_iou = mean(&iou.values().copied().collect::<Vec<f64>>());

        Ok(Self {
            mean_iou,
            frequency_weighted_iou: cm.frequency_weighted_iou(),
            pixel_accuracy: cm.pixel_accuracy(),
            mean_class_accuracy: mean(&class_accuracy),
            class_accuracy: ordered(&class_accuracy),
            dice: ordered(&dice),
            frequency: ordered(&frequency),
            iou,
        })
    }

    /// Loads a report saved with [`MetricReport::save_to_file`].
    pub fn load_from_file(file: &mut dyn Read) -> Result<Self> {
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)
            .map_err(serde_json::Error::custom)?;
        Ok(serde_json::from_str(&buffer)?)
    }

    pub fn save_to_file(&self, file: &mut dyn std::io::Write) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        file.write_all(serialized.as_bytes())
            .map_err(serde_json::Error::custom)?;
        Ok(())
    }
}

/// Derives the final report from an accumulated matrix.
pub fn finalize<S: AsRef<str>>(cm: &ConfusionMatrix, class_names: &[S]) -> Result<MetricReport> {
    MetricReport::from_confusion_matrix(cm, class_names)
}

pub(crate) fn check_class_names<S: AsRef<str>>(class_names: &[S], classes: usize) -> Result<()> {
    if classes == 0 {
        return Err(EvalError::NoClasses);
    }
    if class_names.len() != classes {
        return Err(EvalError::ClassCount {
            names: class_names.len(),
            classes,
        });
    }
    let mut seen = HashSet::with_capacity(classes);
    for name in class_names {
        if !seen.insert(name.as_ref()) {
            return Err(EvalError::DuplicateClass(name.as_ref().to_owned()));
        }
    }
    Ok(())
}

impl fmt::Display for MetricReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "evaluation summary")?;
        for (name, iou) in &self.iou {
            writeln!(
                f,
                "{name}: IoU {iou:.4}, Freq {:.4}, ClassAcc {:.4}, Dice {:.4}",
                self.frequency[name], self.class_accuracy[name], self.dice[name]
            )?;
        }
        writeln!(f, "mIoU={:.3}", self.mean_iou * 100.0)?;
        writeln!(f, "FWIoU={:.3}", self.frequency_weighted_iou * 100.0)?;
        writeln!(f, "PixelAcc={:.3}", self.pixel_accuracy * 100.0)?;
        write!(f, "mClassAcc={:.3}", self.mean_class_accuracy * 100.0)
    }
}
