//! Per-pixel class label grids.

use crate::error::{EvalError, Result};

/// A row-major grid of class indices, one per pixel.
///
/// Values are not range-checked: ground-truth maps may carry an ignore label
/// (conventionally 255) and predictions are taken as the model produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    height: usize,
    width: usize,
    labels: Box<[i32]>,
}

impl LabelMap {
    pub fn new(height: usize, width: usize, labels: impl Into<Box<[i32]>>) -> Result<Self> {
        let labels = labels.into();
        if height.checked_mul(width) != Some(labels.len()) {
            return Err(EvalError::BufferSize {
                len: labels.len(),
                height,
                width,
            });
        }
        Ok(Self {
            height,
            width,
            labels,
        })
    }

    /// Builds a label map from one byte per pixel, as stored in label PNGs.
    pub fn from_bytes(height: usize, width: usize, bytes: &[u8]) -> Result<Self> {
        let labels: Box<[i32]> = bytes.iter().map(|&b| i32::from(b)).collect();
        Self::new(height, width, labels)
    }

    /// Encodes the map back to one byte per pixel.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.labels
            .iter()
            .enumerate()
            .map(|(index, &label)| {
                u8::try_from(label).map_err(|_| EvalError::LabelRange { label, index })
            })
            .collect()
    }

    /// Reduces a single-image class-probability tensor to a label map.
    ///
    /// `dims` is the full 4-d tensor shape including the batch axis; only the
    /// first batch item is read. Ties resolve to the lowest class index, and a
    /// NaN score wins over any number, so the first NaN class is picked.
    pub fn from_probabilities(probs: &[f32], dims: [usize; 4], layout: Layout) -> Result<Self> {
        let (height, width, classes) = match layout {
            Layout::Nhwc => (dims[1], dims[2], dims[3]),
            Layout::Nchw => (dims[2], dims[3], dims[1]),
        };
        let bad_shape = || {
            EvalError::Layout(format!(
                "{} values do not form a {dims:?} tensor",
                probs.len()
            ))
        };
        let plane = height.checked_mul(width).ok_or_else(bad_shape)?;
        let total = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        if classes == 0 || dims[0] == 0 || total != Some(probs.len()) {
            return Err(bad_shape());
        }

        let score = |pixel: usize, class: usize| match layout {
            Layout::Nhwc => probs[pixel * classes + class],
            Layout::Nchw => probs[class * plane + pixel],
        };

        let labels: Box<[i32]> = (0..plane)
            .map(|pixel| {
                let best = (1..classes).fold(0, |best, class| {
                    let (top, candidate) = (score(pixel, best), score(pixel, class));
                    if !top.is_nan() && (candidate.is_nan() || candidate > top) {
                        class
                    } else {
                        best
                    }
                });
                best as i32
            })
            .collect();

        Self::new(height, width, labels)
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[inline]
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Memory layout of a per-pixel class-probability tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `[batch, height, width, classes]`
    Nhwc,
    /// `[batch, classes, height, width]`
    Nchw,
}

impl Layout {
    /// Infers the layout of a model output whose spatial size matches the
    /// model input.
    pub fn detect(dims: [usize; 4], height: usize, width: usize) -> Result<Self> {
        let nhwc = dims[1] == height && dims[2] == width;
        let nchw = dims[2] == height && dims[3] == width;
        match (nhwc, nchw) {
            (true, false) => Ok(Layout::Nhwc),
            (false, true) => Ok(Layout::Nchw),
            (true, true) => Err(EvalError::Layout(format!(
                "output shape {dims:?} is ambiguous for a {height}x{width} input"
            ))),
            (false, false) => Err(EvalError::Layout(format!(
                "output shape {dims:?} does not match a {height}x{width} input"
            ))),
        }
    }
}
