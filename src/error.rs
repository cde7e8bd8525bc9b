use std::path::PathBuf;

use thiserror::Error;

use crate::inference::ModelFormat;

pub type Result<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("num_classes must be greater than zero")]
    NoClasses,
    #[error("label map shape mismatch: ground truth {truth:?}, prediction {predicted:?}")]
    ShapeMismatch {
        truth: (usize, usize),
        predicted: (usize, usize),
    },
    #[error("label map is {found:?}, model input shape is {expected:?}")]
    InputShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("label buffer holds {len} values, expected {height}x{width}")]
    BufferSize {
        len: usize,
        height: usize,
        width: usize,
    },
    #[error("confusion matrix is not square: row {row} has {len} columns, expected {rows}")]
    NotSquare { rows: usize, row: usize, len: usize },
    #[error("cannot merge a {found}-class confusion matrix into a {expected}-class one")]
    MatrixSize { expected: usize, found: usize },
    #[error("{names} class names given for a {classes}-class confusion matrix")]
    ClassCount { names: usize, classes: usize },
    #[error("duplicate class name {0:?}")]
    DuplicateClass(String),
    #[error("{0} classes given, byte-coded label maps support fewer than 254")]
    TooManyClasses(usize),
    #[error("label {label} at pixel {index} does not fit in a byte")]
    LabelRange { label: i32, index: usize },
    #[error("invalid model input shape {0:?}, expected <height>x<width>")]
    InputShape(String),
    #[error("tensor layout: {0}")]
    Layout(String),
    #[error("unsupported model format for {}", path.display())]
    UnsupportedModelFormat { path: PathBuf },
    #[error("no inference backend registered for {0} models")]
    BackendUnavailable(ModelFormat),
    #[error("inference failed for {image_id}: {msg}")]
    Inference { image_id: String, msg: String },
    #[error("malformed archive row {image_id}: {msg}")]
    Archive { image_id: String, msg: String },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
