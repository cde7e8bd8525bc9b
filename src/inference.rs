//! Model format detection and predictor dispatch.
//!
//! Inference runtimes live outside this crate. An embedding application
//! registers one loader per [`ModelFormat`] it can run; the format is chosen
//! once from the model path and never re-checked per sample.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::Sample;
use crate::error::{EvalError, Result};
use crate::label_map::LabelMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFormat {
    /// Keras HDF5 model (`.h5`).
    Native,
    /// TensorFlow 1.x frozen graph (`.pb`).
    FrozenGraph,
    /// TFLite interpreter model (`.tflite`).
    Interpreter,
    /// ONNX model (`.onnx`).
    Interchange,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("h5") => Ok(ModelFormat::Native),
            Some("pb") => Ok(ModelFormat::FrozenGraph),
            Some("tflite") => Ok(ModelFormat::Interpreter),
            Some("onnx") => Ok(ModelFormat::Interchange),
            _ => Err(EvalError::UnsupportedModelFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ModelFormat::Native => "h5",
            ModelFormat::FrozenGraph => "pb",
            ModelFormat::Interpreter => "tflite",
            ModelFormat::Interchange => "onnx",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFormat::Native => "native",
            ModelFormat::FrozenGraph => "frozen-graph",
            ModelFormat::Interpreter => "interpreter",
            ModelFormat::Interchange => "interchange",
        };
        f.write_str(name)
    }
}

/// Produces a predicted label map for one evaluation sample.
pub trait Predictor {
    fn predict(&mut self, sample: &Sample) -> Result<LabelMap>;
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn predict(&mut self, sample: &Sample) -> Result<LabelMap> {
        (**self).predict(sample)
    }
}

/// Serves the predictions stored alongside each sample in the archive.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredPredictions;

impl Predictor for StoredPredictions {
    fn predict(&mut self, sample: &Sample) -> Result<LabelMap> {
        sample
            .prediction
            .clone()
            .ok_or_else(|| EvalError::Inference {
                image_id: sample.image_id.to_string(),
                msg: "sample carries no stored prediction".into(),
            })
    }
}

type Loader = Box<dyn Fn(&Path) -> Result<Box<dyn Predictor>>>;

/// Loaders for the model formats an application can run.
#[derive(Default)]
pub struct BackendRegistry {
    loaders: HashMap<ModelFormat, Loader>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the loader for a format, replacing any earlier one.
    pub fn register<F>(&mut self, format: ModelFormat, loader: F) -> &mut Self
    where
        F: Fn(&Path) -> Result<Box<dyn Predictor>> + 'static,
    {
        self.loaders.insert(format, Box::new(loader));
        self
    }

    pub fn supports(&self, format: ModelFormat) -> bool {
        self.loaders.contains_key(&format)
    }

    /// Detects the model format and loads the predictor for it.
    pub fn load(&self, path: &Path) -> Result<(ModelFormat, Box<dyn Predictor>)> {
        let format = ModelFormat::from_path(path)?;
        let loader = self
            .loaders
            .get(&format)
            .ok_or(EvalError::BackendUnavailable(format))?;
        info!(path = %path.display(), %format, "loading model");
        Ok((format, loader(path)?))
    }

    /// Picks the predictor for a run: the loaded model when a path is given,
    /// otherwise the predictions stored in the archive.
    pub fn predictor_for(&self, model_path: Option<&Path>) -> Result<Box<dyn Predictor>> {
        match model_path {
            Some(path) => Ok(self.load(path)?.1),
            None => {
                info!("no model given, evaluating stored predictions");
                Ok(Box::new(StoredPredictions))
            }
        }
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("formats", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}
