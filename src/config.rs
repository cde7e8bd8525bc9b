use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use clap::Parser;
use regex::Regex;

use crate::error::{EvalError, Result};
use crate::report::check_class_names;

/// Byte-coded label maps reserve the top values for ignore labels.
pub const MAX_CLASSES: usize = 253;

static INPUT_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*[xX]\s*(\d+)\s*$").expect("Invalid input shape regex")
});

#[derive(Parser, Debug)]
#[command(
    name = "segeval",
    about = "Evaluate segmentation predictions against ground truth (mIoU, FWIoU, pixel accuracy, Dice)"
)]
pub struct EvalArgs {
    /// Evaluation archive (parquet) holding ground truth and predicted label maps.
    #[arg(long)]
    pub dataset_file: PathBuf,
    /// Model to run (.h5, .pb, .tflite or .onnx). Without it the predictions
    /// stored in the archive are evaluated.
    #[arg(long)]
    pub model_path: Option<PathBuf>,
    /// Class definitions, one name per line.
    #[arg(long, default_value = "configs/voc_classes.txt")]
    pub classes_path: PathBuf,
    /// Model input shape as <height>x<width>.
    #[arg(long, default_value = "512x512", value_parser = parse_input_shape)]
    pub model_input_shape: (usize, usize),
    /// Save the report, normalized confusion matrix and per-sample scores.
    #[arg(long)]
    pub save_result: bool,
    /// Directory for saved results.
    #[arg(long, default_value = "result")]
    pub result_dir: PathBuf,
}

/// Parses a `<height>x<width>` shape string.
pub fn parse_input_shape(text: &str) -> Result<(usize, usize)> {
    let invalid = || EvalError::InputShape(text.to_owned());
    let captures = INPUT_SHAPE.captures(text).ok_or_else(invalid)?;
    let height: usize = captures[1].parse().map_err(|_| invalid())?;
    let width: usize = captures[2].parse().map_err(|_| invalid())?;
    if height == 0 || width == 0 {
        return Err(invalid());
    }
    Ok((height, width))
}

/// Parses class names, one per line, skipping blank lines.
pub fn parse_class_names(text: &str) -> Result<Box<[Box<str>]>> {
    let names: Box<[Box<str>]> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Into::into)
        .collect();
    if names.len() > MAX_CLASSES {
        return Err(EvalError::TooManyClasses(names.len()));
    }
    check_class_names(&names, names.len())?;
    Ok(names)
}

pub fn load_class_names(path: &Path) -> Result<Box<[Box<str>]>> {
    let text = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    parse_class_names(&text)
}
