//! Evaluation archives: one parquet row per sample with byte-coded label maps.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parquet::{
    data_type::{ByteArray, ByteArrayType, Int64Type},
    file::{
        properties::WriterProperties,
        reader::FileReader,
        serialized_reader::SerializedFileReader,
        writer::SerializedFileWriter,
    },
    record::{Field, RowAccessor},
    schema::parser::parse_message_type,
};
use tracing::debug;

use crate::error::{EvalError, Result};
use crate::label_map::LabelMap;

const SCHEMA: &str = "
message eval_sample {
    REQUIRED BYTE_ARRAY image_id (UTF8);
    REQUIRED INT64 height;
    REQUIRED INT64 width;
    REQUIRED BYTE_ARRAY ground_truth;
    OPTIONAL BYTE_ARRAY prediction;
}
";

/// One evaluation sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image_id: Box<str>,
    pub ground_truth: LabelMap,
    /// Prediction produced ahead of time by an external runtime, if any.
    pub prediction: Option<LabelMap>,
}

/// Reads every sample from an evaluation archive.
pub fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let file = File::open(path).map_err(|e| EvalError::io(path, e))?;
    let reader = SerializedFileReader::new(file)?;

    let mut samples = Vec::new();
    for row in reader.get_row_iter(None)? {
        let row = row?;
        let image_id: Box<str> = row.get_string(0)?.as_str().into();
        let height = dimension(row.get_long(1)?, &image_id)?;
        let width = dimension(row.get_long(2)?, &image_id)?;
        let ground_truth = LabelMap::from_bytes(height, width, row.get_bytes(3)?.data())?;
        let prediction = match row.get_column_iter().nth(4).map(|(_, field)| field) {
            Some(Field::Bytes(bytes)) => Some(LabelMap::from_bytes(height, width, bytes.data())?),
            Some(Field::Null) => None,
            other => {
                return Err(EvalError::Archive {
                    image_id: image_id.to_string(),
                    msg: format!("unexpected prediction field {other:?}"),
                })
            }
        };
        samples.push(Sample {
            image_id,
            ground_truth,
            prediction,
        });
    }

    debug!(path = %path.display(), samples = samples.len(), "read evaluation archive");
    Ok(samples)
}

/// Writes samples to an evaluation archive, replacing any existing file.
///
/// Every sample is encoded before the file is touched, so a sample that
/// cannot be stored leaves an existing archive intact.
pub fn write_samples(path: &Path, samples: &[Sample]) -> Result<()> {
    let mut image_ids = Vec::with_capacity(samples.len());
    let mut heights = Vec::with_capacity(samples.len());
    let mut widths = Vec::with_capacity(samples.len());
    let mut ground_truths = Vec::with_capacity(samples.len());
    let mut predictions = Vec::new();
    let mut prediction_levels = Vec::with_capacity(samples.len());

    for sample in samples {
        let (height, width) = sample.ground_truth.shape();
        image_ids.push(ByteArray::from(&*sample.image_id));
        heights.push(height as i64);
        widths.push(width as i64);
        ground_truths.push(ByteArray::from(sample.ground_truth.to_bytes()?));
        match &sample.prediction {
            Some(prediction) => {
                if prediction.shape() != (height, width) {
                    return Err(EvalError::ShapeMismatch {
                        truth: (height, width),
                        predicted: prediction.shape(),
                    });
                }
                predictions.push(ByteArray::from(prediction.to_bytes()?));
                prediction_levels.push(1i16);
            }
            None => prediction_levels.push(0i16),
        }
    }

    let schema = Arc::new(parse_message_type(SCHEMA)?);
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).map_err(|e| EvalError::io(path, e))?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;

    let mut row_group = writer.next_row_group()?;
    let mut column_index = 0;
    while let Some(mut column) = row_group.next_column()? {
        match column_index {
            0 => column
                .typed::<ByteArrayType>()
                .write_batch(&image_ids, None, None)?,
            1 => column.typed::<Int64Type>().write_batch(&heights, None, None)?,
            2 => column.typed::<Int64Type>().write_batch(&widths, None, None)?,
            3 => column
                .typed::<ByteArrayType>()
                .write_batch(&ground_truths, None, None)?,
            _ => column.typed::<ByteArrayType>().write_batch(
                &predictions,
                Some(&prediction_levels),
                None,
            )?,
        };
        column.close()?;
        column_index += 1;
    }
    row_group.close()?;
    writer.close()?;

    debug!(path = %path.display(), samples = samples.len(), "wrote evaluation archive");
    Ok(())
}

fn dimension(value: i64, image_id: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| EvalError::Archive {
        image_id: image_id.to_owned(),
        msg: format!("invalid label map dimension {value}"),
    })
}
