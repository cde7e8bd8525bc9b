use std::fs::File;
use std::path::Path;

use segeval::config::load_class_names;
use segeval::{
    evaluate, read_samples, write_samples, BackendRegistry, EvalError, LabelMap, MetricReport,
    ModelFormat, Sample, StoredPredictions,
};

fn sample(id: &str, truth: &[i32], prediction: &[i32]) -> Sample {
    Sample {
        image_id: id.into(),
        ground_truth: LabelMap::new(2, 3, truth.to_vec()).unwrap(),
        prediction: Some(LabelMap::new(2, 3, prediction.to_vec()).unwrap()),
    }
}

#[test]
fn evaluates_archive_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("val.parquet");
    let classes = dir.path().join("classes.txt");
    std::fs::write(&classes, "background\nperson\ncar\n").unwrap();

    write_samples(
        &archive,
        &[
            sample("000001", &[0, 0, 1, 1, 255, 255], &[0, 0, 1, 1, 2, 2]),
            sample("000002", &[0, 1, 1, 0, 0, 0], &[0, 1, 0, 0, 0, 0]),
        ],
    )
    .unwrap();

    let class_names = load_class_names(&classes).unwrap();
    let samples = read_samples(&archive).unwrap();
    let evaluation = evaluate(&mut StoredPredictions, samples, &class_names[..], Some((2, 3))).unwrap();

    // background: 6 correct, 0 missed; person: 3 correct, 1 predicted as background
    assert_eq!(evaluation.matrix.total(), 10);
    assert_eq!(evaluation.matrix.get(0, 0), 6);
    assert_eq!(evaluation.matrix.get(1, 0), 1);
    assert_eq!(evaluation.matrix.get(1, 1), 3);

    let report = &evaluation.report;
    let order: Vec<&str> = report.iou.keys().map(|k| &**k).collect();
    assert_eq!(order, vec!["background", "person", "car"]);
    assert!((report.iou["background"] - 6.0 / 7.0).abs() < 1e-12);
    assert!((report.iou["person"] - 0.75).abs() < 1e-12);
    assert_eq!(report.iou["car"], 0.0);
    assert!((report.pixel_accuracy - 0.9).abs() < 1e-12);
    assert!((report.mean_iou - (6.0 / 7.0 + 0.75) / 3.0).abs() < 1e-12);

    let report_path = dir.path().join("report.json");
    report.save_to_file(&mut File::create(&report_path).unwrap()).unwrap();
    let loaded = MetricReport::load_from_file(&mut File::open(&report_path).unwrap()).unwrap();
    assert_eq!(loaded.iou.len(), 3);
}

#[test]
fn archive_shape_must_match_model_input() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("val.parquet");
    write_samples(&archive, &[sample("a", &[0; 6], &[0; 6])]).unwrap();

    let samples = read_samples(&archive).unwrap();
    let result = evaluate(&mut StoredPredictions, samples, &["bg", "fg"], Some((512, 512)));
    assert!(matches!(
        result,
        Err(EvalError::InputShapeMismatch { expected: (512, 512), found: (2, 3) })
    ));
}

#[test]
fn model_path_without_backend_is_fatal() {
    let registry = BackendRegistry::new();
    assert!(matches!(
        registry.predictor_for(Some(Path::new("weights/deeplab.mnn"))),
        Err(EvalError::UnsupportedModelFormat { .. })
    ));
    assert!(matches!(
        registry.predictor_for(Some(Path::new("weights/deeplab.onnx"))),
        Err(EvalError::BackendUnavailable(ModelFormat::Interchange))
    ));
}

#[test]
fn no_model_path_evaluates_stored_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("val.parquet");
    write_samples(&archive, &[sample("a", &[0, 0, 1, 1, 1, 0], &[0, 0, 1, 1, 1, 0])]).unwrap();

    let mut predictor = BackendRegistry::new().predictor_for(None).unwrap();
    let samples = read_samples(&archive).unwrap();
    let evaluation = evaluate(&mut predictor, samples, &["bg", "fg"], Some((2, 3))).unwrap();
    assert_eq!(evaluation.report.mean_iou, 1.0);
}
