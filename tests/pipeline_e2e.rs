//! End-to-end batch runs against JSON workbooks on disk.

use std::path::{Path, PathBuf};

use vibropipe::types::{columns, sheets};
use vibropipe::{
    DatasetLocator, FeatureTable, FeatureValue, JsonWorkbookStore, Pipeline, PipelineConfig,
    TabularStore,
};

/// Seed a capture workbook: `n` samples at 100 ms spacing, a hard spike
/// on the x axis at `spike_at`, and a dropped sample (all-zero row) at
/// `gap_at`.
fn seed_capture(store: &JsonWorkbookStore, path: &Path, n: usize, spike_at: usize, gap_at: usize) {
    let mut table = FeatureTable::new();
    table
        .set_column(
            "timestamp",
            (0..n)
                .map(|i| FeatureValue::Num(1_700_000_000_000.0 + (i as f64) * 100.0))
                .collect(),
        )
        .unwrap();
    for (k, axis) in ["x", "y", "z"].iter().enumerate() {
        let values: Vec<f64> = (0..n)
            .map(|i| {
                if i == gap_at {
                    0.0
                } else if i == spike_at && *axis == "x" {
                    5.0
                } else {
                    0.1 + 0.01 * ((i + k) as f64 * 0.7).sin()
                }
            })
            .collect();
        table.set_numeric(*axis, values).unwrap();
    }
    store.write_table(path, sheets::MAIN, &table).unwrap();
}

#[test]
fn full_batch_scores_captures_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonWorkbookStore::new();
    let capture = dir.path().join("rig7_capture.json");
    seed_capture(&store, &capture, 150, 80, 40);

    let config = PipelineConfig::default();
    let locator = DatasetLocator::new(&config.locator);
    let files = locator.discover(dir.path()).unwrap();
    assert_eq!(files, vec![capture.clone()]);

    let summary = Pipeline::standard().run_batch(&store, &files, &config);
    assert_eq!(summary.processed, 1);
    assert!(summary.skipped.is_empty());

    let main = store.read_table(&capture, sheets::MAIN).unwrap();
    assert_eq!(main.len(), 150);

    // The x-axis spike must be flagged by at least one detector.
    let z_flags = main.bools(columns::IS_OUTLIER).unwrap();
    let box_flags = main.bools(columns::IS_OUTLIER_BOXPLOT).unwrap();
    assert!(z_flags[80] || box_flags[80], "spike row not flagged");

    // The dropped sample must be recorded and repaired.
    let missing = main.bools(columns::IS_MISSING).unwrap();
    assert!(missing[40]);
    let x = main.numeric(&columns::mps2("x")).unwrap();
    assert!(x[40].abs() > 0.0, "gap sample not imputed");

    // Every row carries a final score and label.
    let scores = main.numeric(columns::FINAL_SCORE).unwrap();
    assert!(scores.iter().all(|s| s.is_finite() && *s >= 0.0));
    let labels = main.column(columns::FINAL_LABEL).unwrap();
    assert!(labels.iter().all(|l| {
        matches!(
            l.as_text(),
            Some("Healthy" | "Monitor" | "Warning" | "Critical")
        )
    }));

    // All report sheets were written alongside the main sheet.
    let sheet_names = store.list_sheets(&capture).unwrap();
    for sheet in [
        sheets::MISSING_REPORT,
        sheets::WINDOW_STATS,
        sheets::NOISE_SUMMARY,
        sheets::ROLLING_REPORT,
        sheets::BOXPLOT_REPORT,
        sheets::SPIKE_REPORT,
        sheets::SUMMARY_STATS,
        sheets::PEAK_SPIKES,
        sheets::TEMPORAL_REPORT,
        sheets::FFT_FEATURES,
    ] {
        assert!(sheet_names.iter().any(|s| s == sheet), "missing {sheet}");
    }
}

#[test]
fn rerunning_a_scored_capture_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonWorkbookStore::new();
    let capture = dir.path().join("capture.json");
    seed_capture(&store, &capture, 120, 60, 10);

    let config = PipelineConfig::default();
    let pipeline = Pipeline::standard();

    pipeline.run_file(&store, &capture, &config).unwrap();
    let first = store.read_table(&capture, sheets::MAIN).unwrap();

    pipeline.run_file(&store, &capture, &config).unwrap();
    let second = store.read_table(&capture, sheets::MAIN).unwrap();

    assert_eq!(first, second);
}

#[test]
fn processed_artifacts_are_not_rediscovered() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonWorkbookStore::new();
    seed_capture(&store, &dir.path().join("a.json"), 60, 30, 5);
    seed_capture(&store, &dir.path().join("a_denoised.json"), 60, 30, 5);
    std::fs::write(dir.path().join("~$a.json"), b"{}").unwrap();

    let mut config = PipelineConfig::default();
    config.locator.exclude_suffixes = vec!["_denoised".into()];
    let files = DatasetLocator::new(&config.locator)
        .discover(dir.path())
        .unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.json"]);
}

#[test]
fn corrupt_workbook_is_skipped_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonWorkbookStore::new();
    let good = dir.path().join("good.json");
    let bad = dir.path().join("bad.json");
    seed_capture(&store, &good, 80, 40, 5);
    std::fs::write(&bad, b"not json").unwrap();

    let config = PipelineConfig::default();
    let files: Vec<PathBuf> = vec![bad.clone(), good.clone()];
    let summary = Pipeline::standard().run_batch(&store, &files, &config);

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].0, bad);

    // The good capture still got its scores.
    let main = store.read_table(&good, sheets::MAIN).unwrap();
    assert!(main.has_column(columns::FINAL_LABEL));
}
