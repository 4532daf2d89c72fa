//! Pipeline driver
//!
//! Runs the eleven stages in order against one capture workbook,
//! validating each stage's declared input columns before it executes,
//! and fans a batch of files across a worker pool. A failure in one
//! file is captured, logged, and reported in the batch summary — it
//! never aborts the rest of the run.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::stages::{
    cluster::ClusterStage,
    context::ContextStage,
    denoise::DenoiseStage,
    fusion::FusionStage,
    impute::ImputeStage,
    ingest::IngestStage,
    outliers::{BoxplotStage, ZScoreStage},
    resample::ResampleStage,
    rolling::RollingStage,
    spectral::SpectralStage,
    Stage, StageContext,
};
use crate::store::TabularStore;
use crate::types::sheets;

/// Outcome of a batch run: files updated in place, plus the skipped
/// files with their failure reasons.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// The full scoring pipeline in canonical stage order.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: vec![
                Box::new(IngestStage),
                Box::new(ImputeStage),
                Box::new(ResampleStage),
                Box::new(DenoiseStage),
                Box::new(RollingStage),
                Box::new(BoxplotStage),
                Box::new(ZScoreStage),
                Box::new(ContextStage),
                Box::new(ClusterStage),
                Box::new(SpectralStage),
                Box::new(FusionStage),
            ],
        }
    }

    /// Process one capture file end to end: load the main sheet, run
    /// every stage with precondition checks, persist the main sheet and
    /// all report sheets (preserving any sheet this run did not touch).
    pub fn run_file(
        &self,
        store: &dyn TabularStore,
        file: &Path,
        config: &PipelineConfig,
    ) -> Result<(), PipelineError> {
        let main = store.read_table(file, sheets::MAIN)?;
        let mut ctx = StageContext::new(main, config);

        for stage in &self.stages {
            for column in stage.required_columns() {
                if !ctx.main.has_column(&column) {
                    return Err(PipelineError::MissingColumn {
                        stage: stage.name(),
                        column,
                    });
                }
            }
            tracing::debug!(stage = stage.name(), file = %file.display(), "running stage");
            stage.run(&mut ctx)?;
        }

        store.replace_sheet(file, sheets::MAIN, &ctx.main)?;
        for (name, table) in &ctx.aux {
            store.replace_sheet(file, name, table)?;
        }
        Ok(())
    }

    /// Process a batch of files on the rayon pool. Each file is an
    /// independent pure run; no two tasks touch the same file.
    pub fn run_batch(
        &self,
        store: &dyn TabularStore,
        files: &[PathBuf],
        config: &PipelineConfig,
    ) -> BatchSummary {
        let results: Vec<Option<(PathBuf, String)>> = files
            .par_iter()
            .map(|file| match self.run_file(store, file, config) {
                Ok(()) => {
                    tracing::info!(file = %file.display(), "processed");
                    None
                }
                Err(err) => {
                    tracing::error!(file = %file.display(), error = %err, "skipping file");
                    Some((file.clone(), err.to_string()))
                }
            })
            .collect();

        let skipped: Vec<(PathBuf, String)> = results.into_iter().flatten().collect();
        let summary = BatchSummary {
            processed: files.len() - skipped.len(),
            skipped,
        };
        tracing::info!(
            processed = summary.processed,
            skipped = summary.skipped.len(),
            "batch complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{FeatureTable, FeatureValue};

    fn seed_capture(store: &MemoryStore, path: &Path, n: usize) {
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
                .map(|i| 0.1 + 0.01 * ((i + k) as f64 * 0.7).sin())
                .collect();
            table.set_numeric(*axis, values).unwrap();
        }
        store.write_table(path, sheets::MAIN, &table).unwrap();
    }

    #[test]
    fn full_run_produces_scores_and_reports() {
        let store = MemoryStore::new();
        let path = Path::new("capture-1");
        seed_capture(&store, path, 120);

        let config = PipelineConfig::default();
        Pipeline::standard().run_file(&store, path, &config).unwrap();

        let main = store.read_table(path, sheets::MAIN).unwrap();
        assert!(main.has_column(crate::types::columns::FINAL_SCORE));
        assert!(main.has_column(crate::types::columns::FINAL_LABEL));
        for sheet in [
            sheets::MISSING_REPORT,
            sheets::WINDOW_STATS,
            sheets::NOISE_SUMMARY,
            sheets::ROLLING_REPORT,
            sheets::BOXPLOT_REPORT,
            sheets::SPIKE_REPORT,
            sheets::SUMMARY_STATS,
            sheets::TEMPORAL_REPORT,
            sheets::FFT_FEATURES,
        ] {
            assert!(store.read_table(path, sheet).is_ok(), "missing {sheet}");
        }
    }

    #[test]
    fn missing_axis_column_fails_fast_with_stage_name() {
        let store = MemoryStore::new();
        let path = Path::new("broken");
        let mut table = FeatureTable::new();
        table
            .set_column("timestamp", vec![FeatureValue::Num(0.0)])
            .unwrap();
        table.set_numeric("x", vec![1.0]).unwrap();
        store.write_table(path, sheets::MAIN, &table).unwrap();

        let config = PipelineConfig::default();
        let err = Pipeline::standard()
            .run_file(&store, path, &config)
            .unwrap_err();
        match err {
            PipelineError::MissingColumn { stage, column } => {
                assert_eq!(stage, "ingest");
                assert_eq!(column, "y");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn one_bad_file_does_not_abort_the_batch() {
        let store = MemoryStore::new();
        let good = PathBuf::from("good");
        let bad = PathBuf::from("bad");
        seed_capture(&store, &good, 60);
        // "bad" was never seeded, so its main sheet is missing.

        let config = PipelineConfig::default();
        let summary = Pipeline::standard().run_batch(
            &store,
            &[good.clone(), bad.clone()],
            &config,
        );
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].0, bad);
    }
}
