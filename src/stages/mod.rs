//! Pipeline stages
//!
//! Each stage consumes the main feature table (plus auxiliary sheets
//! from earlier stages), appends its own columns, and may emit report
//! sheets. Stages declare their input columns up front so the driver
//! can reject a capture with a typed error before any work happens,
//! instead of each stage probing for columns mid-flight.
//!
//! Stage order within one file run:
//! 1. ingest      — timestamps, g → m/s²
//! 2. impute      — zero-dropout detection and neighbor-mean fill
//! 3. resample    — fixed-window aggregate statistics
//! 4. denoise     — Savitzky–Golay smoothing + noise classification
//! 5. rolling     — centered rolling RMS / kurtosis flags
//! 6. boxplot     — IQR outlier detector
//! 7. zscore      — quantile / z-score outlier detector
//! 8. context     — neighborhood rule-table labeling
//! 9. cluster     — temporal density clusters + recurrence
//! 10. spectral   — per-interval DFT features
//! 11. fusion     — weighted final score and health label

pub mod cluster;
pub mod context;
pub mod denoise;
pub mod fusion;
pub mod impute;
pub mod ingest;
pub mod outliers;
pub mod resample;
pub mod rolling;
pub mod spectral;

use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::FeatureTable;

/// Working state for one capture file as it moves through the stages.
pub struct StageContext<'a> {
    /// The main per-sample table; grows column-wise through the run.
    pub main: FeatureTable,
    /// Auxiliary sheets produced this run, keyed by sheet name.
    pub aux: BTreeMap<String, FeatureTable>,
    pub config: &'a PipelineConfig,
}

impl<'a> StageContext<'a> {
    #[must_use]
    pub fn new(main: FeatureTable, config: &'a PipelineConfig) -> Self {
        Self {
            main,
            aux: BTreeMap::new(),
            config,
        }
    }

    /// Stash an auxiliary sheet for persistence at the end of the run.
    pub fn put_sheet(&mut self, name: &str, table: FeatureTable) {
        self.aux.insert(name.to_string(), table);
    }

    /// Fetch an auxiliary sheet produced by an earlier stage.
    pub fn sheet(&self, name: &str, stage: &'static str) -> Result<&FeatureTable, PipelineError> {
        self.aux.get(name).ok_or_else(|| PipelineError::MissingSheet {
            stage,
            sheet: name.to_string(),
        })
    }
}

/// One step of the per-file pipeline.
///
/// `required_columns` is the stage's input contract against the main
/// table; the driver validates it before calling `run`, so `run` may
/// assume those columns exist.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Main-table columns this stage reads.
    fn required_columns(&self) -> Vec<String>;

    /// Main-table columns this stage writes (reports excluded).
    fn produced_columns(&self) -> Vec<String>;

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError>;
}
