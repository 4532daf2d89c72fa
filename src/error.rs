//! Pipeline error taxonomy.
//!
//! Errors are scoped to a single capture file. The batch driver catches
//! them per file so one bad capture never aborts the rest of the run.

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while processing one capture file.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage's declared input column is absent from the main table.
    /// The file is skipped; processing continues with the next file.
    #[error("stage '{stage}' requires missing column '{column}'")]
    MissingColumn { stage: &'static str, column: String },

    /// An auxiliary sheet produced by an earlier stage is absent.
    #[error("stage '{stage}' requires missing sheet '{sheet}'")]
    MissingSheet { stage: &'static str, sheet: String },

    /// No row in the capture had a parsable timestamp.
    #[error("no parsable timestamps in capture")]
    EmptySeries,

    /// A timestamp cell written by the ingest stage failed to parse back.
    #[error("unparsable timestamp in column '{column}' at row {row}: {value:?}")]
    BadTimestamp {
        column: String,
        row: usize,
        value: String,
    },

    /// A column was set with a row count different from the table's.
    #[error("column '{column}' has {actual} rows, table has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// The tabular store failed to read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
