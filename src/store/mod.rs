//! Tabular store — pluggable workbook persistence
//!
//! A capture "workbook" holds named sheets of feature rows. The pipeline
//! core never touches files directly; it reads and writes sheets through
//! the [`TabularStore`] trait so backends can be swapped:
//! - [`JsonWorkbookStore`]: one JSON document per capture on disk
//! - [`MemoryStore`]: in-memory store for tests
//!
//! Writes are sheet-granular read-modify-write: replacing one sheet must
//! preserve every other sheet in the workbook. Later stages depend on
//! earlier stages' auxiliary sheets still existing.

mod json_store;
mod memory;

pub use json_store::JsonWorkbookStore;
pub use memory::MemoryStore;

use std::path::Path;

use thiserror::Error;

use crate::types::FeatureTable;

/// Store failures. A store error skips the current file, never the batch.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read workbook '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write workbook '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("workbook '{path}' is not a valid workbook document: {source}")]
    Format {
        path: String,
        source: serde_json::Error,
    },

    #[error("sheet '{sheet}' not found in workbook '{path}'")]
    SheetNotFound { path: String, sheet: String },
}

/// Read/write named tables keyed by capture file + sheet name.
///
/// Implementations must be thread-safe (`Send + Sync`): the batch driver
/// shares one store handle across its worker pool, with the guarantee
/// that no two workers touch the same file.
pub trait TabularStore: Send + Sync {
    /// Read one sheet of a workbook.
    fn read_table(&self, file: &Path, sheet: &str) -> Result<FeatureTable, StoreError>;

    /// Write one sheet, creating or replacing it while preserving all
    /// other sheets in the workbook.
    fn write_table(&self, file: &Path, sheet: &str, table: &FeatureTable)
        -> Result<(), StoreError>;

    /// List sheet names in a workbook.
    fn list_sheets(&self, file: &Path) -> Result<Vec<String>, StoreError>;

    /// Remove one sheet, preserving the rest.
    fn delete_sheet(&self, file: &Path, sheet: &str) -> Result<(), StoreError>;

    /// Replace a sheet wholesale (alias of [`TabularStore::write_table`],
    /// kept for call sites that replace rather than append).
    fn replace_sheet(
        &self,
        file: &Path,
        sheet: &str,
        table: &FeatureTable,
    ) -> Result<(), StoreError> {
        self.write_table(file, sheet, table)
    }
}
