//! JSON workbook backend.
//!
//! Each capture is one JSON document: a map from sheet name to a
//! columnar `{ columns, rows }` payload. The whole document is loaded,
//! one sheet swapped, and the document rewritten — sheet-granular
//! read-modify-write, so sheets the current stage does not touch
//! survive intact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{StoreError, TabularStore};
use crate::types::{FeatureTable, FeatureValue};

/// Columnar persisted form of one sheet.
#[derive(Debug, Serialize, Deserialize)]
struct SheetData {
    columns: Vec<String>,
    rows: Vec<Vec<FeatureValue>>,
}

impl SheetData {
    fn from_table(table: &FeatureTable) -> Self {
        let (columns, rows) = table.to_parts();
        Self { columns, rows }
    }

    fn into_table(self) -> FeatureTable {
        FeatureTable::from_parts(self.columns, self.rows)
    }
}

type Workbook = BTreeMap<String, SheetData>;

/// Disk-backed workbook store. Stateless: every call operates on the
/// path it is given, so a shared reference is safe across workers as
/// long as no two workers process the same file.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWorkbookStore;

impl JsonWorkbookStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn load(path: &Path) -> Result<Workbook, StoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| StoreError::Format {
            path: path.display().to_string(),
            source,
        })
    }

    fn save(path: &Path, workbook: &Workbook) -> Result<(), StoreError> {
        let text = serde_json::to_string(workbook).map_err(|source| StoreError::Format {
            path: path.display().to_string(),
            source,
        })?;
        // Write to a sibling temp file first so a crash mid-write never
        // truncates the workbook.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|source| StoreError::Write {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StoreError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

impl TabularStore for JsonWorkbookStore {
    fn read_table(&self, file: &Path, sheet: &str) -> Result<FeatureTable, StoreError> {
        let mut workbook = Self::load(file)?;
        workbook
            .remove(sheet)
            .map(SheetData::into_table)
            .ok_or_else(|| StoreError::SheetNotFound {
                path: file.display().to_string(),
                sheet: sheet.to_string(),
            })
    }

    fn write_table(
        &self,
        file: &Path,
        sheet: &str,
        table: &FeatureTable,
    ) -> Result<(), StoreError> {
        let mut workbook = if file.exists() {
            Self::load(file)?
        } else {
            Workbook::new()
        };
        workbook.insert(sheet.to_string(), SheetData::from_table(table));
        Self::save(file, &workbook)
    }

    fn list_sheets(&self, file: &Path) -> Result<Vec<String>, StoreError> {
        Ok(Self::load(file)?.into_keys().collect())
    }

    fn delete_sheet(&self, file: &Path, sheet: &str) -> Result<(), StoreError> {
        let mut workbook = Self::load(file)?;
        if workbook.remove(sheet).is_none() {
            return Err(StoreError::SheetNotFound {
                path: file.display().to_string(),
                sheet: sheet.to_string(),
            });
        }
        Self::save(file, &workbook)
    }
}
