//! In-memory workbook store for tests and dry runs.
//!
//! Thread-safe via `RwLock`. Not durable — contents are lost on drop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{StoreError, TabularStore};
use crate::types::FeatureTable;

#[derive(Debug, Default)]
pub struct MemoryStore {
    workbooks: RwLock<HashMap<PathBuf, HashMap<String, FeatureTable>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(path: &Path) -> StoreError {
        StoreError::Read {
            path: path.display().to_string(),
            source: std::io::Error::other("memory store lock poisoned"),
        }
    }
}

impl TabularStore for MemoryStore {
    fn read_table(&self, file: &Path, sheet: &str) -> Result<FeatureTable, StoreError> {
        let workbooks = self.workbooks.read().map_err(|_| Self::poisoned(file))?;
        workbooks
            .get(file)
            .and_then(|sheets| sheets.get(sheet))
            .cloned()
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
        let mut workbooks = self.workbooks.write().map_err(|_| Self::poisoned(file))?;
        workbooks
            .entry(file.to_path_buf())
            .or_default()
            .insert(sheet.to_string(), table.clone());
        Ok(())
    }

    fn list_sheets(&self, file: &Path) -> Result<Vec<String>, StoreError> {
        let workbooks = self.workbooks.read().map_err(|_| Self::poisoned(file))?;
        let sheets = workbooks.get(file).ok_or_else(|| StoreError::Read {
            path: file.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such workbook"),
        })?;
        let mut names: Vec<String> = sheets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn delete_sheet(&self, file: &Path, sheet: &str) -> Result<(), StoreError> {
        let mut workbooks = self.workbooks.write().map_err(|_| Self::poisoned(file))?;
        let removed = workbooks
            .get_mut(file)
            .and_then(|sheets| sheets.remove(sheet));
        if removed.is_none() {
            return Err(StoreError::SheetNotFound {
                path: file.display().to_string(),
                sheet: sheet.to_string(),
            });
        }
        Ok(())
    }
}
