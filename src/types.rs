//! Shared data structures for the vibration scoring pipeline
//!
//! Defines the core types threaded through every stage:
//! - `FeatureValue`: tagged nullable cell (avoids sentinel strings in
//!   numeric columns)
//! - `FeatureTable`: ordered column store, the wide table each stage
//!   appends to
//! - column and sheet name constants — the inter-stage wire format

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Standard gravity, used to convert capture units (g) to m/s².
pub const G_TO_MPS2: f64 = 9.80665;

/// Axis short names in fixed order.
pub const AXES: [&str; 3] = ["x", "y", "z"];

/// Timestamp format used for every datetime cell (millisecond precision).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Column names shared between stages.
///
/// A stage's outputs are positional-contract inputs to the next stage;
/// a missing required column is a hard precondition failure.
pub mod columns {
    pub const DATETIME: &str = "datetime";
    pub const IS_MISSING: &str = "is_missing";
    pub const IS_OUTLIER: &str = "is_outlier";
    pub const IS_OUTLIER_BOXPLOT: &str = "is_outlier_boxplot";
    pub const FINAL_CONTEXTUAL_SCORE: &str = "final_contextual_score";
    pub const FINAL_CONTEXTUAL_LABEL: &str = "final_contextual_label";
    pub const TEMPORAL_CLUSTER: &str = "temporal_cluster";
    pub const TEMPORAL_OUTLIER_TYPE: &str = "temporal_outlier_type";
    pub const RECURRING_ANOMALY: &str = "recurring_anomaly";
    pub const RECURRENCE_SCORE: &str = "recurrence_score";
    pub const FINAL_SCORE: &str = "Final_score";
    pub const FINAL_LABEL: &str = "Final_label";

    /// `x` → `x_mps2`
    #[must_use]
    pub fn mps2(axis: &str) -> String {
        format!("{axis}_mps2")
    }
}

/// Sheet names in a capture workbook.
pub mod sheets {
    /// Main sheet: one row per sample, grows column-wise through stages.
    pub const MAIN: &str = "Samples";
    pub const MISSING_REPORT: &str = "Missing_Report";
    pub const WINDOW_STATS: &str = "Window_Stats";
    pub const NOISE_SUMMARY: &str = "Noise_Summary";
    pub const ROLLING_REPORT: &str = "RollingStats_Report";
    pub const BOXPLOT_REPORT: &str = "BoxPlot_Report";
    pub const SPIKE_REPORT: &str = "Spike_Report";
    pub const SUMMARY_STATS: &str = "Summary_Stats";
    pub const PEAK_SPIKES: &str = "Peak_Spike_Coordinates";
    pub const TEMPORAL_REPORT: &str = "Temporal_Cluster_Report";
    pub const FFT_FEATURES: &str = "FFT_Features";
}

// ============================================================================
// Feature cells and the wide table
// ============================================================================

/// One cell of the feature table.
///
/// `Missing` is the explicit "not available" sentinel — never a string
/// in a numeric column, never a silent zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Num(f64),
    Text(String),
    Missing,
}

impl FeatureValue {
    /// Numeric view: numbers as-is, booleans as 0/1, else `None`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(v) => Some(*v),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Truthiness: booleans as-is, numbers as `!= 0`, else false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Num(v) => *v != 0.0,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Lift a float into a cell, mapping non-finite values to `Missing`
    /// (JSON has no NaN).
    #[must_use]
    pub fn num(v: f64) -> Self {
        if v.is_finite() {
            Self::Num(v)
        } else {
            Self::Missing
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::num(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Option<f64>> for FeatureValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Missing, Self::num)
    }
}

/// Ordered column store: the wide per-row feature table threaded through
/// the pipeline. Columns keep insertion order; setting an existing column
/// overwrites it in place (re-runs reproduce identical output).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    order: Vec<String>,
    data: HashMap<String, Vec<FeatureValue>>,
}

impl FeatureTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (0 for a table with no columns).
    #[must_use]
    pub fn len(&self) -> usize {
        self.order
            .first()
            .and_then(|name| self.data.get(name))
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Set (or overwrite) a column. The first column fixes the row count.
    pub fn set_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<FeatureValue>,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        if !self.order.is_empty() && values.len() != self.len() {
            return Err(PipelineError::LengthMismatch {
                column: name,
                expected: self.len(),
                actual: values.len(),
            });
        }
        if !self.data.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.data.insert(name, values);
        Ok(())
    }

    /// Set a numeric column; non-finite values become `Missing`.
    pub fn set_numeric(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), PipelineError> {
        self.set_column(name, values.into_iter().map(FeatureValue::num).collect())
    }

    pub fn set_bools(
        &mut self,
        name: impl Into<String>,
        values: Vec<bool>,
    ) -> Result<(), PipelineError> {
        self.set_column(name, values.into_iter().map(FeatureValue::Bool).collect())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[FeatureValue]> {
        self.data.get(name).map(Vec::as_slice)
    }

    /// Numeric view of a column: `Missing`/text cells become NaN,
    /// booleans become 0/1.
    #[must_use]
    pub fn numeric(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name)
            .map(|col| col.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
    }

    /// Boolean view of a column (truthiness per cell).
    #[must_use]
    pub fn bools(&self, name: &str) -> Option<Vec<bool>> {
        self.column(name)
            .map(|col| col.iter().map(FeatureValue::is_truthy).collect())
    }

    /// Parse a datetime column written in [`DATETIME_FORMAT`].
    pub fn datetimes(
        &self,
        name: &str,
        stage: &'static str,
    ) -> Result<Vec<DateTime<Utc>>, PipelineError> {
        let col = self.column(name).ok_or_else(|| PipelineError::MissingColumn {
            stage,
            column: name.to_string(),
        })?;
        col.iter()
            .enumerate()
            .map(|(row, cell)| {
                cell.as_text()
                    .and_then(parse_datetime)
                    .ok_or_else(|| PipelineError::BadTimestamp {
                        column: name.to_string(),
                        row,
                        value: format!("{cell:?}"),
                    })
            })
            .collect()
    }

    /// Keep only rows where `keep[i]` is true.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for col in self.data.values_mut() {
            let mut it = keep.iter();
            col.retain(|_| *it.next().unwrap_or(&true));
        }
    }

    /// Reorder all rows by the given index permutation.
    pub fn reorder_rows(&mut self, index: &[usize]) {
        for col in self.data.values_mut() {
            *col = index.iter().map(|&i| col[i].clone()).collect();
        }
    }

    /// Decompose into (column order, row-major cells) for persistence.
    #[must_use]
    pub fn to_parts(&self) -> (Vec<String>, Vec<Vec<FeatureValue>>) {
        let rows = (0..self.len())
            .map(|i| {
                self.order
                    .iter()
                    .map(|name| self.data[name][i].clone())
                    .collect()
            })
            .collect();
        (self.order.clone(), rows)
    }

    /// Rebuild from persisted parts. Ragged rows are padded with
    /// `Missing` (never truncated silently).
    #[must_use]
    pub fn from_parts(columns: Vec<String>, rows: Vec<Vec<FeatureValue>>) -> Self {
        let mut table = Self::new();
        for (idx, name) in columns.iter().enumerate() {
            let values = rows
                .iter()
                .map(|row| row.get(idx).cloned().unwrap_or(FeatureValue::Missing))
                .collect();
            // Lengths are uniform by construction.
            let _ = table.set_column(name.clone(), values);
        }
        table
    }
}

// ============================================================================
// Datetime cells
// ============================================================================

/// Format a timestamp the way every datetime cell is written.
#[must_use]
pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

/// Parse a datetime cell. Accepts the canonical format, a plain
/// `YYYY-MM-DD HH:MM:SS`, or RFC 3339.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(text, DATETIME_FORMAT) {
        return Some(Utc.from_utc_datetime(&ts));
    }
    if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ts));
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
