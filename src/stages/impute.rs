//! Missing-value imputer.
//!
//! A sample is "missing" when any axis reads exactly 0.0 — the sensor
//! dropout sentinel, not a physical reading in this domain. Missing
//! axes are imputed from the mean of nonzero neighbors within ±3
//! samples; with no valid neighbor the imputed cell stays `Missing` and
//! the raw zero is left untouched. Imputed values are then folded back
//! into the `{axis}_mps2` columns so every later stage sees the
//! repaired series.

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::types::{columns, sheets, FeatureTable, FeatureValue, AXES};

pub struct ImputeStage;

impl ImputeStage {
    /// Mean of nonzero, finite neighbors in `[i-neighbors, i+neighbors]`
    /// (the sample itself is zero and therefore excluded).
    fn neighbor_mean(values: &[f64], i: usize, neighbors: usize) -> Option<f64> {
        let start = i.saturating_sub(neighbors);
        let end = (i + neighbors + 1).min(values.len());
        let valid: Vec<f64> = values[start..end]
            .iter()
            .copied()
            .filter(|v| v.is_finite() && *v != 0.0)
            .collect();
        if valid.is_empty() {
            None
        } else {
            Some(crate::stats::mean(&valid))
        }
    }
}

impl Stage for ImputeStage {
    fn name(&self) -> &'static str {
        "impute"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::IS_MISSING.to_string()];
        cols.extend(AXES.iter().map(|axis| format!("{axis}_imputed")));
        cols
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let neighbors = ctx.config.impute.neighbors;
        let main = &mut ctx.main;
        let n = main.len();

        let axis_values: Vec<Vec<f64>> = AXES
            .iter()
            .map(|axis| {
                main.numeric(&columns::mps2(axis))
                    .ok_or_else(|| PipelineError::MissingColumn {
                        stage: "impute",
                        column: columns::mps2(axis),
                    })
            })
            .collect::<Result<_, _>>()?;

        let is_missing: Vec<bool> = (0..n)
            .map(|i| axis_values.iter().any(|vals| vals[i] == 0.0))
            .collect();
        main.set_bools(columns::IS_MISSING, is_missing.clone())?;

        // Dropout report rows, written before integration so the zeros
        // are still visible.
        let datetime_cells = main
            .column(columns::DATETIME)
            .map(<[FeatureValue]>::to_vec)
            .unwrap_or_default();
        let mut report_serials = Vec::new();
        let mut report_timestamps = Vec::new();
        let mut report_axes = Vec::new();

        for (axis_idx, axis) in AXES.iter().enumerate() {
            let values = &axis_values[axis_idx];
            let imputed: Vec<FeatureValue> = (0..n)
                .map(|i| {
                    if is_missing[i] && values[i] == 0.0 {
                        Self::neighbor_mean(values, i, neighbors).into()
                    } else {
                        FeatureValue::Missing
                    }
                })
                .collect();

            for i in 0..n {
                if is_missing[i] && values[i] == 0.0 {
                    report_serials.push(FeatureValue::Num((i + 2) as f64));
                    report_timestamps.push(
                        datetime_cells.get(i).cloned().unwrap_or(FeatureValue::Missing),
                    );
                    report_axes.push(FeatureValue::Text(columns::mps2(axis)));
                }
            }

            // Integration: overwrite the raw value only where an imputed
            // value exists.
            let repaired: Vec<f64> = (0..n)
                .map(|i| imputed[i].as_f64().unwrap_or(values[i]))
                .collect();
            main.set_numeric(columns::mps2(axis), repaired)?;
            main.set_column(format!("{axis}_imputed"), imputed)?;
        }

        let imputed_count = report_serials.len();
        let mut report = FeatureTable::new();
        report.set_column("Serial_No", report_serials)?;
        report.set_column("Timestamp", report_timestamps)?;
        report.set_column("Axis", report_axes)?;
        ctx.put_sheet(sheets::MISSING_REPORT, report);

        if imputed_count > 0 {
            tracing::info!(cells = imputed_count, "imputed dropout samples");
        }
        Ok(())
    }
}
