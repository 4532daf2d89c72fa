//! Ingest stage: raw capture rows → canonical timestamped series.
//!
//! Accepts either a millisecond-epoch `timestamp` column or a
//! preformatted `datetime` column. Rows whose timestamp fails to parse
//! are dropped (the row, never the file); the survivors are sorted by
//! time and the per-axis g readings are converted to m/s².
//!
//! Conversion columns are always recomputed from the raw g columns, so
//! re-running the pipeline on an already-processed capture reproduces
//! the same series even after later stages overwrite `{axis}_mps2`.

use chrono::{DateTime, TimeZone, Utc};

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::types::{columns, format_datetime, parse_datetime, FeatureValue, AXES, G_TO_MPS2};

const RAW_TIMESTAMP: &str = "timestamp";

pub struct IngestStage;

impl IngestStage {
    fn parse_cell(cell: &FeatureValue) -> Option<DateTime<Utc>> {
        match cell {
            // Millisecond epoch, as captured by the sensor firmware.
            FeatureValue::Num(ms) if ms.is_finite() => {
                Utc.timestamp_millis_opt(*ms as i64).single()
            }
            FeatureValue::Text(text) => parse_datetime(text),
            _ => None,
        }
    }
}

impl Stage for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn required_columns(&self) -> Vec<String> {
        AXES.iter().map(ToString::to_string).collect()
    }

    fn produced_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let main = &mut ctx.main;
        let timestamp_col = if main.has_column(RAW_TIMESTAMP) {
            RAW_TIMESTAMP
        } else {
            columns::DATETIME
        };
        let cells = main
            .column(timestamp_col)
            .ok_or_else(|| PipelineError::MissingColumn {
                stage: "ingest",
                column: timestamp_col.to_string(),
            })?;

        let parsed: Vec<Option<DateTime<Utc>>> = cells.iter().map(Self::parse_cell).collect();
        let dropped = parsed.iter().filter(|p| p.is_none()).count();
        if dropped > 0 {
            tracing::warn!(dropped, "dropping rows with unparsable timestamps");
        }

        let keep: Vec<bool> = parsed.iter().map(Option::is_some).collect();
        main.retain_rows(&keep);
        let mut timestamps: Vec<DateTime<Utc>> = parsed.into_iter().flatten().collect();
        if timestamps.is_empty() {
            return Err(PipelineError::EmptySeries);
        }

        // Stable sort keeps capture order for equal timestamps.
        let mut index: Vec<usize> = (0..timestamps.len()).collect();
        index.sort_by_key(|&i| timestamps[i]);
        main.reorder_rows(&index);
        timestamps = index.iter().map(|&i| timestamps[i]).collect();

        main.set_column(
            columns::DATETIME,
            timestamps.iter().map(|&ts| format_datetime(ts).into()).collect(),
        )?;

        for axis in AXES {
            let raw = main.numeric(axis).ok_or_else(|| PipelineError::MissingColumn {
                stage: "ingest",
                column: axis.to_string(),
            })?;
            let converted: Vec<f64> = raw.iter().map(|g| g * G_TO_MPS2).collect();
            main.set_numeric(columns::mps2(axis), converted)?;
        }

        tracing::debug!(rows = main.len(), "ingest complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::types::FeatureTable;

    fn raw_table(timestamps: Vec<FeatureValue>) -> FeatureTable {
        let n = timestamps.len();
        let mut table = FeatureTable::new();
        table.set_column("timestamp", timestamps).unwrap();
        for axis in AXES {
            table.set_numeric(axis, vec![1.0; n]).unwrap();
        }
        table
    }

    #[test]
    fn converts_g_to_mps2_and_sorts() {
        let config = PipelineConfig::default();
        let table = raw_table(vec![
            FeatureValue::Num(2_000.0),
            FeatureValue::Num(1_000.0),
        ]);
        let mut ctx = StageContext::new(table, &config);
        IngestStage.run(&mut ctx).unwrap();

        let datetimes = ctx.main.column(columns::DATETIME).unwrap();
        assert_eq!(
            datetimes[0].as_text().unwrap(),
            "1970-01-01 00:00:01.000"
        );
        let x = ctx.main.numeric("x_mps2").unwrap();
        assert!((x[0] - G_TO_MPS2).abs() < 1e-12);
    }

    #[test]
    fn unparsable_timestamps_drop_the_row_not_the_file() {
        let config = PipelineConfig::default();
        let table = raw_table(vec![
            FeatureValue::Num(1_000.0),
            FeatureValue::Text("not a time".into()),
            FeatureValue::Num(3_000.0),
        ]);
        let mut ctx = StageContext::new(table, &config);
        IngestStage.run(&mut ctx).unwrap();
        assert_eq!(ctx.main.len(), 2);
    }

    #[test]
    fn all_bad_timestamps_is_an_empty_series() {
        let config = PipelineConfig::default();
        let table = raw_table(vec![FeatureValue::Missing, FeatureValue::Missing]);
        let mut ctx = StageContext::new(table, &config);
        let err = IngestStage.run(&mut ctx).unwrap_err();
        assert!(matches!(err, PipelineError::EmptySeries));
    }

    #[test]
    fn rerun_recomputes_conversion_from_raw_g() {
        let config = PipelineConfig::default();
        let table = raw_table(vec![FeatureValue::Num(1_000.0)]);
        let mut ctx = StageContext::new(table, &config);
        IngestStage.run(&mut ctx).unwrap();
        // Simulate a later stage overwriting the converted column.
        ctx.main.set_numeric("x_mps2", vec![999.0]).unwrap();
        IngestStage.run(&mut ctx).unwrap();
        let x = ctx.main.numeric("x_mps2").unwrap();
        assert!((x[0] - G_TO_MPS2).abs() < 1e-12);
    }
}
