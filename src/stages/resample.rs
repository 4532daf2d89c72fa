//! Fixed-window aggregation.
//!
//! Buckets the repaired series into fixed-duration windows (floor of
//! the sample timestamp) and emits per-axis mean, sample std, RMS, and
//! bias-corrected skew for every window into the `Window_Stats` sheet.
//! Statistics that need more observations than a window holds resolve
//! to `Missing`, never an error.

use std::collections::BTreeMap;

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::stats;
use crate::types::{columns, format_datetime, sheets, FeatureTable, FeatureValue, AXES};

pub struct ResampleStage;

impl Stage for ResampleStage {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        Vec::new() // report sheet only
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let window_ms = i64::try_from(ctx.config.resample.window_secs)
            .unwrap_or(1)
            .max(1)
            * 1000;
        let timestamps = ctx.main.datetimes(columns::DATETIME, "resample")?;

        // Window key → member row indices, in time order.
        let mut windows: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, ts) in timestamps.iter().enumerate() {
            let key = ts.timestamp_millis().div_euclid(window_ms) * window_ms;
            windows.entry(key).or_default().push(i);
        }

        let axis_values: Vec<Vec<f64>> = AXES
            .iter()
            .map(|axis| {
                ctx.main
                    .numeric(&columns::mps2(axis))
                    .ok_or_else(|| PipelineError::MissingColumn {
                        stage: "resample",
                        column: columns::mps2(axis),
                    })
            })
            .collect::<Result<_, _>>()?;

        let mut datetime_col: Vec<FeatureValue> = Vec::with_capacity(windows.len());
        let mut means: Vec<Vec<FeatureValue>> = vec![Vec::new(); AXES.len()];
        let mut stat_cols: Vec<Vec<FeatureValue>> = vec![Vec::new(); AXES.len() * 4];

        for (&key, members) in &windows {
            let ts = chrono::DateTime::from_timestamp_millis(key)
                .unwrap_or_default();
            datetime_col.push(format_datetime(ts).into());

            for (axis_idx, values) in axis_values.iter().enumerate() {
                let window: Vec<f64> = members
                    .iter()
                    .map(|&i| values[i])
                    .filter(|v| v.is_finite())
                    .collect();
                means[axis_idx].push(FeatureValue::num(stats::mean(&window)));
                let base = axis_idx * 4;
                stat_cols[base].push(FeatureValue::num(stats::mean(&window)));
                stat_cols[base + 1].push(FeatureValue::num(stats::sample_std(&window)));
                stat_cols[base + 2].push(FeatureValue::num(stats::rms(&window)));
                stat_cols[base + 3].push(stats::skewness(&window).into());
            }
        }

        let mut table = FeatureTable::new();
        table.set_column(columns::DATETIME, datetime_col)?;
        for (axis_idx, axis) in AXES.iter().enumerate() {
            table.set_column(columns::mps2(axis), means[axis_idx].clone())?;
        }
        for (axis_idx, axis) in AXES.iter().enumerate() {
            let prefix = columns::mps2(axis);
            let base = axis_idx * 4;
            for (offset, stat) in ["mean", "std", "rms", "skew"].iter().enumerate() {
                table.set_column(format!("{prefix}_{stat}"), stat_cols[base + offset].clone())?;
            }
        }

        tracing::debug!(windows = table.len(), "window aggregation complete");
        ctx.put_sheet(sheets::WINDOW_STATS, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn table(times: &[&str], x: Vec<f64>) -> FeatureTable {
        let mut t = FeatureTable::new();
        t.set_column(
            columns::DATETIME,
            times.iter().map(|s| (*s).into()).collect(),
        )
        .unwrap();
        t.set_numeric("x_mps2", x.clone()).unwrap();
        t.set_numeric("y_mps2", vec![0.5; x.len()]).unwrap();
        t.set_numeric("z_mps2", vec![0.5; x.len()]).unwrap();
        t
    }

    #[test]
    fn aggregates_per_second_windows() {
        let config = PipelineConfig::default();
        let t = table(
            &[
                "2024-01-01 00:00:00.100",
                "2024-01-01 00:00:00.500",
                "2024-01-01 00:00:00.900",
                "2024-01-01 00:00:01.100",
            ],
            vec![1.0, 2.0, 3.0, 10.0],
        );
        let mut ctx = StageContext::new(t, &config);
        ResampleStage.run(&mut ctx).unwrap();

        let stats_sheet = ctx.sheet(sheets::WINDOW_STATS, "test").unwrap();
        assert_eq!(stats_sheet.len(), 2);
        let mean = stats_sheet.numeric("x_mps2_mean").unwrap();
        assert!((mean[0] - 2.0).abs() < 1e-12);
        assert!((mean[1] - 10.0).abs() < 1e-12);
        // Single-sample window: std undefined, not an error.
        assert!(stats_sheet.column("x_mps2_std").unwrap()[1].is_missing());
    }

    #[test]
    fn two_sample_window_has_no_skew() {
        let config = PipelineConfig::default();
        let t = table(
            &["2024-01-01 00:00:00.100", "2024-01-01 00:00:00.600"],
            vec![1.0, 2.0],
        );
        let mut ctx = StageContext::new(t, &config);
        ResampleStage.run(&mut ctx).unwrap();

        let stats_sheet = ctx.sheet(sheets::WINDOW_STATS, "test").unwrap();
        assert!(stats_sheet.column("x_mps2_skew").unwrap()[0].is_missing());
        let rms = stats_sheet.numeric("x_mps2_rms").unwrap();
        assert!((rms[0] - (2.5_f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn spike_window_statistics_reflect_all_samples() {
        let config = PipelineConfig::default();
        let times: Vec<String> = (0..5)
            .map(|i| format!("2024-01-01 00:00:00.{:03}", i * 100))
            .collect();
        let refs: Vec<&str> = times.iter().map(String::as_str).collect();
        let t = table(&refs, vec![1.0, 2.0, 3.0, 4.0, 100.0]);
        let mut ctx = StageContext::new(t, &config);
        ResampleStage.run(&mut ctx).unwrap();

        let stats_sheet = ctx.sheet(sheets::WINDOW_STATS, "test").unwrap();
        let mean = stats_sheet.numeric("x_mps2_mean").unwrap();
        let rms = stats_sheet.numeric("x_mps2_rms").unwrap();
        assert!((mean[0] - 22.0).abs() < 1e-9);
        assert!((rms[0] - (2006.0_f64).sqrt()).abs() < 1e-9);
    }
}
