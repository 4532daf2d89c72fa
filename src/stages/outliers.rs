//! Univariate outlier detectors.
//!
//! Two independent detectors per axis, kept separate on purpose: the
//! contextual labeler downstream weighs their agreement and
//! disagreement differently.
//!
//! - [`BoxplotStage`]: IQR fences over the whole file,
//!   `{a}_outlier_box_plot` per axis plus the `is_outlier_boxplot`
//!   cross-axis OR, and a `BoxPlot_Report` sheet.
//! - [`ZScoreStage`]: forward/backward-fills remaining gaps, then flags
//!   either by empirical quantile bounds (adaptive mode) or by a fixed
//!   |z| threshold; emits `{a}_outlier_z_score`, `is_outlier`, and the
//!   `Spike_Report` / `Summary_Stats` / `Peak_Spike_Coordinates`
//!   sheets.

use super::{Stage, StageContext};
use crate::config::ZScoreMode;
use crate::error::PipelineError;
use crate::stats;
use crate::types::{columns, sheets, FeatureTable, FeatureValue, AXES};

// ============================================================================
// Boxplot (IQR) detector
// ============================================================================

pub struct BoxplotStage;

/// IQR fences for one axis.
fn boxplot_bounds(values: &[f64], multiplier: f64) -> (f64, f64) {
    let q1 = stats::percentile(values, 0.25);
    let q3 = stats::percentile(values, 0.75);
    let iqr = q3 - q1;
    (q1 - multiplier * iqr, q3 + multiplier * iqr)
}

impl Stage for BoxplotStage {
    fn name(&self) -> &'static str {
        "boxplot"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = AXES
            .iter()
            .map(|axis| format!("{axis}_outlier_box_plot"))
            .collect();
        cols.push(columns::IS_OUTLIER_BOXPLOT.to_string());
        cols
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let multiplier = ctx.config.outliers.iqr_multiplier;
        let n = ctx.main.len();
        let datetime_cells = ctx
            .main
            .column(columns::DATETIME)
            .map(<[FeatureValue]>::to_vec)
            .unwrap_or_default();

        let mut combined = vec![false; n];
        let mut report_serials = Vec::new();
        let mut report_datetimes = Vec::new();
        let mut report_axes = Vec::new();
        let mut report_values = Vec::new();

        for axis in AXES {
            let values = ctx
                .main
                .numeric(&columns::mps2(axis))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "boxplot",
                    column: columns::mps2(axis),
                })?;
            let (lower, upper) = boxplot_bounds(&values, multiplier);
            let flags: Vec<bool> = values.iter().map(|v| *v < lower || *v > upper).collect();

            for (i, flagged) in flags.iter().enumerate() {
                combined[i] |= *flagged;
                if *flagged {
                    report_serials.push(FeatureValue::Num((i + 2) as f64));
                    report_datetimes.push(
                        datetime_cells.get(i).cloned().unwrap_or(FeatureValue::Missing),
                    );
                    report_axes.push(FeatureValue::Text(columns::mps2(axis)));
                    report_values.push(FeatureValue::num(values[i]));
                }
            }
            ctx.main.set_bools(format!("{axis}_outlier_box_plot"), flags)?;
        }
        ctx.main.set_bools(columns::IS_OUTLIER_BOXPLOT, combined)?;

        let mut report = FeatureTable::new();
        report.set_column("Serial_No", report_serials)?;
        report.set_column(columns::DATETIME, report_datetimes)?;
        report.set_column("Axis", report_axes)?;
        report.set_column("Outlier_Value", report_values)?;
        ctx.put_sheet(sheets::BOXPLOT_REPORT, report);
        Ok(())
    }
}

// ============================================================================
// Z-score / adaptive-quantile detector
// ============================================================================

pub struct ZScoreStage;

/// Forward-fill then backward-fill non-finite gaps.
fn ffill_bfill(values: &[f64]) -> Vec<f64> {
    let mut filled = values.to_vec();
    let mut last = f64::NAN;
    for v in &mut filled {
        if v.is_finite() {
            last = *v;
        } else if last.is_finite() {
            *v = last;
        }
    }
    let mut next = f64::NAN;
    for v in filled.iter_mut().rev() {
        if v.is_finite() {
            next = *v;
        } else if next.is_finite() {
            *v = next;
        }
    }
    filled
}

impl Stage for ZScoreStage {
    fn name(&self) -> &'static str {
        "zscore"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = AXES
            .iter()
            .flat_map(|axis| {
                [
                    format!("{}_zscore", columns::mps2(axis)),
                    format!("{axis}_outlier_z_score"),
                ]
            })
            .collect();
        cols.push(columns::IS_OUTLIER.to_string());
        cols
    }

    #[allow(clippy::too_many_lines)]
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let cfg = &ctx.config.outliers;
        let n = ctx.main.len();
        let datetime_cells = ctx
            .main
            .column(columns::DATETIME)
            .map(<[FeatureValue]>::to_vec)
            .unwrap_or_default();

        let mut combined = vec![false; n];

        // Spike_Report accumulators.
        let mut spike_datetimes = Vec::new();
        let mut spike_values = Vec::new();
        let mut spike_zscores = Vec::new();
        let mut spike_serials = Vec::new();
        let mut spike_axes = Vec::new();

        // Summary_Stats accumulators, one row per axis.
        let mut sum_axes = Vec::new();
        let mut sum_means = Vec::new();
        let mut sum_stds = Vec::new();
        let mut sum_uppers = Vec::new();
        let mut sum_lowers = Vec::new();
        let mut sum_max_z = Vec::new();
        let mut sum_counts = Vec::new();
        let mut sum_percents = Vec::new();

        // Peak_Spike_Coordinates accumulators, max-|z| spike per axis.
        let mut peak_serials = Vec::new();
        let mut peak_datetimes = Vec::new();
        let mut peak_axes = Vec::new();
        let mut peak_values = Vec::new();
        let mut peak_zscores = Vec::new();

        for axis in AXES {
            let column = columns::mps2(axis);
            let raw = ctx
                .main
                .numeric(&column)
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "zscore",
                    column: column.clone(),
                })?;
            let values = ffill_bfill(&raw);

            let mean = stats::mean(&values);
            let std = stats::sample_std(&values);
            let z: Vec<f64> = if std > 0.0 {
                values.iter().map(|v| (v - mean) / std).collect()
            } else {
                vec![0.0; n]
            };

            let upper = stats::percentile(&values, cfg.quantile);
            let lower = stats::percentile(&values, 1.0 - cfg.quantile);
            let flags: Vec<bool> = match cfg.z_mode {
                ZScoreMode::Adaptive => values
                    .iter()
                    .map(|v| *v > upper || *v < lower)
                    .collect(),
                ZScoreMode::Fixed => z.iter().map(|v| v.abs() > cfg.z_threshold).collect(),
            };

            let mut spike_count = 0usize;
            let mut peak: Option<(usize, f64)> = None;
            for (i, flagged) in flags.iter().enumerate() {
                combined[i] |= *flagged;
                if *flagged {
                    spike_count += 1;
                    spike_datetimes.push(
                        datetime_cells.get(i).cloned().unwrap_or(FeatureValue::Missing),
                    );
                    spike_values.push(FeatureValue::num(values[i]));
                    spike_zscores.push(FeatureValue::num(z[i]));
                    spike_serials.push(FeatureValue::Num((i + 2) as f64));
                    spike_axes.push(FeatureValue::Text(column.clone()));
                    if peak.map_or(true, |(_, best)| z[i].abs() > best) {
                        peak = Some((i, z[i].abs()));
                    }
                }
            }
            if let Some((i, _)) = peak {
                peak_serials.push(FeatureValue::Num((i + 2) as f64));
                peak_datetimes.push(
                    datetime_cells.get(i).cloned().unwrap_or(FeatureValue::Missing),
                );
                peak_axes.push(FeatureValue::Text(column.clone()));
                peak_values.push(FeatureValue::num(values[i]));
                peak_zscores.push(FeatureValue::num(z[i]));
            }

            sum_axes.push(FeatureValue::Text(column.clone()));
            sum_means.push(FeatureValue::num(mean));
            sum_stds.push(FeatureValue::num(std));
            sum_uppers.push(FeatureValue::num(upper));
            sum_lowers.push(FeatureValue::num(lower));
            sum_max_z.push(FeatureValue::num(
                z.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())),
            ));
            sum_counts.push(FeatureValue::Num(spike_count as f64));
            sum_percents.push(FeatureValue::num(if n == 0 {
                0.0
            } else {
                (spike_count as f64 / n as f64 * 10000.0).round() / 100.0
            }));

            // The filled series replaces the raw column, like the gaps
            // were never there; ingest restores the raw series on re-run.
            ctx.main.set_numeric(&column, values)?;
            ctx.main.set_numeric(format!("{column}_zscore"), z)?;
            ctx.main.set_bools(format!("{axis}_outlier_z_score"), flags)?;
        }
        ctx.main.set_bools(columns::IS_OUTLIER, combined)?;

        let mut spikes = FeatureTable::new();
        spikes.set_column(columns::DATETIME, spike_datetimes)?;
        spikes.set_column("Spike_Value", spike_values)?;
        spikes.set_column("Z_Score", spike_zscores)?;
        spikes.set_column("Serial_No", spike_serials)?;
        spikes.set_column("Axis", spike_axes)?;
        ctx.put_sheet(sheets::SPIKE_REPORT, spikes);

        let mut summary = FeatureTable::new();
        summary.set_column("Axis", sum_axes)?;
        summary.set_column("Mean", sum_means)?;
        summary.set_column("Std Dev", sum_stds)?;
        summary.set_column("Upper Threshold", sum_uppers)?;
        summary.set_column("Lower Threshold", sum_lowers)?;
        summary.set_column("Max Z-score", sum_max_z)?;
        summary.set_column("Spikes Found", sum_counts)?;
        summary.set_column("% Spikes", sum_percents)?;
        ctx.put_sheet(sheets::SUMMARY_STATS, summary);

        let mut peaks = FeatureTable::new();
        peaks.set_column("Serial_No", peak_serials)?;
        peaks.set_column(columns::DATETIME, peak_datetimes)?;
        peaks.set_column("Axis", peak_axes)?;
        peaks.set_column("Spike_Value", peak_values)?;
        peaks.set_column("Z_Score", peak_zscores)?;
        ctx.put_sheet(sheets::PEAK_SPIKES, peaks);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn table(x: Vec<f64>) -> FeatureTable {
        let n = x.len();
        let mut t = FeatureTable::new();
        t.set_column(
            columns::DATETIME,
            (0..n)
                .map(|i| format!("2024-01-01 00:{:02}:{:02}.000", i / 60, i % 60).into())
                .collect(),
        )
        .unwrap();
        t.set_numeric("x_mps2", x).unwrap();
        t.set_numeric("y_mps2", vec![1.0; n]).unwrap();
        t.set_numeric("z_mps2", vec![1.0; n]).unwrap();
        t
    }

    #[test]
    fn boxplot_flags_value_beyond_upper_fence() {
        let config = PipelineConfig::default();
        // Q1 = 2, Q3 = 4, IQR = 2 over [1..5]; 100 is far outside.
        let t = table(vec![1.0, 2.0, 3.0, 4.0, 100.0]);
        let mut ctx = StageContext::new(t, &config);
        BoxplotStage.run(&mut ctx).unwrap();

        let flags = ctx.main.bools("x_outlier_box_plot").unwrap();
        assert_eq!(flags, vec![false, false, false, false, true]);
        assert!(ctx.main.bools(columns::IS_OUTLIER_BOXPLOT).unwrap()[4]);

        let report = ctx.sheet(sheets::BOXPLOT_REPORT, "test").unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.column("Outlier_Value").unwrap()[0].as_f64(),
            Some(100.0)
        );
    }

    #[test]
    fn boxplot_quiet_series_raises_no_flags() {
        let config = PipelineConfig::default();
        let t = table(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut ctx = StageContext::new(t, &config);
        BoxplotStage.run(&mut ctx).unwrap();
        assert!(!ctx.main.bools("x_outlier_box_plot").unwrap().iter().any(|f| *f));
    }

    #[test]
    fn ffill_bfill_fills_interior_and_leading_gaps() {
        let values = [f64::NAN, 1.0, f64::NAN, 3.0, f64::NAN];
        assert_eq!(ffill_bfill(&values), vec![1.0, 1.0, 1.0, 3.0, 3.0]);
    }

    #[test]
    fn constant_series_has_zero_zscores() {
        let config = PipelineConfig::default();
        let t = table(vec![5.0; 10]);
        let mut ctx = StageContext::new(t, &config);
        ZScoreStage.run(&mut ctx).unwrap();
        let z = ctx.main.numeric("x_mps2_zscore").unwrap();
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn fixed_mode_flags_large_z() {
        let mut config = PipelineConfig::default();
        config.outliers.z_mode = ZScoreMode::Fixed;
        config.outliers.z_threshold = 2.0;

        let mut x = vec![1.0, 1.1, 0.9, 1.0, 1.05, 0.95, 1.0, 1.1, 0.9, 1.0];
        x.push(10.0);
        let t = table(x);
        let mut ctx = StageContext::new(t, &config);
        ZScoreStage.run(&mut ctx).unwrap();

        let flags = ctx.main.bools("x_outlier_z_score").unwrap();
        assert!(flags[10]);
        assert!(!flags[0]);
        assert!(ctx.main.bools(columns::IS_OUTLIER).unwrap()[10]);

        let peaks = ctx.sheet(sheets::PEAK_SPIKES, "test").unwrap();
        assert_eq!(peaks.column("Serial_No").unwrap()[0].as_f64(), Some(12.0));
    }

    #[test]
    fn adaptive_mode_flags_quantile_extremes() {
        let mut config = PipelineConfig::default();
        config.outliers.quantile = 0.9;

        let x: Vec<f64> = (1..=100).map(f64::from).collect();
        let t = table(x);
        let mut ctx = StageContext::new(t, &config);
        ZScoreStage.run(&mut ctx).unwrap();

        let flags = ctx.main.bools("x_outlier_z_score").unwrap();
        // Strictly outside the [p10, p90] interpolated bounds.
        assert!(flags[0] && flags[99]);
        assert!(!flags[49]);

        let summary = ctx.sheet(sheets::SUMMARY_STATS, "test").unwrap();
        assert_eq!(summary.len(), AXES.len());
    }
}
