//! Rolling statistical flagger.
//!
//! Centered rolling RMS and excess kurtosis per axis over a strict
//! full window (51 samples): edge positions without a full window are
//! written as 0.0, meaning "not evaluated". Each statistic gets two
//! independent thresholds — a fixed rule (RMS: mean + 2·std over the
//! whole file; kurtosis: a constant) and a file-relative 95th
//! percentile — with per-axis fixed/percentile/combined flag columns
//! and a `RollingStats_Report` sheet listing every flagged row.

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::stats;
use crate::types::{columns, sheets, FeatureTable, FeatureValue, AXES};

pub struct RollingStage;

/// Apply `f` over every strict centered window; positions without a
/// full window of finite values yield 0.0.
fn rolling_strict(values: &[f64], window: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let n = values.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            if i < half || i + half >= n {
                return 0.0;
            }
            let slice = &values[i - half..=i + half];
            if slice.iter().all(|v| v.is_finite()) {
                f(slice)
            } else {
                0.0
            }
        })
        .collect()
}

impl Stage for RollingStage {
    fn name(&self) -> &'static str {
        "rolling"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        AXES.iter()
            .flat_map(|axis| {
                [
                    format!("rolling_rms_{axis}"),
                    format!("rolling_kurtosis_{axis}"),
                    format!("rms_fixed_flag_{axis}"),
                    format!("rms_percentile_flag_{axis}"),
                    format!("rms_combined_flag_{axis}"),
                    format!("kurt_fixed_flag_{axis}"),
                    format!("kurt_percentile_flag_{axis}"),
                    format!("kurt_combined_flag_{axis}"),
                ]
            })
            .collect()
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let cfg = &ctx.config.rolling;
        let datetime_cells = ctx
            .main
            .column(columns::DATETIME)
            .map(<[FeatureValue]>::to_vec)
            .unwrap_or_default();

        let mut report_serials = Vec::new();
        let mut report_timestamps = Vec::new();
        let mut report_criteria = Vec::new();
        let mut report_axes = Vec::new();

        for axis in AXES {
            let values = ctx
                .main
                .numeric(&columns::mps2(axis))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "rolling",
                    column: columns::mps2(axis),
                })?;

            let rms = rolling_strict(&values, cfg.window, stats::rms);
            let kurt = rolling_strict(&values, cfg.window, |w| {
                stats::excess_kurtosis(w).unwrap_or(0.0)
            });

            let rms_fixed_thresh =
                stats::mean(&rms) + cfg.rms_std_multiplier * stats::sample_std(&rms);
            let rms_perc_thresh = stats::percentile(&rms, cfg.percentile);
            let kurt_perc_thresh = stats::percentile(&kurt, cfg.percentile);

            let rms_fixed: Vec<bool> = rms.iter().map(|v| *v > rms_fixed_thresh).collect();
            let rms_perc: Vec<bool> = rms.iter().map(|v| *v > rms_perc_thresh).collect();
            let rms_combined: Vec<bool> = rms_fixed
                .iter()
                .zip(&rms_perc)
                .map(|(a, b)| *a || *b)
                .collect();
            let kurt_fixed: Vec<bool> =
                kurt.iter().map(|v| *v > cfg.kurtosis_threshold).collect();
            let kurt_perc: Vec<bool> = kurt.iter().map(|v| *v > kurt_perc_thresh).collect();
            let kurt_combined: Vec<bool> = kurt_fixed
                .iter()
                .zip(&kurt_perc)
                .map(|(a, b)| *a || *b)
                .collect();

            for (criteria, flags) in [
                ("kurt_fixed_flag", &kurt_fixed),
                ("kurt_percentile_flag", &kurt_perc),
                ("rms_fixed_flag", &rms_fixed),
                ("rms_percentile_flag", &rms_perc),
            ] {
                for (i, flagged) in flags.iter().enumerate() {
                    if *flagged {
                        report_serials.push(FeatureValue::Num((i + 2) as f64));
                        report_timestamps.push(
                            datetime_cells.get(i).cloned().unwrap_or(FeatureValue::Missing),
                        );
                        report_criteria.push(FeatureValue::Text(format!("{criteria}_{axis}")));
                        report_axes.push(FeatureValue::Text((*axis).to_string()));
                    }
                }
            }

            ctx.main.set_numeric(format!("rolling_rms_{axis}"), rms)?;
            ctx.main.set_numeric(format!("rolling_kurtosis_{axis}"), kurt)?;
            ctx.main.set_bools(format!("rms_fixed_flag_{axis}"), rms_fixed)?;
            ctx.main.set_bools(format!("rms_percentile_flag_{axis}"), rms_perc)?;
            ctx.main.set_bools(format!("rms_combined_flag_{axis}"), rms_combined)?;
            ctx.main.set_bools(format!("kurt_fixed_flag_{axis}"), kurt_fixed)?;
            ctx.main.set_bools(format!("kurt_percentile_flag_{axis}"), kurt_perc)?;
            ctx.main.set_bools(format!("kurt_combined_flag_{axis}"), kurt_combined)?;
        }

        let mut report = FeatureTable::new();
        report.set_column("Serial_No", report_serials)?;
        report.set_column("Timestamp", report_timestamps)?;
        report.set_column("Criteria", report_criteria)?;
        report.set_column("Axis", report_axes)?;
        ctx.put_sheet(sheets::ROLLING_REPORT, report);
        Ok(())
    }
}
