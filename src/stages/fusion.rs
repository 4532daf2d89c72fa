//! Score fusion and health labeling.
//!
//! Combines the time-domain evidence (rolling flags, contextual score,
//! temporal grouping, recurrence) with the min-max-normalized spectral
//! features joined by interval into a single `Final_score`, then labels
//! each row against the file's own score quantiles. Per-file-relative
//! thresholds are deliberate: sensor baselines vary by machine, so two
//! files with the same absolute severity can label differently.

use std::collections::HashMap;

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::stats;
use crate::types::{columns, sheets, FeatureValue, AXES};

/// Ordered health labels from the final-score quantiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLabel {
    Healthy,
    Monitor,
    Warning,
    Critical,
}

impl HealthLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Monitor => "Monitor",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }

    /// Strict-greater comparison against the three quantile cuts.
    #[must_use]
    pub fn from_score(score: f64, cuts: [f64; 3]) -> Self {
        if score > cuts[2] {
            Self::Critical
        } else if score > cuts[1] {
            Self::Warning
        } else if score > cuts[0] {
            Self::Monitor
        } else {
            Self::Healthy
        }
    }
}

pub struct FusionStage;

impl Stage for FusionStage {
    fn name(&self) -> &'static str {
        "fusion"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = AXES
            .iter()
            .flat_map(|axis| {
                [
                    format!("rms_combined_flag_{axis}"),
                    format!("kurt_combined_flag_{axis}"),
                ]
            })
            .collect();
        cols.extend([
            columns::DATETIME.to_string(),
            columns::FINAL_CONTEXTUAL_SCORE.to_string(),
            columns::TEMPORAL_OUTLIER_TYPE.to_string(),
            columns::RECURRENCE_SCORE.to_string(),
        ]);
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        vec![
            "rms_score".into(),
            "kurt_score".into(),
            "time_series_score".into(),
            "temporal_score".into(),
            "recurrence_score_norm".into(),
            "time_domain_score".into(),
            "time_based_frequency_score".into(),
            columns::FINAL_SCORE.into(),
            columns::FINAL_LABEL.into(),
        ]
    }

    #[allow(clippy::too_many_lines)]
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let cfg = &ctx.config.fusion;
        let n = ctx.main.len();
        let axes_f = AXES.len() as f64;

        // --- Time-domain evidence ---------------------------------
        let mut rms_score = vec![0.0; n];
        let mut kurt_score = vec![0.0; n];
        for axis in AXES {
            let rms_flags = ctx
                .main
                .bools(&format!("rms_combined_flag_{axis}"))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "fusion",
                    column: format!("rms_combined_flag_{axis}"),
                })?;
            let kurt_flags = ctx
                .main
                .bools(&format!("kurt_combined_flag_{axis}"))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "fusion",
                    column: format!("kurt_combined_flag_{axis}"),
                })?;
            for i in 0..n {
                rms_score[i] += f64::from(u8::from(rms_flags[i])) / axes_f;
                kurt_score[i] += f64::from(u8::from(kurt_flags[i])) / axes_f;
            }
        }
        let time_series: Vec<f64> = (0..n)
            .map(|i| (rms_score[i] + kurt_score[i]) / 2.0)
            .collect();

        let contextual = ctx
            .main
            .numeric(columns::FINAL_CONTEXTUAL_SCORE)
            .unwrap_or_default();
        let temporal: Vec<f64> = ctx
            .main
            .column(columns::TEMPORAL_OUTLIER_TYPE)
            .map(|col| {
                col.iter()
                    .map(|cell| f64::from(u8::from(cell.as_text() == Some("Grouped"))))
                    .collect()
            })
            .unwrap_or_default();

        let recurrence = ctx.main.numeric(columns::RECURRENCE_SCORE).unwrap_or_default();
        let max_recurrence = recurrence.iter().copied().fold(0.0_f64, f64::max);
        let recurrence_norm: Vec<f64> = recurrence
            .iter()
            .map(|r| if max_recurrence > 0.0 { r / max_recurrence } else { 0.0 })
            .collect();

        let time_domain: Vec<f64> = (0..n)
            .map(|i| {
                cfg.time_series_weight * time_series[i]
                    + cfg.contextual_weight * contextual.get(i).copied().unwrap_or(0.0)
                    + cfg.temporal_weight * temporal.get(i).copied().unwrap_or(0.0)
                    + cfg.recurrence_weight * recurrence_norm[i]
            })
            .collect();

        // --- Frequency evidence, joined by interval ----------------
        let fft = ctx.sheet(sheets::FFT_FEATURES, "fusion")?;
        let feature_cols: Vec<String> = fft
            .column_names()
            .filter(|name| {
                AXES.iter().any(|axis| {
                    name.starts_with(&format!("{}_", columns::mps2(axis)))
                })
            })
            .map(ToString::to_string)
            .collect();

        let normalized: HashMap<&str, Vec<f64>> = feature_cols
            .iter()
            .map(|name| {
                let raw = fft.numeric(name).unwrap_or_default();
                (name.as_str(), stats::min_max_normalize(&raw))
            })
            .collect();

        let fft_rows = fft.len();
        let mut interval_score = vec![0.0; fft_rows];
        for i in 0..fft_rows {
            let mut axis_scores = Vec::with_capacity(AXES.len());
            for axis in AXES {
                let prefix = format!("{}_", columns::mps2(axis));
                let values: Vec<f64> = feature_cols
                    .iter()
                    .filter(|name| name.starts_with(&prefix))
                    .map(|name| normalized[name.as_str()][i])
                    .collect();
                if !values.is_empty() {
                    axis_scores.push(stats::mean(&values));
                }
            }
            if !axis_scores.is_empty() {
                interval_score[i] = stats::mean(&axis_scores);
            }
        }

        let window_ms = i64::try_from(ctx.config.spectral.window_secs)
            .unwrap_or(1)
            .max(1)
            * 1000;
        let fft_times = fft.datetimes(columns::DATETIME, "fusion")?;
        let by_interval: HashMap<i64, f64> = fft_times
            .iter()
            .zip(&interval_score)
            .map(|(ts, score)| (ts.timestamp_millis(), *score))
            .collect();

        let timestamps = ctx.main.datetimes(columns::DATETIME, "fusion")?;
        let frequency: Vec<f64> = timestamps
            .iter()
            .map(|ts| {
                let key = ts.timestamp_millis().div_euclid(window_ms) * window_ms;
                by_interval.get(&key).copied().unwrap_or(0.0)
            })
            .collect();

        // --- Final score and labels --------------------------------
        let final_score: Vec<f64> = (0..n)
            .map(|i| (time_domain[i] + frequency[i]) / 2.0)
            .collect();
        let cuts = [
            stats::percentile(&final_score, cfg.label_quantiles[0]),
            stats::percentile(&final_score, cfg.label_quantiles[1]),
            stats::percentile(&final_score, cfg.label_quantiles[2]),
        ];
        let labels: Vec<FeatureValue> = final_score
            .iter()
            .map(|s| HealthLabel::from_score(*s, cuts).as_str().into())
            .collect();

        // Interval score is also persisted alongside the raw spectral
        // features; it is recomputed from them on every run.
        let mut fft_out = fft.clone();
        fft_out.set_numeric("frequency_interval_score", interval_score)?;
        ctx.put_sheet(sheets::FFT_FEATURES, fft_out);

        ctx.main.set_numeric("rms_score", rms_score)?;
        ctx.main.set_numeric("kurt_score", kurt_score)?;
        ctx.main.set_numeric("time_series_score", time_series)?;
        ctx.main.set_numeric("temporal_score", temporal)?;
        ctx.main.set_numeric("recurrence_score_norm", recurrence_norm)?;
        ctx.main.set_numeric("time_domain_score", time_domain)?;
        ctx.main.set_numeric("time_based_frequency_score", frequency)?;
        ctx.main.set_numeric(columns::FINAL_SCORE, final_score)?;
        ctx.main.set_column(columns::FINAL_LABEL, labels)?;

        tracing::info!(rows = n, "final scores and labels assigned");
        Ok(())
    }
}
