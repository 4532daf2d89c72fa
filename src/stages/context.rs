//! Contextual labeler.
//!
//! Two independent rule tables score each row from its own detector
//! flags and the flags of its immediate neighbors (offsets −1/+1).
//! Both are kept as parallel strategies on purpose: the final
//! contextual score averages their normalized severity scales, which
//! dampens either table's false positives without losing sensitivity
//! to either one's true positives.

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::types::{columns, FeatureValue, AXES};

/// Severity scale of the loosened rule table (0–3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoosenedLabel {
    Normal,
    Uncertain,
    LikelySensorFault,
    TrueAnomaly,
}

impl LoosenedLabel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Uncertain => "Uncertain",
            Self::LikelySensorFault => "Likely Sensor Fault",
            Self::TrueAnomaly => "True Anomaly",
        }
    }

    fn score(self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::Uncertain => 1.0,
            Self::LikelySensorFault => 2.0,
            Self::TrueAnomaly => 3.0,
        }
    }
}

/// Severity scale of the enhanced rule table (0–4, with half steps for
/// detector-specific tiers).
#[derive(Debug, Clone, Copy, PartialEq)]
enum EnhancedLabel {
    Normal,
    SuspiciousRegion,
    Uncertain,
    MechanicalFaultWeakContext,
    SensorFaultWithContext,
    MechanicalFaultZScoreOnly,
    TrueAnomaly,
}

impl EnhancedLabel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::SuspiciousRegion => "Suspicious Region",
            Self::Uncertain => "Uncertain",
            Self::MechanicalFaultWeakContext => "Likely Mechanical Fault (Weak Context)",
            Self::SensorFaultWithContext => "Likely Sensor Fault with Context",
            Self::MechanicalFaultZScoreOnly => "Likely Mechanical Fault (Z-score only)",
            Self::TrueAnomaly => "True Anomaly",
        }
    }

    fn score(self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::SuspiciousRegion => 1.0,
            Self::Uncertain => 2.0,
            Self::MechanicalFaultWeakContext => 2.5,
            Self::SensorFaultWithContext => 3.0,
            Self::MechanicalFaultZScoreOnly => 3.5,
            Self::TrueAnomaly => 4.0,
        }
    }
}

/// Per-row detector evidence the rule tables consume.
#[derive(Debug, Clone, Copy, Default)]
struct RowFlags {
    z_count: usize,
    box_count: usize,
    is_outlier: bool,
    is_outlier_boxplot: bool,
}

impl RowFlags {
    fn total(self) -> usize {
        self.z_count + self.box_count
    }
}

fn loosened_rule(rows: &[RowFlags], idx: usize) -> LoosenedLabel {
    let row = rows[idx];
    let curr_total = row.total();
    let neighbor_total = neighbor_total(rows, idx);

    if row.is_outlier || row.is_outlier_boxplot {
        if curr_total >= 1 {
            if neighbor_total >= 1 || curr_total >= 2 {
                LoosenedLabel::TrueAnomaly
            } else {
                LoosenedLabel::LikelySensorFault
            }
        } else {
            LoosenedLabel::Uncertain
        }
    } else if neighbor_total >= 2 {
        LoosenedLabel::Uncertain
    } else {
        LoosenedLabel::Normal
    }
}

fn enhanced_rule(rows: &[RowFlags], idx: usize) -> EnhancedLabel {
    let row = rows[idx];
    let zscore_flag = row.z_count > 0;
    let boxplot_flag = row.box_count > 0;
    let neighbor_total = neighbor_total(rows, idx);

    if zscore_flag && boxplot_flag {
        if neighbor_total >= 1 {
            EnhancedLabel::TrueAnomaly
        } else {
            EnhancedLabel::MechanicalFaultWeakContext
        }
    } else if zscore_flag || boxplot_flag {
        if zscore_flag && !boxplot_flag && neighbor_total >= 1 {
            EnhancedLabel::MechanicalFaultZScoreOnly
        } else if neighbor_total >= 2 {
            EnhancedLabel::SensorFaultWithContext
        } else {
            EnhancedLabel::Uncertain
        }
    } else if neighbor_total >= 2 {
        EnhancedLabel::SuspiciousRegion
    } else {
        EnhancedLabel::Normal
    }
}

fn neighbor_total(rows: &[RowFlags], idx: usize) -> usize {
    let mut total = 0;
    if idx > 0 {
        total += rows[idx - 1].total();
    }
    if idx + 1 < rows.len() {
        total += rows[idx + 1].total();
    }
    total
}

fn final_label(score: f64) -> &'static str {
    if score < 0.25 {
        "Normal"
    } else if score < 0.5 {
        "Mild Anomaly"
    } else if score < 0.75 {
        "Probable Fault"
    } else {
        "Confirmed Anomaly"
    }
}

pub struct ContextStage;

impl Stage for ContextStage {
    fn name(&self) -> &'static str {
        "context"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = AXES
            .iter()
            .flat_map(|axis| {
                [
                    format!("{axis}_outlier_z_score"),
                    format!("{axis}_outlier_box_plot"),
                ]
            })
            .collect();
        cols.push(columns::IS_OUTLIER.to_string());
        cols.push(columns::IS_OUTLIER_BOXPLOT.to_string());
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        vec![
            "loosened_contextual_label".into(),
            "enhanced_contextual_label".into(),
            "contextual_score_loosened".into(),
            "contextual_score_enhanced".into(),
            columns::FINAL_CONTEXTUAL_SCORE.into(),
            columns::FINAL_CONTEXTUAL_LABEL.into(),
        ]
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let n = ctx.main.len();
        let mut rows = vec![RowFlags::default(); n];

        for axis in AXES {
            let z = ctx
                .main
                .bools(&format!("{axis}_outlier_z_score"))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "context",
                    column: format!("{axis}_outlier_z_score"),
                })?;
            let b = ctx
                .main
                .bools(&format!("{axis}_outlier_box_plot"))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "context",
                    column: format!("{axis}_outlier_box_plot"),
                })?;
            for i in 0..n {
                rows[i].z_count += usize::from(z[i]);
                rows[i].box_count += usize::from(b[i]);
            }
        }
        let is_outlier = ctx.main.bools(columns::IS_OUTLIER).unwrap_or_default();
        let is_outlier_box = ctx
            .main
            .bools(columns::IS_OUTLIER_BOXPLOT)
            .unwrap_or_default();
        for i in 0..n {
            rows[i].is_outlier = is_outlier[i];
            rows[i].is_outlier_boxplot = is_outlier_box[i];
        }

        let loosened: Vec<LoosenedLabel> = (0..n).map(|i| loosened_rule(&rows, i)).collect();
        let enhanced: Vec<EnhancedLabel> = (0..n).map(|i| enhanced_rule(&rows, i)).collect();

        let fused: Vec<f64> = loosened
            .iter()
            .zip(&enhanced)
            .map(|(l, e)| 0.5 * (l.score() / 3.0) + 0.5 * (e.score() / 4.0))
            .collect();

        ctx.main.set_column(
            "loosened_contextual_label",
            loosened.iter().map(|l| l.as_str().into()).collect(),
        )?;
        ctx.main.set_column(
            "enhanced_contextual_label",
            enhanced.iter().map(|e| e.as_str().into()).collect(),
        )?;
        ctx.main.set_numeric(
            "contextual_score_loosened",
            loosened.iter().map(|l| l.score()).collect(),
        )?;
        ctx.main.set_numeric(
            "contextual_score_enhanced",
            enhanced.iter().map(|e| e.score()).collect(),
        )?;
        ctx.main.set_column(
            columns::FINAL_CONTEXTUAL_LABEL,
            fused.iter().map(|s| FeatureValue::Text(final_label(*s).into())).collect(),
        )?;
        ctx.main.set_numeric(columns::FINAL_CONTEXTUAL_SCORE, fused)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::types::FeatureTable;

    /// Build a main table from per-row (z flags, box flags) on the x
    /// axis only; other axes stay quiet.
    fn table(flags: &[(bool, bool)]) -> FeatureTable {
        let mut t = FeatureTable::new();
        for axis in AXES {
            let z: Vec<bool> = flags.iter().map(|(zf, _)| *zf && axis == "x").collect();
            let b: Vec<bool> = flags.iter().map(|(_, bf)| *bf && axis == "x").collect();
            t.set_bools(format!("{axis}_outlier_z_score"), z).unwrap();
            t.set_bools(format!("{axis}_outlier_box_plot"), b).unwrap();
        }
        t.set_bools(
            columns::IS_OUTLIER,
            flags.iter().map(|(zf, _)| *zf).collect(),
        )
        .unwrap();
        t.set_bools(
            columns::IS_OUTLIER_BOXPLOT,
            flags.iter().map(|(_, bf)| *bf).collect(),
        )
        .unwrap();
        t
    }

    #[test]
    fn both_detectors_with_neighbor_evidence_is_a_true_anomaly() {
        let config = PipelineConfig::default();
        let t = table(&[(true, false), (true, true), (false, false)]);
        let mut ctx = StageContext::new(t, &config);
        ContextStage.run(&mut ctx).unwrap();

        let enhanced = ctx.main.column("enhanced_contextual_label").unwrap();
        assert_eq!(enhanced[1].as_text(), Some("True Anomaly"));
        let loosened = ctx.main.column("loosened_contextual_label").unwrap();
        assert_eq!(loosened[1].as_text(), Some("True Anomaly"));

        // Fused score: 0.5·(3/3) + 0.5·(4/4) = 1.0 → Confirmed Anomaly.
        let score = ctx.main.numeric(columns::FINAL_CONTEXTUAL_SCORE).unwrap();
        assert!((score[1] - 1.0).abs() < 1e-12);
        assert_eq!(
            ctx.main.column(columns::FINAL_CONTEXTUAL_LABEL).unwrap()[1].as_text(),
            Some("Confirmed Anomaly")
        );
    }

    #[test]
    fn isolated_single_detector_row_is_weaker_evidence() {
        let config = PipelineConfig::default();
        let t = table(&[(false, false), (true, false), (false, false)]);
        let mut ctx = StageContext::new(t, &config);
        ContextStage.run(&mut ctx).unwrap();

        // One flag, no neighbor evidence: loosened says sensor fault,
        // enhanced stays uncertain.
        let loosened = ctx.main.column("loosened_contextual_label").unwrap();
        assert_eq!(loosened[1].as_text(), Some("Likely Sensor Fault"));
        let enhanced = ctx.main.column("enhanced_contextual_label").unwrap();
        assert_eq!(enhanced[1].as_text(), Some("Uncertain"));
    }

    #[test]
    fn quiet_rows_are_normal() {
        let config = PipelineConfig::default();
        let t = table(&[(false, false), (false, false)]);
        let mut ctx = StageContext::new(t, &config);
        ContextStage.run(&mut ctx).unwrap();

        let labels = ctx.main.column(columns::FINAL_CONTEXTUAL_LABEL).unwrap();
        assert!(labels.iter().all(|l| l.as_text() == Some("Normal")));
        let score = ctx.main.numeric(columns::FINAL_CONTEXTUAL_SCORE).unwrap();
        assert!(score.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn unflagged_row_between_busy_neighbors_is_uncertain() {
        let config = PipelineConfig::default();
        let t = table(&[(true, true), (false, false), (true, false)]);
        let mut ctx = StageContext::new(t, &config);
        ContextStage.run(&mut ctx).unwrap();

        let loosened = ctx.main.column("loosened_contextual_label").unwrap();
        assert_eq!(loosened[1].as_text(), Some("Uncertain"));
        let enhanced = ctx.main.column("enhanced_contextual_label").unwrap();
        assert_eq!(enhanced[1].as_text(), Some("Suspicious Region"));
    }
}
