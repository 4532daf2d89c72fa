//! Savitzky–Golay denoiser and noise classification.
//!
//! Smooths each axis with a quadratic least-squares filter over a
//! symmetric window (length 11, reduced to an odd length for short
//! series), emits `{axis}_smooth` and `{axis}_resid` columns, and
//! classifies per-axis noise from the residual-to-signal std ratio
//! into the `Noise_Summary` sheet. The classification is advisory:
//! downstream stages run regardless.

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::stats;
use crate::types::{columns, sheets, FeatureTable, AXES};

pub struct DenoiseStage;

/// Quadratic Savitzky–Golay smoothing.
///
/// Interior points use the closed-form symmetric convolution weights
/// for a degree-2 fit; the first and last half-windows are filled by
/// evaluating a quadratic fitted to the first/last full window at the
/// edge positions, so the output has no shortened-window artifacts.
#[must_use]
pub fn savgol_quadratic(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n < 3 || window < 3 || window > n {
        return values.to_vec();
    }
    let m = window / 2;
    let mf = m as f64;
    let denom = (2.0 * mf + 3.0) * (2.0 * mf + 1.0) * (2.0 * mf - 1.0);
    let weights: Vec<f64> = (0..window)
        .map(|j| {
            let i = j as f64 - mf;
            (3.0 * (3.0 * mf * mf + 3.0 * mf - 1.0) - 15.0 * i * i) / denom
        })
        .collect();

    let mut out = vec![0.0; n];
    for center in m..n - m {
        out[center] = weights
            .iter()
            .zip(&values[center - m..=center + m])
            .map(|(w, v)| w * v)
            .sum();
    }

    let head = fit_quadratic(&values[..window]);
    for (pos, slot) in out.iter_mut().enumerate().take(m) {
        *slot = eval_quadratic(head, pos as f64);
    }
    let tail = fit_quadratic(&values[n - window..]);
    for (offset, slot) in out.iter_mut().rev().take(m).enumerate() {
        // Position within the tail window, counted from its start.
        let pos = (window - 1 - offset) as f64;
        *slot = eval_quadratic(tail, pos);
    }
    out
}

/// Least-squares quadratic fit of `ys` against x = 0..len, via the 3×3
/// normal equations (Cramer's rule).
fn fit_quadratic(ys: &[f64]) -> (f64, f64, f64) {
    let n = ys.len() as f64;
    let (mut s1, mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0, 0.0);
    let (mut sy, mut sxy, mut sx2y) = (0.0, 0.0, 0.0);
    for (i, &y) in ys.iter().enumerate() {
        let x = i as f64;
        s1 += x;
        s2 += x * x;
        s3 += x * x * x;
        s4 += x * x * x * x;
        sy += y;
        sxy += x * y;
        sx2y += x * x * y;
    }
    let det = |a: [f64; 9]| -> f64 {
        a[0] * (a[4] * a[8] - a[5] * a[7]) - a[1] * (a[3] * a[8] - a[5] * a[6])
            + a[2] * (a[3] * a[7] - a[4] * a[6])
    };
    let d = det([n, s1, s2, s1, s2, s3, s2, s3, s4]);
    if d.abs() < f64::EPSILON {
        return (stats::mean(ys), 0.0, 0.0);
    }
    let a0 = det([sy, s1, s2, sxy, s2, s3, sx2y, s3, s4]) / d;
    let a1 = det([n, sy, s2, s1, sxy, s3, s2, sx2y, s4]) / d;
    let a2 = det([n, s1, sy, s1, s2, sxy, s2, s3, sx2y]) / d;
    (a0, a1, a2)
}

fn eval_quadratic((a0, a1, a2): (f64, f64, f64), x: f64) -> f64 {
    a0 + a1 * x + a2 * x * x
}

fn classify_ratio(ratio: f64, very_smooth: f64, slight_noise: f64) -> &'static str {
    if ratio < very_smooth {
        "Very smooth"
    } else if ratio < slight_noise {
        "Slight noise"
    } else {
        "High noise"
    }
}

impl Stage for DenoiseStage {
    fn name(&self) -> &'static str {
        "denoise"
    }

    fn required_columns(&self) -> Vec<String> {
        AXES.iter().map(|axis| columns::mps2(axis)).collect()
    }

    fn produced_columns(&self) -> Vec<String> {
        AXES.iter()
            .flat_map(|axis| [format!("{axis}_smooth"), format!("{axis}_resid")])
            .collect()
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let cfg = &ctx.config.denoise;
        let n = ctx.main.len();
        let window = if n >= cfg.window_length {
            cfg.window_length
        } else {
            // Largest odd length that fits a short series.
            (n / 2) * 2 + 1
        };

        let mut summary_axes = Vec::new();
        let mut summary_ratios = Vec::new();
        let mut summary_labels = Vec::new();

        for axis in AXES {
            let raw = ctx
                .main
                .numeric(&columns::mps2(axis))
                .ok_or_else(|| PipelineError::MissingColumn {
                    stage: "denoise",
                    column: columns::mps2(axis),
                })?;
            let smooth = savgol_quadratic(&raw, window);
            let resid: Vec<f64> = raw.iter().zip(&smooth).map(|(r, s)| r - s).collect();

            let finite_resid: Vec<f64> = resid.iter().copied().filter(|v| v.is_finite()).collect();
            let finite_raw: Vec<f64> = raw.iter().copied().filter(|v| v.is_finite()).collect();
            let raw_std = stats::sample_std(&finite_raw);
            let ratio = if raw_std > 0.0 {
                stats::sample_std(&finite_resid) / raw_std
            } else {
                0.0
            };
            summary_axes.push(axis.into());
            summary_ratios.push(ratio);
            summary_labels
                .push(classify_ratio(ratio, cfg.very_smooth_ratio, cfg.slight_noise_ratio).into());

            ctx.main.set_numeric(format!("{axis}_smooth"), smooth)?;
            ctx.main.set_numeric(format!("{axis}_resid"), resid)?;
        }

        let mut summary = FeatureTable::new();
        summary.set_column("Axis", summary_axes)?;
        summary.set_numeric("Noise_Ratio", summary_ratios)?;
        summary.set_column("Classification", summary_labels)?;
        ctx.put_sheet(sheets::NOISE_SUMMARY, summary);
        Ok(())
    }
}
