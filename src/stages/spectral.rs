//! Spectral feature extractor.
//!
//! Groups the series into fixed intervals, removes the linear trend
//! from each interval, and computes per-axis DFT power features:
//! total power, spectral centroid, and energy per frequency band —
//! plus the peak frequency in the full-spectrum variant. Results land
//! in the `FFT_Features` sheet, one row per interval.
//!
//! Sampling rate is estimated per file from the mean inter-sample
//! delta; a degenerate series falls back to the configured rate.

use std::collections::BTreeMap;

use num_complex::Complex;
use rustfft::FftPlanner;

use super::{Stage, StageContext};
use crate::config::{SpectralConfig, SpectralVariant};
use crate::error::PipelineError;
use crate::types::{columns, format_datetime, sheets, FeatureTable, FeatureValue, AXES};

/// One-sided power spectrum: `(frequency, |X_k|²)` for the strictly
/// positive frequency bins (Nyquist bin excluded for even lengths,
/// matching the usual real-signal frequency layout).
#[must_use]
pub fn power_spectrum(signal: &[f64], sample_rate: f64) -> Vec<(f64, f64)> {
    let n = signal.len();
    if n < 2 {
        return Vec::new();
    }
    let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    (1..n.div_ceil(2))
        .map(|k| {
            let freq = k as f64 * sample_rate / n as f64;
            (freq, buffer[k].norm_sqr())
        })
        .collect()
}

/// Remove the least-squares linear trend.
fn detrend(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 2 {
        return signal.to_vec();
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = signal.iter().sum::<f64>() / nf;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in signal.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    signal
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (y_mean + slope * (i as f64 - x_mean)))
        .collect()
}

/// Column-name suffix for one frequency band, e.g. `band_1_3Hz`.
fn band_suffix(lo: f64, hi: f64) -> String {
    let fmt = |f: f64| {
        if f.fract() == 0.0 {
            format!("{f:.0}")
        } else {
            format!("{f}")
        }
    };
    format!("band_{}_{}Hz", fmt(lo), fmt(hi))
}

/// Interval features for one axis, in column order.
fn fft_features(signal: &[f64], sample_rate: f64, cfg: &SpectralConfig) -> Vec<f64> {
    let full = cfg.variant == SpectralVariant::FullSpectrum;
    let feature_count = 2 + usize::from(full) + cfg.bands.len();
    if signal.len() < cfg.min_samples {
        return vec![0.0; feature_count];
    }

    let detrended = detrend(signal);
    let spectrum: Vec<(f64, f64)> = power_spectrum(&detrended, sample_rate)
        .into_iter()
        .filter(|(freq, _)| *freq <= cfg.max_freq_hz)
        .collect();

    let total_power: f64 = spectrum.iter().map(|(_, p)| p).sum();
    let centroid = if total_power > 0.0 {
        spectrum.iter().map(|(f, p)| f * p).sum::<f64>() / total_power
    } else {
        0.0
    };

    let mut features = vec![total_power, centroid];
    if full {
        let peak = spectrum
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0.0, |(f, _)| *f);
        features.push(peak);
    }
    for &(lo, hi) in &cfg.bands {
        features.push(
            spectrum
                .iter()
                .filter(|(f, _)| *f >= lo && *f < hi)
                .map(|(_, p)| p)
                .sum(),
        );
    }
    features
}

fn feature_names(cfg: &SpectralConfig) -> Vec<String> {
    let mut names = vec!["total_power".to_string(), "spectral_centroid".to_string()];
    if cfg.variant == SpectralVariant::FullSpectrum {
        names.push("peak_freq".to_string());
    }
    names.extend(cfg.bands.iter().map(|&(lo, hi)| band_suffix(lo, hi)));
    names
}

pub struct SpectralStage;

impl Stage for SpectralStage {
    fn name(&self) -> &'static str {
        "spectral"
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![columns::DATETIME.to_string()];
        cols.extend(AXES.iter().map(|axis| columns::mps2(axis)));
        cols
    }

    fn produced_columns(&self) -> Vec<String> {
        Vec::new() // FFT_Features sheet only
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let cfg = &ctx.config.spectral;
        let timestamps = ctx.main.datetimes(columns::DATETIME, "spectral")?;

        // Sampling rate from the mean inter-sample delta.
        let deltas: Vec<f64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        let mean_delta = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().sum::<f64>() / deltas.len() as f64
        };
        let sample_rate = if mean_delta > 0.0 {
            1.0 / mean_delta
        } else {
            cfg.fallback_sample_rate_hz
        };
        tracing::debug!(sample_rate, "estimated sampling rate");

        let window_ms = i64::try_from(cfg.window_secs).unwrap_or(1).max(1) * 1000;
        let mut intervals: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, ts) in timestamps.iter().enumerate() {
            let key = ts.timestamp_millis().div_euclid(window_ms) * window_ms;
            intervals.entry(key).or_default().push(i);
        }

        let axis_values: Vec<Vec<f64>> = AXES
            .iter()
            .map(|axis| {
                ctx.main
                    .numeric(&columns::mps2(axis))
                    .ok_or_else(|| PipelineError::MissingColumn {
                        stage: "spectral",
                        column: columns::mps2(axis),
                    })
            })
            .collect::<Result<_, _>>()?;

        let names = feature_names(cfg);
        let mut datetime_col: Vec<FeatureValue> = Vec::with_capacity(intervals.len());
        let mut feature_cols: Vec<Vec<f64>> = vec![Vec::new(); AXES.len() * names.len()];

        for (&key, members) in &intervals {
            let ts = chrono::DateTime::from_timestamp_millis(key).unwrap_or_default();
            datetime_col.push(format_datetime(ts).into());
            for (axis_idx, values) in axis_values.iter().enumerate() {
                let signal: Vec<f64> = members
                    .iter()
                    .map(|&i| values[i])
                    .filter(|v| v.is_finite())
                    .collect();
                let features = fft_features(&signal, sample_rate, cfg);
                for (feat_idx, value) in features.into_iter().enumerate() {
                    feature_cols[axis_idx * names.len() + feat_idx].push(value);
                }
            }
        }

        let mut table = FeatureTable::new();
        table.set_column(columns::DATETIME, datetime_col)?;
        for (axis_idx, axis) in AXES.iter().enumerate() {
            let prefix = columns::mps2(axis);
            for (feat_idx, name) in names.iter().enumerate() {
                table.set_numeric(
                    format!("{prefix}_{name}"),
                    feature_cols[axis_idx * names.len() + feat_idx].clone(),
                )?;
            }
        }
        tracing::debug!(intervals = table.len(), "spectral features extracted");
        ctx.put_sheet(sheets::FFT_FEATURES, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn total_power_is_invariant_under_circular_shift() {
        let signal: Vec<f64> = (0..64)
            .map(|i| (f64::from(i) * 0.7).sin() + 0.3 * (f64::from(i) * 2.1).cos())
            .collect();
        let mut shifted = signal.clone();
        shifted.rotate_left(17);

        let total = |s: &[f64]| -> f64 { power_spectrum(s, 64.0).iter().map(|(_, p)| p).sum() };
        assert!((total(&signal) - total(&shifted)).abs() < 1e-6 * total(&signal).max(1.0));
    }

    #[test]
    fn pure_tone_concentrates_power_at_its_bin() {
        let fs = 32.0;
        let n = 64;
        // 4 Hz tone, integer number of cycles in the window.
        let signal: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * 4.0 * f64::from(i) / fs).sin())
            .collect();
        let spectrum = power_spectrum(&signal, fs);
        let (peak_freq, peak_power) = spectrum
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .copied()
            .unwrap();
        assert!((peak_freq - 4.0).abs() < 1e-9);
        let total: f64 = spectrum.iter().map(|(_, p)| p).sum();
        assert!(peak_power / total > 0.99);
    }

    #[test]
    fn detrend_removes_a_pure_ramp() {
        let ramp: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * f64::from(i)).collect();
        let out = detrend(&ramp);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn short_window_short_circuits_to_zero_features() {
        let cfg = PipelineConfig::default().spectral;
        let features = fft_features(&[1.0, 2.0, 3.0], 100.0, &cfg);
        assert_eq!(features.len(), 2 + cfg.bands.len());
        assert!(features.iter().all(|f| *f == 0.0));
    }

    #[test]
    fn band_beyond_nyquist_reads_zero() {
        let mut cfg = PipelineConfig::default().spectral;
        cfg.bands = vec![(0.0, 1.0), (400.0, 500.0)];
        cfg.max_freq_hz = f64::INFINITY;
        let signal: Vec<f64> = (0..32).map(|i| (f64::from(i) * 0.5).sin()).collect();
        // 10 Hz sampling → Nyquist 5 Hz; the 400–500 Hz band is empty.
        let features = fft_features(&signal, 10.0, &cfg);
        assert_eq!(features[3], 0.0);
    }

    #[test]
    fn full_spectrum_variant_emits_peak_freq_column() {
        let mut config = PipelineConfig::default();
        config.spectral = crate::config::SpectralConfig::full_spectrum();

        let n = 32;
        let mut table = FeatureTable::new();
        table
            .set_column(
                columns::DATETIME,
                (0..n)
                    .map(|i| format!("2024-01-01 00:00:00.{:03}", i * 25).into())
                    .collect(),
            )
            .unwrap();
        for axis in AXES {
            let signal: Vec<f64> = (0..n).map(|i| (f64::from(i) * 0.9).sin()).collect();
            table.set_numeric(columns::mps2(axis), signal).unwrap();
        }
        let mut ctx = StageContext::new(table, &config);
        SpectralStage.run(&mut ctx).unwrap();

        let fft = ctx.sheet(sheets::FFT_FEATURES, "test").unwrap();
        assert!(fft.has_column("x_mps2_peak_freq"));
        assert!(fft.has_column("x_mps2_band_0_10Hz"));
    }
}
