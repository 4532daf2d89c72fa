//! Shared numerics for the pipeline stages.
//!
//! Mean and sample standard deviation come from `statrs`; the remaining
//! estimators (RMS, bias-corrected skewness and excess kurtosis,
//! linear-interpolated percentile) are implemented here because each
//! stage depends on their exact conventions: percentiles interpolate
//! linearly on the sorted data, skew/kurtosis use the bias-corrected
//! sample formulas, and degenerate inputs yield `None` rather than a
//! panic or a fabricated zero.

use statrs::statistics::Statistics;

/// Arithmetic mean. NaN for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().mean()
    }
}

/// Sample standard deviation (Bessel-corrected, ddof = 1).
/// NaN when fewer than two observations exist.
#[must_use]
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        f64::NAN
    } else {
        values.iter().std_dev()
    }
}

/// Root mean square: `sqrt(mean(x²))`. NaN for an empty slice.
#[must_use]
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Bias-corrected sample skewness: `g1 · sqrt(n(n−1)) / (n−2)`.
///
/// `None` when fewer than three observations exist or the values are
/// constant (zero second moment).
#[must_use]
pub fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let m = mean(values);
    let nf = n as f64;
    let m2: f64 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    let m3: f64 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / nf;
    if m2 <= 0.0 {
        return None;
    }
    let g1 = m3 / m2.powf(1.5);
    Some(g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0))
}

/// Bias-corrected excess kurtosis (the pandas `.kurt()` convention):
/// `((n+1)·g2 + 6) · (n−1) / ((n−2)(n−3))` with `g2 = m4/m2² − 3`.
///
/// `None` when fewer than four observations exist or the values are
/// constant.
#[must_use]
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 4 {
        return None;
    }
    let m = mean(values);
    let nf = n as f64;
    let m2: f64 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    let m4: f64 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / nf;
    if m2 <= 0.0 {
        return None;
    }
    let g2 = m4 / (m2 * m2) - 3.0;
    Some(((nf + 1.0) * g2 + 6.0) * (nf - 1.0) / ((nf - 2.0) * (nf - 3.0)))
}

/// Percentile with linear interpolation on the sorted data (the pandas
/// `quantile` default). `q` is in [0, 1]. NaN cells are ignored; NaN is
/// returned when nothing remains.
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    if lo + 1 >= n {
        return sorted[n - 1];
    }
    sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
}

/// Min-max normalize into [0, 1]; a constant (or empty) column maps to
/// all zeros. Non-finite cells pass through as 0.
#[must_use]
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (min, max) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() || max <= min {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                (v - min) / (max - min)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn rms_reflects_all_values() {
        // Five-sample window with one large spike.
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert!((mean(&values) - 22.0).abs() < EPS);
        let expected = ((1.0 + 4.0 + 9.0 + 16.0 + 10000.0) / 5.0_f64).sqrt();
        assert!((rms(&values) - expected).abs() < EPS);
        assert!((expected - 44.79).abs() < 0.01);
    }

    #[test]
    fn constant_window_has_zero_std_and_rms_of_abs_value() {
        let values = [-3.0, -3.0, -3.0, -3.0];
        assert!(sample_std(&values).abs() < EPS);
        assert!((rms(&values) - 3.0).abs() < EPS);
    }

    #[test]
    fn rms_is_at_least_abs_mean_for_same_sign_values() {
        let values = [1.0, 2.0, 5.0, 9.0];
        assert!(rms(&values) >= mean(&values).abs());
    }

    #[test]
    fn skewness_needs_three_observations() {
        assert!(skewness(&[1.0, 2.0]).is_none());
        assert!(skewness(&[5.0, 5.0, 5.0]).is_none());
        // Symmetric data has (near-)zero skew.
        let sym = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(skewness(&sym).unwrap().abs() < EPS);
    }

    #[test]
    fn kurtosis_matches_pandas_convention() {
        // pandas: Series([1,2,3,4,5]).kurt() == -1.2
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((excess_kurtosis(&values).unwrap() - (-1.2)).abs() < 1e-9);
        assert!(excess_kurtosis(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values = [1.0, 2.0, 3.0, 4.0];
        // pandas: quantile(0.25) of [1,2,3,4] == 1.75
        assert!((percentile(&values, 0.25) - 1.75).abs() < EPS);
        assert!((percentile(&values, 0.5) - 2.5).abs() < EPS);
        assert!((percentile(&values, 1.0) - 4.0).abs() < EPS);
        assert!((percentile(&values, 0.0) - 1.0).abs() < EPS);
    }

    #[test]
    fn min_max_normalize_handles_constant_columns() {
        assert_eq!(min_max_normalize(&[2.0, 2.0, 2.0]), vec![0.0, 0.0, 0.0]);
        let normalized = min_max_normalize(&[0.0, 5.0, 10.0]);
        assert!((normalized[1] - 0.5).abs() < EPS);
        assert!((normalized[2] - 1.0).abs() < EPS);
    }
}
