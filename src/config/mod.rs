//! Pipeline configuration
//!
//! Every tunable the stages consume lives in one explicit
//! [`PipelineConfig`] passed by reference into the driver — window
//! durations, rolling-window lengths, detector thresholds and
//! quantiles, frequency band definitions, and fusion weights. Defaults
//! match the field-calibrated constants; a TOML file can override any
//! subset.
//!
//! ```ignore
//! let config = PipelineConfig::load(Some(Path::new("vibropipe.toml")))?;
//! let pipeline = Pipeline::standard();
//! pipeline.run_batch(&store, &files, &config);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub locator: LocatorConfig,
    pub impute: ImputeConfig,
    pub resample: ResampleConfig,
    pub denoise: DenoiseConfig,
    pub rolling: RollingConfig,
    pub outliers: OutlierConfig,
    pub cluster: ClusterConfig,
    pub spectral: SpectralConfig,
    pub fusion: FusionConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file, or built-in defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            tracing::debug!("no config file given, using built-in defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }
}

/// Input file discovery filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// File extension of capture workbooks.
    pub extension: String,
    /// Stem suffixes of files to skip (already-processed artifacts).
    pub exclude_suffixes: Vec<String>,
    /// Filename prefixes of temp/lock files to skip.
    pub exclude_prefixes: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            extension: "json".into(),
            exclude_suffixes: Vec::new(),
            exclude_prefixes: vec!["~$".into(), ".".into()],
        }
    }
}

/// Dropped-sample repair (rolling mean of nonzero neighbors).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputeConfig {
    /// Neighbors considered on each side of a missing sample.
    pub neighbors: usize,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self { neighbors: 3 }
    }
}

/// Fixed-width window aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Window duration in seconds (1 s typical; 10 s for coarse runs).
    pub window_secs: u64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self { window_secs: 1 }
    }
}

/// Savitzky–Golay smoothing and residual noise classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Filter window length; must be odd, capped at the series length.
    pub window_length: usize,
    /// Residual/raw std ratio below which an axis is "Very smooth".
    pub very_smooth_ratio: f64,
    /// Ratio below which an axis is "Slight noise" (else "High noise").
    pub slight_noise_ratio: f64,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            window_length: 11,
            very_smooth_ratio: 0.05,
            slight_noise_ratio: 0.15,
        }
    }
}

/// Centered rolling RMS / kurtosis flagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    /// Rolling window length (odd; the full window is required).
    pub window: usize,
    /// Fixed RMS threshold = mean + multiplier·std over the file.
    pub rms_std_multiplier: f64,
    /// Fixed excess-kurtosis threshold.
    pub kurtosis_threshold: f64,
    /// File-relative quantile threshold for both statistics.
    pub percentile: f64,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            window: 51,
            rms_std_multiplier: 2.0,
            kurtosis_threshold: 3.5,
            percentile: 0.95,
        }
    }
}

/// Which rule the z-score detector applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZScoreMode {
    /// Flag values outside the [1−q, q] empirical quantile range.
    Adaptive,
    /// Flag |z-score| above a fixed threshold.
    Fixed,
}

/// Univariate outlier detectors (boxplot + z-score/adaptive).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// IQR multiplier for the boxplot fences.
    pub iqr_multiplier: f64,
    /// Detection rule for the z-score detector.
    pub z_mode: ZScoreMode,
    /// Upper quantile for adaptive mode (lower bound is 1−q).
    pub quantile: f64,
    /// |z| threshold for fixed mode.
    pub z_threshold: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            iqr_multiplier: 1.5,
            z_mode: ZScoreMode::Adaptive,
            quantile: 0.99,
            z_threshold: 3.0,
        }
    }
}

/// Temporal density clustering and recurrence detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// DBSCAN epsilon in seconds.
    pub eps_secs: f64,
    /// DBSCAN minimum cluster size (the point itself counts).
    pub min_samples: usize,
    /// Recurrence segment duration in seconds.
    pub segment_secs: f64,
    /// Offset rounding tolerance in seconds.
    pub offset_tolerance_secs: f64,
    /// Distinct segments required for a recurring offset.
    pub min_recurrences: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eps_secs: 5.0,
            min_samples: 3,
            segment_secs: 15.0,
            offset_tolerance_secs: 0.5,
            min_recurrences: 3,
        }
    }
}

/// Spectrum coverage variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralVariant {
    /// Keep frequencies up to a fixed cutoff (`max_freq_hz`).
    BandLimited,
    /// Keep the full spectrum up to Nyquist; adds `peak_freq`.
    FullSpectrum,
}

/// Spectral feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub variant: SpectralVariant,
    /// Spectral window duration in seconds.
    pub window_secs: u64,
    /// Frequency cutoff for the band-limited variant (Hz).
    pub max_freq_hz: f64,
    /// [lo, hi) band ranges in Hz.
    pub bands: Vec<(f64, f64)>,
    /// Windows with fewer samples short-circuit to zero features.
    pub min_samples: usize,
    /// Sampling rate when the capture has no usable timestamp deltas.
    pub fallback_sample_rate_hz: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            variant: SpectralVariant::BandLimited,
            window_secs: 10,
            max_freq_hz: 10.0,
            bands: vec![(0.0, 1.0), (1.0, 3.0), (3.0, 5.0), (5.0, 10.0)],
            min_samples: 8,
            fallback_sample_rate_hz: 100.0,
        }
    }
}

impl SpectralConfig {
    /// Presets for the full-spectrum variant (1 s windows, wider bands,
    /// a lower minimum sample count, `peak_freq` output).
    #[must_use]
    pub fn full_spectrum() -> Self {
        Self {
            variant: SpectralVariant::FullSpectrum,
            window_secs: 1,
            max_freq_hz: f64::INFINITY,
            bands: vec![(0.0, 10.0), (10.0, 20.0)],
            min_samples: 4,
            fallback_sample_rate_hz: 100.0,
        }
    }
}

/// Score fusion weights and label quantiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub time_series_weight: f64,
    pub contextual_weight: f64,
    pub temporal_weight: f64,
    pub recurrence_weight: f64,
    /// Label quantiles of the file's own final-score distribution:
    /// Monitor above the first, Warning above the second, Critical
    /// above the third.
    pub label_quantiles: [f64; 3],
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            time_series_weight: 0.5,
            contextual_weight: 0.2,
            temporal_weight: 0.2,
            recurrence_weight: 0.1,
            label_quantiles: [0.50, 0.75, 0.95],
        }
    }
}
