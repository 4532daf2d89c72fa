//! vibropipe: batch anomaly scoring for vibration sensor captures.
//!
//! Processes tri-axis accelerometer workbooks through an eleven-stage
//! pipeline: ingest and unit conversion, gap imputation, window
//! aggregation, Savitzky-Golay denoising, rolling-statistic flagging,
//! boxplot and z-score outlier detection, contextual labeling, temporal
//! clustering, spectral feature extraction, and score fusion. Each
//! stage appends columns to the main sheet or emits a report sheet;
//! the final output is a per-sample health score and label.
//!
//! ## Architecture
//!
//! - **Stages**: each step implements the [`stages::Stage`] trait and
//!   declares its input columns up front, so a malformed file fails
//!   fast with the offending stage named.
//! - **Store**: workbooks are read and written through the
//!   [`store::TabularStore`] trait; the default backend keeps each
//!   capture as a JSON workbook on disk.
//! - **Batch**: files run independently on a worker pool; one bad file
//!   is skipped and reported, never aborting the rest.

pub mod config;
pub mod error;
pub mod locator;
pub mod pipeline;
pub mod stages;
pub mod stats;
pub mod store;
pub mod types;

// Re-export the driver surface
pub use pipeline::{BatchSummary, Pipeline};

// Re-export configuration and errors
pub use config::{ConfigError, PipelineConfig};
pub use error::PipelineError;

// Re-export storage backends
pub use store::{JsonWorkbookStore, MemoryStore, StoreError, TabularStore};

// Re-export the tabular data model
pub use types::{FeatureTable, FeatureValue};

// Re-export file discovery
pub use locator::DatasetLocator;
