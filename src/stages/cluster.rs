//! Temporal cluster detector.
//!
//! Two complementary analyses over rows the detectors already flagged:
//!
//! - **Density clustering**: 1-D DBSCAN over elapsed seconds of the
//!   outlier subset (either detector). Clustered rows are "Grouped",
//!   noise rows "Isolated", everything else "Normal"; per-cluster
//!   summaries land in `Temporal_Cluster_Report`.
//! - **Recurrence**: the file is cut into fixed 15 s segments; a
//!   z-score outlier whose offset-within-segment (rounded to 0.5 s)
//!   repeats in ≥3 distinct segments is a recurring anomaly, scored by
//!   how many segments share that offset.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use super::{Stage, StageContext};
use crate::error::PipelineError;
use crate::types::{columns, format_datetime, sheets, FeatureTable, FeatureValue};

const NOISE: i64 = -1;
const UNVISITED: i64 = -2;

/// 1-D DBSCAN over scalar positions. Labels clusters in visit order
/// (first core point found opens cluster 0); unclustered points get -1.
fn dbscan_1d(points: &[f64], eps: f64, min_samples: usize) -> Vec<i64> {
    let n = points.len();
    let mut labels = vec![UNVISITED; n];
    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| (points[j] - points[i]).abs() <= eps)
            .collect()
    };

    let mut cluster = 0;
    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }
        let seed = neighbors(i);
        if seed.len() < min_samples {
            labels[i] = NOISE;
            continue;
        }
        labels[i] = cluster;
        let mut queue: VecDeque<usize> = seed.into_iter().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE {
                labels[j] = cluster; // border point
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = cluster;
            let reach = neighbors(j);
            if reach.len() >= min_samples {
                queue.extend(reach);
            }
        }
        cluster += 1;
    }
    labels
}

fn elapsed_secs(timestamps: &[DateTime<Utc>], origin: DateTime<Utc>) -> Vec<f64> {
    timestamps
        .iter()
        .map(|ts| (*ts - origin).num_milliseconds() as f64 / 1000.0)
        .collect()
}

pub struct ClusterStage;

impl Stage for ClusterStage {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn required_columns(&self) -> Vec<String> {
        vec![
            columns::DATETIME.to_string(),
            columns::IS_OUTLIER.to_string(),
            columns::IS_OUTLIER_BOXPLOT.to_string(),
        ]
    }

    fn produced_columns(&self) -> Vec<String> {
        vec![
            columns::TEMPORAL_CLUSTER.to_string(),
            columns::TEMPORAL_OUTLIER_TYPE.to_string(),
            columns::RECURRING_ANOMALY.to_string(),
            columns::RECURRENCE_SCORE.to_string(),
        ]
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<(), PipelineError> {
        let cfg = &ctx.config.cluster;
        let timestamps = ctx.main.datetimes(columns::DATETIME, "cluster")?;
        let n = timestamps.len();
        let is_outlier = ctx.main.bools(columns::IS_OUTLIER).unwrap_or_default();
        let is_outlier_box = ctx
            .main
            .bools(columns::IS_OUTLIER_BOXPLOT)
            .unwrap_or_default();

        // ------------------------------------------------------------
        // Density clustering over the outlier subset
        // ------------------------------------------------------------
        let outlier_rows: Vec<usize> = (0..n)
            .filter(|&i| is_outlier[i] || is_outlier_box[i])
            .collect();

        let mut cluster_col = vec![FeatureValue::Missing; n];
        let mut type_col: Vec<FeatureValue> = vec!["Normal".into(); n];
        let mut report = FeatureTable::new();

        if outlier_rows.is_empty() {
            tracing::debug!("no outliers to cluster");
            report.set_column("Cluster_ID", Vec::new())?;
            report.set_column("Count", Vec::new())?;
            report.set_column("Start_Time", Vec::new())?;
            report.set_column("End_Time", Vec::new())?;
        } else {
            let subset_times: Vec<DateTime<Utc>> =
                outlier_rows.iter().map(|&i| timestamps[i]).collect();
            let origin = *subset_times
                .iter()
                .min()
                .unwrap_or(&DateTime::<Utc>::default());
            let points = elapsed_secs(&subset_times, origin);
            let labels = dbscan_1d(&points, cfg.eps_secs, cfg.min_samples);

            let mut clusters: BTreeMap<i64, Vec<DateTime<Utc>>> = BTreeMap::new();
            for (pos, &row) in outlier_rows.iter().enumerate() {
                let label = labels[pos];
                cluster_col[row] = FeatureValue::Num(label as f64);
                type_col[row] = if label == NOISE {
                    "Isolated".into()
                } else {
                    "Grouped".into()
                };
                if label != NOISE {
                    clusters.entry(label).or_default().push(timestamps[row]);
                }
            }

            let mut ids = Vec::new();
            let mut counts = Vec::new();
            let mut starts = Vec::new();
            let mut ends = Vec::new();
            for (id, members) in &clusters {
                ids.push(FeatureValue::Num(*id as f64));
                counts.push(FeatureValue::Num(members.len() as f64));
                let start = members.iter().min().copied().unwrap_or_default();
                let end = members.iter().max().copied().unwrap_or_default();
                starts.push(format_datetime(start).into());
                ends.push(format_datetime(end).into());
            }
            report.set_column("Cluster_ID", ids)?;
            report.set_column("Count", counts)?;
            report.set_column("Start_Time", starts)?;
            report.set_column("End_Time", ends)?;
        }

        ctx.main.set_column(columns::TEMPORAL_CLUSTER, cluster_col)?;
        ctx.main.set_column(columns::TEMPORAL_OUTLIER_TYPE, type_col)?;
        ctx.put_sheet(sheets::TEMPORAL_REPORT, report);

        // ------------------------------------------------------------
        // Recurrence over fixed-duration segments
        // ------------------------------------------------------------
        let origin = *timestamps
            .iter()
            .min()
            .unwrap_or(&DateTime::<Utc>::default());
        let offsets = elapsed_secs(&timestamps, origin);

        // Offset key in tolerance units; offset-within-segment rounded
        // to the nearest tolerance step.
        let key_of = |offset: f64| -> i64 {
            let in_segment = offset.rem_euclid(cfg.segment_secs);
            (in_segment / cfg.offset_tolerance_secs).round() as i64
        };
        let segment_of = |offset: f64| -> i64 { (offset / cfg.segment_secs).floor() as i64 };

        let mut offset_segments: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for i in 0..n {
            if is_outlier[i] {
                offset_segments
                    .entry(key_of(offsets[i]))
                    .or_default()
                    .insert(segment_of(offsets[i]));
            }
        }

        let recurring: Vec<bool> = (0..n)
            .map(|i| {
                is_outlier[i]
                    && offset_segments
                        .get(&key_of(offsets[i]))
                        .is_some_and(|segments| segments.len() >= cfg.min_recurrences)
            })
            .collect();
        let score: Vec<f64> = (0..n)
            .map(|i| {
                if is_outlier[i] {
                    offset_segments
                        .get(&key_of(offsets[i]))
                        .map_or(0.0, |segments| segments.len() as f64)
                } else {
                    0.0
                }
            })
            .collect();

        ctx.main.set_bools(columns::RECURRING_ANOMALY, recurring)?;
        ctx.main.set_numeric(columns::RECURRENCE_SCORE, score)?;
        Ok(())
    }
}
