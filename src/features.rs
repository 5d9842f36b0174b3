//! Per-window feature extraction seam.
//!
//! Extractors turn one window into one fixed-width vector. The schema carries
//! a fingerprint so training and inference can check they agree on columns.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::slicer::{Window, WindowId};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub window_id: WindowId,
    pub values: Vec<f64>,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("extractor returned {actual} values for window {window_id}, schema has {expected}")]
    WidthMismatch {
        window_id: WindowId,
        expected: usize,
        actual: usize,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

pub trait WindowFeatureExtractor: Sync {
    fn column_names(&self) -> Vec<String>;

    fn extract(&self, window: &Window) -> Vec<f64>;
}

/// Descriptive statistics over a window's values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryFeatures;

impl SummaryFeatures {
    const COLUMNS: [&'static str; 8] = [
        "value_count",
        "value_last",
        "value_mean",
        "value_min",
        "value_max",
        "value_std",
        "value_change",
        "value_slope",
    ];
}

impl WindowFeatureExtractor for SummaryFeatures {
    fn column_names(&self) -> Vec<String> {
        Self::COLUMNS.iter().map(|name| name.to_string()).collect()
    }

    fn extract(&self, window: &Window) -> Vec<f64> {
        let values: Vec<f64> = window.values().collect();
        if values.is_empty() {
            return vec![f64::NAN; Self::COLUMNS.len()];
        }

        let n = values.len() as f64;
        let first = values[0];
        let last = values[values.len() - 1];
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance = values
            .iter()
            .map(|v| {
                let d = *v - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        vec![
            n,
            last,
            mean,
            min,
            max,
            variance.sqrt(),
            last - first,
            slope(&values, mean),
        ]
    }
}

// Least-squares slope against position 0..n.
fn slope(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let x_mean = (values.len() - 1) as f64 / 2.0;
    let mut num = 0.0;
    let mut den = 0.0;
    for (idx, v) in values.iter().enumerate() {
        let dx = idx as f64 - x_mean;
        num += dx * (*v - mean);
        den += dx * dx;
    }
    num / den
}

pub fn build_feature_schema(extractor: &dyn WindowFeatureExtractor) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = extractor
        .column_names()
        .into_iter()
        .map(|name| FeatureColumn {
            name,
            dtype: FeatureDType::F64,
        })
        .collect();
    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

/// Runs `extractor` over every window, preserving window order.
pub fn extract_features(
    windows: &[Window],
    extractor: &dyn WindowFeatureExtractor,
) -> Result<Vec<FeatureRow>, FeatureError> {
    let expected = extractor.column_names().len();

    let rows = windows
        .par_iter()
        .map(|window| {
            let values = extractor.extract(window);
            if values.len() != expected {
                return Err(FeatureError::WidthMismatch {
                    window_id: window.id.clone(),
                    expected,
                    actual: values.len(),
                });
            }
            Ok(FeatureRow {
                window_id: window.id.clone(),
                values,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        component = "features",
        event = "features.extract.finish",
        windows = windows.len(),
        column_count = expected
    );

    Ok(rows)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
