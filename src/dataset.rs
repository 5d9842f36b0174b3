//! Joins feature rows with next-step labels.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::features::{FeatureRow, FeatureSchema};
use crate::labels::LabelMap;
use crate::slicer::WindowId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub window_id: WindowId,
    pub features: Vec<f64>,
    pub label: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub schema: FeatureSchema,
    pub rows: Vec<TrainingRow>,
    /// Windows whose cutoff is the last point of their entity.
    pub unlabeled: Vec<WindowId>,
}

pub fn build_training_set(
    schema: FeatureSchema,
    feature_rows: Vec<FeatureRow>,
    labels: &LabelMap,
) -> TrainingSet {
    let mut rows = Vec::with_capacity(feature_rows.len());
    let mut unlabeled = Vec::new();

    for row in feature_rows {
        match labels.get(&row.window_id) {
            Some(label) => rows.push(TrainingRow {
                window_id: row.window_id,
                features: row.values,
                label: *label,
            }),
            None => unlabeled.push(row.window_id),
        }
    }

    info!(
        component = "dataset",
        event = "dataset.training.built",
        rows = rows.len(),
        unlabeled = unlabeled.len()
    );

    TrainingSet {
        schema,
        rows,
        unlabeled,
    }
}
