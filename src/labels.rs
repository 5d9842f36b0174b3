//! Next-step labels for window cutoffs.

use std::collections::BTreeMap;

use tracing::info;

use crate::slicer::{partition_by_entity, Observation, SliceError, WindowId};

/// Cutoff -> value observed at the entity's next timestamp.
pub type LabelMap = BTreeMap<WindowId, f64>;

/// Builds the label for every cutoff that has a successor in its entity.
///
/// The last observation of each entity gets no entry.
pub fn next_value_labels(observations: &[Observation]) -> Result<LabelMap, SliceError> {
    let partitions = partition_by_entity(observations)?;

    let mut labels = LabelMap::new();
    for (entity_id, series) in &partitions {
        for pair in series.windows(2) {
            labels.insert(WindowId::new(*entity_id, pair[0].ts_ms_utc), pair[1].value);
        }
    }

    info!(
        component = "labels",
        event = "labels.built",
        entities = partitions.len(),
        labels = labels.len()
    );

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_next_value_not_current() {
        let obs = vec![
            Observation::new("AAPL", 3_000, 13.0),
            Observation::new("AAPL", 1_000, 11.0),
            Observation::new("AAPL", 2_000, 12.0),
        ];
        let labels = next_value_labels(&obs).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&WindowId::new("AAPL", 1_000)], 12.0);
        assert_eq!(labels[&WindowId::new("AAPL", 2_000)], 13.0);
        assert!(!labels.contains_key(&WindowId::new("AAPL", 3_000)));
    }

    #[test]
    fn labels_never_cross_entities() {
        let obs = vec![
            Observation::new("AAPL", 1_000, 1.0),
            Observation::new("GOOG", 2_000, 2.0),
        ];
        let labels = next_value_labels(&obs).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn duplicate_timestamps_fail() {
        let obs = vec![
            Observation::new("AAPL", 1_000, 1.0),
            Observation::new("AAPL", 1_000, 2.0),
        ];
        assert!(matches!(
            next_value_labels(&obs),
            Err(SliceError::DuplicateTimestamp { .. })
        ));
    }
}
