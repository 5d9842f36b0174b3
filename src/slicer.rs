//! Rolling window slicer.
//!
//! Turns per-entity observation series into causal look-back windows, one per
//! cutoff. A window for cutoff `t` only ever holds observations with
//! timestamp `<= t` from the same entity.

use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub ts_ms_utc: i64,
    pub value: f64,
    /// Extra source fields carried unchanged into every window row.
    pub passthrough: Vec<String>,
    /// Source text of the timestamp and value fields, when read from a table.
    pub source_text: Option<SourceText>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    pub timestamp: String,
    pub value: String,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, ts_ms_utc: i64, value: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            ts_ms_utc,
            value,
            passthrough: Vec::new(),
            source_text: None,
        }
    }

    pub fn with_passthrough(mut self, passthrough: Vec<String>) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn with_source_text(
        mut self,
        timestamp: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.source_text = Some(SourceText {
            timestamp: timestamp.into(),
            value: value.into(),
        });
        self
    }

    /// Timestamp as it appeared in the source, or epoch ms when built in memory.
    pub fn timestamp_text(&self) -> String {
        match &self.source_text {
            Some(text) => text.timestamp.clone(),
            None => self.ts_ms_utc.to_string(),
        }
    }

    pub fn value_text(&self) -> String {
        match &self.source_text {
            Some(text) => text.value.clone(),
            None => self.value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId {
    pub entity_id: String,
    pub cutoff_ts_ms_utc: i64,
}

impl WindowId {
    pub fn new(entity_id: impl Into<String>, cutoff_ts_ms_utc: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            cutoff_ts_ms_utc,
        }
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity_id, self.cutoff_ts_ms_utc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub id: WindowId,
    /// Ascending by timestamp; the last entry is the cutoff observation.
    pub observations: Vec<Observation>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.observations.iter().map(|obs| obs.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceConfig {
    pub max_lookback: usize,
    pub min_lookback: usize,
    pub parallel: bool,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            max_lookback: 20,
            min_lookback: 5,
            parallel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SliceReport {
    pub input_points: u64,
    pub entities: u64,
    pub emitted_windows: u64,
    pub dropped_cutoffs: u64,
    pub output_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceOutput {
    pub windows: Vec<Window>,
    pub report: SliceReport,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SliceError {
    #[error("invalid slice configuration: {0}")]
    Configuration(String),
    #[error("duplicate timestamp {ts_ms_utc} for entity {entity_id}")]
    DuplicateTimestamp { entity_id: String, ts_ms_utc: i64 },
}

/// Slices `observations` into look-back windows.
///
/// Every emitted window holds between `min_lookback + 1` and `max_lookback`
/// observations. Cutoffs with less history are dropped.
pub fn slice(
    observations: &[Observation],
    max_lookback: usize,
    min_lookback: usize,
) -> Result<Vec<Window>, SliceError> {
    let cfg = SliceConfig {
        max_lookback,
        min_lookback,
        parallel: false,
    };
    slice_windows(observations, &cfg).map(|out| out.windows)
}

pub fn slice_windows(
    observations: &[Observation],
    cfg: &SliceConfig,
) -> Result<SliceOutput, SliceError> {
    info!(
        component = "slicer",
        event = "slice.start",
        input_points = observations.len(),
        max_lookback = cfg.max_lookback,
        min_lookback = cfg.min_lookback,
        parallel = cfg.parallel
    );

    let partitions = match validate_config(cfg).and_then(|_| partition_by_entity(observations)) {
        Ok(partitions) => partitions,
        Err(err) => {
            warn!(
                component = "slicer",
                event = "slice.error",
                error = %err
            );
            return Err(err);
        }
    };

    let per_entity: Vec<Vec<Window>> = if cfg.parallel {
        partitions
            .par_iter()
            .map(|(entity_id, series)| slice_entity(entity_id, series, cfg))
            .collect()
    } else {
        partitions
            .iter()
            .map(|(entity_id, series)| slice_entity(entity_id, series, cfg))
            .collect()
    };

    let mut report = SliceReport {
        input_points: observations.len() as u64,
        entities: partitions.len() as u64,
        ..SliceReport::default()
    };
    let mut windows = Vec::new();
    for ((entity_id, series), entity_windows) in partitions.iter().zip(per_entity) {
        debug!(
            component = "slicer",
            event = "slice.entity",
            entity_id = *entity_id,
            points = series.len(),
            windows = entity_windows.len()
        );
        report.dropped_cutoffs += (series.len() - entity_windows.len()) as u64;
        report.emitted_windows += entity_windows.len() as u64;
        report.output_rows += entity_windows.iter().map(|w| w.len() as u64).sum::<u64>();
        windows.extend(entity_windows);
    }

    info!(
        component = "slicer",
        event = "slice.finish",
        entities = report.entities,
        emitted_windows = report.emitted_windows,
        dropped_cutoffs = report.dropped_cutoffs,
        output_rows = report.output_rows
    );

    Ok(SliceOutput { windows, report })
}

pub fn slice_windows_parallel(
    observations: &[Observation],
    max_lookback: usize,
    min_lookback: usize,
) -> Result<SliceOutput, SliceError> {
    let cfg = SliceConfig {
        max_lookback,
        min_lookback,
        parallel: true,
    };
    slice_windows(observations, &cfg)
}

pub fn validate_config(cfg: &SliceConfig) -> Result<(), SliceError> {
    if cfg.max_lookback == 0 {
        return Err(SliceError::Configuration(
            "max_lookback must be > 0".to_string(),
        ));
    }

    if cfg.min_lookback >= cfg.max_lookback {
        return Err(SliceError::Configuration(format!(
            "min_lookback ({}) must be < max_lookback ({})",
            cfg.min_lookback, cfg.max_lookback
        )));
    }

    Ok(())
}

/// Groups observations by entity, each series sorted ascending by timestamp.
///
/// Entities come back in ascending id order.
pub(crate) fn partition_by_entity(
    observations: &[Observation],
) -> Result<Vec<(&str, Vec<&Observation>)>, SliceError> {
    let mut grouped: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        grouped.entry(obs.entity_id.as_str()).or_default().push(obs);
    }

    let mut partitions = Vec::with_capacity(grouped.len());
    for (entity_id, mut series) in grouped {
        series.sort_by_key(|obs| obs.ts_ms_utc);
        if let Some(pair) = series
            .windows(2)
            .find(|pair| pair[0].ts_ms_utc == pair[1].ts_ms_utc)
        {
            return Err(SliceError::DuplicateTimestamp {
                entity_id: entity_id.to_string(),
                ts_ms_utc: pair[1].ts_ms_utc,
            });
        }
        partitions.push((entity_id, series));
    }

    Ok(partitions)
}

fn slice_entity(entity_id: &str, series: &[&Observation], cfg: &SliceConfig) -> Vec<Window> {
    (cfg.min_lookback..series.len())
        .map(|cutoff_idx| {
            let start = (cutoff_idx + 1).saturating_sub(cfg.max_lookback);
            Window {
                id: WindowId::new(entity_id, series[cutoff_idx].ts_ms_utc),
                observations: series[start..=cutoff_idx]
                    .iter()
                    .map(|obs| (*obs).clone())
                    .collect(),
            }
        })
        .collect()
}
