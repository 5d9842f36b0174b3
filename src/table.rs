//! CSV observation tables in, fan-out window tables out.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::dataset::TrainingSet;
use crate::slicer::{Observation, Window};

pub const WINDOW_ENTITY_COLUMN: &str = "window_entity_id";
pub const WINDOW_CUTOFF_COLUMN: &str = "window_cutoff_ts_ms_utc";
pub const LABEL_COLUMN: &str = "label";

const DEFAULT_ENTITY_COLUMN_NAME: &str = "entity_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationCsvConfig {
    /// `None` reads the whole file as one series named `default_entity_id`.
    pub entity_column: Option<String>,
    pub timestamp_column: String,
    pub value_column: String,
    pub default_entity_id: String,
}

impl Default for ObservationCsvConfig {
    fn default() -> Self {
        Self {
            entity_column: None,
            timestamp_column: "timestamp".to_string(),
            value_column: "value".to_string(),
            default_entity_id: "series".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSchema {
    pub entity_column: Option<String>,
    pub timestamp_column: String,
    pub value_column: String,
    pub passthrough_columns: Vec<String>,
}

impl ObservationSchema {
    pub fn core(entity_column: &str, timestamp_column: &str, value_column: &str) -> Self {
        Self {
            entity_column: Some(entity_column.to_string()),
            timestamp_column: timestamp_column.to_string(),
            value_column: value_column.to_string(),
            passthrough_columns: Vec::new(),
        }
    }

    /// Column names of the window table, in write order.
    pub fn window_header(&self) -> Vec<String> {
        let mut header = vec![
            WINDOW_ENTITY_COLUMN.to_string(),
            WINDOW_CUTOFF_COLUMN.to_string(),
            self.entity_column
                .clone()
                .unwrap_or_else(|| DEFAULT_ENTITY_COLUMN_NAME.to_string()),
            self.timestamp_column.clone(),
            self.value_column.clone(),
        ];
        header.extend(self.passthrough_columns.iter().cloned());
        header
    }

    /// Every window table column name must be unique.
    pub fn check_window_header(&self) -> Result<(), TableError> {
        let mut seen = HashSet::new();
        for column in self.window_header() {
            if !seen.insert(column.clone()) {
                return Err(TableError::ColumnCollision { column });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationTable {
    pub schema: ObservationSchema,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column '{column}' in header")]
    MissingColumn { column: String },
    #[error("{}: failed to parse field {field} value '{value}'", at_line(.line))]
    ParseField {
        line: Option<u64>,
        field: String,
        value: String,
    },
    #[error("{}: unrecognized timestamp '{value}'", at_line(.line))]
    InvalidTimestamp { line: Option<u64>, value: String },
    #[error("column '{column}' appears twice in the window table header")]
    ColumnCollision { column: String },
    #[error("window row has {found} passthrough fields, schema expects {expected}")]
    PassthroughWidth { found: usize, expected: usize },
}

pub fn read_observations_csv(
    path: &Path,
    cfg: &ObservationCsvConfig,
) -> Result<ObservationTable, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let header = reader.headers()?.clone();

    let entity_idx = cfg
        .entity_column
        .as_deref()
        .map(|name| column_index(&header, name))
        .transpose()?;
    let ts_idx = column_index(&header, &cfg.timestamp_column)?;
    let value_idx = column_index(&header, &cfg.value_column)?;

    let core = [Some(ts_idx), Some(value_idx), entity_idx];
    let passthrough_idx: Vec<usize> = (0..header.len())
        .filter(|idx| !core.contains(&Some(*idx)))
        .collect();

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line());

        let entity_id = match entity_idx {
            Some(idx) => record.get(idx).unwrap_or_default().to_string(),
            None => cfg.default_entity_id.clone(),
        };
        let raw_ts = record.get(ts_idx).unwrap_or_default();
        let ts_ms_utc =
            parse_timestamp_ms(raw_ts).ok_or_else(|| TableError::InvalidTimestamp {
                line,
                value: raw_ts.to_string(),
            })?;
        let raw_value = record.get(value_idx).unwrap_or_default();
        let value = raw_value
            .parse::<f64>()
            .map_err(|_| TableError::ParseField {
                line,
                field: cfg.value_column.clone(),
                value: raw_value.to_string(),
            })?;
        let passthrough = passthrough_idx
            .iter()
            .map(|idx| record.get(*idx).unwrap_or_default().to_string())
            .collect();

        observations.push(
            Observation::new(entity_id, ts_ms_utc, value)
                .with_passthrough(passthrough)
                .with_source_text(raw_ts, raw_value),
        );
    }

    let schema = ObservationSchema {
        entity_column: cfg.entity_column.clone(),
        timestamp_column: cfg.timestamp_column.clone(),
        value_column: cfg.value_column.clone(),
        passthrough_columns: passthrough_idx
            .iter()
            .map(|idx| header.get(*idx).unwrap_or_default().to_string())
            .collect(),
    };
    schema.check_window_header()?;

    info!(
        component = "table",
        event = "table.read.finish",
        path = %path.display(),
        rows = observations.len(),
        passthrough_columns = schema.passthrough_columns.len()
    );

    Ok(ObservationTable {
        schema,
        observations,
    })
}

/// Writes one row per (window, member observation). Returns the row count.
pub fn write_windows_csv(
    path: &Path,
    schema: &ObservationSchema,
    windows: &[Window],
) -> Result<u64, TableError> {
    schema.check_window_header()?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(schema.window_header())?;

    let mut rows = 0_u64;
    for window in windows {
        let cutoff = window.id.cutoff_ts_ms_utc.to_string();
        for obs in &window.observations {
            if obs.passthrough.len() != schema.passthrough_columns.len() {
                return Err(TableError::PassthroughWidth {
                    found: obs.passthrough.len(),
                    expected: schema.passthrough_columns.len(),
                });
            }
            let mut record = vec![
                window.id.entity_id.clone(),
                cutoff.clone(),
                obs.entity_id.clone(),
                obs.timestamp_text(),
                obs.value_text(),
            ];
            record.extend(obs.passthrough.iter().cloned());
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;

    info!(
        component = "table",
        event = "table.windows.written",
        path = %path.display(),
        windows = windows.len(),
        rows
    );

    Ok(rows)
}

pub fn write_training_csv(path: &Path, set: &TrainingSet) -> Result<u64, TableError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![
        WINDOW_ENTITY_COLUMN.to_string(),
        WINDOW_CUTOFF_COLUMN.to_string(),
    ];
    header.extend(set.schema.columns.iter().map(|column| column.name.clone()));
    header.push(LABEL_COLUMN.to_string());
    writer.write_record(&header)?;

    for row in &set.rows {
        let mut record = vec![
            row.window_id.entity_id.clone(),
            row.window_id.cutoff_ts_ms_utc.to_string(),
        ];
        record.extend(row.features.iter().map(|v| v.to_string()));
        record.push(row.label.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        component = "table",
        event = "table.training.written",
        path = %path.display(),
        rows = set.rows.len()
    );

    Ok(set.rows.len() as u64)
}

/// Accepts epoch milliseconds, RFC 3339, `%Y-%m-%d %H:%M:%S` or `%Y-%m-%d`.
///
/// Naive forms are read as UTC.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn at_line(line: &Option<u64>) -> String {
    match line {
        Some(line) => format!("line {line}"),
        None => "unknown line".to_string(),
    }
}

fn column_index(header: &StringRecord, name: &str) -> Result<usize, TableError> {
    header
        .iter()
        .position(|column| column == name)
        .ok_or_else(|| TableError::MissingColumn {
            column: name.to_string(),
        })
}
