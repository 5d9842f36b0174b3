//! Batch run: load observations, slice, write windows and training pairs.

use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::build_training_set;
use crate::features::{build_feature_schema, extract_features, FeatureError, SummaryFeatures};
use crate::labels::next_value_labels;
use crate::observability::{log_input_selected, parse_bool};
use crate::slicer::{slice_windows, SliceConfig, SliceError, SliceReport};
use crate::store::{load_store_observations, StoreError, StoreQuery};
use crate::table::{
    read_observations_csv, write_training_csv, write_windows_csv, ObservationCsvConfig,
    ObservationTable, TableError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    Csv {
        path: PathBuf,
        columns: ObservationCsvConfig,
    },
    Store {
        path: PathBuf,
        query: StoreQuery,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input: InputSource,
    pub slice: SliceConfig,
    pub windows_output: PathBuf,
    /// Labeled feature rows; skipped when unset.
    pub training_output: Option<PathBuf>,
    pub report_output: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: InputSource::Csv {
                path: PathBuf::from("observations.csv"),
                columns: ObservationCsvConfig::default(),
            },
            slice: SliceConfig::default(),
            windows_output: PathBuf::from("windows.csv"),
            training_output: None,
            report_output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub slice: SliceReport,
    pub window_rows_written: u64,
    pub labeled_windows: u64,
    pub unlabeled_windows: u64,
    pub training_rows_written: u64,
    pub feature_fingerprint: Option<String>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Slice(#[from] SliceError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builds a config from `TSWIN_*` variables on top of the defaults.
pub fn pipeline_config_from_env() -> Result<PipelineConfig, PipelineError> {
    let defaults = PipelineConfig::default();

    let csv_path = env_value("TSWIN_INPUT_CSV");
    let store_path = env_value("TSWIN_INPUT_STORE");
    let entity_column = env_value("TSWIN_ENTITY_COLUMN");
    let timestamp_column = env_value("TSWIN_TIMESTAMP_COLUMN");
    let value_column = env_value("TSWIN_VALUE_COLUMN");

    let input = match (csv_path, store_path) {
        (Some(_), Some(_)) => {
            return Err(PipelineError::InvalidConfig(
                "set only one of TSWIN_INPUT_CSV and TSWIN_INPUT_STORE".to_string(),
            ))
        }
        (_, Some(path)) => {
            let base = StoreQuery::default();
            InputSource::Store {
                path: PathBuf::from(path),
                query: StoreQuery {
                    table: env_value("TSWIN_STORE_TABLE").unwrap_or(base.table),
                    entity_column: entity_column.unwrap_or(base.entity_column),
                    timestamp_column: timestamp_column.unwrap_or(base.timestamp_column),
                    value_column: value_column.unwrap_or(base.value_column),
                },
            }
        }
        (csv_path, None) => {
            let base = ObservationCsvConfig::default();
            InputSource::Csv {
                path: csv_path
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("observations.csv")),
                columns: ObservationCsvConfig {
                    entity_column,
                    timestamp_column: timestamp_column.unwrap_or(base.timestamp_column),
                    value_column: value_column.unwrap_or(base.value_column),
                    default_entity_id: env_value("TSWIN_DEFAULT_ENTITY")
                        .unwrap_or(base.default_entity_id),
                },
            }
        }
    };

    let slice = SliceConfig {
        max_lookback: env_usize("TSWIN_MAX_LOOKBACK")?.unwrap_or(defaults.slice.max_lookback),
        min_lookback: env_usize("TSWIN_MIN_LOOKBACK")?.unwrap_or(defaults.slice.min_lookback),
        parallel: match env_value("TSWIN_PARALLEL") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                PipelineError::InvalidConfig(format!("TSWIN_PARALLEL must be a bool, got '{raw}'"))
            })?,
            None => defaults.slice.parallel,
        },
    };

    Ok(PipelineConfig {
        input,
        slice,
        windows_output: env_value("TSWIN_WINDOWS_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or(defaults.windows_output),
        training_output: env_value("TSWIN_TRAINING_OUTPUT").map(PathBuf::from),
        report_output: env_value("TSWIN_REPORT_OUTPUT").map(PathBuf::from),
    })
}

/// Runs one batch. Outputs are written next to their targets as `*.partial`
/// files and renamed into place only once every step has succeeded, so a
/// failed run leaves no window, training or report file behind.
pub fn run_pipeline(cfg: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    info!(
        component = "pipeline",
        event = "pipeline.start",
        windows_output = %cfg.windows_output.display(),
        training_output = cfg.training_output.is_some(),
        report_output = cfg.report_output.is_some()
    );

    let table = load_input(&cfg.input)?;
    let sliced = slice_windows(&table.observations, &cfg.slice)?;

    let mut staged = StagedOutputs::default();
    let window_rows_written = write_windows_csv(
        &staged.stage(&cfg.windows_output),
        &table.schema,
        &sliced.windows,
    )?;

    let mut report = PipelineReport {
        slice: sliced.report,
        window_rows_written,
        ..PipelineReport::default()
    };

    if let Some(training_output) = &cfg.training_output {
        let labels = next_value_labels(&table.observations)?;
        let extractor = SummaryFeatures;
        let schema = build_feature_schema(&extractor);
        let feature_rows = extract_features(&sliced.windows, &extractor)?;
        let training = build_training_set(schema, feature_rows, &labels);

        if training.rows.is_empty() {
            warn!(
                component = "pipeline",
                event = "pipeline.training.empty",
                windows = sliced.windows.len()
            );
        }

        report.labeled_windows = training.rows.len() as u64;
        report.unlabeled_windows = training.unlabeled.len() as u64;
        report.feature_fingerprint = Some(training.schema.fingerprint.clone());
        report.training_rows_written =
            write_training_csv(&staged.stage(training_output), &training)?;
    }

    if let Some(report_output) = &cfg.report_output {
        let mut writer = BufWriter::new(File::create(staged.stage(report_output))?);
        serde_json::to_writer_pretty(&mut writer, &report)?;
        writer.flush()?;
    }

    staged.commit()?;

    info!(
        component = "pipeline",
        event = "pipeline.finish",
        windows = report.slice.emitted_windows,
        window_rows_written = report.window_rows_written,
        training_rows_written = report.training_rows_written
    );

    Ok(report)
}

/// Output files written under a temporary name. Uncommitted ones are removed
/// on drop.
#[derive(Default)]
struct StagedOutputs {
    pending: Vec<(PathBuf, PathBuf)>,
}

impl StagedOutputs {
    fn stage(&mut self, target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("output"));
        name.push(".partial");
        let staged = target.with_file_name(name);
        self.pending.push((staged.clone(), target.to_path_buf()));
        staged
    }

    fn commit(mut self) -> io::Result<()> {
        while let Some((staged, target)) = self.pending.first() {
            fs::rename(staged, target)?;
            self.pending.remove(0);
        }
        Ok(())
    }
}

impl Drop for StagedOutputs {
    fn drop(&mut self) {
        for (staged, _) in &self.pending {
            if staged.exists() {
                if let Err(err) = fs::remove_file(staged) {
                    warn!(
                        component = "pipeline",
                        event = "pipeline.cleanup.failed",
                        path = %staged.display(),
                        error = %err
                    );
                }
            }
        }
    }
}

fn load_input(input: &InputSource) -> Result<ObservationTable, PipelineError> {
    match input {
        InputSource::Csv { path, columns } => {
            log_input_selected("csv", path, None);
            Ok(read_observations_csv(path, columns)?)
        }
        InputSource::Store { path, query } => {
            log_input_selected("sqlite", path, Some(&query.table));
            Ok(load_store_observations(path, query)?)
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn env_usize(key: &str) -> Result<Option<usize>, PipelineError> {
    env_value(key)
        .map(|raw| {
            raw.parse::<usize>().map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "{key} must be a non-negative integer, got '{raw}'"
                ))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_env_vars;

    const ALL_VARS: [&str; 13] = [
        "TSWIN_INPUT_CSV",
        "TSWIN_INPUT_STORE",
        "TSWIN_STORE_TABLE",
        "TSWIN_ENTITY_COLUMN",
        "TSWIN_TIMESTAMP_COLUMN",
        "TSWIN_VALUE_COLUMN",
        "TSWIN_DEFAULT_ENTITY",
        "TSWIN_MAX_LOOKBACK",
        "TSWIN_MIN_LOOKBACK",
        "TSWIN_PARALLEL",
        "TSWIN_WINDOWS_OUTPUT",
        "TSWIN_TRAINING_OUTPUT",
        "TSWIN_REPORT_OUTPUT",
    ];

    fn with_only(vars: &[(&str, &str)]) -> Result<PipelineConfig, PipelineError> {
        let mut all: Vec<(&str, Option<&str>)> =
            ALL_VARS.iter().map(|key| (*key, None)).collect();
        for (key, value) in vars {
            if let Some(slot) = all.iter_mut().find(|(k, _)| k == key) {
                slot.1 = Some(*value);
            }
        }
        with_env_vars(&all, pipeline_config_from_env)
    }

    #[test]
    fn staged_outputs_are_renamed_on_commit_and_removed_on_drop() {
        let dir = tempfile::tempdir().expect("temp dir");
        let kept = dir.path().join("kept.csv");
        let dropped = dir.path().join("dropped.csv");

        let mut staged = StagedOutputs::default();
        let path = staged.stage(&kept);
        assert_eq!(path, dir.path().join("kept.csv.partial"));
        fs::write(&path, "a\n").expect("write");
        staged.commit().expect("commit");
        assert_eq!(fs::read_to_string(&kept).expect("read"), "a\n");
        assert!(!path.exists());

        let mut staged = StagedOutputs::default();
        let path = staged.stage(&dropped);
        fs::write(&path, "b\n").expect("write");
        drop(staged);
        assert!(!path.exists());
        assert!(!dropped.exists());
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_only(&[]).expect("defaults are valid");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn store_input_uses_store_column_defaults() {
        let cfg = with_only(&[
            ("TSWIN_INPUT_STORE", "prices.sqlite"),
            ("TSWIN_STORE_TABLE", "daily_close"),
            ("TSWIN_MAX_LOOKBACK", "30"),
            ("TSWIN_MIN_LOOKBACK", "0"),
            ("TSWIN_PARALLEL", "on"),
        ])
        .expect("store config is valid");

        assert_eq!(
            cfg.input,
            InputSource::Store {
                path: PathBuf::from("prices.sqlite"),
                query: StoreQuery {
                    table: "daily_close".to_string(),
                    ..StoreQuery::default()
                },
            }
        );
        assert_eq!(cfg.slice.max_lookback, 30);
        assert_eq!(cfg.slice.min_lookback, 0);
        assert!(cfg.slice.parallel);
    }

    #[test]
    fn csv_entity_column_is_optional() {
        let cfg = with_only(&[
            ("TSWIN_INPUT_CSV", "aapl.csv"),
            ("TSWIN_TIMESTAMP_COLUMN", "Date"),
            ("TSWIN_VALUE_COLUMN", "Close"),
            ("TSWIN_DEFAULT_ENTITY", "AAPL"),
        ])
        .expect("csv config is valid");

        match cfg.input {
            InputSource::Csv { path, columns } => {
                assert_eq!(path, PathBuf::from("aapl.csv"));
                assert_eq!(columns.entity_column, None);
                assert_eq!(columns.timestamp_column, "Date");
                assert_eq!(columns.value_column, "Close");
                assert_eq!(columns.default_entity_id, "AAPL");
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[test]
    fn both_inputs_is_an_error() {
        let err = with_only(&[
            ("TSWIN_INPUT_CSV", "a.csv"),
            ("TSWIN_INPUT_STORE", "b.sqlite"),
        ])
        .expect_err("ambiguous input");
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn unparseable_numbers_and_bools_are_errors() {
        let err = with_only(&[("TSWIN_MAX_LOOKBACK", "-3")]).expect_err("negative lookback");
        assert!(matches!(err, PipelineError::InvalidConfig(_)));

        let err = with_only(&[("TSWIN_PARALLEL", "sometimes")]).expect_err("bad bool");
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
