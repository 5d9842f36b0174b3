//! Rolling look-back windows over entity time series.
//!
//! Current implemented scope:
//! - causal per-entity window slicing with min/max look-back bounds
//! - next-step labels keyed by window cutoff
//! - per-window feature extraction seam and training-set join
//! - CSV and SQLite observation loading, CSV window/training output

mod dataset;
mod features;
mod labels;
mod observability;
mod pipeline;
mod slicer;
mod store;
mod table;

pub use dataset::{build_training_set, TrainingRow, TrainingSet};
pub use features::{
    assert_schema_compatible, build_feature_schema, extract_features, FeatureColumn, FeatureDType,
    FeatureError, FeatureRow, FeatureSchema, SummaryFeatures, WindowFeatureExtractor,
    FEATURE_SCHEMA_VERSION,
};
pub use labels::{next_value_labels, LabelMap};
pub use observability::{
    init_logging, log_app_start, log_input_selected, log_run_summary, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    pipeline_config_from_env, run_pipeline, InputSource, PipelineConfig, PipelineError,
    PipelineReport,
};
pub use slicer::{
    slice, slice_windows, slice_windows_parallel, validate_config, Observation, SliceConfig,
    SliceError, SliceOutput, SliceReport, SourceText, Window, WindowId,
};
pub use store::{load_store_observations, StoreError, StoreQuery};
pub use table::{
    parse_timestamp_ms, read_observations_csv, write_training_csv, write_windows_csv,
    ObservationCsvConfig, ObservationSchema, ObservationTable, TableError, LABEL_COLUMN,
    WINDOW_CUTOFF_COLUMN, WINDOW_ENTITY_COLUMN,
};
