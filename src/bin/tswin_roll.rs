use tswin::{
    init_logging, log_app_start, log_run_summary, logging_config_from_env,
    pipeline_config_from_env, run_pipeline,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = pipeline_config_from_env()?;
    let report = run_pipeline(&cfg)?;
    log_run_summary(&report);

    println!(
        "windows={} window_rows={} dropped_cutoffs={} training_rows={} unlabeled={}",
        report.slice.emitted_windows,
        report.window_rows_written,
        report.slice.dropped_cutoffs,
        report.training_rows_written,
        report.unlabeled_windows
    );

    Ok(())
}
