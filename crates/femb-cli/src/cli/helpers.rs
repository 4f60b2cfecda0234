use super::CliError;
use anyhow::Context;
use femb_core::common::config::{CalibrationConfig, load_calibration_config};
use femb_core::domain::{FembError, ScanDescriptor};
use femb_core::modules::serialization::{write_json_artifact, write_text_artifact};
use femb_core::modules::{
    BoardCalibration, CalibrationSession, CalibrationTable, InMemoryWaveformSource, PulseRecord,
    load_calibration_table, load_scan_file, reference_pipeline,
};
use std::fs;
use std::path::{Path, PathBuf};

pub(super) const REPORT_FILE: &str = "report.json";
pub(super) const PULSES_FILE: &str = "pulses.json";
pub(super) const CALIBRATION_FILE: &str = "calibration.json";

pub(super) fn load_scan(path: &Path) -> Result<(ScanDescriptor, InMemoryWaveformSource), CliError> {
    load_scan_file(path)
        .and_then(|scan_file| scan_file.into_parts())
        .map_err(|error| CliError::Compute(error.into()))
}

pub(super) fn load_config(path: Option<&Path>) -> Result<CalibrationConfig, CliError> {
    match path {
        Some(path) => {
            load_calibration_config(path).map_err(|error| CliError::Compute(error.into()))
        }
        None => Ok(CalibrationConfig::default()),
    }
}

pub(super) fn load_gains(path: Option<&Path>) -> Result<Option<CalibrationTable>, CliError> {
    path.map(|path| load_calibration_table(path).map_err(|error| CliError::Compute(error.into())))
        .transpose()
}

/// Session over the reference processor pipeline; a gains table switches the
/// sample filler to calibrated output.
pub(super) fn build_session(
    scan: ScanDescriptor,
    source: InMemoryWaveformSource,
    config: CalibrationConfig,
    gains: Option<CalibrationTable>,
    roi_threshold: f64,
) -> Result<CalibrationSession, CliError> {
    if !roi_threshold.is_finite() || roi_threshold <= 0.0 {
        return Err(CliError::Compute(FembError::input_validation(
            "INPUT.ROI_THRESHOLD",
            format!("ROI threshold must be positive, got {roi_threshold}"),
        )));
    }
    let pipeline = reference_pipeline(config.roi_mode, config.tick_period, roi_threshold, gains);
    Ok(CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline))
}

pub(super) fn write_calibration_outputs(
    output_dir: &Path,
    board: &BoardCalibration,
    records: &[PulseRecord],
) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory '{}'", output_dir.display()))?;

    let mut written = Vec::new();
    let report_path = output_dir.join(REPORT_FILE);
    write_json_artifact(&report_path, board)
        .with_context(|| format!("failed to write '{}'", report_path.display()))?;
    written.push(report_path);

    let pulses_path = output_dir.join(PULSES_FILE);
    write_json_artifact(&pulses_path, records)
        .with_context(|| format!("failed to write '{}'", pulses_path.display()))?;
    written.push(pulses_path);

    if let Some(table) = board.calibration.table() {
        let table_path = output_dir.join(CALIBRATION_FILE);
        write_json_artifact(&table_path, table)
            .with_context(|| format!("failed to write '{}'", table_path.display()))?;
        written.push(table_path);

        let fcl_path = output_dir.join(format!("{}.fcl", table.label));
        write_text_artifact(&fcl_path, &table.render_fcl())
            .with_context(|| format!("failed to write '{}'", fcl_path.display()))?;
        written.push(fcl_path);
    }

    Ok(written)
}
