use super::CliError;
use super::helpers::*;
use anyhow::Context;
use femb_core::domain::FembError;
use femb_core::modules::{CalibrationStatus, StickyCodeMetrics};
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
pub(super) struct CalibrateArgs {
    /// JSON scan file holding the scan descriptor and raw waveforms
    #[arg(long)]
    scan: PathBuf,

    /// Calibration config JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Existing calibration table used to calibrate the samples
    #[arg(long)]
    gains: Option<PathBuf>,

    /// ROI threshold in sample units
    #[arg(long, default_value_t = 20.0)]
    roi_threshold: f64,

    /// Directory receiving the report, pulse records and constants
    #[arg(long)]
    output_dir: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct StickyArgs {
    /// Raw ADC codes
    #[arg(required = true, value_name = "CODE")]
    codes: Vec<u16>,
}

#[derive(clap::Args)]
pub(super) struct TickmodArgs {
    /// JSON scan file holding the scan descriptor and raw waveforms
    #[arg(long)]
    scan: PathBuf,

    #[arg(long)]
    channel: usize,

    #[arg(long)]
    event: usize,

    /// Injection period in ticks
    #[arg(long)]
    period: usize,

    /// Calibration config JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Existing calibration table used to calibrate the samples
    #[arg(long)]
    gains: Option<PathBuf>,

    /// ROI threshold in sample units
    #[arg(long, default_value_t = 20.0)]
    roi_threshold: f64,
}

pub(super) fn run_calibrate_command(args: CalibrateArgs) -> Result<i32, CliError> {
    let (scan, source) = load_scan(&args.scan)?;
    let config = load_config(args.config.as_deref())?;
    let gains = load_gains(args.gains.as_deref())?;
    let mut session = build_session(scan, source, config, gains, args.roi_threshold)?;

    let board = session.process_all()?;
    let records = session.pulse_records()?;
    let written = write_calibration_outputs(&args.output_dir, &board, &records)?;
    for path in &written {
        info!(path = %path.display(), "wrote artifact");
    }

    let failed = board.failed_channels().count();
    println!(
        "{}: {}/{} channels processed, {} pulse records",
        board.label,
        board.channels.len() - failed,
        board.channels.len(),
        records.len()
    );
    if let Some(gain) = &board.gain {
        let nominal = board
            .nominal_gain
            .map(|nominal| format!(", nominal {nominal:.4}"))
            .unwrap_or_default();
        println!(
            "gain [{}/ke]: mean {:.4}, rms {:.4} over {} channels{nominal}",
            board.sample_unit.as_deref().unwrap_or("ADC count"),
            gain.summary.mean,
            gain.summary.rms,
            gain.summary.count
        );
    }
    match &board.calibration {
        CalibrationStatus::Complete { table } => {
            println!("calibration table complete: {}.fcl", table.label);
            Ok(0)
        }
        CalibrationStatus::NotApplicable => {
            println!("samples are calibrated; no constants produced");
            Ok(0)
        }
        CalibrationStatus::Incomplete { missing } => {
            println!(
                "calibration table incomplete: {} missing (channel, field) pairs",
                missing.len()
            );
            Ok(1)
        }
    }
}

pub(super) fn run_sticky_command(args: StickyArgs) -> Result<i32, CliError> {
    let metrics = StickyCodeMetrics::from_codes(&args.codes);
    let rendered =
        serde_json::to_string_pretty(&metrics).context("failed to render sticky metrics")?;
    println!("{rendered}");
    Ok(0)
}

pub(super) fn run_tickmod_command(args: TickmodArgs) -> Result<i32, CliError> {
    if args.period == 0 {
        return Err(CliError::Usage(
            "Invalid period '0'; expected a positive tick count.".to_string(),
        ));
    }

    let (scan, source) = load_scan(&args.scan)?;
    let mut config = load_config(args.config.as_deref())?;
    config.tick_period = Some(args.period);
    let gains = load_gains(args.gains.as_deref())?;
    let mut session = build_session(scan, source, config, gains, args.roi_threshold)?;

    let summary = session.process_channel_event(args.channel, args.event)?;
    let tick_mod = summary.tick_mod.as_ref().ok_or_else(|| {
        CliError::Compute(FembError::computation(
            "RUN.TICKMOD_EMPTY",
            format!(
                "channel {} event {} has no samples to fold",
                args.channel, args.event
            ),
        ))
    })?;
    let rendered =
        serde_json::to_string_pretty(tick_mod).context("failed to render tick-mod summary")?;
    println!("{rendered}");
    Ok(0)
}
