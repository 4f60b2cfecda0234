//! Calibration run configuration.
//!
//! Every field has a default so an empty JSON object is a valid configuration.
//! Signal-scale parameters come in two sets, one for raw ADC samples and one
//! for calibrated samples, and the set is picked from the scan's sample unit.

use crate::domain::{
    CalibrationMode, FembError, PolaritySelection, RoiMode, SampleUnit, ValueKind,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalParameters {
    /// Minimum signal uncertainty in response points (protects against sticky codes).
    pub dsig_min: f64,
    /// Signal uncertainty assigned to points with under/overflow pulses.
    pub dsig_flow: f64,
    /// Allowed excursion of the unclipped prediction beyond a fitted saturation level
    /// for a point to stay in the linear refit window.
    pub saturation_margin: f64,
}

impl SignalParameters {
    pub const fn adc_defaults() -> Self {
        Self {
            dsig_min: 2.0,
            dsig_flow: 100.0,
            saturation_margin: 20.0,
        }
    }

    pub const fn calibrated_defaults() -> Self {
        Self {
            dsig_min: 0.1,
            dsig_flow: 5.0,
            saturation_margin: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitRequest {
    pub polarity: PolaritySelection,
    pub kind: ValueKind,
}

impl FitRequest {
    pub const fn new(polarity: PolaritySelection, kind: ValueKind) -> Self {
        Self { polarity, kind }
    }

    pub const CANONICAL: FitRequest = FitRequest::new(PolaritySelection::Both, ValueKind::Height);

    pub fn label(&self) -> String {
        format!("{}-{}", self.polarity.as_str(), self.kind.as_str())
    }
}

fn default_fit_requests() -> Vec<FitRequest> {
    let mut requests = Vec::with_capacity(6);
    for kind in [ValueKind::Height, ValueKind::Area] {
        for polarity in [
            PolaritySelection::Positive,
            PolaritySelection::Negative,
            PolaritySelection::Both,
        ] {
            requests.push(FitRequest::new(polarity, kind));
        }
    }
    requests
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalibrationConfig {
    pub calibration_mode: CalibrationMode,
    pub roi_mode: RoiMode,
    pub tick_period: Option<usize>,
    pub adc_signal: SignalParameters,
    pub calibrated_signal: SignalParameters,
    pub min_fit_points: usize,
    pub saturation_penalty: f64,
    pub offset_scan_steps: usize,
    pub deviation_scale: f64,
    pub deviation_tail_multiple: f64,
    pub adc_floor_margin: i64,
    pub tick_mod_efficiency_window: f64,
    pub tick_mod_signal_threshold: f64,
    pub fit_requests: Vec<FitRequest>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            calibration_mode: CalibrationMode::Uncalibrated,
            roi_mode: RoiMode::Peak,
            tick_period: None,
            adc_signal: SignalParameters::adc_defaults(),
            calibrated_signal: SignalParameters::calibrated_defaults(),
            min_fit_points: 5,
            saturation_penalty: 2.0,
            offset_scan_steps: 40,
            deviation_scale: 0.2,
            deviation_tail_multiple: 5.0,
            adc_floor_margin: 5,
            tick_mod_efficiency_window: 2.5,
            tick_mod_signal_threshold: 5.0,
            fit_requests: default_fit_requests(),
        }
    }
}

impl CalibrationConfig {
    pub fn signal_parameters(&self, unit: &SampleUnit) -> SignalParameters {
        if unit.is_calibrated() {
            self.calibrated_signal
        } else {
            self.adc_signal
        }
    }

    /// Deviations beyond this magnitude count as tail.
    pub fn deviation_tail_limit(&self) -> f64 {
        self.deviation_tail_multiple * self.deviation_scale
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read calibration config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse calibration config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for FembError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Read { .. } => FembError::io_system("IO.CONFIG_READ", error.to_string()),
            ConfigError::Parse { .. } => {
                FembError::input_validation("INPUT.CONFIG_PARSE", error.to_string())
            }
        }
    }
}

pub fn load_calibration_config(
    config_path: impl AsRef<Path>,
) -> Result<CalibrationConfig, ConfigError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
        path: config_path.to_path_buf(),
        source,
    })
}
