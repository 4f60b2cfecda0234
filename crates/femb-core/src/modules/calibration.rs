//! Board calibration constants: per channel inverse gain and ADC underflow floor.

use super::serialization::format_fixed_f64;
use crate::domain::FembError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const CALIBRATION_UNIT: &str = "ke/ADC count";
const CALIBRATION_TOOL_TYPE: &str = "FloatArrayGainCalibration";
const GAIN_PRECISION: usize = 6;
/// Fitted levels within this of an integer count round down to it.
const FLOOR_ROUNDING_TOLERANCE: f64 = 1.0e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationEntry {
    pub channel: usize,
    /// ke per ADC count.
    pub inverse_gain: f64,
    pub adc_floor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationTable {
    pub label: String,
    pub unit: String,
    pub entries: Vec<CalibrationEntry>,
}

impl CalibrationTable {
    pub fn entry(&self, channel: usize) -> Option<&CalibrationEntry> {
        self.entries.iter().find(|entry| entry.channel == channel)
    }

    pub fn render_fcl(&self) -> String {
        let gains: Vec<String> = self
            .entries
            .iter()
            .map(|entry| format_fixed_f64(entry.inverse_gain, 0, GAIN_PRECISION))
            .collect();
        let floors: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.adc_floor.to_string())
            .collect();

        let mut rendered = String::new();
        let _ = writeln!(rendered, "{}: {{", self.label);
        let _ = writeln!(rendered, "  tool_type: {CALIBRATION_TOOL_TYPE}");
        let _ = writeln!(rendered, "  Unit: \"{}\"", self.unit);
        let _ = writeln!(rendered, "  GainDefault: 0.0");
        let _ = writeln!(rendered, "  Gains: [{}]", gains.join(", "));
        let _ = writeln!(rendered, "  AdcUnderflowDefault: 0");
        let _ = writeln!(rendered, "  AdcUnderflows: [{}]", floors.join(", "));
        rendered.push_str("}\n");
        rendered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CalibrationField {
    /// Channel processing failed before a fit was attempted.
    Channel,
    Gain,
    LowSaturation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingCalibration {
    pub channel: usize,
    pub field: CalibrationField,
}

/// Canonical-fit values for one channel; `None` fields are missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConstants {
    pub channel: usize,
    pub processed: bool,
    pub gain: Option<f64>,
    pub raw_low_saturation: Option<f64>,
}

/// Every (channel, field) pair that kept the table from being built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("calibration table incomplete: {} missing (channel, field) pairs", missing.len())]
pub struct IncompleteCalibration {
    pub missing: Vec<MissingCalibration>,
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationLoadError {
    #[error("failed to read calibration table '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse calibration table '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<CalibrationLoadError> for FembError {
    fn from(error: CalibrationLoadError) -> Self {
        match error {
            CalibrationLoadError::Read { .. } => {
                FembError::io_system("IO.CALIBRATION_READ", error.to_string())
            }
            CalibrationLoadError::Parse { .. } => {
                FembError::input_validation("INPUT.CALIBRATION_PARSE", error.to_string())
            }
        }
    }
}

/// Every channel must have a nonzero gain and a low saturation level; otherwise
/// all missing (channel, field) pairs are reported and no table is produced.
///
/// The inverse gain uses the gain magnitude, so scans with an inverted polarity
/// convention (negative fitted gain) yield the same constants as normal ones.
pub fn build_calibration_table(
    label: impl Into<String>,
    channels: &[ChannelConstants],
    adc_floor_margin: i64,
) -> Result<CalibrationTable, IncompleteCalibration> {
    let mut ordered = channels.to_vec();
    ordered.sort_by_key(|constants| constants.channel);

    let mut entries = Vec::with_capacity(ordered.len());
    let mut missing = Vec::new();
    for constants in &ordered {
        if !constants.processed {
            missing.push(MissingCalibration {
                channel: constants.channel,
                field: CalibrationField::Channel,
            });
            continue;
        }
        let gain = constants
            .gain
            .map(f64::abs)
            .filter(|gain| *gain > 0.0 && gain.is_finite());
        if gain.is_none() {
            missing.push(MissingCalibration {
                channel: constants.channel,
                field: CalibrationField::Gain,
            });
        }
        let low = constants.raw_low_saturation.filter(|low| low.is_finite());
        if low.is_none() {
            missing.push(MissingCalibration {
                channel: constants.channel,
                field: CalibrationField::LowSaturation,
            });
        }
        if let (Some(gain), Some(low)) = (gain, low) {
            entries.push(CalibrationEntry {
                channel: constants.channel,
                inverse_gain: 1.0 / gain,
                adc_floor: (low - FLOOR_ROUNDING_TOLERANCE).ceil() as i64 + adc_floor_margin,
            });
        }
    }

    if !missing.is_empty() {
        return Err(IncompleteCalibration { missing });
    }
    Ok(CalibrationTable {
        label: label.into(),
        unit: CALIBRATION_UNIT.to_string(),
        entries,
    })
}

pub fn load_calibration_table(
    path: impl AsRef<Path>,
) -> Result<CalibrationTable, CalibrationLoadError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| CalibrationLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| CalibrationLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
