pub mod errors;
pub mod scan;

pub use errors::{ExitStatus, FembError, FembErrorCategory, FembResult};
pub use scan::{ChargeRule, ScanDescriptor};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub const ALL: [Polarity; 2] = [Polarity::Positive, Polarity::Negative];

    pub const fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolaritySelection {
    Positive,
    Negative,
    Both,
}

impl PolaritySelection {
    pub fn polarities(self) -> &'static [Polarity] {
        match self {
            Self::Positive => &[Polarity::Positive],
            Self::Negative => &[Polarity::Negative],
            Self::Both => &Polarity::ALL,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Height,
    Area,
}

impl ValueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Height => "height",
            Self::Area => "area",
        }
    }
}

/// How the sample stream is calibrated before ROI finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Signal is ADC minus pedestal.
    #[default]
    Uncalibrated,
    /// Signal is calibrated by pulse height.
    Height,
    /// Signal is calibrated by pulse area.
    Area,
}

impl CalibrationMode {
    pub const fn is_calibrated(self) -> bool {
        !matches!(self, Self::Uncalibrated)
    }

    /// Value kind compared against the expected charge in calibrated scans.
    pub const fn deviation_kind(self) -> Option<ValueKind> {
        match self {
            Self::Uncalibrated => None,
            Self::Height => Some(ValueKind::Height),
            Self::Area => Some(ValueKind::Area),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uncalibrated => "uncalibrated",
            Self::Height => "height",
            Self::Area => "area",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PulseSource {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Internal,
    #[default]
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolarityConvention {
    #[default]
    Normal,
    Inverted,
}

impl PolarityConvention {
    /// Sign applied to the expected charge of a pulse.
    pub const fn charge_sign(self, polarity: Polarity) -> f64 {
        match self {
            Self::Normal => polarity.sign(),
            Self::Inverted => -polarity.sign(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoiMode {
    None,
    #[default]
    Peak,
    TickMod,
}

impl RoiMode {
    pub const fn finds_rois(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Unit of the processed sample stream, declared once per scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleUnit {
    AdcCount,
    Calibrated(String),
}

impl SampleUnit {
    pub const ADC_COUNT_LABEL: &'static str = "ADC count";

    pub fn parse(label: &str) -> Self {
        let normalized = label.trim();
        let lower = normalized.to_ascii_lowercase();
        if lower == "adc count" || lower == "adc counts" || lower == "adc" {
            Self::AdcCount
        } else {
            Self::Calibrated(normalized.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::AdcCount => Self::ADC_COUNT_LABEL,
            Self::Calibrated(label) => label,
        }
    }

    pub const fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated(_))
    }
}

impl Display for SampleUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
